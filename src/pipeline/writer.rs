//! Batch writer stage
//!
//! Two ways of committing rows: one transaction per page, paired with a
//! reader worker, or one transaction per whole file.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::reader::read_file;
use crate::database::{TrackBatch, TrackStore};
use crate::errors::ImportError;
use crate::models::Page;

/// Commit one page as a single transaction.
///
/// Returns the number of rows committed: the page size on success, zero if
/// any row failed or the commit was rejected.
pub async fn commit_page<S: TrackStore>(store: &S, page: &Page) -> u64 {
    let mut batch = match store.begin().await {
        Ok(batch) => batch,
        Err(e) => {
            error!("Failed to begin transaction for {}: {}", page.source.display(), e);
            return 0;
        }
    };

    if let Err(e) = push_rows(&mut batch, page).await {
        warn!(
            "Rolling back page of {} rows from {}: {}",
            page.len(),
            page.source.display(),
            e
        );
        return 0;
    }

    match batch.commit().await {
        Ok(rows) => rows,
        Err(e) => {
            error!("Failed to commit page from {}: {}", page.source.display(), e);
            0
        }
    }
}

async fn push_rows<B: TrackBatch>(batch: &mut B, page: &Page) -> Result<(), ImportError> {
    for row in &page.rows {
        batch.push(row).await?;
    }
    Ok(())
}

/// Writer worker bound to one reader's page sequence.
///
/// Emits the committed row count of every page on the returned channel,
/// which closes when the pages run out or the import is cancelled. A page
/// whose transaction has started always runs to commit or rollback.
pub fn spawn_page_writer<S: TrackStore>(
    worker: usize,
    store: S,
    mut pages: mpsc::Receiver<Page>,
    cancel: CancellationToken,
) -> (mpsc::Receiver<u64>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1);
    let handle = tokio::spawn(async move {
        loop {
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                page = pages.recv() => match page {
                    Some(page) => page,
                    None => break,
                },
            };

            let rows = commit_page(&store, &page).await;
            if tx.send(rows).await.is_err() {
                break;
            }
        }
        debug!(worker, "Writer finished");
    });
    (rx, handle)
}

/// Read and insert a whole file inside one transaction.
///
/// The file is the unit of failure: a bad row, a read that stops early or
/// a cancelled import rolls back everything read from it.
pub async fn import_file<S: TrackStore>(
    store: &S,
    path: PathBuf,
    page_size: usize,
    cancel: &CancellationToken,
) -> u64 {
    let mut batch = match store.begin().await {
        Ok(batch) => batch,
        Err(e) => {
            error!("Failed to begin transaction for {}: {}", path.display(), e);
            return 0;
        }
    };

    let (tx, mut pages) = mpsc::channel::<Page>(1);
    let reader = {
        let path = path.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || read_file(&path, page_size, &cancel, &tx))
    };

    let mut failure = None;
    while let Some(page) = pages.recv().await {
        if let Err(e) = push_rows(&mut batch, &page).await {
            failure = Some(e);
            break;
        }
    }
    drop(pages);

    let summary = match reader.await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Reader task for {} failed: {}", path.display(), e);
            return 0;
        }
    };

    if let Some(e) = failure {
        warn!("Rolling back {}: {}", path.display(), e);
        return 0;
    }
    if summary.interrupted {
        warn!("Rolling back {}: file was not read to the end", path.display());
        return 0;
    }

    match batch.commit().await {
        Ok(rows) => {
            debug!(path = %path.display(), rows, "File committed");
            rows
        }
        Err(e) => {
            error!("Failed to commit {}: {}", path.display(), e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::models::RawRow;
    use std::path::Path;
    use std::sync::Arc;

    fn page(ids: &[&str]) -> Page {
        Page {
            source: Arc::from(Path::new("/data/tracks.csv")),
            rows: ids
                .iter()
                .map(|id| RawRow {
                    timestamp: "1668075025".to_string(),
                    longitude: "20.345818".to_string(),
                    latitude: "60.03802".to_string(),
                    vessel_id: id.to_string(),
                    vessel_name: "ARUNA CIHAN".to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn valid_page_commits_every_row() {
        let store = MemoryStore::new();
        assert_eq!(commit_page(&store, &page(&["1", "2", "1"])).await, 3);
        assert_eq!(store.track_count(), 3);
        assert_eq!(store.vessel_count(), 2);
    }

    #[tokio::test]
    async fn one_bad_vessel_id_rolls_back_the_page() {
        let store = MemoryStore::new();
        assert_eq!(commit_page(&store, &page(&["1", "x", "3"])).await, 0);
        assert_eq!(store.track_count(), 0);
        assert_eq!(store.vessel_count(), 0);
    }

    #[tokio::test]
    async fn rejected_commit_counts_zero() {
        let store = MemoryStore::new();
        store.reject_commits(true);
        assert_eq!(commit_page(&store, &page(&["1", "2"])).await, 0);
    }

    #[tokio::test]
    async fn page_writer_reports_each_page() {
        let store = MemoryStore::new();
        let (tx, rx) = mpsc::channel(4);
        let (mut counts, handle) =
            spawn_page_writer(0, store.clone(), rx, CancellationToken::new());

        tx.send(page(&["1", "2"])).await.unwrap();
        tx.send(page(&["bad"])).await.unwrap();
        tx.send(page(&["3"])).await.unwrap();
        drop(tx);

        let mut reported = Vec::new();
        while let Some(rows) = counts.recv().await {
            reported.push(rows);
        }
        handle.await.unwrap();

        assert_eq!(reported, vec![2, 0, 1]);
        assert_eq!(store.track_count(), 3);
    }

    #[tokio::test]
    async fn cancelled_writer_stops_pulling() {
        let store = MemoryStore::new();
        let (tx, rx) = mpsc::channel(4);
        tx.send(page(&["1"])).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (mut counts, handle) = spawn_page_writer(0, store.clone(), rx, cancel);

        assert_eq!(counts.recv().await, None);
        handle.await.unwrap();
        assert_eq!(store.track_count(), 0);
    }

    #[tokio::test]
    async fn whole_file_is_one_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.csv");
        std::fs::write(
            &good,
            "time,lon,lat,id,name\n1,20.1,60.1,1,A\n2,20.2,60.2,2,B\n3,20.3,60.3,1,A\n",
        )
        .unwrap();
        let bad = dir.path().join("bad.csv");
        std::fs::write(
            &bad,
            "time,lon,lat,id,name\n1,20.1,60.1,5,A\n2,20.2,60.2,oops,B\n3,20.3,60.3,6,A\n",
        )
        .unwrap();

        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        assert_eq!(import_file(&store, good, 2, &cancel).await, 3);
        assert_eq!(import_file(&store, bad, 2, &cancel).await, 0);
        assert_eq!(store.track_count(), 3);
        assert_eq!(store.vessel(5), None);
    }

    #[tokio::test]
    async fn unreadable_file_commits_nothing() {
        let store = MemoryStore::new();
        let rows = import_file(
            &store,
            PathBuf::from("/nonexistent/tracks.csv"),
            10,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(rows, 0);
    }
}
