//! Row reader stage
//!
//! Turns one input file into a sequence of pages. Reading is blocking, so
//! each file is read on the blocking thread pool and pages are handed to
//! the async side through a bounded channel.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::discovery::FileSource;
use crate::models::{Page, RawRow};

/// What happened while reading one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadSummary {
    pub pages: u64,
    pub rows: u64,
    /// Malformed records that were skipped
    pub skipped: u64,
    /// Reading stopped before the end of the file
    pub interrupted: bool,
}

/// Read one file, sending its pages to `pages`.
///
/// The first line is discarded as a header. Malformed rows are logged and
/// skipped. A file that cannot be opened yields no pages.
///
/// Blocks the calling thread; run it with `spawn_blocking`.
pub fn read_file(
    path: &Path,
    page_size: usize,
    cancel: &CancellationToken,
    pages: &mpsc::Sender<Page>,
) -> ReadSummary {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to open {}: {}", path.display(), e);
            return ReadSummary {
                interrupted: true,
                ..Default::default()
            };
        }
    };
    read_pages(path, file, page_size, cancel, |page| {
        pages.blocking_send(page).is_ok()
    })
}

/// Split `input` into pages of at most `page_size` rows.
///
/// `emit` returns `false` when downstream is gone, which stops reading.
/// Cancellation is checked before every row; once cancelled no further
/// page is emitted.
pub fn read_pages<R, F>(
    source: &Path,
    input: R,
    page_size: usize,
    cancel: &CancellationToken,
    mut emit: F,
) -> ReadSummary
where
    R: Read,
    F: FnMut(Page) -> bool,
{
    let page_size = page_size.max(1);
    let source: Arc<Path> = Arc::from(source);
    let mut summary = ReadSummary::default();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);
    let mut records = reader.records();

    match records.next() {
        None => return summary,
        Some(Err(e)) => {
            error!("Failed to read header of {}: {}", source.display(), e);
            summary.interrupted = true;
            return summary;
        }
        Some(Ok(_header)) => {}
    }

    let mut rows: Vec<RawRow> = Vec::with_capacity(page_size);
    for record in records {
        if cancel.is_cancelled() {
            debug!("Reading {} cancelled", source.display());
            summary.interrupted = true;
            return summary;
        }

        let record = match record {
            Ok(record) => record,
            Err(e) if e.is_io_error() => {
                error!("Failed to read {}: {}", source.display(), e);
                summary.interrupted = true;
                return summary;
            }
            Err(e) => {
                warn!("Skipping malformed row in {}: {}", source.display(), e);
                summary.skipped += 1;
                continue;
            }
        };
        let Some(row) = RawRow::from_record(&record) else {
            warn!(
                "Skipping malformed row in {} at line {}: expected 5 fields, got {}",
                source.display(),
                record.position().map_or(0, |p| p.line()),
                record.len()
            );
            summary.skipped += 1;
            continue;
        };

        rows.push(row);
        summary.rows += 1;
        if rows.len() == page_size {
            let page = Page {
                source: source.clone(),
                rows: std::mem::replace(&mut rows, Vec::with_capacity(page_size)),
            };
            if !emit(page) {
                summary.interrupted = true;
                return summary;
            }
            summary.pages += 1;
        }
    }

    if !rows.is_empty() {
        if cancel.is_cancelled() {
            summary.interrupted = true;
            return summary;
        }
        if !emit(Page { source, rows }) {
            summary.interrupted = true;
            return summary;
        }
        summary.pages += 1;
    }

    summary
}

/// Reader worker: pull paths from `files` until it is exhausted, emitting
/// the pages of every file into `pages`.
pub async fn run_reader(
    worker: usize,
    files: FileSource,
    page_size: usize,
    cancel: CancellationToken,
    pages: mpsc::Sender<Page>,
) {
    loop {
        let path = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            path = files.next() => match path {
                Some(path) => path,
                None => break,
            },
        };

        let cancel = cancel.clone();
        let page_tx = pages.clone();
        let read = tokio::task::spawn_blocking(move || {
            let summary = read_file(&path, page_size, &cancel, &page_tx);
            (path, summary)
        })
        .await;

        match read {
            Ok((path, summary)) => debug!(
                worker,
                path = %path.display(),
                rows = summary.rows,
                pages = summary.pages,
                skipped = summary.skipped,
                "File read"
            ),
            Err(e) => error!(worker, "Reader task failed: {}", e),
        }

        if pages.is_closed() {
            break;
        }
    }
    debug!(worker, "Reader finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn csv_with_rows(n: usize) -> String {
        let mut content = String::from("time,lon,lat,vessel_id,name\n");
        for i in 0..n {
            content.push_str(&format!(
                "{},24.9,60.1,{},VESSEL {}\n",
                1668075025 + i,
                i % 7,
                i % 7
            ));
        }
        content
    }

    fn collect(
        content: &str,
        page_size: usize,
        cancel: &CancellationToken,
    ) -> (Vec<Page>, ReadSummary) {
        let mut pages = Vec::new();
        let summary = read_pages(
            &PathBuf::from("/data/tracks.csv"),
            content.as_bytes(),
            page_size,
            cancel,
            |page| {
                pages.push(page);
                true
            },
        );
        (pages, summary)
    }

    #[test]
    fn final_page_may_be_short() {
        let (pages, summary) = collect(&csv_with_rows(1234), 500, &CancellationToken::new());

        let sizes: Vec<usize> = pages.iter().map(Page::len).collect();
        assert_eq!(sizes, vec![500, 500, 234]);
        assert_eq!(summary.rows, 1234);
        assert_eq!(summary.pages, 3);
        assert!(!summary.interrupted);
    }

    #[test]
    fn exact_multiple_has_no_empty_page() {
        let (pages, _) = collect(&csv_with_rows(10), 5, &CancellationToken::new());
        let sizes: Vec<usize> = pages.iter().map(Page::len).collect();
        assert_eq!(sizes, vec![5, 5]);
    }

    #[test]
    fn header_is_discarded() {
        let (pages, summary) =
            collect("time,lon,lat,vessel_id,name\n", 10, &CancellationToken::new());
        assert!(pages.is_empty());
        assert_eq!(summary.rows, 0);

        let (pages, _) = collect("", 10, &CancellationToken::new());
        assert!(pages.is_empty());
    }

    #[test]
    fn rows_keep_file_order() {
        let (pages, _) = collect(&csv_with_rows(3), 10, &CancellationToken::new());
        assert_eq!(pages.len(), 1);
        let timestamps: Vec<&str> = pages[0].rows.iter().map(|r| r.timestamp.as_str()).collect();
        assert_eq!(timestamps, vec!["1668075025", "1668075026", "1668075027"]);
        assert_eq!(pages[0].rows[1].vessel_name, "VESSEL 1");
        assert_eq!(&*pages[0].source, Path::new("/data/tracks.csv"));
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let content = "header\n\
            1668075025,24.9,60.1,1,A\n\
            1668075026,24.9,60.1\n\
            1668075027,24.9,60.1,2,B,extra\n\
            1668075028,24.9,60.1,3,C\n";
        let (pages, summary) = collect(content, 10, &CancellationToken::new());

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].len(), 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(pages[0].rows[1].vessel_id, "3");
    }

    #[test]
    fn cancelled_reader_emits_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (pages, summary) = collect(&csv_with_rows(20), 5, &cancel);

        assert!(pages.is_empty());
        assert!(summary.interrupted);
    }

    #[test]
    fn closed_downstream_stops_reading() {
        let mut emitted = 0;
        let summary = read_pages(
            Path::new("tracks.csv"),
            csv_with_rows(20).as_bytes(),
            5,
            &CancellationToken::new(),
            |_| {
                emitted += 1;
                false
            },
        );
        assert_eq!(emitted, 1);
        assert!(summary.interrupted);
    }

    #[tokio::test]
    async fn missing_file_yields_no_pages() {
        let (tx, mut rx) = mpsc::channel(4);
        let summary = tokio::task::spawn_blocking(move || {
            read_file(
                Path::new("/nonexistent/tracks.csv"),
                10,
                &CancellationToken::new(),
                &tx,
            )
        })
        .await
        .unwrap();

        assert!(summary.interrupted);
        assert_eq!(rx.recv().await, None);
    }
}
