//! Bulk import pipeline
//!
//! Discovery feeds a pool of reader workers pulling from one shared path
//! sequence. In the paged topology each reader owns a page channel drained
//! by its own writer, and the writers' row counts are merged into a single
//! total. In the per-file topology each file is read and inserted inside one
//! transaction, with at most `workers` files open at once.
//!
//! One cancellation token reaches every stage. Cancelling stops discovery
//! and reading at the next row or send, and stops writers after the
//! transaction they are in. Committed pages are never undone.

use std::path::Path;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{available_workers, ImportConfig};
use crate::database::TrackStore;
use crate::gate::ConcurrencyGate;
use crate::models::{FixupReport, ImportResult, Topology};

pub mod aggregate;
pub mod discovery;
pub mod reader;
pub mod writer;

/// Pages buffered between a reader and its writer
const PAGE_BUFFER: usize = 1;

pub struct Importer<S> {
    store: S,
    cancel: CancellationToken,
    page_size: usize,
    workers: usize,
    topology: Topology,
}

impl<S: TrackStore> Importer<S> {
    /// Create an importer with one worker per core and pages of 500 rows
    pub fn new(store: S, cancel: CancellationToken) -> Self {
        Self {
            store,
            cancel,
            page_size: 500,
            workers: available_workers(),
            topology: Topology::default(),
        }
    }

    pub fn from_config(store: S, cancel: CancellationToken, config: &ImportConfig) -> Self {
        Self::new(store, cancel)
            .page_size(config.page_size)
            .workers(config.worker_count())
            .topology(config.topology)
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Import every file in `dir`, then run the post-load fixup.
    pub async fn run(&self, dir: &Path) -> (ImportResult, FixupReport) {
        let result = self.import(dir).await;
        let report = self.store.fixup().await;
        if !report.is_clean() {
            error!("Post-load fixup incomplete: {:?}", report.failures);
        }
        (result, report)
    }

    /// Import every file in `dir`.
    ///
    /// Never fails: unreadable files and failed pages are logged and show
    /// up only as a lower row count.
    pub async fn import(&self, dir: &Path) -> ImportResult {
        info!(
            "Importing {}: topology={:?}, workers={}, page_size={}",
            dir.display(),
            self.topology,
            self.workers,
            self.page_size
        );

        let (files_discovered, files) = discovery::discover(dir, self.cancel.clone()).await;
        let rows_committed = match self.topology {
            Topology::Paged => self.import_paged(files).await,
            Topology::PerFile => self.import_per_file(files).await,
        };

        let result = ImportResult {
            files_discovered,
            rows_committed,
        };
        info!(
            "Import finished: files={}, rows={}, cancelled={}",
            result.files_discovered,
            result.rows_committed,
            self.cancel.is_cancelled()
        );
        result
    }

    async fn import_paged(&self, files: discovery::FileSource) -> u64 {
        let mut workers = JoinSet::new();
        let mut counts = Vec::with_capacity(self.workers);

        for worker in 0..self.workers {
            let (pages_tx, pages_rx) = tokio::sync::mpsc::channel(PAGE_BUFFER);
            workers.spawn(reader::run_reader(
                worker,
                files.clone(),
                self.page_size,
                self.cancel.clone(),
                pages_tx,
            ));

            let (rows, writer) = writer::spawn_page_writer(
                worker,
                self.store.clone(),
                pages_rx,
                self.cancel.clone(),
            );
            workers.spawn(async move {
                if let Err(e) = writer.await {
                    error!(worker, "Writer task failed: {}", e);
                }
            });
            counts.push(rows);
        }

        let rows_committed = aggregate::total(aggregate::merge(counts)).await;

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }
        rows_committed
    }

    async fn import_per_file(&self, files: discovery::FileSource) -> u64 {
        let gate = ConcurrencyGate::new(self.workers);
        let mut tasks = JoinSet::new();

        loop {
            let path = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                path = files.next() => match path {
                    Some(path) => path,
                    None => break,
                },
            };
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = gate.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!("Failed to acquire file slot: {}", e);
                        break;
                    }
                },
            };

            let store = self.store.clone();
            let cancel = self.cancel.clone();
            let page_size = self.page_size;
            tasks.spawn(async move {
                let rows = writer::import_file(&store, path, page_size, &cancel).await;
                permit.release();
                rows
            });
        }

        let mut rows_committed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(rows) => rows_committed += rows,
                Err(e) => error!("File import task failed: {}", e),
            }
        }
        rows_committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;

    #[test]
    fn builder_clamps_to_one() {
        let importer = Importer::new(MemoryStore::new(), CancellationToken::new())
            .page_size(0)
            .workers(0);
        assert_eq!(importer.page_size, 1);
        assert_eq!(importer.workers, 1);
        assert_eq!(importer.topology, Topology::Paged);
    }

    #[test]
    fn builder_from_config() {
        let config = ImportConfig {
            source_dir: "/tmp/tracks".into(),
            page_size: 250,
            workers: Some(3),
            topology: Topology::PerFile,
            dry_run: false,
        };
        let importer = Importer::from_config(MemoryStore::new(), CancellationToken::new(), &config);
        assert_eq!(importer.page_size, 250);
        assert_eq!(importer.workers, 3);
        assert_eq!(importer.topology, Topology::PerFile);
    }
}
