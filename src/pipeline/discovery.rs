//! Input file discovery

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Paths found in the source directory, shared by every worker pulling
/// from it. Each path is handed out exactly once.
#[derive(Debug, Clone)]
pub struct FileSource {
    paths: Arc<Mutex<mpsc::Receiver<PathBuf>>>,
}

impl FileSource {
    /// Next undelivered path, `None` once the listing is exhausted or
    /// discovery was cancelled.
    pub async fn next(&self) -> Option<PathBuf> {
        self.paths.lock().await.recv().await
    }
}

/// List `dir` once and start emitting its entries.
///
/// Returns the entry count up front together with the path sequence. An
/// unreadable directory is logged and treated as empty.
pub async fn discover(dir: &Path, cancel: CancellationToken) -> (u64, FileSource) {
    let entries = match list_entries(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            error!("Failed to list {}: {}", dir.display(), e);
            Vec::new()
        }
    };
    let total = entries.len() as u64;
    debug!("Discovered {} entries in {}", total, dir.display());

    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        for path in entries {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Discovery cancelled");
                    break;
                }
                sent = tx.send(path) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    });

    (
        total,
        FileSource {
            paths: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Absolute paths of all entries of `dir`, in listing order
async fn list_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let dir = tokio::fs::canonicalize(dir).await?;
    let mut listing = tokio::fs::read_dir(&dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = listing.next_entry().await? {
        entries.push(entry.path());
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn emits_every_entry_once() {
        let dir = tempdir().unwrap();
        for name in ["a.csv", "b.csv", "c.csv"] {
            std::fs::write(dir.path().join(name), "header\n").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let (total, source) = discover(dir.path(), CancellationToken::new()).await;
        assert_eq!(total, 4);

        let mut names = Vec::new();
        while let Some(path) = source.next().await {
            assert!(path.is_absolute());
            names.push(path.file_name().unwrap().to_string_lossy().to_string());
        }
        names.sort();
        assert_eq!(names, vec!["a.csv", "b.csv", "c.csv", "nested"]);
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let (total, source) = discover(&dir.path().join("missing"), CancellationToken::new()).await;

        assert_eq!(total, 0);
        assert_eq!(source.next().await, None);
    }

    #[tokio::test]
    async fn cancelled_discovery_emits_nothing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "header\n").unwrap();
        std::fs::write(dir.path().join("b.csv"), "header\n").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (total, source) = discover(dir.path(), cancel).await;

        assert_eq!(total, 2);
        assert_eq!(source.next().await, None);
    }

    #[tokio::test]
    async fn workers_share_one_sequence() {
        let dir = tempdir().unwrap();
        for i in 0..10 {
            std::fs::write(dir.path().join(format!("{i}.csv")), "header\n").unwrap();
        }

        let (_, source) = discover(dir.path(), CancellationToken::new()).await;
        let mut workers = tokio::task::JoinSet::new();
        for _ in 0..3 {
            let source = source.clone();
            workers.spawn(async move {
                let mut taken = Vec::new();
                while let Some(path) = source.next().await {
                    taken.push(path);
                }
                taken
            });
        }

        let mut all = Vec::new();
        while let Some(taken) = workers.join_next().await {
            all.extend(taken.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 10);
    }
}
