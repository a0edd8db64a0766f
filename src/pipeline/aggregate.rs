//! Fan-in of per-page row counts

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::error;

/// Merge the count sequences of all writers into one.
///
/// No ordering across writers is kept. The merged sequence ends once every
/// source has ended: a supervisor joins all forwarding tasks and only then
/// drops the last sender.
pub fn merge(sources: Vec<mpsc::Receiver<u64>>) -> mpsc::Receiver<u64> {
    let (tx, rx) = mpsc::channel(sources.len().max(1));

    let mut forwarders = JoinSet::new();
    for mut source in sources {
        let tx = tx.clone();
        forwarders.spawn(async move {
            while let Some(rows) = source.recv().await {
                if tx.send(rows).await.is_err() {
                    break;
                }
            }
        });
    }

    tokio::spawn(async move {
        while let Some(joined) = forwarders.join_next().await {
            if let Err(e) = joined {
                error!("Count forwarder failed: {}", e);
            }
        }
        drop(tx);
    });

    rx
}

/// Sum a count sequence to its end
pub async fn total(mut counts: mpsc::Receiver<u64>) -> u64 {
    let mut total = 0;
    while let Some(rows) = counts.recv().await {
        total += rows;
    }
    total
}
