//! Mirror Writer Module
//!
//! Applies disk mirror operations off the request path. The store queues an
//! operation while it holds its write lock, so the queue order matches the
//! in-memory order; a single task drains the queue and runs each file
//! operation through `spawn_blocking`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStats, DiskMirror, RequestKey};

/// One pending change to the on-disk copy.
#[derive(Debug)]
pub(crate) enum MirrorOp {
    CreatePartition(String),
    RemovePartition(String),
    Write {
        partition: String,
        entry: CacheEntry,
        sequence: u64,
    },
    Remove {
        partition: String,
        key: RequestKey,
    },
    /// Answered once every earlier operation has been applied
    Flush(oneshot::Sender<()>),
}

// == Mirror Writer ==
/// Cheap to clone; all clones feed the same writer task.
#[derive(Debug, Clone)]
pub struct MirrorWriter {
    ops: mpsc::UnboundedSender<MirrorOp>,
}

impl MirrorWriter {
    /// Starts the writer task. Must be called inside a tokio runtime.
    ///
    /// Failed entry writes are counted in `stats` as write failures.
    /// The task ends once every clone has been dropped.
    pub fn spawn(mirror: DiskMirror, stats: Arc<CacheStats>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(mirror, stats, rx));
        Self { ops: tx }
    }

    /// Queues `op` without waiting.
    pub(crate) fn submit(&self, op: MirrorOp) {
        if self.ops.send(op).is_err() {
            warn!("Disk mirror writer stopped, dropping operation");
        }
    }

    /// Waits until everything queued so far has reached the disk.
    pub async fn flush(&self) {
        let (done, flushed) = oneshot::channel();
        self.submit(MirrorOp::Flush(done));
        let _ = flushed.await;
    }
}

async fn run_writer(
    mirror: DiskMirror,
    stats: Arc<CacheStats>,
    mut ops: mpsc::UnboundedReceiver<MirrorOp>,
) {
    debug!(root = %mirror.root().display(), "Disk mirror writer started");

    while let Some(op) = ops.recv().await {
        if let MirrorOp::Flush(done) = op {
            let _ = done.send(());
            continue;
        }

        let mirror = mirror.clone();
        let stats = Arc::clone(&stats);
        if let Err(e) = tokio::task::spawn_blocking(move || apply(&mirror, &stats, op)).await {
            warn!(error = %e, "Disk mirror operation panicked");
        }
    }

    debug!("Disk mirror writer stopped");
}

fn apply(mirror: &DiskMirror, stats: &CacheStats, op: MirrorOp) {
    match op {
        MirrorOp::CreatePartition(name) => {
            if let Err(e) = mirror.create_partition(&name) {
                warn!(partition = %name, error = %e, "Failed to create partition on disk");
            }
        }
        MirrorOp::RemovePartition(name) => {
            if let Err(e) = mirror.remove_partition(&name) {
                warn!(partition = %name, error = %e, "Failed to remove partition from disk");
            }
        }
        MirrorOp::Write {
            partition,
            entry,
            sequence,
        } => {
            if let Err(e) = mirror.write_entry(&partition, &entry, sequence) {
                stats.record_write_failure();
                warn!(partition = %partition, key = %entry.key, error = %e, "Failed to write entry to disk");
            }
        }
        MirrorOp::Remove { partition, key } => {
            if let Err(e) = mirror.remove_entry(&partition, &key) {
                warn!(partition = %partition, key = %key, error = %e, "Failed to remove entry from disk");
            }
        }
        MirrorOp::Flush(done) => {
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RouteClass;
    use crate::models::{GatewayResponse, ResponseSource};
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use tempfile::TempDir;

    fn entry(key: &str, body: &'static str) -> CacheEntry {
        let resp = GatewayResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from(body), ResponseSource::Network);
        CacheEntry::from_response_at(RequestKey::from(key), &resp, RouteClass::Api, 1)
    }

    #[tokio::test]
    async fn test_operations_apply_in_queue_order() {
        let dir = TempDir::new().unwrap();
        let mirror = DiskMirror::open(dir.path()).unwrap();
        let stats = Arc::new(CacheStats::new());
        let writer = MirrorWriter::spawn(mirror.clone(), Arc::clone(&stats));

        writer.submit(MirrorOp::CreatePartition("runtime-v1".to_string()));
        writer.submit(MirrorOp::Write {
            partition: "runtime-v1".to_string(),
            entry: entry("a", "1"),
            sequence: 0,
        });
        writer.submit(MirrorOp::Write {
            partition: "runtime-v1".to_string(),
            entry: entry("b", "2"),
            sequence: 1,
        });
        writer.submit(MirrorOp::Remove {
            partition: "runtime-v1".to_string(),
            key: RequestKey::from("a"),
        });
        writer.flush().await;

        let loaded = mirror.load().unwrap();
        assert_eq!(loaded.len(), 1);
        let keys: Vec<&str> = loaded[0].entries.iter().map(|(_, e)| e.key.as_str()).collect();
        assert_eq!(keys, vec!["b"]);
        assert_eq!(stats.snapshot(0, 0).write_failures, 0);
    }

    #[tokio::test]
    async fn test_failed_write_is_counted() {
        let dir = TempDir::new().unwrap();
        let mirror = DiskMirror::open(dir.path()).unwrap();
        let stats = Arc::new(CacheStats::new());
        let writer = MirrorWriter::spawn(mirror, Arc::clone(&stats));

        // Partition directory was never created
        writer.submit(MirrorOp::Write {
            partition: "runtime-v1".to_string(),
            entry: entry("a", "1"),
            sequence: 0,
        });
        writer.flush().await;

        assert_eq!(stats.snapshot(0, 0).write_failures, 1);
    }
}
