use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::contracts::{CountStore, CounterError};
use crate::flusher::{FlushReply, SnapshotFlusher};
use crate::metrics::PersistenceMetrics;
use crate::storage::snapshot::read_snapshot;

/// Pending explicit flushes allowed before `flush_now` callers wait.
const FLUSH_REQUEST_QUEUE: usize = 16;

/// Atomic request counter persisted to a single file.
///
/// Increments are lock-free. Persistence runs on one background worker fed
/// by a single-slot signal, so a burst of N increments costs O(1) writes.
pub struct FileCountStore {
    count: Arc<AtomicU64>,
    path: PathBuf,
    signal: mpsc::Sender<()>,
    requests: mpsc::Sender<FlushReply>,
    stop: CancellationToken,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<PersistenceMetrics>,
}

impl FileCountStore {
    /// Opens the store, recovering the last persisted value from `path`.
    ///
    /// A missing, unreadable or corrupt snapshot is logged and the counter
    /// starts at zero; opening never fails. Must be called inside a tokio
    /// runtime since it spawns the persistence worker.
    pub fn open(path: impl Into<PathBuf>, metrics: Arc<PersistenceMetrics>) -> Self {
        let path = path.into();

        let (initial, on_disk) = match read_snapshot(&path) {
            Ok(Some(value)) => {
                tracing::info!(path = %path.display(), value, "Recovered counter from snapshot");
                (value, Some(value))
            }
            Ok(None) => {
                tracing::info!(path = %path.display(), "No snapshot found, starting at zero");
                (0, None)
            }
            Err(e @ CounterError::Corrupt { .. }) => {
                metrics.record_corrupt_snapshot();
                tracing::warn!(error = %e, "Ignoring corrupt snapshot, starting at zero");
                (0, None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unable to load snapshot, starting at zero");
                (0, None)
            }
        };
        metrics
            .persisted_value
            .store(on_disk.unwrap_or(0), Ordering::Relaxed);

        let count = Arc::new(AtomicU64::new(initial));
        let (signal, signal_rx) = mpsc::channel(1);
        let (requests, request_rx) = mpsc::channel(FLUSH_REQUEST_QUEUE);
        let stop = CancellationToken::new();

        let flusher = SnapshotFlusher::new(
            path.clone(),
            Arc::clone(&count),
            on_disk,
            Arc::clone(&metrics),
        );
        let handle = tokio::spawn(flusher.run(signal_rx, request_rx, stop.clone()));

        Self {
            count,
            path,
            signal,
            requests,
            stop,
            closed: AtomicBool::new(false),
            worker: Mutex::new(Some(handle)),
            metrics,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Raises the flush signal without blocking.
    fn request_flush(&self) {
        match self.signal.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => self.metrics.record_coalesced(),
            // Worker is shutting down; this increment may not be persisted.
            Err(TrySendError::Closed(())) => {}
        }
    }
}

impl Drop for FileCountStore {
    fn drop(&mut self) {
        // The worker drains what is already pending, then exits.
        self.stop.cancel();
    }
}

impl CountStore for FileCountStore {
    fn increment(&self) -> Result<u64, CounterError> {
        if self.is_closed() {
            return Err(CounterError::Closed);
        }

        // Relaxed would do for uniqueness; AcqRel pairs with the worker's
        // Acquire load so a flush never reads a value older than the signal.
        let prev = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_add(1))
            .map_err(|_| CounterError::Overflow)?;

        self.request_flush();
        Ok(prev + 1)
    }

    fn current(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    async fn flush_now(&self) -> Result<u64, CounterError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(tx)
            .await
            .map_err(|_| CounterError::Closed)?;
        rx.await.map_err(|_| CounterError::Closed)?
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop.cancel();

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Persistence worker panicked");
            }
        }
        tracing::info!(
            path = %self.path.display(),
            value = self.current(),
            "Count store closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_at(path: &Path) -> FileCountStore {
        FileCountStore::open(path, Arc::new(PersistenceMetrics::default()))
    }

    #[tokio::test]
    async fn increment_returns_new_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_at(&dir.path().join("count"));

        assert_eq!(store.current(), 0);
        assert_eq!(store.increment().unwrap(), 1);
        assert_eq!(store.increment().unwrap(), 2);
        assert_eq!(store.current(), 2);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn recovers_persisted_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("count");
        std::fs::write(&path, "42").unwrap();

        let store = open_at(&path);
        assert_eq!(store.current(), 42);
        assert_eq!(store.increment().unwrap(), 43);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("count");
        std::fs::write(&path, "1234567890123456789012345").unwrap();
        let metrics = Arc::new(PersistenceMetrics::default());

        let store = FileCountStore::open(&path, Arc::clone(&metrics));
        assert_eq!(store.current(), 0);
        assert_eq!(metrics.corrupt_snapshots_total.load(Ordering::Relaxed), 1);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn flush_now_persists_current_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("count");
        let store = open_at(&path);

        for _ in 0..25 {
            store.increment().unwrap();
        }
        assert_eq!(store.flush_now().await.unwrap(), 25);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "25");
        store.shutdown().await;
    }

    #[tokio::test]
    async fn burst_is_coalesced() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(PersistenceMetrics::default());
        let store = FileCountStore::open(dir.path().join("count"), Arc::clone(&metrics));

        // Current-thread runtime: the worker cannot run during this loop,
        // so every signal after the first finds the slot full.
        for _ in 0..1_000 {
            store.increment().unwrap();
        }
        assert_eq!(
            metrics.signals_coalesced_total.load(Ordering::Relaxed),
            999
        );

        store.flush_now().await.unwrap();
        assert!(metrics.flush_total.load(Ordering::Relaxed) <= 2);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn closed_store_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_at(&dir.path().join("count"));
        store.increment().unwrap();
        store.shutdown().await;

        assert!(store.is_closed());
        assert!(matches!(store.increment(), Err(CounterError::Closed)));
        assert!(matches!(store.flush_now().await, Err(CounterError::Closed)));
        assert_eq!(store.current(), 1);

        // Second shutdown is a no-op.
        store.shutdown().await;
    }

    #[tokio::test]
    async fn dropped_store_stops_its_worker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("count");
        let metrics = Arc::new(PersistenceMetrics::default());

        let store = FileCountStore::open(&path, Arc::clone(&metrics));
        let stop = store.stop.clone();
        for _ in 0..3 {
            store.increment().unwrap();
        }
        drop(store);
        assert!(stop.is_cancelled());

        // The pending signal is still written before the worker exits.
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while std::fs::read_to_string(&path).ok().as_deref() != Some("3") {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pending value was never persisted");
    }

    #[tokio::test]
    async fn overflow_is_refused_without_wrapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("count");
        std::fs::write(&path, u64::MAX.to_string()).unwrap();

        let store = open_at(&path);
        assert!(matches!(store.increment(), Err(CounterError::Overflow)));
        assert_eq!(store.current(), u64::MAX);
        store.shutdown().await;
    }
}
