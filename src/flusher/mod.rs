use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::contracts::CounterError;
use crate::metrics::PersistenceMetrics;
use crate::storage::snapshot::encode_count;

/// Reply slot for an explicit flush request.
pub type FlushReply = oneshot::Sender<Result<u64, CounterError>>;

/// Background worker that writes the live counter to its snapshot file.
///
/// # Behavior
/// - Wakes on a coalesced flush signal or an explicit flush request
/// - Reads the counter at dispatch time, never a value captured earlier
/// - Skips the write when the value is already on disk
/// - Is the only writer of the snapshot file
pub struct SnapshotFlusher {
    path: PathBuf,
    count: Arc<AtomicU64>,
    last_persisted: Option<u64>,
    metrics: Arc<PersistenceMetrics>,
}

impl SnapshotFlusher {
    /// `on_disk` is the value already known to be persisted, if any.
    pub fn new(
        path: PathBuf,
        count: Arc<AtomicU64>,
        on_disk: Option<u64>,
        metrics: Arc<PersistenceMetrics>,
    ) -> Self {
        Self {
            path,
            count,
            last_persisted: on_disk,
            metrics,
        }
    }

    /// Runs until `stop` fires or every sender is gone.
    ///
    /// On stop both channels are closed, then whatever was already queued is
    /// processed before returning. Nothing queued means nothing is written.
    pub async fn run(
        mut self,
        mut signals: mpsc::Receiver<()>,
        mut requests: mpsc::Receiver<FlushReply>,
        stop: CancellationToken,
    ) {
        tracing::info!(path = %self.path.display(), "Persistence worker started");

        let mut requests_open = true;
        let mut signals_open = true;
        while requests_open || signals_open {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                reply = requests.recv(), if requests_open => match reply {
                    Some(reply) => {
                        let result = self.persist().await;
                        let _ = reply.send(result);
                    }
                    None => requests_open = false,
                },
                signal = signals.recv(), if signals_open => match signal {
                    Some(()) => self.persist_logged().await,
                    None => signals_open = false,
                },
            }
        }

        signals.close();
        requests.close();

        while let Some(reply) = requests.recv().await {
            let result = self.persist().await;
            let _ = reply.send(result);
        }
        while signals.recv().await.is_some() {
            self.persist_logged().await;
        }

        tracing::info!(
            path = %self.path.display(),
            last_persisted = ?self.last_persisted,
            "Persistence worker stopped"
        );
    }

    async fn persist_logged(&mut self) {
        if let Err(e) = self.persist().await {
            // Retried by the next natural flush signal.
            tracing::error!(error = %e, "Failed to persist counter");
        }
    }

    async fn persist(&mut self) -> Result<u64, CounterError> {
        let value = self.count.load(Ordering::Acquire);
        if self.last_persisted == Some(value) {
            self.metrics.record_skip();
            return Ok(value);
        }

        let start = Instant::now();
        if let Err(source) = tokio::fs::write(&self.path, encode_count(value)).await {
            self.metrics.record_flush_error();
            return Err(CounterError::WriteFailed {
                path: self.path.clone(),
                source,
            });
        }

        self.last_persisted = Some(value);
        self.metrics.record_flush(value, start.elapsed());
        tracing::debug!(value, "Persisted counter");
        Ok(value)
    }
}
