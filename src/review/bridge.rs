use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TallyError};
use crate::models::{
    Classification, CompletionStats, Direction, PendingClassification, PendingDirection,
};
use crate::review::message::{Msg, Request, RequestId, Responder};

/// Blocking decision surface the classification engine talks to.
#[async_trait]
pub trait ReviewHandler: Send + Sync {
    async fn confirm_classification(
        &self,
        cancel: &CancellationToken,
        pending: PendingClassification,
    ) -> Result<Classification>;

    /// Resolves to exactly one classification per submitted item, or an error.
    async fn batch_confirm_classifications(
        &self,
        cancel: &CancellationToken,
        pending: Vec<PendingClassification>,
    ) -> Result<Vec<Classification>>;

    async fn confirm_transaction_direction(
        &self,
        cancel: &CancellationToken,
        pending: PendingDirection,
    ) -> Result<Direction>;

    fn completion_stats(&self) -> CompletionStats;
}

/// Presents the review session, which lives on the UI thread, as a
/// [`ReviewHandler`]. Every call posts one request message carrying its own
/// reply slot and waits on that slot alone.
pub struct Bridge {
    tx: mpsc::Sender<Msg>,
    next_id: AtomicU64,
    stats: Mutex<CompletionStats>,
}

impl Bridge {
    pub fn new(tx: mpsc::Sender<Msg>) -> Self {
        Self {
            tx,
            next_id: AtomicU64::new(1),
            stats: Mutex::new(CompletionStats::default()),
        }
    }

    fn next_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn round_trip<T, F>(&self, cancel: &CancellationToken, build: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(Responder<T>) -> Request + Send,
    {
        let id = self.next_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = build(Responder::new(id, reply_tx));
        tracing::debug!(request_id = id, "posting review request");

        tokio::select! {
            _ = cancel.cancelled() => return Err(TallyError::Cancelled),
            sent = self.tx.send(Msg::Request(request)) => {
                sent.map_err(|_| TallyError::Disconnected)?;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(request_id = id, "review request cancelled");
                Err(TallyError::Cancelled)
            }
            reply = reply_rx => reply.map_err(|_| TallyError::Disconnected),
        }
    }

    fn record(&self, results: &[Classification]) {
        if let Ok(mut stats) = self.stats.lock() {
            for c in results {
                stats.record(c);
            }
        }
    }
}

#[async_trait]
impl ReviewHandler for Bridge {
    async fn confirm_classification(
        &self,
        cancel: &CancellationToken,
        pending: PendingClassification,
    ) -> Result<Classification> {
        let classification = self
            .round_trip(cancel, |reply| Request::Classify { pending, reply })
            .await?;
        self.record(std::slice::from_ref(&classification));
        Ok(classification)
    }

    async fn batch_confirm_classifications(
        &self,
        cancel: &CancellationToken,
        pending: Vec<PendingClassification>,
    ) -> Result<Vec<Classification>> {
        let expected = pending.len();
        if expected == 0 {
            return Ok(Vec::new());
        }
        let results = self
            .round_trip(cancel, |reply| Request::Batch { pending, reply })
            .await?;
        if results.len() != expected {
            tracing::warn!(expected, got = results.len(), "batch reply count mismatch");
            return Err(TallyError::BatchShortfall {
                expected,
                got: results.len(),
            });
        }
        self.record(&results);
        Ok(results)
    }

    async fn confirm_transaction_direction(
        &self,
        cancel: &CancellationToken,
        pending: PendingDirection,
    ) -> Result<Direction> {
        let direction = self
            .round_trip(cancel, |reply| Request::Direction { pending, reply })
            .await?;
        if let Ok(mut stats) = self.stats.lock() {
            stats.directions_confirmed += 1;
        }
        Ok(direction)
    }

    fn completion_stats(&self) -> CompletionStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}
