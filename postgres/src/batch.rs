//! Submission batching with per-submitter acknowledgements.
//!
//! A [`Batcher`] accumulates submissions and flushes them together when the
//! batch fills or a flush interval elapses after the first buffered item.
//! Every submitter awaits the acknowledgement of the flush its item rode
//! in; a failed flush fails every submission in that batch.

use std::future::Future;
use std::time::Duration;

use flashsale_core::DurableError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

struct Pending<T> {
    item: T,
    ack: oneshot::Sender<Result<(), DurableError>>,
}

/// Handle for submitting items to a batching worker.
///
/// Dropping every handle shuts the worker down after it drains the queue.
#[derive(Debug)]
pub(crate) struct Batcher<T> {
    tx: mpsc::Sender<Pending<T>>,
}

impl<T> Clone for Batcher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> Batcher<T> {
    /// Spawn a batching worker. `flush` persists one batch; its result is
    /// fanned out to every submitter in the batch.
    pub(crate) fn spawn<F, Fut>(batch_size: usize, flush_interval: Duration, mut flush: F) -> Self
    where
        F: FnMut(Vec<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DurableError>> + Send,
    {
        let (tx, mut rx) = mpsc::channel::<Pending<T>>(batch_size.max(1) * 4);
        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut pending = Vec::with_capacity(batch_size);
                pending.push(first);

                // Fill the batch until full or the interval after the first
                // item elapses.
                let deadline = Instant::now() + flush_interval;
                while pending.len() < batch_size {
                    match timeout_at(deadline, rx.recv()).await {
                        Ok(Some(next)) => pending.push(next),
                        Ok(None) | Err(_) => break,
                    }
                }

                let mut items = Vec::with_capacity(pending.len());
                let mut acks = Vec::with_capacity(pending.len());
                for p in pending {
                    items.push(p.item);
                    acks.push(p.ack);
                }

                let count = items.len();
                let result = flush(items).await;
                if result.is_err() {
                    debug!(count, "batch flush failed");
                }
                for ack in acks {
                    // A submitter that gave up waiting is gone; that is fine.
                    let _ = ack.send(result.clone());
                }
            }
        });
        Self { tx }
    }

    /// Submit one item and await the acknowledgement of its flush.
    pub(crate) async fn submit(&self, item: T) -> Result<(), DurableError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Pending {
                item,
                ack: ack_tx,
            })
            .await
            .map_err(|_| DurableError::Closed)?;
        ack_rx.await.map_err(|_| DurableError::Closed)?
    }
}
