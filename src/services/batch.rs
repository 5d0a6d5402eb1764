//! Bounded-concurrency fan-out for step actions.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::models::BatchConfig;

/// What a batched fan-out got through before finishing or being cancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<R> {
    /// Results of the items that ran, in input order.
    pub results: Vec<R>,
    /// Number of leading input items that ran.
    pub processed: usize,
    pub cancelled: bool,
}

impl<R> BatchOutcome<R> {
    pub fn is_complete(&self, total: usize) -> bool {
        !self.cancelled && self.processed == total
    }
}

/// Run `f` over `items` in chunks of `config.size`, each chunk concurrently,
/// sleeping `inter_batch_delay_ms` between chunks.
///
/// No new chunk starts once `cancel` fires; a chunk already running finishes.
pub async fn run_batched<T, R, F, Fut>(
    items: Vec<T>,
    config: &BatchConfig,
    cancel: &CancellationToken,
    f: F,
) -> BatchOutcome<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let size = config.size.max(1);
    let delay = Duration::from_millis(config.inter_batch_delay_ms);
    let total = items.len();

    let mut results = Vec::with_capacity(total);
    let mut remaining = items.into_iter().peekable();
    let mut batch_index = 0usize;

    while remaining.peek().is_some() {
        if cancel.is_cancelled() {
            debug!(processed = results.len(), total, "Batched fan-out cancelled");
            return BatchOutcome {
                processed: results.len(),
                results,
                cancelled: true,
            };
        }
        if batch_index > 0 && !delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => continue,
                () = tokio::time::sleep(delay) => {}
            }
        }

        let chunk: Vec<T> = remaining.by_ref().take(size).collect();
        let futures = chunk.into_iter().map(&f);
        results.extend(futures::future::join_all(futures).await);
        batch_index += 1;
    }

    BatchOutcome {
        processed: results.len(),
        results,
        cancelled: false,
    }
}
