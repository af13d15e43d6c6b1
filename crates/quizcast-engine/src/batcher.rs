//! Rate-limited batching — the fan-out primitive under every bulk
//! operation. Destinations are split into fixed-size batches; a batch
//! runs concurrently, then the batcher waits the inter-batch delay
//! before starting the next one. The delay is a cooperative await, so
//! scheduled jobs and answer processing keep running during it.

use std::time::Duration;

use quizcast_core::error::Result;

/// Batch size + inter-batch delay for one class of payload.
#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub delay: Duration,
}

impl BatchPolicy {
    /// Text messages and polls.
    pub const MESSAGES: Self = Self {
        batch_size: 10,
        delay: Duration::from_millis(350),
    };

    /// Images are heavier payloads: smaller batches, longer delay.
    pub const IMAGES: Self = Self {
        batch_size: 8,
        delay: Duration::from_millis(400),
    };
}

/// Split a slice into ordered batches of at most `batch_size` items.
pub fn split_into_batches<T: Clone>(items: &[T], batch_size: usize) -> Vec<Vec<T>> {
    items
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Run `action` for every destination under the policy's rate limits.
///
/// Guarantees: batches execute strictly in input order; destinations
/// within a batch run concurrently with no ordering guarantee; one
/// destination's failure never aborts the rest — every error comes back
/// in the per-destination result.
pub async fn run_batched<T, F, Fut>(
    destinations: &[String],
    policy: BatchPolicy,
    action: F,
) -> Vec<(String, Result<T>)>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let batches = split_into_batches(destinations, policy.batch_size);
    let total = batches.len();
    let mut results = Vec::with_capacity(destinations.len());

    for (index, batch) in batches.into_iter().enumerate() {
        tracing::debug!(
            "Processing batch {}/{} with {} destinations",
            index + 1,
            total,
            batch.len()
        );

        let outcomes = futures::future::join_all(batch.into_iter().map(|destination| {
            let fut = action(destination.clone());
            async move { (destination, fut.await) }
        }))
        .await;
        results.extend(outcomes);

        if index + 1 < total {
            tokio::time::sleep(policy.delay).await;
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizcast_core::error::QuizcastError;
    use std::sync::Mutex;
    use std::time::Instant;

    fn destinations(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("chat-{i}")).collect()
    }

    #[test]
    fn test_split_sizes() {
        let batches = split_into_batches(&destinations(25), 10);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[tokio::test]
    async fn test_batches_run_in_order_with_delay() {
        let policy = BatchPolicy {
            batch_size: 10,
            delay: Duration::from_millis(50),
        };
        let started = Mutex::new(Vec::new());
        let dests = destinations(25);

        let results = run_batched(&dests, policy, |destination| {
            let started = &started;
            async move {
                started
                    .lock()
                    .unwrap()
                    .push((destination.clone(), Instant::now()));
                Ok::<_, QuizcastError>(())
            }
        })
        .await;

        assert_eq!(results.len(), 25);
        let started = started.lock().unwrap();
        assert_eq!(started.len(), 25);

        let start_of = |dest: &str| {
            started
                .iter()
                .find(|(d, _)| d == dest)
                .map(|(_, at)| *at)
                .unwrap()
        };
        // Second and third batches start at least one delay after the
        // previous batch's start.
        assert!(start_of("chat-10") >= start_of("chat-0") + policy.delay);
        assert!(start_of("chat-20") >= start_of("chat-10") + policy.delay);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_rest() {
        let policy = BatchPolicy {
            batch_size: 10,
            delay: Duration::from_millis(5),
        };
        let dests = destinations(25);

        let results = run_batched(&dests, policy, |destination| async move {
            if destination == "chat-3" {
                Err(QuizcastError::Transport {
                    code: 403,
                    description: "Forbidden: bot was blocked by the user".into(),
                })
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(results.len(), 25);
        let failed: Vec<&String> = results
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(d, _)| d)
            .collect();
        assert_eq!(failed, vec!["chat-3"]);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_batch_size() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let policy = BatchPolicy {
            batch_size: 4,
            delay: Duration::from_millis(1),
        };
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let dests = destinations(12);

        run_batched(&dests, policy, |_| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, QuizcastError>(())
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 4);
    }
}
