//! Concurrent fan-out of write operations.

use std::future::Future;

use rand::Rng;
use tokio::task::JoinSet;
use tracing::trace;

use crate::error::OpError;

/// Runs between 1 and `max_parallel` invocations of `add_one` concurrently and
/// waits for all of them.
///
/// The invocation count is drawn uniformly from `rng`. Each invocation runs as
/// its own task.
///
/// # Errors
///
/// Returns the first error observed among the invocations. A panicked
/// invocation is reported as [`OpError::Internal`].
pub async fn add_multiple<R, F, Fut>(
    max_parallel: usize,
    rng: &mut R,
    add_one: F,
) -> Result<(), OpError>
where
    R: Rng,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), OpError>> + Send + 'static,
{
    let count = rng.gen_range(1..=max_parallel.max(1));
    trace!(count, "fanning out submissions");

    let mut tasks = JoinSet::new();
    for _ in 0..count {
        tasks.spawn(add_one());
    }

    let mut first_err = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.unwrap_or_else(|e| Err(OpError::Internal(format!("submission task failed: {e}"))));
        if let Err(e) = result {
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_count_within_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..50 {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            add_multiple(4, &mut rng, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();
            let n = calls.load(Ordering::SeqCst);
            assert!((1..=4).contains(&n), "ran {n} invocations");
        }
    }

    #[tokio::test]
    async fn test_returns_one_of_the_failures() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let next_tag = Arc::new(AtomicUsize::new(0));
        let tags = Arc::clone(&next_tag);
        let err = add_multiple(5, &mut rng, move || {
            let tag = tags.fetch_add(1, Ordering::SeqCst);
            async move { Err(OpError::Validation(format!("failure {tag}"))) }
        })
        .await
        .unwrap_err();

        let spawned = next_tag.load(Ordering::SeqCst);
        let OpError::Validation(msg) = err else {
            panic!("unexpected error {err:?}");
        };
        assert!((0..spawned).any(|tag| msg == format!("failure {tag}")), "{msg}");
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let err = add_multiple(1, &mut rng, || async {
            let exploded = true;
            assert!(!exploded, "submission exploded");
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, OpError::Internal(_)));
    }

    #[tokio::test]
    async fn test_mixed_results_report_failure() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        // Every odd invocation fails; any count of two or more must surface it.
        let next = Arc::new(AtomicUsize::new(0));
        loop {
            let counter = Arc::clone(&next);
            counter.store(0, Ordering::SeqCst);
            let result = add_multiple(3, &mut rng, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n % 2 == 1 {
                        Err(OpError::Validation("odd".to_string()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
            if next.load(Ordering::SeqCst) >= 2 {
                assert!(result.is_err());
                break;
            }
            assert!(result.is_ok());
        }
    }
}
