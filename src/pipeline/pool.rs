use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::error;

/// Runs one task per unit with at most `concurrency` in flight.
///
/// Results come back in the order of `units`. A task that panics or is
/// cancelled yields `Err` with the reason; the remaining units still run.
pub async fn run_bounded<U, T, F, Fut>(
    units: Vec<U>,
    concurrency: usize,
    work: F,
) -> Vec<(U, Result<T, String>)>
where
    U: Clone + Send + 'static,
    T: Send + 'static,
    F: Fn(U) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::with_capacity(units.len());

    for unit in units {
        let sem = semaphore.clone();
        let fut = work(unit.clone());
        let task = tokio::spawn(async move {
            // The semaphore is never closed, so acquiring cannot fail.
            let _permit = sem.acquire_owned().await.ok();
            fut.await
        });
        tasks.push((unit, task));
    }

    let mut results = Vec::with_capacity(tasks.len());
    for (unit, task) in tasks {
        let result = task.await.map_err(|e| {
            error!(error = %e, "Worker task failed");
            e.to_string()
        });
        results.push((unit, result));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_follow_unit_order() {
        let results = run_bounded(vec![3u64, 1, 2], 3, |n| async move {
            tokio::time::sleep(Duration::from_millis(n * 10)).await;
            n * 10
        })
        .await;

        let values: Vec<_> = results.into_iter().map(|(u, r)| (u, r.unwrap())).collect();
        assert_eq!(values, vec![(3, 30), (1, 10), (2, 20)]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_bounded((0..8).collect::<Vec<u32>>(), 2, |_| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_unit_is_isolated() {
        let results = run_bounded(vec![1, 2, 3], 2, |n| async move {
            if n == 2 {
                panic!("boom");
            }
            n
        })
        .await;

        assert_eq!(results[0].1, Ok(1));
        assert!(results[1].1.is_err());
        assert_eq!(results[2].1, Ok(3));
    }
}
