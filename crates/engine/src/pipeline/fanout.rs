//! Bounded fan-out/fan-in executor.
//!
//! Every task is awaited to completion (no early cancellation), with at most
//! `limit` tasks in flight at once. Task errors are collected as strings; a
//! failing task never disturbs its siblings.

use std::future::Future;

use futures_util::stream::{self, StreamExt};

/// Fan-in summary. Successes arrive in completion order, not submission
/// order; callers merge by natural key so ordering does not matter.
#[derive(Debug)]
pub struct FanOutReport<T> {
    pub successes: Vec<T>,
    pub failures: Vec<String>,
}

impl<T> FanOutReport<T> {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure_summary(&self) -> String {
        self.failures.join("; ")
    }
}

/// Run `tasks` with at most `limit` concurrently and collect every result.
pub async fn fan_out<T, Fut>(limit: usize, tasks: Vec<Fut>) -> FanOutReport<T>
where
    Fut: Future<Output = Result<T, String>>,
{
    let mut report = FanOutReport {
        successes: Vec::new(),
        failures: Vec::new(),
    };

    let mut results = stream::iter(tasks).buffer_unordered(limit.max(1));
    while let Some(result) = results.next().await {
        match result {
            Ok(value) => report.successes.push(value),
            Err(message) => report.failures.push(message),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn collects_successes_and_failures_without_cancelling_siblings() {
        let tasks: Vec<_> = (0..3)
            .map(|i| async move {
                if i == 1 {
                    Err(format!("task {i} failed"))
                } else {
                    Ok(i)
                }
            })
            .collect();

        let mut report = fan_out(4, tasks).await;
        report.successes.sort_unstable();

        assert_eq!(report.successes, vec![0, 2]);
        assert_eq!(report.failures, vec!["task 1 failed".to_string()]);
        assert!(!report.all_succeeded());
        assert_eq!(report.failure_summary(), "task 1 failed");
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_the_concurrency_limit() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<usize, String>(i)
                }
            })
            .collect();

        let report = fan_out(2, tasks).await;

        assert_eq!(report.successes.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn zero_limit_is_clamped_to_one() {
        let tasks = vec![async { Ok::<i32, String>(7) }];
        let report = fan_out(0, tasks).await;
        assert_eq!(report.successes, vec![7]);
    }
}
