//! Polling helper for long-running provider jobs (image or music synthesis).
//!
//! Fixed poll interval with a hard wall-clock timeout. Transient errors on a
//! single poll are retried a bounded number of times with a fixed backoff,
//! then the outer poll loop continues — only the overall timeout or a
//! terminal job failure ends the wait early.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::ports::ProviderError;

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
    /// Attempts per poll round before giving up on that round.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// What one poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Pending,
    Complete(T),
    Failed(String),
}

/// Poll `check` until the job completes, fails, or the deadline passes.
pub async fn poll_job<T, F, Fut>(config: &PollConfig, mut check: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, ProviderError>>,
{
    let deadline = Instant::now() + config.timeout;

    while Instant::now() < deadline {
        tokio::time::sleep(config.interval).await;

        for attempt in 0..config.max_retries {
            match check().await {
                Ok(PollStatus::Complete(value)) => return Ok(value),
                Ok(PollStatus::Failed(message)) => {
                    return Err(ProviderError::RequestFailed(message));
                }
                Ok(PollStatus::Pending) => break,
                Err(error) => {
                    if attempt + 1 < config.max_retries {
                        tracing::warn!(
                            attempt = attempt + 1,
                            max = config.max_retries,
                            %error,
                            "poll attempt failed, retrying"
                        );
                        tokio::time::sleep(config.retry_delay).await;
                    } else {
                        tracing::error!(%error, "all poll attempts failed this round");
                    }
                }
            }
        }
    }

    Err(ProviderError::Timeout(config.timeout))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn fast_config() -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_result_once_the_job_completes() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();

        let result = poll_job(&fast_config(), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(PollStatus::Pending)
                } else {
                    Ok(PollStatus::Complete("done"))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "done");
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_within_a_round() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: &str = poll_job(&fast_config(), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Unavailable)
                } else {
                    Ok(PollStatus::Complete("recovered"))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_job_failure_short_circuits() {
        let err = poll_job::<&str, _, _>(&fast_config(), || async {
            Ok(PollStatus::Failed("sensitive word rejected".to_string()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ProviderError::RequestFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn never_finishing_job_hits_the_wall_clock_timeout() {
        let err = poll_job::<&str, _, _>(&fast_config(), || async { Ok(PollStatus::Pending) })
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Timeout(_)));
    }
}
