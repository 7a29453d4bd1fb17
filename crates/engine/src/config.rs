//! Pipeline configuration loaded from the environment.

use std::sync::Arc;
use std::time::Duration;

use crate::infrastructure::poll::PollConfig;
use crate::infrastructure::rate_limit::RateLimiter;

/// Tunables for the generation pipeline. Every field has a working default
/// so the pipeline runs without any environment setup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of tasks a fan-out stage runs at once.
    pub fan_out_limit: usize,
    /// How provider jobs are polled for completion.
    pub poll: PollConfig,
    /// Music generation requests allowed per window.
    pub music_rate_limit: usize,
    /// Sliding window for the music rate limit.
    pub music_rate_window: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fan_out_limit: 4,
            poll: PollConfig::default(),
            music_rate_limit: 10,
            music_rate_window: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    /// Read configuration from the environment, falling back to defaults.
    /// Call [`load_dotenv`] first if a `.env` file should be honored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fan_out_limit: env_parse("STORYFORGE_FAN_OUT_LIMIT", defaults.fan_out_limit),
            poll: PollConfig {
                interval: env_secs("STORYFORGE_POLL_INTERVAL_SECS", defaults.poll.interval),
                timeout: env_secs("STORYFORGE_POLL_TIMEOUT_SECS", defaults.poll.timeout),
                max_retries: env_parse("STORYFORGE_POLL_RETRIES", defaults.poll.max_retries),
                retry_delay: env_secs("STORYFORGE_POLL_RETRY_DELAY_SECS", defaults.poll.retry_delay),
            },
            music_rate_limit: env_parse("STORYFORGE_MUSIC_RATE_LIMIT", defaults.music_rate_limit),
            music_rate_window: env_secs(
                "STORYFORGE_MUSIC_RATE_WINDOW_SECS",
                defaults.music_rate_window,
            ),
        }
    }

    /// Build the shared limiter for the music provider from the configured
    /// quota. Wrap the concrete port in
    /// [`RateLimited`](crate::infrastructure::rate_limited::RateLimited)
    /// with this limiter at wiring time.
    pub fn music_limiter(&self) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            self.music_rate_limit,
            self.music_rate_window,
        ))
    }
}

/// Load a `.env` file from the current directory if one exists.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PipelineConfig::default();
        assert_eq!(config.fan_out_limit, 4);
        assert_eq!(config.music_rate_limit, 10);
        assert_eq!(config.music_rate_window, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn music_limiter_enforces_the_configured_quota() {
        let config = PipelineConfig {
            music_rate_limit: 1,
            music_rate_window: Duration::from_secs(7),
            ..PipelineConfig::default()
        };
        let limiter = config.music_limiter();
        limiter.acquire().await;

        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(7));
    }
}
