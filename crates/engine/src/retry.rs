use std::time::Duration;

use cinegraph_common::config::RetryConfig;

/// Exponential backoff schedule driven by a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
    backoff_ms: u64,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            config: config.clone(),
            attempt: 0,
            backoff_ms: config.initial_backoff_ms,
        }
    }

    /// Record one attempt. Returns the wait before the next one, or `None`
    /// when attempts are exhausted.
    pub fn next_wait(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.config.max_attempts {
            return None;
        }

        let jitter = if self.config.jitter {
            compute_jitter(self.attempt, self.backoff_ms)
        } else {
            0
        };
        let wait = self.backoff_ms + jitter;

        self.backoff_ms = (self.backoff_ms as f64 * self.config.backoff_multiplier) as u64;
        self.backoff_ms = self.backoff_ms.min(self.config.max_backoff_ms);

        Some(Duration::from_millis(wait))
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Compute jitter for retry backoff using simple hash-based approach.
fn compute_jitter(attempt: u32, backoff_ms: u64) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::hash::DefaultHasher::new();
    attempt.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    hasher.finish() % (backoff_ms / 2 + 1)
}
