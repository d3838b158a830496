use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded-wait policy for acquiring advisory file locks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPolicy {
    /// Give up with `LockTimeout` once this much time has passed.
    pub timeout: Duration,
    /// Sleep between non-blocking lock attempts.
    pub poll_interval: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Fixed-backoff retry policy for deleting objects under contention.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Configuration for a [`ContentStore`](crate::ContentStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Wait bound for shared and exclusive locks.
    pub lock: LockPolicy,
    /// Retry policy for bulk deletes.
    pub delete_retry: RetryPolicy,
    /// Buffer size for streaming copies.
    pub chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock: LockPolicy::default(),
            delete_retry: RetryPolicy::default(),
            chunk_size: caf_crypto::CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.lock.timeout, Duration::from_secs(10));
        assert_eq!(c.lock.poll_interval, Duration::from_secs(1));
        assert_eq!(c.delete_retry.attempts, 3);
        assert_eq!(c.chunk_size, 4096);
    }

    #[test]
    fn config_serde_roundtrip() {
        let c = StoreConfig {
            lock: LockPolicy {
                timeout: Duration::from_millis(250),
                poll_interval: Duration::from_millis(10),
            },
            ..StoreConfig::default()
        };
        let json = serde_json::to_string(&c).unwrap();
        let parsed: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, c);
    }
}
