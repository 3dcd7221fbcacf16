use std::time::Duration;

/// Per-transfer configuration, materialized from synchronizer rules.
///
/// Backoff between worker retries is a fixed delay, not exponential.
#[derive(Debug, Clone)]
pub struct TransferRules {
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
    /// HTTP read timeout.
    pub read_timeout: Duration,
    /// Maximum attempts per worker loop, and maximum source-switch passes
    /// per stream.
    pub max_attempts: usize,
    /// Fixed delay between worker retry attempts.
    pub retry_backoff: Duration,
    /// Measured bandwidth (bytes/sec) below which the active source is
    /// abandoned for a better candidate.
    pub degradation_threshold: u64,
    /// Number of in-flight chunks the producer may run ahead of the consumer.
    pub pipe_capacity: usize,
    /// Bandwidth sample windows keep at most this many samples.
    pub sample_capacity: usize,
    /// Samples older than this are evicted.
    pub sample_max_age: Duration,
    /// Minimum samples before a bandwidth estimate is considered valid.
    pub min_samples: usize,
}

impl Default for TransferRules {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            max_attempts: 5,
            retry_backoff: Duration::from_secs(2),
            degradation_threshold: 0,
            pipe_capacity: 16,
            sample_capacity: 1024,
            sample_max_age: Duration::from_secs(60),
            min_samples: 100,
        }
    }
}
