//! Runtime configuration.
//!
//! A single [`Config`] struct shared as `Arc<Config>` across workers.
//! Defaults match production cadence; tests shrink the intervals.

use std::time::Duration;

/// Configuration surface of the runtime.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pub/sub shard fan-out for the insert-count topics. Must be ≥ 1.
    pub pool_size: usize,

    /// Capacity of each source's memory buffer. Overflow drops the
    /// oldest entries.
    pub buffer_capacity: usize,

    /// Cadence of the recent-logs cache's insert-count broadcast.
    pub broadcast_interval: Duration,

    /// Base cadence of the `log_events_updated_at` touch timer.
    pub touch_interval: Duration,

    /// Upper bound of the uniform jitter added to the touch cadence.
    pub touch_jitter_max: Duration,

    /// A touch is written only when the newest non-system event is
    /// younger than this.
    pub touch_max_age: Duration,

    /// Overall deadline for cluster-wide list queries. Stragglers are
    /// cancelled once it elapses.
    pub cluster_list_timeout: Duration,

    /// Default request/reply deadline for synchronous worker calls.
    pub reply_timeout: Duration,

    /// Maximum events per webhook POST.
    pub webhook_batch_limit: usize,

    /// Delivery attempts before a webhook batch is abandoned.
    pub delivery_retry_count: u32,

    /// Per-request timeout for webhook deliveries.
    pub delivery_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pool_size: 8,
            buffer_capacity: 5_000,
            broadcast_interval: Duration::from_millis(500),
            touch_interval: Duration::from_secs(45 * 60),
            touch_jitter_max: Duration::from_secs(30 * 60),
            touch_max_age: Duration::from_secs(45 * 60),
            cluster_list_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(5),
            webhook_batch_limit: 250,
            delivery_retry_count: 3,
            delivery_timeout: Duration::from_secs(30),
        }
    }
}
