//! Pool configuration

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::module::ProxyConfig;
use crate::protocol::MessageOptions;
use crate::serde_duration::duration_millis;

/// Worker source used when none is configured
pub const DEFAULT_WORKER_SOURCE: &str = "threadline-worker";

/// Pool configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use threadline::pool::PoolConfig;
///
/// let config = PoolConfig::default()
///     .with_pool_size(4)
///     .with_ping_interval(Duration::from_millis(50));
/// assert_eq!(config.pool_size, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of units running at once
    pub pool_size: usize,

    /// Scheduling interval
    #[serde(with = "duration_millis")]
    pub ping_interval: Duration,

    /// Back off while any system resource has less than this percentage free
    pub resource_threshold: f64,

    /// Worker entry point handed to transport factories
    pub worker_source: String,

    /// Options for remote calls made through the pool's proxies
    pub message: MessageOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            ping_interval: Duration::from_millis(100),
            resource_threshold: 5.0,
            worker_source: DEFAULT_WORKER_SOURCE.to_string(),
            message: MessageOptions::default(),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let pool_size = env::var("THREADLINE_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .map(|size| size.max(1))
            .unwrap_or(defaults.pool_size);

        let ping_interval = env::var("THREADLINE_PING_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.ping_interval);

        let resource_threshold = env::var("THREADLINE_RESOURCE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|threshold| threshold.clamp(0.0, 100.0))
            .unwrap_or(defaults.resource_threshold);

        let worker_source =
            env::var("THREADLINE_WORKER_SOURCE").unwrap_or(defaults.worker_source);

        let mut message = defaults.message;
        if let Some(timeout) = env::var("THREADLINE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            message.timeout = Duration::from_millis(timeout);
        }

        Self {
            pool_size,
            ping_interval,
            resource_threshold,
            worker_source,
            message,
        }
    }

    /// Set the concurrency ceiling (at least 1)
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the free-resource percentage below which the pool backs off
    pub fn with_resource_threshold(mut self, percent: f64) -> Self {
        self.resource_threshold = percent.clamp(0.0, 100.0);
        self
    }

    pub fn with_worker_source(mut self, source: impl Into<String>) -> Self {
        self.worker_source = source.into();
        self
    }

    pub fn with_message_options(mut self, options: MessageOptions) -> Self {
        self.message = options;
        self
    }

    /// Proxy configuration sharing this pool's worker source and options
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig::new()
            .with_source(self.worker_source.clone())
            .with_options(self.message.clone())
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
