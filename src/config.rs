//! Bus configuration.
//!
//! All settings have defaults; [`EventBusBuilder`](crate::bus::EventBusBuilder)
//! exposes them as fluent setters.

use std::time::Duration;

use crate::codec::CacheScope;

/// Default reply timeout for request/response sends.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on the default reactor count.
pub const DEFAULT_MAX_REACTORS: usize = 4;

/// Default prefix for reactor thread names.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "contract-bus-reactor";

/// Configuration for an [`EventBus`](crate::bus::EventBus).
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Number of reactor threads.
    pub reactors: usize,
    /// How long a sender waits for a reply.
    pub reply_timeout: Duration,
    /// Scope of the codec instance cache.
    pub codec_cache: CacheScope,
    /// Reactor thread name prefix; threads are named `<prefix>-<index>`.
    pub thread_name_prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            reactors: default_reactor_count(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            codec_cache: CacheScope::default(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

/// Available parallelism, capped at [`DEFAULT_MAX_REACTORS`].
pub fn default_reactor_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(DEFAULT_MAX_REACTORS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert!(config.reactors >= 1);
        assert!(config.reactors <= DEFAULT_MAX_REACTORS);
        assert_eq!(config.reply_timeout, DEFAULT_REPLY_TIMEOUT);
        assert_eq!(config.codec_cache, CacheScope::Process);
        assert_eq!(config.thread_name_prefix, "contract-bus-reactor");
    }
}
