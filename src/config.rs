//! Connection-level configuration knobs.
//!
//! The core never reads a file or an environment variable. A caller's own config
//! layer is expected to produce a [`ConnectionConfig`] and hand it to
//! [`Connection::open_with_config`](crate::connection::Connection::open_with_config).

use std::time::Duration;

use crate::error::ERROR_CHANNEL_CAPACITY;

/// Default dispatcher tick interval.
///
/// A latency/CPU compromise rather than an empirically tuned value; exposed as a
/// knob rather than hardcoded.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Tunable knobs for a single [`Connection`](crate::connection::Connection).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Overrides the vendor DLL search path. When `None`, the platform loader's
    /// default search rules apply (the core does no filesystem probing itself).
    pub dll_path: Option<String>,
    /// How often the dispatcher wakes to drain the raw queue.
    pub tick_interval: Duration,
    /// Capacity of each manager's bounded background error channel.
    pub error_channel_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dll_path: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
            error_channel_capacity: ERROR_CHANNEL_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.dll_path, None);
        assert_eq!(cfg.tick_interval, Duration::from_millis(50));
        assert_eq!(cfg.error_channel_capacity, 10);
    }
}
