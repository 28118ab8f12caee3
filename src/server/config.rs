use std::time::Duration;

use serde::Deserialize;

use super::limited::ExchangeLimits;

/// Settings for a [`Server`](super::Server).
///
/// Every field has a default, so a partial config deserializes cleanly:
///
/// ```
/// use h1chain::server::ServerConfig;
///
/// let config: ServerConfig =
///     serde_json::from_str(r#"{"limits": {"read_limit": 65536}}"#).unwrap();
/// assert_eq!(config.limits.read_limit, 65536);
/// assert!(config.idle_timeout.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Per-exchange byte ceilings applied to every session.
    pub limits: ExchangeLimits,
    /// Sessions idle for longer than this are force-closed. `None` disables reaping.
    pub idle_timeout: Option<Duration>,
    /// How often the idle reaper scans sessions.
    pub reap_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            limits: ExchangeLimits::default(),
            idle_timeout: None,
            reap_interval: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn limits(mut self, limits: ExchangeLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }
}
