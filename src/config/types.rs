//! Configuration types.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::watcher::{
    DiscoveryPattern, FileSubscriber, NotifySubscriber, PollSubscriber, WatcherError,
    DEFAULT_PATTERN,
};

/// Top-level monitor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub discovery: DiscoveryConfig,
    pub watch: WatchConfig,
    pub notifications: NotificationConfig,
}

/// Where event logs are found and how existing content is treated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Glob relative to the project root.
    pub pattern: String,
    /// Replay content already present in logs found at startup.
    pub process_existing: bool,
}

impl DiscoveryConfig {
    /// Compile the configured glob.
    ///
    /// # Errors
    ///
    /// Returns an error if the glob is invalid.
    pub fn compiled_pattern(&self) -> Result<DiscoveryPattern, WatcherError> {
        DiscoveryPattern::new(&self.pattern)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            process_existing: true,
        }
    }
}

/// File watching backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// Native OS notifications.
    #[default]
    Notify,
    /// Periodic metadata polling.
    Poll,
}

/// How file changes are detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub backend: WatchBackend,
    /// Debounce window for native notifications.
    pub debounce_ms: u64,
    /// Interval between polls for the polling backend.
    pub poll_interval_ms: u64,
}

impl WatchConfig {
    /// Build the subscriber for the configured backend.
    #[must_use]
    pub fn subscriber(&self) -> Arc<dyn FileSubscriber> {
        match self.backend {
            WatchBackend::Notify => Arc::new(NotifySubscriber::new(Duration::from_millis(
                self.debounce_ms,
            ))),
            WatchBackend::Poll => Arc::new(PollSubscriber::new(Duration::from_millis(
                self.poll_interval_ms.max(1),
            ))),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            backend: WatchBackend::Notify,
            debounce_ms: 100,
            poll_interval_ms: 250,
        }
    }
}

/// Finished-job notification preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Offer an "open log" action on finished-job notices.
    pub auto_open_logs: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            auto_open_logs: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_config_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.discovery.pattern, DEFAULT_PATTERN);
        assert!(config.discovery.process_existing);
        assert_eq!(config.watch.backend, WatchBackend::Notify);
        assert_eq!(config.watch.debounce_ms, 100);
        assert!(config.notifications.auto_open_logs);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: MonitorConfig = toml::from_str(
            r#"
            [watch]
            backend = "poll"
            "#,
        )
        .unwrap();
        assert_eq!(config.watch.backend, WatchBackend::Poll);
        assert_eq!(config.watch.poll_interval_ms, 250);
        assert_eq!(config.discovery, DiscoveryConfig::default());
    }

    #[test]
    fn test_compiled_pattern_escapes_regex_metacharacters() {
        let config = DiscoveryConfig {
            pattern: "logs/[".to_string(),
            ..DiscoveryConfig::default()
        };
        // '[' is escaped, so this compiles and only matches literally.
        let pattern = config.compiled_pattern().unwrap();
        assert!(pattern.matches_relative(std::path::Path::new("logs/[")));
    }

    #[test]
    fn test_serialize_roundtrip_through_toml() {
        let config = MonitorConfig::default();
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("[notifications]"));
        let parsed: MonitorConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
