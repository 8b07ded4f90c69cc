//! Settings read at the moment they are needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use super::loader::ConfigLoader;
use super::types::NotificationConfig;

/// Notification preferences, consulted on every use rather than cached.
///
/// Called from the dispatcher task, so implementations must answer without
/// blocking.
pub trait NotificationSettings: Send + Sync {
    /// Whether finished-job notices should offer to open the job log.
    fn auto_open_logs(&self) -> bool;
}

/// Settings fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct FixedSettings {
    pub auto_open_logs: bool,
}

impl Default for FixedSettings {
    fn default() -> Self {
        Self {
            auto_open_logs: NotificationConfig::default().auto_open_logs,
        }
    }
}

impl NotificationSettings for FixedSettings {
    fn auto_open_logs(&self) -> bool {
        self.auto_open_logs
    }
}

/// Settings that follow edits to the config file.
///
/// Reads are a single atomic load. The file is re-read on a blocking thread,
/// either on demand through [`ReloadingSettings::reload`] or periodically by
/// the task started in [`ReloadingSettings::spawn`].
#[derive(Debug)]
pub struct ReloadingSettings {
    auto_open_logs: AtomicBool,
}

impl ReloadingSettings {
    #[must_use]
    pub fn new(auto_open_logs: bool) -> Self {
        Self {
            auto_open_logs: AtomicBool::new(auto_open_logs),
        }
    }

    /// Create settings and reload them from `loader` every `interval`.
    ///
    /// The reload task stops once the returned handle and all its clones are dropped.
    #[must_use]
    pub fn spawn(auto_open_logs: bool, loader: ConfigLoader, interval: Duration) -> Arc<Self> {
        let settings = Arc::new(Self::new(auto_open_logs));
        let weak: Weak<Self> = Arc::downgrade(&settings);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(settings) = weak.upgrade() else {
                    break;
                };
                settings.reload(loader.clone()).await;
            }
            tracing::debug!("Settings reload task stopped");
        });

        settings
    }

    /// Re-read the config file off the runtime threads.
    ///
    /// A file that cannot be loaded falls back to the default with a warning.
    pub async fn reload(&self, loader: ConfigLoader) {
        let auto_open_logs = match tokio::task::spawn_blocking(move || loader.load()).await {
            Ok(Ok(config)) => config.notifications.auto_open_logs,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to reload config, using default auto_open_logs");
                NotificationConfig::default().auto_open_logs
            }
            Err(e) => {
                tracing::warn!(error = %e, "Config reload task failed");
                return;
            }
        };
        self.auto_open_logs.store(auto_open_logs, Ordering::Relaxed);
    }
}

impl NotificationSettings for ReloadingSettings {
    fn auto_open_logs(&self) -> bool {
        self.auto_open_logs.load(Ordering::Relaxed)
    }
}
