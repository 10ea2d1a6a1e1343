//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default retry-loop poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What to do with an existing local table when the engine opens it.
///
/// The default is [`TableMode::Preserve`], so unconfirmed rows outlive the
/// process. The older contract dropped and recreated the table on every
/// first use; that behavior is opt-in through [`TableMode::Recreate`] or
/// [`EngineConfig::recreate_tables`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableMode {
    /// Create the table if absent and keep existing rows (pending local
    /// changes survive a restart)
    #[default]
    Preserve,
    /// Drop and recreate the table and reseed its deletion checkpoint; the
    /// local table is only a cache of the server
    Recreate,
}

/// Configuration for a [`crate::SyncEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How often the background loop retries unconfirmed rows
    pub poll_interval: Duration,
    pub table_mode: TableMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            table_mode: TableMode::Preserve,
        }
    }
}

impl EngineConfig {
    /// Set the retry-loop poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Drop and recreate the local table on open
    #[must_use]
    pub const fn recreate_tables(mut self) -> Self {
        self.table_mode = TableMode::Recreate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.table_mode, TableMode::Preserve);
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::default()
            .with_poll_interval(Duration::from_millis(50))
            .recreate_tables();
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.table_mode, TableMode::Recreate);
    }
}
