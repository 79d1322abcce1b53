//! Container configuration.
//!
//! ```toml
//! pull_interval_ms = 100
//! consume_interval_ms = 20
//! shutdown_quiet_period_ms = 0
//! shutdown_timeout_ms = 2000
//!
//! [strategy]
//! kind = "merged"
//! count = 100
//! block_ms = 1000
//! no_ack = false
//! ```
//!
//! Every field is optional; omitted fields take the defaults above (except
//! `consume_interval_ms`, which defaults to half the pull interval, and
//! `strategy`, which defaults to `kind = "generic"`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use streamtap_core::{ReadOptions, DEFAULT_COUNT};

use crate::container::ContainerStrategy;
use crate::error::{ClientError, Result};

pub const DEFAULT_PULL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Shortest consume interval the container schedules.
const MIN_CONSUME_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Delay (merged) or period (generic) between pull executions
    pub pull_interval_ms: u64,

    /// Period of the consume tick, capped at half the pull interval
    pub consume_interval_ms: Option<u64>,

    /// Wait between stopping the ticks and closing the operator
    pub shutdown_quiet_period_ms: u64,

    /// Upper bound for closing the operator
    pub shutdown_timeout_ms: u64,

    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StrategyConfig {
    Generic,
    Merged {
        #[serde(default = "default_count")]
        count: i64,
        #[serde(default)]
        block_ms: Option<i64>,
        #[serde(default)]
        no_ack: bool,
    },
}

fn default_count() -> i64 {
    i64::from(DEFAULT_COUNT)
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            pull_interval_ms: DEFAULT_PULL_INTERVAL.as_millis() as u64,
            consume_interval_ms: None,
            shutdown_quiet_period_ms: 0,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64,
            strategy: StrategyConfig::Generic,
        }
    }
}

impl ContainerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ContainerConfig = toml::from_str(contents)
            .map_err(|e| ClientError::ConfigError(format!("invalid container config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ClientError::ConfigError(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.pull_interval_ms == 0 {
            return Err(ClientError::ConfigError(
                "pull_interval_ms must be greater than 0".into(),
            ));
        }
        if self.consume_interval_ms == Some(0) {
            return Err(ClientError::ConfigError(
                "consume_interval_ms must be greater than 0".into(),
            ));
        }
        self.strategy()?;
        Ok(())
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.pull_interval_ms)
    }

    /// The consume period the container actually schedules.
    pub fn consume_interval(&self) -> Duration {
        effective_consume_interval(
            self.pull_interval(),
            self.consume_interval_ms.map(Duration::from_millis),
        )
    }

    pub fn shutdown_quiet_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_quiet_period_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Resolve the strategy table, validating merged read options.
    pub fn strategy(&self) -> Result<ContainerStrategy> {
        match &self.strategy {
            StrategyConfig::Generic => Ok(ContainerStrategy::Generic),
            StrategyConfig::Merged {
                count,
                block_ms,
                no_ack,
            } => Ok(ContainerStrategy::Merged(ReadOptions::new(
                *count, *block_ms, *no_ack,
            )?)),
        }
    }
}

/// `min(configured, pull / 2)`, never below one millisecond.
pub(crate) fn effective_consume_interval(pull: Duration, configured: Option<Duration>) -> Duration {
    let ceiling = pull / 2;
    configured
        .map_or(ceiling, |configured| configured.min(ceiling))
        .max(MIN_CONSUME_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ContainerConfig::default();
        assert_eq!(config.pull_interval(), Duration::from_millis(100));
        assert_eq!(config.consume_interval(), Duration::from_millis(50));
        assert_eq!(config.shutdown_quiet_period(), Duration::ZERO);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(2));
        assert_eq!(config.strategy().unwrap(), ContainerStrategy::Generic);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ContainerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ContainerConfig::default());
    }

    #[test]
    fn test_merged_strategy_table() {
        let config = ContainerConfig::from_toml_str(
            r#"
            pull_interval_ms = 200

            [strategy]
            kind = "merged"
            count = 10
            block_ms = 500
            "#,
        )
        .unwrap();

        let expected = ReadOptions::new(10, Some(500), false).unwrap();
        assert_eq!(
            config.strategy().unwrap(),
            ContainerStrategy::Merged(expected)
        );
    }

    #[test]
    fn test_merged_strategy_defaults_count() {
        let config = ContainerConfig::from_toml_str("[strategy]\nkind = \"merged\"\n").unwrap();
        match config.strategy().unwrap() {
            ContainerStrategy::Merged(options) => {
                assert_eq!(options.count(), DEFAULT_COUNT);
                assert!(!options.is_blocking());
            }
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_invalid_merged_count_rejected() {
        let err = ContainerConfig::from_toml_str("[strategy]\nkind = \"merged\"\ncount = 0\n")
            .unwrap_err();
        assert!(matches!(err, ClientError::Core(_)));
    }

    #[test]
    fn test_zero_pull_interval_rejected() {
        let err = ContainerConfig::from_toml_str("pull_interval_ms = 0").unwrap_err();
        assert!(matches!(err, ClientError::ConfigError(_)));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let err = ContainerConfig::from_toml_str("[strategy]\nkind = \"sharded\"\n").unwrap_err();
        assert!(matches!(err, ClientError::ConfigError(_)));
    }

    #[test]
    fn test_consume_interval_clamped() {
        let pull = Duration::from_millis(100);
        assert_eq!(
            effective_consume_interval(pull, Some(Duration::from_millis(80))),
            Duration::from_millis(50)
        );
        assert_eq!(
            effective_consume_interval(pull, Some(Duration::from_millis(10))),
            Duration::from_millis(10)
        );
        assert_eq!(
            effective_consume_interval(Duration::from_millis(1), None),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("container.toml");

        let config = ContainerConfig {
            pull_interval_ms: 40,
            consume_interval_ms: Some(5),
            shutdown_quiet_period_ms: 10,
            shutdown_timeout_ms: 500,
            strategy: StrategyConfig::Merged {
                count: 25,
                block_ms: None,
                no_ack: true,
            },
        };
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = ContainerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.consume_interval(), Duration::from_millis(5));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = ContainerConfig::load(temp_dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ClientError::ConfigError(_)));
    }
}
