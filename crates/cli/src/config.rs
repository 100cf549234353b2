//! Relay configuration management

use anyhow::{Context, Result, anyhow};
use control::{RelaySettings, TargetFilter, TargetState};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Accepted per-transfer timeouts, in milliseconds
pub const TIMEOUT_RANGE_MS: std::ops::RangeInclusive<u64> = 1..=10_000;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub relay: RelayDefaults,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Defaults for the command line options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDefaults {
    /// Target state when `--state` is not given
    #[serde(default)]
    pub state: TargetState,
    /// Relay id when `--id` is not given (0 = all relays)
    #[serde(default)]
    pub id: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Base log level, lowered one step per `-v`
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_timeout_ms() -> u64 {
    control::DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for RelayDefaults {
    fn default() -> Self {
        Self {
            state: TargetState::default(),
            id: 0,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path the standard locations are tried in order; finding
    /// none is an error.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/mp709/relay.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::debug!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate TOML content
    pub fn parse(content: &str) -> Result<Self> {
        let config: RelayConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        let found = [Self::default_path(), PathBuf::from("/etc/mp709/relay.toml")]
            .iter()
            .any(|p| p.exists());
        if !found {
            return Self::default();
        }

        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                // Logging is not initialized yet
                eprintln!("Config: {:#}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("mp709").join("relay.toml")
        } else {
            PathBuf::from(".config/mp709/relay.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !VALID_LEVELS.contains(&self.logging.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.log_level,
                VALID_LEVELS.join(", ")
            ));
        }

        if !TIMEOUT_RANGE_MS.contains(&self.relay.timeout_ms) {
            return Err(anyhow!(
                "Invalid timeout_ms {}, must be between {} and {}",
                self.relay.timeout_ms,
                TIMEOUT_RANGE_MS.start(),
                TIMEOUT_RANGE_MS.end()
            ));
        }

        Ok(())
    }

    pub fn filter(&self) -> TargetFilter {
        TargetFilter(self.relay.id)
    }

    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            timeout: Duration::from_millis(self.relay.timeout_ms),
        }
    }
}

/// Load the configuration at `path`, expanding a leading `~`
pub fn load_config(path: &str) -> Result<RelayConfig> {
    RelayConfig::load(Some(expand_path(path)))
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}
