use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clienv;
use crate::guardian::log_buffer::DEFAULT_MAX_LINES;
use crate::guardian::LauncherKind;

const CONFIG_FILE: &str = "guardian.toml";
const DEFAULT_LOG_LEVEL: &str = "info";

/// One managed daemon as declared in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub executable: String,
    #[serde(default)]
    pub environment: Vec<String>,
}

impl ServiceConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            environment: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    /// debug | info | warning | error
    pub log_level: String,
    /// Lines of output kept in memory per service
    pub max_log_lines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawn_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher: Option<LauncherKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    /// Extra `KEY=VALUE` entries appended to the default environment
    pub default_environment: Vec<String>,
    pub services: BTreeMap<String, ServiceConfig>,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        let mut services = BTreeMap::new();
        services.insert("networkd".to_string(), ServiceConfig::new("edged"));
        services.insert("controld".to_string(), ServiceConfig::new("network-gateway"));

        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            max_log_lines: DEFAULT_MAX_LINES,
            spawn_timeout_secs: None,
            launcher: None,
            base_dir: None,
            default_environment: Vec::new(),
            services,
        }
    }
}

impl GuardianConfig {
    /// $GUARDIAN_CONFIG_DIR/guardian.toml or ~/.config/guardian/guardian.toml
    pub fn config_path() -> PathBuf {
        clienv::config_dir().join(CONFIG_FILE)
    }

    /// Load the config file (defaults if absent) and apply env overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading guardian config");

        if !path.exists() {
            tracing::trace!("Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        tracing::trace!(
            log_level = %config.log_level,
            max_log_lines = config.max_log_lines,
            services = config.services.len(),
            "Guardian config parsed"
        );
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config to TOML")
    }

    /// Environment variables win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Some(level) = clienv::log_level() {
            self.log_level = level;
        }
        if let Some(lines) = clienv::max_log_lines() {
            self.max_log_lines = lines;
        }
        if let Some(timeout) = clienv::spawn_timeout() {
            self.spawn_timeout_secs = Some(timeout.as_secs());
        }
        if let Some(launcher) = clienv::launcher() {
            self.launcher = Some(launcher);
        }
        if let Some(base) = clienv::base_dir() {
            self.base_dir = Some(base);
        }
    }

    pub fn spawn_timeout(&self) -> Option<Duration> {
        self.spawn_timeout_secs.map(Duration::from_secs)
    }

    pub fn launcher_kind(&self) -> LauncherKind {
        self.launcher.unwrap_or_else(LauncherKind::platform_default)
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(clienv::default_base_dir)
    }

    /// Process-wide default environment: the base path variable first, then
    /// the configured extras.
    pub fn default_environment(&self) -> Vec<String> {
        let mut env = vec![format!(
            "{}={}",
            clienv::BASE_ENV_VAR,
            self.base_dir().display()
        )];
        env.extend(self.default_environment.iter().cloned());
        env
    }

    /// `tracing_subscriber::EnvFilter` directive for the configured level.
    pub fn filter_directive(&self) -> &'static str {
        match self.log_level.trim().to_ascii_lowercase().as_str() {
            "debug" => "debug",
            "warning" | "warn" => "warn",
            "error" => "error",
            "trace" => "trace",
            _ => "info",
        }
    }
}
