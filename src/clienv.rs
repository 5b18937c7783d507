use std::path::PathBuf;
use std::time::Duration;

use crate::guardian::LauncherKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvVar {
    GuardianConfigDir,
    GuardianLogLevel,
    GuardianMaxLogLines,
    GuardianSpawnTimeout,
    GuardianLauncher,
    GuardianBaseDir,
}

impl EnvVar {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvVar::GuardianConfigDir => "GUARDIAN_CONFIG_DIR",
            EnvVar::GuardianLogLevel => "GUARDIAN_LOG_LEVEL",
            EnvVar::GuardianMaxLogLines => "GUARDIAN_MAX_LOG_LINES",
            EnvVar::GuardianSpawnTimeout => "GUARDIAN_SPAWN_TIMEOUT",
            EnvVar::GuardianLauncher => "GUARDIAN_LAUNCHER",
            EnvVar::GuardianBaseDir => "GUARDIAN_BASE_DIR",
        }
    }
}

const FALLBACK_CONFIG_DIR: &str = "~/.config";
const FALLBACK_DATA_DIR: &str = "~/.local/share";
const GUARDIAN_SUBDIR: &str = "guardian";

/// Variable handed to every service pointing at the installation base.
pub const BASE_ENV_VAR: &str = "GUARDIAN_BASE";

/// Non-empty value of an environment variable.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(var: EnvVar) -> Option<T> {
    let raw = env_opt(var.as_str())?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = var.as_str(), value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

/// Guardian config directory ($GUARDIAN_CONFIG_DIR or ~/.config/guardian)
pub fn config_dir() -> PathBuf {
    let dir = env_opt(EnvVar::GuardianConfigDir.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
                .join(GUARDIAN_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved config directory");
    dir
}

/// Default installation base (~/.local/share/guardian)
pub fn default_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(FALLBACK_DATA_DIR))
        .join(GUARDIAN_SUBDIR)
}

/// Installation base override ($GUARDIAN_BASE_DIR)
pub fn base_dir() -> Option<PathBuf> {
    let val = env_opt(EnvVar::GuardianBaseDir.as_str()).map(PathBuf::from);
    tracing::trace!(value = ?val, "GUARDIAN_BASE_DIR env var");
    val
}

/// Log level override ($GUARDIAN_LOG_LEVEL)
pub fn log_level() -> Option<String> {
    let val = env_opt(EnvVar::GuardianLogLevel.as_str());
    tracing::trace!(value = ?val, "GUARDIAN_LOG_LEVEL env var");
    val
}

/// Per-service log capacity override ($GUARDIAN_MAX_LOG_LINES)
pub fn max_log_lines() -> Option<usize> {
    env_parse(EnvVar::GuardianMaxLogLines)
}

/// Spawn timeout override in seconds ($GUARDIAN_SPAWN_TIMEOUT)
pub fn spawn_timeout() -> Option<Duration> {
    env_parse::<u64>(EnvVar::GuardianSpawnTimeout).map(Duration::from_secs)
}

/// Launcher variant override ($GUARDIAN_LAUNCHER=child|snapshot)
pub fn launcher() -> Option<LauncherKind> {
    env_parse(EnvVar::GuardianLauncher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_names_share_prefix() {
        for var in [
            EnvVar::GuardianConfigDir,
            EnvVar::GuardianLogLevel,
            EnvVar::GuardianMaxLogLines,
            EnvVar::GuardianSpawnTimeout,
            EnvVar::GuardianLauncher,
            EnvVar::GuardianBaseDir,
        ] {
            assert!(var.as_str().starts_with("GUARDIAN_"));
        }
    }

    #[test]
    fn default_base_dir_ends_with_subdir() {
        assert!(default_base_dir().ends_with(GUARDIAN_SUBDIR));
    }
}
