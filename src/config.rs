//! Configuration loading and defaults for hibernatord.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for hibernatord.
///
/// All thresholds are expressed in whole minutes; a zero threshold disables
/// that idle condition. At least one of the three idle thresholds must be
/// nonzero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minutes with no logged-in users before hibernating (default: 30).
    pub no_users_idle_minutes: u64,

    /// Minutes with every session disconnected before hibernating (default: 60).
    pub all_disconnected_idle_minutes: u64,

    /// Minutes without input in any connected session before hibernating
    /// (default: 120).
    pub inactive_user_idle_minutes: u64,

    /// Warning countdown shown to inactive users before hibernation, in
    /// minutes (default: 5). Zero hibernates without warning.
    pub inactive_user_warning_minutes: u64,

    /// Minutes of effective uptime required after boot or resume before any
    /// idle check runs (default: 10). Zero disables the gate.
    pub minimum_uptime_minutes: u64,

    /// Path to the hibernatord-relay binary.
    /// If unset, looks next to the daemon executable.
    pub relay_path: Option<PathBuf>,

    /// Dry run mode: log the hibernate request instead of issuing it.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            no_users_idle_minutes: 30,
            all_disconnected_idle_minutes: 60,
            inactive_user_idle_minutes: 120,
            inactive_user_warning_minutes: 5,
            minimum_uptime_minutes: 10,
            relay_path: None,
            dry_run: false,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default locations, or return defaults if
    /// no file exists.
    ///
    /// Order: explicit path, `/etc/hibernatord/config.toml`, then the user
    /// config directory (useful when running unprivileged for testing).
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        let system_path = PathBuf::from("/etc/hibernatord/config.toml");
        if system_path.exists() {
            return Self::load(&system_path);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_path = config_dir.join("hibernatord").join("config.toml");
            if user_path.exists() {
                return Self::load(&user_path);
            }
        }

        Ok(Self::default())
    }

    /// Check that the configuration can drive the monitor at all.
    pub fn validate(&self) -> Result<()> {
        if self.no_users_idle_minutes == 0
            && self.all_disconnected_idle_minutes == 0
            && self.inactive_user_idle_minutes == 0
        {
            anyhow::bail!("at least one idle threshold must be greater than 0");
        }
        Ok(())
    }

    pub fn no_users_threshold(&self) -> Duration {
        Duration::from_secs(self.no_users_idle_minutes * 60)
    }

    pub fn all_disconnected_threshold(&self) -> Duration {
        Duration::from_secs(self.all_disconnected_idle_minutes * 60)
    }

    pub fn inactive_user_threshold(&self) -> Duration {
        Duration::from_secs(self.inactive_user_idle_minutes * 60)
    }

    pub fn warning_period(&self) -> Duration {
        Duration::from_secs(self.inactive_user_warning_minutes * 60)
    }

    pub fn minimum_uptime(&self) -> Duration {
        Duration::from_secs(self.minimum_uptime_minutes * 60)
    }

    /// Smallest nonzero idle threshold, used as the fallback poll interval
    /// when no condition timer is running.
    pub fn smallest_idle_threshold(&self) -> Option<Duration> {
        [
            self.no_users_idle_minutes,
            self.all_disconnected_idle_minutes,
            self.inactive_user_idle_minutes,
        ]
        .into_iter()
        .filter(|&m| m > 0)
        .min()
        .map(|m| Duration::from_secs(m * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.no_users_idle_minutes, 30);
        assert_eq!(config.all_disconnected_idle_minutes, 60);
        assert_eq!(config.inactive_user_idle_minutes, 120);
        assert_eq!(config.inactive_user_warning_minutes, 5);
        assert_eq!(config.minimum_uptime_minutes, 10);
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_all_zero_thresholds() {
        let config = Config {
            no_users_idle_minutes: 0,
            all_disconnected_idle_minutes: 0,
            inactive_user_idle_minutes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_single_nonzero_threshold() {
        let config = Config {
            no_users_idle_minutes: 0,
            all_disconnected_idle_minutes: 0,
            inactive_user_idle_minutes: 15,
            inactive_user_warning_minutes: 0,
            minimum_uptime_minutes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            no_users_idle_minutes = 15
            all_disconnected_idle_minutes = 0
            inactive_user_idle_minutes = 45
            inactive_user_warning_minutes = 2
            minimum_uptime_minutes = 5
            dry_run = true
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.no_users_idle_minutes, 15);
        assert_eq!(config.all_disconnected_idle_minutes, 0);
        assert_eq!(config.inactive_user_idle_minutes, 45);
        assert_eq!(config.inactive_user_warning_minutes, 2);
        assert_eq!(config.minimum_uptime_minutes, 5);
        assert!(config.dry_run);
        assert!(config.relay_path.is_none());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "no_users_idle_minutes = 0\nall_disconnected_idle_minutes = 0\ninactive_user_idle_minutes = 0"
        )
        .unwrap();

        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load(Path::new("/nonexistent/config.toml")).is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config::default();
        assert_eq!(config.no_users_threshold(), Duration::from_secs(30 * 60));
        assert_eq!(config.warning_period(), Duration::from_secs(5 * 60));
        assert_eq!(config.minimum_uptime(), Duration::from_secs(10 * 60));
    }

    #[test]
    fn test_smallest_idle_threshold_skips_disabled() {
        let config = Config {
            no_users_idle_minutes: 0,
            all_disconnected_idle_minutes: 60,
            inactive_user_idle_minutes: 45,
            ..Default::default()
        };
        assert_eq!(
            config.smallest_idle_threshold(),
            Some(Duration::from_secs(45 * 60))
        );

        let all_zero = Config {
            no_users_idle_minutes: 0,
            all_disconnected_idle_minutes: 0,
            inactive_user_idle_minutes: 0,
            ..Default::default()
        };
        assert_eq!(all_zero.smallest_idle_threshold(), None);
    }
}
