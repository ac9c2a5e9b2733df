// ABOUTME: Configuration for the script host core.
// ABOUTME: Hosting paths, interpreter, and supervisor timings with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where scripts live and how they are launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Telegram user id of the designated owner. Always authorized, never quota-limited.
    pub owner_id: i64,

    /// Root directory holding one sub-directory per user
    #[serde(default = "default_hosting_dir")]
    pub hosting_dir: String,

    /// JSON file with per-user state and script records
    #[serde(default = "default_registry_file")]
    pub registry_file: String,

    /// JSON file with approvals (expiry, name, quota)
    #[serde(default = "default_approvals_file")]
    pub approvals_file: String,

    /// Program used to run every hosted script
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Extension given to stored script files (without the dot)
    #[serde(default = "default_script_extension")]
    pub script_extension: String,
}

fn default_hosting_dir() -> String {
    "~/.local/share/scripthost/hosted_files".to_string()
}

fn default_registry_file() -> String {
    "~/.local/share/scripthost/user_scripts_db.json".to_string()
}

fn default_approvals_file() -> String {
    "~/.local/share/scripthost/approved_users.json".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_script_extension() -> String {
    "py".to_string()
}

impl HostConfig {
    /// Config with default paths for the given owner
    pub fn new(owner_id: i64) -> Self {
        Self {
            owner_id,
            hosting_dir: default_hosting_dir(),
            registry_file: default_registry_file(),
            approvals_file: default_approvals_file(),
            interpreter: default_interpreter(),
            script_extension: default_script_extension(),
        }
    }

    /// Expand ~ in the hosting directory path
    pub fn hosting_dir_expanded(&self) -> PathBuf {
        expand(&self.hosting_dir)
    }

    /// Expand ~ in the registry file path
    pub fn registry_path(&self) -> PathBuf {
        expand(&self.registry_file)
    }

    /// Expand ~ in the approvals file path
    pub fn approvals_path(&self) -> PathBuf {
        expand(&self.approvals_file)
    }

    /// Extension without any leading dot
    pub fn extension(&self) -> &str {
        self.script_extension.trim_start_matches('.')
    }
}

fn expand(path: &str) -> PathBuf {
    shellexpand::tilde(path).into_owned().into()
}

/// Timing and buffering knobs for the supervisor and the boot reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorSettings {
    /// How long output is captured right after a spawn
    pub capture_window_ms: u64,
    /// Sleep between polls of the output queue during the capture window
    pub poll_interval_ms: u64,
    /// Time a process gets to exit after the stop signal before it is killed
    pub grace_period_secs: u64,
    /// Capacity of each process's output channel, in lines
    pub output_buffer_lines: usize,
    /// Delay before the boot reconciler restarts scripts
    pub settle_delay_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            capture_window_ms: 1000,
            poll_interval_ms: 50,
            grace_period_secs: 5,
            output_buffer_lines: 1024,
            settle_delay_secs: 5,
        }
    }
}

impl SupervisorSettings {
    pub fn capture_window(&self) -> Duration {
        Duration::from_millis(self.capture_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_config_defaults_from_toml() {
        let config: HostConfig = toml::from_str("owner_id = 42").unwrap();
        assert_eq!(config.owner_id, 42);
        assert_eq!(config.interpreter, "python3");
        assert_eq!(config.extension(), "py");
        assert!(config.registry_file.ends_with("user_scripts_db.json"));
    }

    #[test]
    fn test_extension_strips_leading_dot() {
        let mut config = HostConfig::new(1);
        config.script_extension = ".sh".to_string();
        assert_eq!(config.extension(), "sh");
    }

    #[test]
    fn test_path_expansion() {
        let config = HostConfig::new(1);
        let expanded = config.hosting_dir_expanded();

        assert!(!expanded.to_string_lossy().contains('~'));
        let home = std::env::var("HOME").unwrap();
        assert!(expanded.to_string_lossy().starts_with(&home));
    }

    #[test]
    fn test_supervisor_settings_partial_override() {
        let settings: SupervisorSettings = toml::from_str("grace_period_secs = 2").unwrap();
        assert_eq!(settings.grace_period(), Duration::from_secs(2));
        assert_eq!(settings.capture_window(), Duration::from_secs(1));
        assert_eq!(settings.settle_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let settings = SupervisorSettings {
            poll_interval_ms: 0,
            ..SupervisorSettings::default()
        };
        assert_eq!(settings.poll_interval(), Duration::from_millis(1));
    }
}
