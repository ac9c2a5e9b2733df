// ABOUTME: Configuration loading and validation for the scripthost bot.
// ABOUTME: TOML config file with environment variable expansion.

use crate::error::{BridgeError, Result};
use scripthost_core::{HostConfig, SupervisorSettings};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// Top-level configuration for the bot.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub host: HostConfig,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
}

/// Telegram bot credentials for Long Polling connection.
#[derive(Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from @BotFather (e.g., "123456:ABC-DEF1234ghIkl-zyx57W2v1u123ew11").
    pub bot_token: String,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .finish()
    }
}

impl Config {
    /// Default location: `~/.config/scripthost/bot.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("scripthost").join("bot.toml"))
    }

    /// Load configuration from the specified path or the default location.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path
            .or_else(Self::default_path)
            .ok_or_else(|| BridgeError::Config("Could not determine config path".into()))?;

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            BridgeError::Config(format!("Failed to read config from {:?}: {}", path, e))
        })?;

        Self::parse(&contents)
    }

    /// Parse config text, expanding environment variables (undefined ones
    /// become empty strings with a warning), then validate it.
    pub fn parse(contents: &str) -> Result<Self> {
        let contents = shellexpand::env_with_context_no_errors(contents, |var: &str| {
            match std::env::var(var) {
                Ok(val) => Some(val),
                Err(_) => {
                    warn!(
                        variable = %var,
                        "Environment variable not defined, using empty string"
                    );
                    Some(String::new())
                }
            }
        });

        let config: Config = toml::from_str(&contents)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate that required fields are present and properly formatted.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            return Err(BridgeError::Config("telegram.bot_token is required".into()));
        }
        // Telegram bot tokens have format: <bot_id>:<token_string>
        if !self.telegram.bot_token.contains(':') {
            return Err(BridgeError::Config(
                "telegram.bot_token must contain ':' (format: BOT_ID:TOKEN_STRING)".into(),
            ));
        }
        if self.host.owner_id <= 0 {
            return Err(BridgeError::Config(
                "host.owner_id must be a positive Telegram user id".into(),
            ));
        }
        if self.host.interpreter.trim().is_empty() {
            return Err(BridgeError::Config("host.interpreter is required".into()));
        }
        if self.host.extension().trim().is_empty() {
            return Err(BridgeError::Config("host.script_extension is required".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: &str, owner_id: i64) -> Config {
        Config {
            telegram: TelegramConfig {
                bot_token: token.to_string(),
            },
            host: HostConfig::new(owner_id),
            supervisor: SupervisorSettings::default(),
        }
    }

    #[test]
    fn test_config_validates_bot_token_format() {
        let result = config("invalid_token_no_colon", 1).validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains(":"));
    }

    #[test]
    fn test_config_validates_empty_bot_token() {
        let result = config("", 1).validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("bot_token is required"));
    }

    #[test]
    fn test_config_validates_owner_id() {
        let result = config("123456:ABC", 0).validate();
        assert!(result.unwrap_err().to_string().contains("owner_id"));
    }

    #[test]
    fn test_config_validates_interpreter() {
        let mut config = config("123456:ABC", 1);
        config.host.interpreter = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_valid() {
        assert!(config("123456:ABC-DEF", 42).validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", config("123456:SECRET", 1));
        assert!(!rendered.contains("SECRET"));
        assert!(rendered.contains("REDACTED"));
    }
}
