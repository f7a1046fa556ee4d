use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Which new members count as "the bot joined this group".
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicyKind {
    /// Any account flagged `is_bot`.
    #[default]
    AnyBot,
    /// Only this bot's own account.
    SelfOnly,
}

impl std::fmt::Display for JoinPolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinPolicyKind::AnyBot => write!(f, "any_bot"),
            JoinPolicyKind::SelfOnly => write!(f, "self_only"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
    #[serde(default = "default_database_config")]
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default)]
    pub join_policy: JoinPolicyKind,
    /// The bot's own user id. Resolved with getMe at startup when absent.
    #[serde(default)]
    pub bot_id: Option<i64>,
    /// Public URL to register with Telegram at startup
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Expected value of the X-Telegram-Bot-Api-Secret-Token header
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    /// Bearer token for the `/groups` admin routes. They are not mounted without it.
    #[serde(default)]
    pub admin_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("catatbot.db")
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind_address: default_bind_address(),
        webhook_path: default_webhook_path(),
        admin_token: None,
    }
}

fn default_database_config() -> DatabaseConfig {
    DatabaseConfig {
        path: default_db_path(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("telegram.bot_token must not be empty");
        }
        if !self.server.webhook_path.starts_with('/') {
            bail!(
                "server.webhook_path must start with '/', got {:?}",
                self.server.webhook_path
            );
        }
        Ok(())
    }
}
