mod config;
mod groups;
mod handler;
mod platform;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, JoinPolicyKind};
use crate::groups::GroupStore;
use crate::handler::{GroupJoinHandler, JoinPolicy, Messenger};
use crate::platform::telegram::{self, TelegramMessenger};
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,catatbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Join policy: {}", config.telegram.join_policy);
    info!("  Database: {}", config.database.path.display());
    info!("  Listen: {}", config.server.bind_address);

    let groups = GroupStore::open(&config.database.path)?;
    let bot = Bot::new(&config.telegram.bot_token);

    // Removal events are always matched on the bot's own id
    let bot_id = match config.telegram.bot_id {
        Some(id) => id,
        None => telegram::resolve_bot_id(&bot).await?,
    };
    let policy = match config.telegram.join_policy {
        JoinPolicyKind::AnyBot => JoinPolicy::AnyBot,
        JoinPolicyKind::SelfOnly => JoinPolicy::SelfOnly,
    };

    if let Some(url) = &config.telegram.webhook_url {
        telegram::register_webhook(&bot, url, config.telegram.webhook_secret.as_deref()).await?;
    }

    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(bot));
    let handler = GroupJoinHandler::new(
        Arc::new(groups.clone()),
        messenger.clone(),
        policy,
        bot_id,
    );

    let state = Arc::new(AppState {
        handler,
        groups,
        messenger,
        webhook_secret: config.telegram.webhook_secret.clone(),
        admin_token: config.server.admin_token.clone(),
    });

    info!("Bot is starting...");
    server::serve(
        state,
        &config.server.bind_address,
        &config.server.webhook_path,
    )
    .await?;

    Ok(())
}
