use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use teloxide::payloads::{SendMessageSetters, SetWebhookSetters};
use teloxide::requests::Requester;
use teloxide::types::{AllowedUpdate, ChatId, ParseMode};
use teloxide::Bot;
use tracing::info;

use crate::handler::Messenger;
use crate::platform::{ChatInfo, ChatKind, EventError, InboundEvent, Member};

// Wire shapes of the webhook payload. Everything is optional here so that
// missing fields surface as EventError instead of a generic serde message.

#[derive(Debug, Deserialize)]
struct RawUpdate {
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: Option<RawChat>,
    #[serde(default)]
    from: Option<RawUser>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    new_chat_member: Option<RawUser>,
    #[serde(default)]
    left_chat_member: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: Option<i64>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    is_bot: bool,
}

impl From<RawUser> for Member {
    fn from(user: RawUser) -> Self {
        Member {
            user_id: user.id,
            is_bot: user.is_bot,
        }
    }
}

/// Parse a Telegram webhook body.
///
/// Returns `Ok(None)` for updates that carry no `message` (edits, callbacks, ...).
pub fn parse_update(body: &[u8]) -> Result<Option<InboundEvent>, EventError> {
    let update: RawUpdate = serde_json::from_slice(body)?;
    let message = match update.message {
        Some(m) => m,
        None => return Ok(None),
    };

    let chat = message.chat.ok_or(EventError::MissingField("message.chat"))?;
    let id = chat.id.ok_or(EventError::MissingField("message.chat.id"))?;
    let kind = chat
        .kind
        .ok_or(EventError::MissingField("message.chat.type"))?
        .parse::<ChatKind>()?;

    Ok(Some(InboundEvent {
        chat: ChatInfo {
            id,
            kind,
            title: chat.title,
            username: chat.username,
            description: chat.description,
        },
        sender_id: message.from.and_then(|u| u.id),
        text: message.text,
        new_chat_member: message.new_chat_member.map(Member::from),
        left_chat_member: message.left_chat_member.map(Member::from),
    }))
}

/// Sends chat messages through the Telegram Bot API
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await
            .with_context(|| format!("Failed to send message to chat {}", chat_id))?;
        Ok(())
    }
}

/// Look up the bot's own user id
pub async fn resolve_bot_id(bot: &Bot) -> Result<i64> {
    let me = bot.get_me().await.context("getMe request failed")?;
    let id = i64::try_from(me.user.id.0).context("Bot id does not fit in i64")?;
    info!("Resolved bot identity: @{} ({})", me.username(), id);
    Ok(id)
}

/// Replace whatever webhook is registered with `url`
pub async fn register_webhook(bot: &Bot, url: &str, secret: Option<&str>) -> Result<()> {
    let url = reqwest::Url::parse(url).with_context(|| format!("Invalid webhook URL: {}", url))?;

    bot.delete_webhook()
        .await
        .context("Failed to delete existing webhook")?;

    let mut request = bot
        .set_webhook(url.clone())
        .drop_pending_updates(true)
        .allowed_updates(vec![AllowedUpdate::Message]);
    if let Some(secret) = secret {
        request = request.secret_token(secret.to_string());
    }
    request
        .await
        .with_context(|| format!("Failed to set webhook to {}", url))?;

    info!("Webhook registered: {}", url);
    Ok(())
}
