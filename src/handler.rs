use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::groups::{GroupRegistration, GroupStore, NewGroup};
use crate::platform::{InboundEvent, Member};

/// Sent to a group right after the bot is added to it
pub const WELCOME_MESSAGE: &str = "👋 <b>Halo!</b>\n\n\
Saya siap mencatat keuangan grup ini.\n\n\
Gunakan format:\n\
<code>/catat Title | Item1=Harga | Item2=Harga</code>\n\n\
Contoh:\n\
<code>/catat Makan Siang | Nasi=15000 | Teh=5000</code>";

pub const GROUP_SAVED: &str = "Group saved successfully";
pub const GROUP_DEACTIVATED: &str = "Group deactivated";

/// Persistence collaborator for group records
#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// Idempotent: repeated calls with the same id yield the same record.
    async fn get_or_create_group(&self, group: &NewGroup) -> Result<GroupRegistration>;

    /// Returns true if an active group was switched off.
    async fn deactivate_group(&self, id: i64) -> Result<bool>;
}

#[async_trait]
impl GroupRepository for GroupStore {
    async fn get_or_create_group(&self, group: &NewGroup) -> Result<GroupRegistration> {
        GroupStore::get_or_create_group(self, group).await
    }

    async fn deactivate_group(&self, id: i64) -> Result<bool> {
        GroupStore::deactivate_group(self, id).await
    }
}

/// Outbound chat messaging collaborator
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// Decides which new members count as the bot itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPolicy {
    /// Any member flagged `is_bot`
    AnyBot,
    /// Only the member whose user id matches the running bot
    SelfOnly,
}

impl JoinPolicy {
    pub fn admits(&self, member: &Member, bot_id: i64) -> bool {
        match self {
            JoinPolicy::AnyBot => member.is_bot,
            JoinPolicy::SelfOnly => is_self(member, bot_id),
        }
    }
}

fn is_self(member: &Member, bot_id: i64) -> bool {
    member.is_bot && member.user_id == Some(bot_id)
}

/// Webhook reply body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Acknowledgment {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Acknowledgment {
    pub fn ok() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
        }
    }
}

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Failed to persist group {chat_id}: {cause:#}")]
    Persistence { chat_id: i64, cause: anyhow::Error },
}

/// Registers groups when the bot is added to them
pub struct GroupJoinHandler {
    groups: Arc<dyn GroupRepository>,
    messenger: Arc<dyn Messenger>,
    policy: JoinPolicy,
    bot_id: i64,
}

impl GroupJoinHandler {
    pub fn new(
        groups: Arc<dyn GroupRepository>,
        messenger: Arc<dyn Messenger>,
        policy: JoinPolicy,
        bot_id: i64,
    ) -> Self {
        Self {
            groups,
            messenger,
            policy,
            bot_id,
        }
    }

    /// Route an event to the join or removal path
    pub async fn dispatch(&self, event: &InboundEvent) -> Result<Acknowledgment, HandlerError> {
        if event.new_chat_member.is_none() && event.left_chat_member.is_some() {
            return self.handle_removal(event).await;
        }
        self.handle(event).await
    }

    /// Save the group and greet it when the bot is the new member.
    ///
    /// A persistence failure aborts before any message is sent. A failed
    /// welcome message is logged and the group still counts as saved.
    pub async fn handle(&self, event: &InboundEvent) -> Result<Acknowledgment, HandlerError> {
        let member = match &event.new_chat_member {
            Some(member) => member,
            None => return Ok(Acknowledgment::ok()),
        };

        if !self.policy.admits(member, self.bot_id) {
            debug!(
                "New member {:?} in chat {} is not this bot, ignoring",
                member.user_id, event.chat.id
            );
            return Ok(Acknowledgment::ok());
        }

        let chat_id = event.chat.id;
        let registration = self
            .groups
            .get_or_create_group(&NewGroup::from(&event.chat))
            .await
            .map_err(|cause| HandlerError::Persistence { chat_id, cause })?;

        let group = &registration.record;
        if registration.created {
            info!("Bot joined group: {} ({})", group.name, chat_id);
        } else if registration.reactivated {
            info!("Bot rejoined group: {} ({})", group.name, chat_id);
        } else {
            info!("Bot joined already registered group: {} ({})", group.name, chat_id);
        }

        if let Err(e) = self.messenger.send_message(chat_id, WELCOME_MESSAGE).await {
            warn!("Failed to send welcome message to {}: {:#}", chat_id, e);
        }

        Ok(Acknowledgment::with_message(GROUP_SAVED))
    }

    /// Deactivate the group when the bot itself is the member who left.
    ///
    /// Always matched on the bot's own id, whatever the join policy, so another
    /// bot leaving never switches a group off.
    pub async fn handle_removal(
        &self,
        event: &InboundEvent,
    ) -> Result<Acknowledgment, HandlerError> {
        let member = match &event.left_chat_member {
            Some(member) => member,
            None => return Ok(Acknowledgment::ok()),
        };

        if !is_self(member, self.bot_id) {
            debug!(
                "Member {:?} left chat {}, not this bot, ignoring",
                member.user_id, event.chat.id
            );
            return Ok(Acknowledgment::ok());
        }

        let chat_id = event.chat.id;
        let deactivated = self
            .groups
            .deactivate_group(chat_id)
            .await
            .map_err(|cause| HandlerError::Persistence { chat_id, cause })?;

        if deactivated {
            info!("Bot removed from group {}, marked inactive", chat_id);
            Ok(Acknowledgment::with_message(GROUP_DEACTIVATED))
        } else {
            debug!("Bot removed from unregistered or inactive group {}", chat_id);
            Ok(Acknowledgment::ok())
        }
    }
}
