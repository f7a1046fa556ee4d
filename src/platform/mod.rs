pub mod telegram;

use thiserror::Error;

/// Kind of conversation an event arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }
}

impl std::str::FromStr for ChatKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(ChatKind::Private),
            "group" => Ok(ChatKind::Group),
            "supergroup" => Ok(ChatKind::Supergroup),
            "channel" => Ok(ChatKind::Channel),
            other => Err(EventError::UnknownChatKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for ChatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat the event was delivered in
#[derive(Debug, Clone, PartialEq)]
pub struct ChatInfo {
    pub id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
    pub username: Option<String>,
    pub description: Option<String>,
}

/// An account added to or removed from a chat
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    /// Absent when the platform omitted the user id
    pub user_id: Option<i64>,
    pub is_bot: bool,
}

/// A validated chat event, independent of the wire format it came in
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub chat: ChatInfo,
    pub sender_id: Option<i64>,
    pub text: Option<String>,
    pub new_chat_member: Option<Member>,
    pub left_chat_member: Option<Member>,
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unknown chat type: {0}")]
    UnknownChatKind(String),
}
