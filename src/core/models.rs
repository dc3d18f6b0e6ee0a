use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ConversationId = u64;
pub type MessageId = u64;
pub type UserId = u64;

/// Which side of the marketplace a participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Provider,
}

impl Role {
    /// REST path prefix for conversations owned by this role.
    pub fn path_prefix(self) -> &'static str {
        match self {
            Role::Client => "clients",
            Role::Provider => "providers",
        }
    }

    pub fn counterpart(self) -> Role {
        match self {
            Role::Client => Role::Provider,
            Role::Provider => Role::Client,
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" | "clients" => Ok(Role::Client),
            "provider" | "providers" => Ok(Role::Provider),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The other party of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counterpart {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub role: Role,
}

/// A thread between the current user and one counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub counterpart: Counterpart,
    #[serde(default)]
    pub last_message_preview: String,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub archived: bool,
}

/// A single chat message as confirmed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

/// Cached message history of one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub messages: Vec<Message>,
    pub fetched_at: DateTime<Utc>,
}

/// Which of the two conversation lists a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Active,
    Archived,
}

/// Membership lifecycle of a conversation: `Active <-> Archived`, both -> `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Active,
    Archived,
    Deleted,
}

impl Membership {
    pub fn can_transition_to(self, next: Membership) -> bool {
        matches!(
            (self, next),
            (Membership::Active, Membership::Archived)
                | (Membership::Archived, Membership::Active)
                | (Membership::Active, Membership::Deleted)
                | (Membership::Archived, Membership::Deleted)
        )
    }
}

impl From<ListKind> for Membership {
    fn from(kind: ListKind) -> Self {
        match kind {
            ListKind::Active => Membership::Active,
            ListKind::Archived => Membership::Archived,
        }
    }
}
