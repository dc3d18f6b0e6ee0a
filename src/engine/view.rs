use chrono::{DateTime, Utc};

use super::SyncEngine;
use crate::core::models::{Conversation, ConversationId, ListKind, Message, Role};

/// Row of a conversation list.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub id: ConversationId,
    pub title: String,
    pub avatar_url: Option<String>,
    pub counterpart_role: Role,
    pub preview: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub archived: bool,
    pub selected: bool,
}

impl ConversationView {
    fn new(conversation: &Conversation, selected: bool) -> Self {
        ConversationView {
            id: conversation.id,
            title: conversation.counterpart.display_name.clone(),
            avatar_url: conversation.counterpart.avatar_url.clone(),
            counterpart_role: conversation.counterpart.role,
            preview: conversation.last_message_preview.clone(),
            last_message_at: conversation.last_message_at,
            unread_count: conversation.unread_count,
            archived: conversation.archived,
            selected,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageView<'a> {
    pub message: &'a Message,
    /// Sent by the signed-in user.
    pub own: bool,
}

/// The open conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadView<'a> {
    pub conversation: ConversationView,
    pub messages: Vec<MessageView<'a>>,
    pub loading: bool,
    pub sending: bool,
    pub draft: &'a str,
    /// Archived conversations take no input until unarchived.
    pub can_compose: bool,
    /// Recovery action shown inside an archived conversation.
    pub can_unarchive: bool,
    pub delete_pending: bool,
}

impl SyncEngine {
    pub fn conversation_views(&self, kind: ListKind) -> Vec<ConversationView> {
        self.store
            .list(kind)
            .map(|c| ConversationView::new(c, self.selected == Some(c.id)))
            .collect()
    }

    pub fn thread_view(&self) -> Option<ThreadView<'_>> {
        let id = self.selected?;
        let conversation = self.store.get(id)?;
        let viewer = self.config.viewer_role;

        Some(ThreadView {
            conversation: ConversationView::new(conversation, true),
            messages: self
                .cache
                .messages(id)
                .iter()
                .map(|m| MessageView {
                    message: m,
                    own: m.sender_role == viewer,
                })
                .collect(),
            loading: self.is_loading(),
            sending: self.composer.is_sending(id),
            draft: self.composer.draft(id),
            can_compose: !conversation.archived,
            can_unarchive: conversation.archived,
            delete_pending: self.pending_delete == Some(id),
        })
    }
}
