use std::collections::{HashMap, HashSet};

use super::{Event, SyncEngine, SyncError, UpdateSource};
use crate::core::models::ConversationId;

/// Per-conversation drafts and the sends currently awaiting the server.
///
/// Nothing is echoed locally: a message only reaches the cache once the
/// server has returned its canonical form.
#[derive(Debug, Default)]
pub struct Composer {
    drafts: HashMap<ConversationId, String>,
    sending: HashSet<ConversationId>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trimmed content, or `EmptyMessage` if there is nothing to send.
    pub fn prepare(text: &str) -> Result<String, SyncError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        Ok(trimmed.to_string())
    }

    pub fn set_draft(&mut self, conversation_id: ConversationId, text: impl Into<String>) {
        self.drafts.insert(conversation_id, text.into());
    }

    pub fn draft(&self, conversation_id: ConversationId) -> &str {
        self.drafts
            .get(&conversation_id)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Mark a send as in flight. The raw text stays as the draft until the
    /// server confirms, so a failed send can be retried as typed.
    pub fn begin_send(&mut self, conversation_id: ConversationId, text: &str) -> Result<(), SyncError> {
        if !self.sending.insert(conversation_id) {
            return Err(SyncError::SendInProgress(conversation_id));
        }
        self.drafts.insert(conversation_id, text.to_string());
        Ok(())
    }

    pub fn finish_send(&mut self, conversation_id: ConversationId, confirmed: bool) {
        self.sending.remove(&conversation_id);
        if confirmed {
            self.drafts.remove(&conversation_id);
        }
    }

    pub fn is_sending(&self, conversation_id: ConversationId) -> bool {
        self.sending.contains(&conversation_id)
    }

    pub fn discard(&mut self, conversation_id: ConversationId) {
        self.drafts.remove(&conversation_id);
        self.sending.remove(&conversation_id);
    }
}

impl SyncEngine {
    /// Send `text` to a conversation. Rejections happen before any request.
    pub fn send(&mut self, conversation_id: ConversationId, text: &str) -> Result<(), SyncError> {
        let content = Composer::prepare(text)?;
        let conversation = self
            .store
            .get(conversation_id)
            .ok_or(SyncError::UnknownConversation(conversation_id))?;
        if conversation.archived {
            return Err(SyncError::ConversationArchived(conversation_id));
        }
        self.composer.begin_send(conversation_id, text)?;

        log::debug!("Sending message to conversation {}", conversation_id);
        let api = self.api.clone();
        self.task(async move {
            Event::SendComplete {
                conversation_id,
                result: api.send_message(conversation_id, &content).await,
            }
        });
        Ok(())
    }

    pub fn set_draft(&mut self, conversation_id: ConversationId, text: impl Into<String>) {
        self.composer.set_draft(conversation_id, text);
    }

    pub fn draft(&self, conversation_id: ConversationId) -> &str {
        self.composer.draft(conversation_id)
    }

    pub(super) fn handle_compose(&mut self, event: Event) {
        if let Event::SendComplete {
            conversation_id,
            result,
        } = event
        {
            match result {
                Ok(message) => {
                    self.composer.finish_send(conversation_id, true);
                    if !self.store.contains(conversation_id) {
                        log::warn!(
                            "Send confirmed for conversation {} which is gone, dropping message {}",
                            conversation_id,
                            message.id
                        );
                        return;
                    }
                    let preview = message.content.clone();
                    let at = message.created_at;
                    self.cache.append(conversation_id, message);
                    self.store.update_preview(conversation_id, &preview, at);
                    if self.selected == Some(conversation_id) {
                        self.request_scroll(UpdateSource::OwnSend);
                    }
                }
                Err(e) => {
                    self.composer.finish_send(conversation_id, false);
                    log::error!(
                        "Send failed for conversation {}: {}",
                        conversation_id,
                        e
                    );
                    self.notify_error(format!("Message not sent: {e}"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_trims_and_rejects_blank() {
        assert_eq!(Composer::prepare("  hi \n"), Ok("hi".to_string()));
        assert_eq!(Composer::prepare(" \t\n"), Err(SyncError::EmptyMessage));
        assert_eq!(Composer::prepare(""), Err(SyncError::EmptyMessage));
    }

    #[test]
    fn draft_survives_failed_send() {
        let mut composer = Composer::new();
        composer.begin_send(3, "hello ").unwrap();
        assert!(composer.is_sending(3));
        assert_eq!(composer.begin_send(3, "again"), Err(SyncError::SendInProgress(3)));

        composer.finish_send(3, false);
        assert!(!composer.is_sending(3));
        assert_eq!(composer.draft(3), "hello ");
    }

    #[test]
    fn confirmed_send_clears_draft() {
        let mut composer = Composer::new();
        composer.set_draft(3, "typing");
        composer.begin_send(3, "typing").unwrap();
        composer.finish_send(3, true);
        assert_eq!(composer.draft(3), "");

        composer.set_draft(4, "x");
        composer.discard(4);
        assert_eq!(composer.draft(4), "");
    }
}
