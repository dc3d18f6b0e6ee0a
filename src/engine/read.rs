use std::collections::HashMap;

use super::{Event, SyncEngine};
use crate::core::models::ConversationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Pending,
    Confirmed,
    RolledBack,
}

/// One optimistic mark-as-read, carrying the unread count to restore on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCycle {
    pub conversation_id: ConversationId,
    pub previous_unread: u32,
    pub state: ReadState,
}

impl ReadCycle {
    fn confirm(self) -> Self {
        ReadCycle {
            state: ReadState::Confirmed,
            ..self
        }
    }

    fn roll_back(self) -> Self {
        ReadCycle {
            state: ReadState::RolledBack,
            ..self
        }
    }
}

/// At most one pending read cycle per conversation.
#[derive(Debug, Default)]
pub struct ReadTracker {
    pending: HashMap<ConversationId, ReadCycle>,
}

impl ReadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cycle. `None` if one is already pending for the conversation
    /// or if there is nothing to mark.
    pub fn begin(&mut self, conversation_id: ConversationId, previous_unread: u32) -> Option<ReadCycle> {
        if previous_unread == 0 || self.pending.contains_key(&conversation_id) {
            return None;
        }
        let cycle = ReadCycle {
            conversation_id,
            previous_unread,
            state: ReadState::Pending,
        };
        self.pending.insert(conversation_id, cycle);
        Some(cycle)
    }

    /// Close the pending cycle as confirmed (`ok`) or rolled back.
    pub fn resolve(&mut self, conversation_id: ConversationId, ok: bool) -> Option<ReadCycle> {
        let cycle = self.pending.remove(&conversation_id)?;
        Some(if ok { cycle.confirm() } else { cycle.roll_back() })
    }

    pub fn is_pending(&self, conversation_id: ConversationId) -> bool {
        self.pending.contains_key(&conversation_id)
    }

    /// Conversations whose mark-as-read has not settled yet.
    pub fn pending_ids(&self) -> impl Iterator<Item = ConversationId> + '_ {
        self.pending.keys().copied()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl SyncEngine {
    /// Optimistically zero the unread badge and confirm with the server.
    pub(super) fn begin_read(&mut self, conversation_id: ConversationId) {
        let Some(unread) = self.store.unread_count(conversation_id) else {
            return;
        };
        let Some(cycle) = self.reads.begin(conversation_id, unread) else {
            if self.reads.is_pending(conversation_id) {
                log::debug!(
                    "Read cycle for conversation {} still pending, not starting another",
                    conversation_id
                );
            }
            return;
        };

        self.store.set_unread_count(conversation_id, 0);
        log::debug!(
            "Marking conversation {} read (was {} unread)",
            conversation_id,
            cycle.previous_unread
        );

        let api = self.api.clone();
        self.task(async move {
            Event::MarkReadComplete {
                conversation_id,
                result: api.mark_as_read(conversation_id).await,
            }
        });
    }

    /// A list reload carries the server's count from before a pending mark
    /// landed; keep showing those conversations as read.
    pub(super) fn reapply_pending_reads(&mut self) {
        let pending: Vec<ConversationId> = self.reads.pending_ids().collect();
        for conversation_id in pending {
            if let Some(server_count @ 1..) = self.store.set_unread_count(conversation_id, 0) {
                log::debug!(
                    "Conversation {} reloaded with {} unread while marking read",
                    conversation_id,
                    server_count
                );
            }
        }
    }

    pub(super) fn handle_read(&mut self, event: Event) {
        if let Event::MarkReadComplete {
            conversation_id,
            result,
        } = event
        {
            match result {
                Ok(()) => {
                    self.reads.resolve(conversation_id, true);
                }
                Err(e) => {
                    log::error!(
                        "Mark-as-read failed for conversation {}: {}",
                        conversation_id,
                        e
                    );
                    if let Some(cycle) = self.reads.resolve(conversation_id, false) {
                        // Revert optimistic badge to the exact pre-op count.
                        self.store
                            .set_unread_count(conversation_id, cycle.previous_unread);
                    }
                    self.notify_error(format!("Could not mark conversation as read: {e}"));
                }
            }
        }
    }
}
