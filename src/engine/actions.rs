use super::{Event, SyncEngine, SyncError};
use crate::core::models::{ConversationId, Membership};

impl SyncEngine {
    pub fn load_active(&mut self) {
        let api = self.api.clone();
        self.task(async move { Event::ActiveLoaded(api.list_active().await) });
    }

    pub fn load_archived(&mut self) {
        let api = self.api.clone();
        self.task(async move { Event::ArchivedLoaded(api.list_archived().await) });
    }

    /// Reload both lists from the server.
    pub fn load_lists(&mut self) {
        self.load_active();
        self.load_archived();
    }

    pub fn archive(&mut self, conversation_id: ConversationId) -> Result<(), SyncError> {
        self.dispatch_membership(conversation_id, Membership::Archived)
    }

    /// Also the recovery action offered inside an open archived conversation.
    pub fn unarchive(&mut self, conversation_id: ConversationId) -> Result<(), SyncError> {
        self.dispatch_membership(conversation_id, Membership::Active)
    }

    fn dispatch_membership(
        &mut self,
        conversation_id: ConversationId,
        to: Membership,
    ) -> Result<(), SyncError> {
        let from = self.membership(conversation_id)?;
        if !from.can_transition_to(to) {
            return Err(SyncError::InvalidTransition {
                id: conversation_id,
                from,
                to,
            });
        }

        let api = self.api.clone();
        let archived = to == Membership::Archived;
        self.task(async move {
            let result = if archived {
                api.archive(conversation_id).await
            } else {
                api.unarchive(conversation_id).await
            };
            Event::ArchiveComplete {
                conversation_id,
                archived,
                result,
            }
        });
        Ok(())
    }

    /// Stage an irreversible delete. Nothing is sent until [`Self::confirm_delete`].
    pub fn request_delete(&mut self, conversation_id: ConversationId) -> Result<(), SyncError> {
        let from = self.membership(conversation_id)?;
        if !from.can_transition_to(Membership::Deleted) {
            return Err(SyncError::InvalidTransition {
                id: conversation_id,
                from,
                to: Membership::Deleted,
            });
        }
        self.pending_delete = Some(conversation_id);
        Ok(())
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
    }

    pub fn confirm_delete(&mut self) -> Result<ConversationId, SyncError> {
        let conversation_id = self.pending_delete.take().ok_or(SyncError::NothingToConfirm)?;
        // It may have vanished on a list reload since the request.
        self.membership(conversation_id)?;

        let api = self.api.clone();
        self.task(async move {
            Event::DeleteComplete {
                conversation_id,
                result: api.delete(conversation_id).await,
            }
        });
        Ok(conversation_id)
    }

    pub(super) fn handle_actions(&mut self, event: Event) {
        match event {
            Event::ActiveLoaded(Ok(conversations)) => {
                log::info!("Loaded {} active conversations", conversations.len());
                self.store.replace_active(conversations);
                self.reapply_pending_reads();
            }
            Event::ActiveLoaded(Err(e)) => {
                log::warn!("Failed to load active conversations: {}", e);
                self.notify_error(format!("Could not load conversations: {e}"));
            }

            Event::ArchivedLoaded(Ok(conversations)) => {
                log::info!("Loaded {} archived conversations", conversations.len());
                self.store.replace_archived(conversations);
                self.reapply_pending_reads();
            }
            Event::ArchivedLoaded(Err(e)) => {
                log::warn!("Failed to load archived conversations: {}", e);
                self.notify_error(format!("Could not load archived conversations: {e}"));
            }

            Event::ArchiveComplete {
                conversation_id,
                archived,
                result,
            } => {
                let verb = if archived { "archived" } else { "unarchived" };
                match result {
                    Ok(()) => {
                        log::info!("Conversation {} {}", conversation_id, verb);
                        self.notify_info(format!("Conversation {verb}"));
                        // Membership is server truth: reload instead of moving locally.
                        self.load_lists();
                    }
                    Err(e) => {
                        log::error!(
                            "Conversation {} could not be {}: {}",
                            conversation_id,
                            verb,
                            e
                        );
                        self.notify_error(format!("Conversation could not be {verb}: {e}"));
                    }
                }
            }

            Event::DeleteComplete {
                conversation_id,
                result,
            } => match result {
                Ok(()) => {
                    log::info!("Conversation {} deleted", conversation_id);
                    self.store.remove(conversation_id);
                    self.cache.invalidate(conversation_id);
                    self.scheduler.cancel(conversation_id);
                    self.composer.discard(conversation_id);
                    if self.selected == Some(conversation_id) {
                        self.selected = None;
                    }
                    self.notify_info("Conversation deleted".to_string());
                }
                Err(e) => {
                    log::error!("Delete failed for conversation {}: {}", conversation_id, e);
                    self.notify_error(format!("Conversation could not be deleted: {e}"));
                }
            },

            _ => {}
        }
    }
}
