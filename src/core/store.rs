use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::core::models::{Conversation, ConversationId, ListKind};

/// Active and archived conversation lists, in server order.
///
/// A conversation id is held by at most one of the two lists. Only the
/// sync engine mutates a store; the rendering layer reads it through views.
#[derive(Debug, Default)]
pub struct ConversationStore {
    active: IndexMap<ConversationId, Conversation>,
    archived: IndexMap<ConversationId, Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fully replace the active list with server truth.
    pub fn replace_active(&mut self, conversations: Vec<Conversation>) {
        self.active = Self::normalize(conversations, false);
        for id in self.active.keys() {
            self.archived.shift_remove(id);
        }
        log::debug!("Active list replaced ({} conversations)", self.active.len());
    }

    /// Fully replace the archived list with server truth.
    pub fn replace_archived(&mut self, conversations: Vec<Conversation>) {
        self.archived = Self::normalize(conversations, true);
        for id in self.archived.keys() {
            self.active.shift_remove(id);
        }
        log::debug!(
            "Archived list replaced ({} conversations)",
            self.archived.len()
        );
    }

    fn normalize(
        conversations: Vec<Conversation>,
        archived: bool,
    ) -> IndexMap<ConversationId, Conversation> {
        conversations
            .into_iter()
            .map(|mut c| {
                c.archived = archived;
                (c.id, c)
            })
            .collect()
    }

    pub fn active(&self) -> impl Iterator<Item = &Conversation> {
        self.active.values()
    }

    pub fn archived(&self) -> impl Iterator<Item = &Conversation> {
        self.archived.values()
    }

    pub fn list(&self, kind: ListKind) -> Box<dyn Iterator<Item = &Conversation> + '_> {
        match kind {
            ListKind::Active => Box::new(self.active()),
            ListKind::Archived => Box::new(self.archived()),
        }
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.active.get(&id).or_else(|| self.archived.get(&id))
    }

    fn get_mut(&mut self, id: ConversationId) -> Option<&mut Conversation> {
        match self.active.get_mut(&id) {
            Some(c) => Some(c),
            None => self.archived.get_mut(&id),
        }
    }

    pub fn contains(&self, id: ConversationId) -> bool {
        self.list_of(id).is_some()
    }

    pub fn list_of(&self, id: ConversationId) -> Option<ListKind> {
        if self.active.contains_key(&id) {
            Some(ListKind::Active)
        } else if self.archived.contains_key(&id) {
            Some(ListKind::Archived)
        } else {
            None
        }
    }

    /// Local-only unread mutation. Returns the previous count, or `None`
    /// if the conversation is not known.
    pub fn set_unread_count(&mut self, id: ConversationId, count: u32) -> Option<u32> {
        let conv = self.get_mut(id)?;
        let prev = conv.unread_count;
        conv.unread_count = count;
        Some(prev)
    }

    pub fn unread_count(&self, id: ConversationId) -> Option<u32> {
        self.get(id).map(|c| c.unread_count)
    }

    pub fn update_preview(&mut self, id: ConversationId, text: &str, at: DateTime<Utc>) -> bool {
        match self.get_mut(id) {
            Some(conv) => {
                conv.last_message_preview = text.to_string();
                conv.last_message_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Drop a conversation from both lists.
    pub fn remove(&mut self, id: ConversationId) -> Option<Conversation> {
        let from_active = self.active.shift_remove(&id);
        let from_archived = self.archived.shift_remove(&id);
        from_active.or(from_archived)
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.archived.clear();
    }

    pub fn total_unread(&self) -> u32 {
        self.active.values().map(|c| c.unread_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::core::models::{Counterpart, Role};

    fn conv(id: u64, unread: u32) -> Conversation {
        Conversation {
            id,
            counterpart: Counterpart {
                id: id * 10,
                display_name: format!("user{id}"),
                avatar_url: None,
                role: Role::Provider,
            },
            last_message_preview: format!("preview {id}"),
            last_message_at: None,
            unread_count: unread,
            archived: false,
        }
    }

    fn ids<'a>(it: impl Iterator<Item = &'a Conversation>) -> Vec<u64> {
        it.map(|c| c.id).collect()
    }

    #[test]
    fn replace_keeps_lists_disjoint() {
        let mut store = ConversationStore::new();
        store.replace_active(vec![conv(1, 0), conv(2, 0), conv(7, 3)]);
        store.replace_archived(vec![conv(7, 3)]);
        assert_eq!(ids(store.active()), vec![1, 2]);
        assert_eq!(ids(store.archived()), vec![7]);
        assert!(store.get(7).unwrap().archived);

        store.replace_active(vec![conv(1, 0), conv(7, 3)]);
        assert_eq!(ids(store.active()), vec![1, 7]);
        assert_eq!(ids(store.archived()), Vec::<u64>::new());
        assert!(!store.get(7).unwrap().archived);
    }

    #[test]
    fn unread_mutation_is_local_and_reports_previous() {
        let mut store = ConversationStore::new();
        store.replace_active(vec![conv(7, 3)]);
        assert_eq!(store.set_unread_count(7, 0), Some(3));
        assert_eq!(store.unread_count(7), Some(0));
        assert_eq!(store.set_unread_count(7, 3), Some(0));
        assert_eq!(store.set_unread_count(99, 1), None);
        assert_eq!(store.total_unread(), 3);
    }

    #[test]
    fn remove_clears_either_list() {
        let mut store = ConversationStore::new();
        store.replace_active(vec![conv(1, 0)]);
        store.replace_archived(vec![conv(2, 0)]);
        assert_eq!(store.remove(2).map(|c| c.id), Some(2));
        assert_eq!(store.remove(1).map(|c| c.id), Some(1));
        assert_eq!(store.remove(1), None);
        assert!(!store.contains(1));
        assert_eq!(store.list_of(2), None);
    }

    #[test]
    fn preview_update() {
        let mut store = ConversationStore::new();
        store.replace_archived(vec![conv(4, 0)]);
        let now = Utc::now();
        assert!(store.update_preview(4, "hello", now));
        let c = store.get(4).unwrap();
        assert_eq!(c.last_message_preview, "hello");
        assert_eq!(c.last_message_at, Some(now));
        assert!(!store.update_preview(5, "x", now));
    }
}
