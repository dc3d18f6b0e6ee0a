use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::core::models::{CacheEntry, ConversationId, Message, MessageId};

/// Session-scoped message histories, keyed by conversation.
///
/// Entries never expire on their own; they live until [`MessageCache::invalidate`]
/// or [`MessageCache::clear`]. Every entry is kept ordered by `created_at`
/// (non-decreasing) with unique message ids.
#[derive(Debug, Default)]
pub struct MessageCache {
    entries: HashMap<ConversationId, CacheEntry>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conversation_id: ConversationId) -> Option<&CacheEntry> {
        self.entries.get(&conversation_id)
    }

    pub fn contains(&self, conversation_id: ConversationId) -> bool {
        self.entries.contains_key(&conversation_id)
    }

    /// Cached messages for a conversation, empty when nothing is cached.
    pub fn messages(&self, conversation_id: ConversationId) -> &[Message] {
        self.entries
            .get(&conversation_id)
            .map(|e| e.messages.as_slice())
            .unwrap_or(&[])
    }

    /// Commit a freshly fetched batch for a conversation.
    ///
    /// Cached messages missing from the batch survive when they are no older
    /// than its newest message: those were confirmed after the request left.
    pub fn write(&mut self, conversation_id: ConversationId, mut messages: Vec<Message>) {
        if let Some(previous) = self.entries.remove(&conversation_id) {
            let newest = messages.iter().map(|m| m.created_at).max();
            let fetched: HashSet<MessageId> = messages.iter().map(|m| m.id).collect();
            let before = messages.len();
            messages.extend(previous.messages.into_iter().filter(|m| {
                !fetched.contains(&m.id) && newest.map_or(true, |at| m.created_at >= at)
            }));
            if messages.len() > before {
                log::debug!(
                    "Cache write: kept {} newer messages of conversation {} missing from the batch",
                    messages.len() - before,
                    conversation_id
                );
            }
        }

        // sort_by_key is stable: equal timestamps keep server order
        messages.sort_by_key(|m| m.created_at);
        let mut seen = HashSet::with_capacity(messages.len());
        messages.retain(|m| seen.insert(m.id));

        log::debug!(
            "Cache write: conversation {} ({} messages)",
            conversation_id,
            messages.len()
        );
        self.entries.insert(
            conversation_id,
            CacheEntry {
                messages,
                fetched_at: Utc::now(),
            },
        );
    }

    /// Append one confirmed message. Returns false if its id was already cached.
    pub fn append(&mut self, conversation_id: ConversationId, message: Message) -> bool {
        let entry = self
            .entries
            .entry(conversation_id)
            .or_insert_with(|| CacheEntry {
                messages: Vec::new(),
                fetched_at: Utc::now(),
            });

        if entry.messages.iter().any(|m| m.id == message.id) {
            log::debug!(
                "Cache append skipped: message {} already in conversation {}",
                message.id,
                conversation_id
            );
            return false;
        }

        let at = entry
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        if at < entry.messages.len() {
            log::warn!(
                "Message {} predates cached history of conversation {}; inserting at {}",
                message.id,
                conversation_id,
                at
            );
        }
        entry.messages.insert(at, message);
        true
    }

    pub fn invalidate(&mut self, conversation_id: ConversationId) -> Option<CacheEntry> {
        self.entries.remove(&conversation_id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::core::models::Role;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(id: u64, secs: i64) -> Message {
        Message {
            id,
            conversation_id: 7,
            sender_id: 1,
            sender_role: Role::Client,
            content: format!("m{id}"),
            created_at: at(secs),
            read: true,
        }
    }

    fn ids(cache: &MessageCache, c: ConversationId) -> Vec<u64> {
        cache.messages(c).iter().map(|m| m.id).collect()
    }

    #[test]
    fn write_sorts_and_dedupes() {
        let mut cache = MessageCache::new();
        cache.write(7, vec![msg(3, 30), msg(1, 10), msg(2, 20), msg(1, 10)]);
        assert_eq!(ids(&cache, 7), vec![1, 2, 3]);
        assert!(cache.contains(7));
        assert!(!cache.contains(8));
        assert_eq!(cache.messages(8), &[] as &[Message]);
    }

    #[test]
    fn write_keeps_server_order_for_equal_timestamps() {
        let mut cache = MessageCache::new();
        cache.write(7, vec![msg(5, 10), msg(4, 10)]);
        assert_eq!(ids(&cache, 7), vec![5, 4]);
    }

    #[test]
    fn append_goes_after_existing_history() {
        let mut cache = MessageCache::new();
        cache.write(7, vec![msg(1, 10), msg(2, 20)]);
        assert!(cache.append(7, msg(3, 20)));
        assert!(cache.append(7, msg(4, 25)));
        assert_eq!(ids(&cache, 7), vec![1, 2, 3, 4]);
    }

    #[test]
    fn append_creates_missing_entry_and_ignores_duplicates() {
        let mut cache = MessageCache::new();
        assert!(cache.append(9, msg(101, 0)));
        assert!(!cache.append(9, msg(101, 0)));
        assert_eq!(ids(&cache, 9), vec![101]);
    }

    #[test]
    fn append_keeps_order_under_clock_skew() {
        let mut cache = MessageCache::new();
        cache.write(7, vec![msg(1, 10), msg(2, 30)]);
        cache.append(7, msg(3, 20));
        assert_eq!(ids(&cache, 7), vec![1, 3, 2]);
    }

    #[test]
    fn write_keeps_messages_confirmed_after_the_batch() {
        let mut cache = MessageCache::new();
        cache.append(7, msg(101, 40));
        cache.write(7, vec![msg(1, 10), msg(2, 20)]);
        assert_eq!(ids(&cache, 7), vec![1, 2, 101]);

        // The server copy wins once the batch carries it.
        cache.write(7, vec![msg(1, 10), msg(2, 20), msg(101, 40)]);
        assert_eq!(ids(&cache, 7), vec![1, 2, 101]);
    }

    #[test]
    fn write_drops_older_messages_missing_from_the_batch() {
        let mut cache = MessageCache::new();
        cache.write(7, vec![msg(1, 10), msg(2, 20), msg(3, 30)]);
        cache.write(7, vec![msg(1, 10), msg(3, 30)]);
        assert_eq!(ids(&cache, 7), vec![1, 3]);
    }

    #[test]
    fn invalidate_and_clear() {
        let mut cache = MessageCache::new();
        cache.write(1, vec![msg(1, 0)]);
        cache.write(2, vec![msg(2, 0)]);
        assert_eq!(cache.len(), 2);
        assert!(cache.invalidate(1).is_some());
        assert!(cache.invalidate(1).is_none());
        cache.clear();
        assert!(cache.is_empty());
    }
}
