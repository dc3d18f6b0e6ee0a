use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Event, SyncEngine, UpdateSource};
use crate::core::models::ConversationId;

#[derive(Debug)]
enum Slot {
    /// Debounce timer running; emits `Event::FetchDue` when it elapses.
    Pending {
        generation: u64,
        timer: JoinHandle<()>,
    },
    /// Request issued, response not yet applied.
    InFlight { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled(u64),
    /// An earlier pending or in-flight fetch already covers this call.
    Coalesced,
}

/// Debounces and de-duplicates message fetches, one slot per conversation.
///
/// Every scheduled fetch carries a generation number; a timer or response
/// whose generation no longer matches its slot is stale. Pending timers can
/// be cancelled, in-flight requests cannot and are only ever outdated.
#[derive(Debug, Default)]
pub struct FetchScheduler {
    slots: HashMap<ConversationId, Slot>,
    next_generation: u64,
}

impl FetchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(
        &mut self,
        conversation_id: ConversationId,
        force: bool,
        delay: Duration,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> ScheduleOutcome {
        if !force && self.slots.contains_key(&conversation_id) {
            return ScheduleOutcome::Coalesced;
        }
        if let Some(Slot::Pending { timer, .. }) = self.slots.remove(&conversation_id) {
            timer.abort();
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::FetchDue {
                conversation_id,
                generation,
            });
        });
        self.slots
            .insert(conversation_id, Slot::Pending { generation, timer });
        ScheduleOutcome::Scheduled(generation)
    }

    /// Debounce elapsed: move to in-flight if the timer is still the live one.
    pub fn fire(&mut self, conversation_id: ConversationId, generation: u64) -> bool {
        match self.slots.get(&conversation_id) {
            Some(Slot::Pending { generation: g, .. }) if *g == generation => {
                self.slots
                    .insert(conversation_id, Slot::InFlight { generation });
                true
            }
            _ => false,
        }
    }

    /// Response arrived. True if it belongs to the live generation.
    pub fn complete(&mut self, conversation_id: ConversationId, generation: u64) -> bool {
        match self.slots.get(&conversation_id) {
            Some(Slot::InFlight { generation: g }) if *g == generation => {
                self.slots.remove(&conversation_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel a pending timer. In-flight requests are left alone.
    pub fn cancel(&mut self, conversation_id: ConversationId) -> bool {
        if matches!(self.slots.get(&conversation_id), Some(Slot::Pending { .. })) {
            if let Some(Slot::Pending { timer, .. }) = self.slots.remove(&conversation_id) {
                timer.abort();
                return true;
            }
        }
        false
    }

    /// Cancel every pending timer except the one for `keep`.
    pub fn cancel_others(&mut self, keep: Option<ConversationId>) -> usize {
        let stale: Vec<ConversationId> = self
            .slots
            .iter()
            .filter(|(id, slot)| Some(**id) != keep && matches!(slot, Slot::Pending { .. }))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.cancel(*id);
        }
        if !stale.is_empty() {
            log::debug!("Cancelled pending fetches for {:?}", stale);
        }
        stale.len()
    }

    /// Forget everything; late responses will find no live slot.
    pub fn cancel_all(&mut self) {
        for (_, slot) in self.slots.drain() {
            if let Slot::Pending { timer, .. } = slot {
                timer.abort();
            }
        }
    }

    pub fn is_busy(&self, conversation_id: ConversationId) -> bool {
        self.slots.contains_key(&conversation_id)
    }

    pub fn is_pending(&self, conversation_id: ConversationId) -> bool {
        matches!(self.slots.get(&conversation_id), Some(Slot::Pending { .. }))
    }

    pub fn is_in_flight(&self, conversation_id: ConversationId) -> bool {
        matches!(self.slots.get(&conversation_id), Some(Slot::InFlight { .. }))
    }
}

impl Drop for FetchScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl SyncEngine {
    /// Cache-first fetch path for one conversation.
    pub(super) fn fetch_messages(&mut self, conversation_id: ConversationId, force: bool) {
        if !force && self.cache.contains(conversation_id) {
            log::debug!("Cache hit for conversation {}", conversation_id);
            return;
        }

        let delay = self.config.debounce;
        let tx = self.sender().clone();
        match self
            .scheduler
            .schedule(conversation_id, force, delay, &tx)
        {
            ScheduleOutcome::Scheduled(generation) => log::debug!(
                "Fetch for conversation {} scheduled (generation {}, force {})",
                conversation_id,
                generation,
                force
            ),
            ScheduleOutcome::Coalesced => log::debug!(
                "Fetch for conversation {} already pending, coalesced",
                conversation_id
            ),
        }
    }

    pub(super) fn handle_fetch(&mut self, event: Event) {
        match event {
            Event::FetchDue {
                conversation_id,
                generation,
            } => {
                if !self.scheduler.fire(conversation_id, generation) {
                    log::debug!(
                        "Ignoring cancelled fetch timer for conversation {} (generation {})",
                        conversation_id,
                        generation
                    );
                    return;
                }
                let api = self.api.clone();
                self.task(async move {
                    Event::MessagesFetched {
                        conversation_id,
                        generation,
                        result: api.fetch_messages(conversation_id).await,
                    }
                });
            }

            Event::MessagesFetched {
                conversation_id,
                generation,
                result,
            } => {
                let live = self.scheduler.complete(conversation_id, generation);
                if !live || self.selected != Some(conversation_id) {
                    log::debug!(
                        "Dropping stale response for conversation {} (generation {})",
                        conversation_id,
                        generation
                    );
                    return;
                }

                match result {
                    Ok(messages) => {
                        log::info!(
                            "Loaded {} messages for conversation {}",
                            messages.len(),
                            conversation_id
                        );
                        self.cache.write(conversation_id, messages);
                        self.request_scroll(UpdateSource::Incoming);
                        self.begin_read(conversation_id);
                    }
                    Err(e) => {
                        log::warn!(
                            "Failed to load messages for conversation {}: {}",
                            conversation_id,
                            e
                        );
                        self.notify_error(format!("Could not load messages: {e}"));
                    }
                }
            }

            _ => {}
        }
    }
}
