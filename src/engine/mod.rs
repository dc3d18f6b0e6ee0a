mod actions;
mod compose;
mod fetch;
mod read;
mod view;
mod viewport;


use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::core::api::{ApiError, ConversationApi};
use crate::core::cache::MessageCache;
use crate::core::models::{Conversation, ConversationId, Membership, Message, Role};
use crate::core::store::ConversationStore;

pub use compose::Composer;
pub use fetch::{FetchScheduler, ScheduleOutcome};
pub use read::{ReadCycle, ReadState, ReadTracker};
pub use view::{ConversationView, MessageView, ThreadView};
pub use viewport::{UpdateSource, Viewport};

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);
const DEFAULT_SCROLL_THRESHOLD_PX: f32 = 80.0;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Quiet period between a selection and the message fetch it triggers.
    pub debounce: Duration,
    /// Distance from the bottom still counted as "near the bottom".
    pub scroll_threshold_px: f32,
    /// Role of the signed-in user, used to tell own messages apart.
    pub viewer_role: Role,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            debounce: DEFAULT_DEBOUNCE,
            scroll_threshold_px: DEFAULT_SCROLL_THRESHOLD_PX,
            viewer_role: Role::Client,
        }
    }
}

/// Synchronous rejection of an engine operation. Network failures never
/// show up here; they are reported as [`Notice`]s once the request settles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("conversation {0} is not known")]
    UnknownConversation(ConversationId),
    #[error("conversation {0} is archived, unarchive it to reply")]
    ConversationArchived(ConversationId),
    #[error("a message is already being sent in conversation {0}")]
    SendInProgress(ConversationId),
    #[error("conversation {id} cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        id: ConversationId,
        from: Membership,
        to: Membership,
    },
    #[error("no conversation is selected")]
    NoSelection,
    #[error("no deletion is waiting for confirmation")]
    NothingToConfirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Non-blocking, user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

/// Completion of an asynchronous effect, fed back through [`SyncEngine::update`].
#[derive(Debug)]
pub enum Event {
    ActiveLoaded(Result<Vec<Conversation>, ApiError>),
    ArchivedLoaded(Result<Vec<Conversation>, ApiError>),
    FetchDue {
        conversation_id: ConversationId,
        generation: u64,
    },
    MessagesFetched {
        conversation_id: ConversationId,
        generation: u64,
        result: Result<Vec<Message>, ApiError>,
    },
    MarkReadComplete {
        conversation_id: ConversationId,
        result: Result<(), ApiError>,
    },
    SendComplete {
        conversation_id: ConversationId,
        result: Result<Message, ApiError>,
    },
    ArchiveComplete {
        conversation_id: ConversationId,
        archived: bool,
        result: Result<(), ApiError>,
    },
    DeleteComplete {
        conversation_id: ConversationId,
        result: Result<(), ApiError>,
    },
}

/// Session-scoped owner of conversation lists, message cache and every
/// in-flight operation on them.
///
/// Operations apply their local effect immediately and spawn the network
/// call on the tokio runtime. Completions come back as [`Event`]s on an
/// internal channel; the owner feeds them to [`SyncEngine::update`] (usually
/// via [`SyncEngine::pump`]), so all state changes happen on one logical
/// thread no matter how the requests interleave.
pub struct SyncEngine {
    pub(super) api: Arc<dyn ConversationApi>,
    pub(super) config: EngineConfig,

    pub(super) store: ConversationStore,
    pub(super) cache: MessageCache,
    pub(super) scheduler: FetchScheduler,
    pub(super) reads: ReadTracker,
    pub(super) composer: Composer,
    pub(super) viewport: Viewport,

    pub(super) selected: Option<ConversationId>,
    pub(super) pending_delete: Option<ConversationId>,
    pub(super) scroll_request: bool,
    pub(super) notices: Vec<Notice>,

    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl SyncEngine {
    /// Start a session. The API collaborator carries the bearer credential.
    pub fn create(api: Arc<dyn ConversationApi>, config: EngineConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let viewport = Viewport::new(config.scroll_threshold_px);
        log::info!("Sync engine created (debounce {:?})", config.debounce);
        SyncEngine {
            api,
            config,
            store: ConversationStore::new(),
            cache: MessageCache::new(),
            scheduler: FetchScheduler::new(),
            reads: ReadTracker::new(),
            composer: Composer::new(),
            viewport,
            selected: None,
            pending_delete: None,
            scroll_request: false,
            notices: Vec::new(),
            tx,
            rx,
        }
    }

    /// End the session: pending timers are cancelled and late completions
    /// of in-flight requests go nowhere.
    pub fn dispose(mut self) {
        self.scheduler.cancel_all();
        self.reads.clear();
        log::info!(
            "Sync engine disposed ({} cached conversations dropped)",
            self.cache.len()
        );
        self.cache.clear();
        self.store.clear();
    }

    pub fn update(&mut self, event: Event) {
        match event {
            Event::FetchDue { .. } | Event::MessagesFetched { .. } => self.handle_fetch(event),

            Event::MarkReadComplete { .. } => self.handle_read(event),

            Event::SendComplete { .. } => self.handle_compose(event),

            Event::ActiveLoaded(_)
            | Event::ArchivedLoaded(_)
            | Event::ArchiveComplete { .. }
            | Event::DeleteComplete { .. } => self.handle_actions(event),
        }
    }

    /// Wait for the next completion.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Wait for the next completion and apply it.
    pub async fn pump(&mut self) {
        if let Some(event) = self.rx.recv().await {
            self.update(event);
        }
    }

    /// Apply every completion already queued, without waiting. Returns how many.
    pub fn try_drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.update(event);
            applied += 1;
        }
        applied
    }

    /// Run a future on the runtime and deliver its result as an event.
    pub(super) fn task<F>(&self, future: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(future.await);
        });
    }

    pub(super) fn sender(&self) -> &mpsc::UnboundedSender<Event> {
        &self.tx
    }

    pub(super) fn notify_error(&mut self, text: String) {
        self.notices.push(Notice {
            level: NoticeLevel::Error,
            text,
        });
    }

    pub(super) fn notify_info(&mut self, text: String) {
        self.notices.push(Notice {
            level: NoticeLevel::Info,
            text,
        });
    }

    pub(super) fn membership(&self, id: ConversationId) -> Result<Membership, SyncError> {
        self.store
            .list_of(id)
            .map(Membership::from)
            .ok_or(SyncError::UnknownConversation(id))
    }

    // -- selection -----------------------------------------------------------

    /// Open a conversation. Clears its unread badge optimistically, serves
    /// the cache when it can, otherwise schedules a debounced fetch.
    /// Pending fetches for other conversations are cancelled.
    pub fn select(&mut self, id: ConversationId) -> Result<(), SyncError> {
        if !self.store.contains(id) {
            return Err(SyncError::UnknownConversation(id));
        }
        let previous = self.selected.replace(id);
        self.scheduler.cancel_others(Some(id));
        if previous != Some(id) {
            self.viewport.reset();
            self.scroll_request = true;
        }
        self.begin_read(id);
        self.fetch_messages(id, false);
        Ok(())
    }

    /// Force a re-fetch of the selected conversation, bypassing the cache.
    pub fn refresh(&mut self) -> Result<(), SyncError> {
        let id = self.selected.ok_or(SyncError::NoSelection)?;
        self.fetch_messages(id, true);
        Ok(())
    }

    pub fn deselect(&mut self) {
        self.selected = None;
        self.scheduler.cancel_others(None);
    }

    pub fn selected(&self) -> Option<ConversationId> {
        self.selected
    }

    /// True while the selected conversation waits on a debounce or a response.
    pub fn is_loading(&self) -> bool {
        self.selected
            .map(|id| self.scheduler.is_busy(id))
            .unwrap_or(false)
    }

    // -- viewport ------------------------------------------------------------

    pub fn on_scroll(&mut self, offset: f32, viewport_height: f32, content_height: f32) {
        self.viewport
            .on_scroll(offset, viewport_height, content_height);
    }

    pub(super) fn request_scroll(&mut self, source: UpdateSource) {
        if self.viewport.should_autoscroll(source) {
            self.scroll_request = true;
        }
    }

    /// One-shot: true if the renderer should scroll to the newest message.
    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.scroll_request)
    }

    // -- state access --------------------------------------------------------

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    pub fn pending_delete(&self) -> Option<ConversationId> {
        self.pending_delete
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
