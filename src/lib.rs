//! Conversation synchronization for a two-sided marketplace.
//!
//! [`engine::SyncEngine`] owns the conversation lists and message cache of
//! one signed-in session and keeps them consistent with the REST backend
//! reached through [`core::api::ConversationApi`].

pub mod config;
pub mod core;
pub mod engine;

pub use engine::{EngineConfig, Event, Notice, NoticeLevel, SyncEngine, SyncError};
