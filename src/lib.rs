//! # FocusRoom
//!
//! FocusRoom is a Rust engine for simulated focus-group conversations: a room of
//! LLM-driven personas that hold character and accumulate memory across turns while
//! a human moderator steers the discussion.
//!
//! The crate provides carefully layered abstractions for:
//!
//! * **Room orchestration**: [`RoomState`]: an immutable-update state machine that
//!   owns the active roster, the optional focus target, the current topic briefing,
//!   loaded images, and the append-only transcript
//! * **Moderator commands**: [`command`]: a total parser mapping every raw input
//!   line to exactly one [`Command`] variant (add/kick/focus/observe/topic/image/…)
//!   resolved through a dynamic mention table
//! * **Prompt assembly**: [`prompt`]: layered per-turn instruction text combining a
//!   persona's identity, behavioral anchors, disposition, live topic and image
//!   briefings, roster constraints, and thinking/format directives
//! * **Turn taking**: [`TurnEngine`]: drives one generation per participant,
//!   separates private `<think>` reasoning from the visible reply, streams visible
//!   tokens as they arrive, and persists each exchange to the [`HistoryStore`]
//! * **Unattended discussion**: [`observe`]: bounded persona-to-persona rounds
//!   ending in a synthesis pass, interruptible at any point
//! * **Provider flexibility**: the [`ClientWrapper`] trait with an Ollama-backed
//!   implementation in [`clients`]; any chat-completion backend can slot in
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use focusroom::{
//!     ClientWrapper, FileHistoryStore, HistoryStore, OllamaClient, RoomConfig, RoomState,
//!     TurnEngine,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RoomConfig::from_env();
//! let client: Arc<dyn ClientWrapper> =
//!     Arc::new(OllamaClient::new(&config.base_url, &config.model));
//! let store: Arc<dyn HistoryStore> =
//!     Arc::new(FileHistoryStore::new(&config.history_dir, config.history_ttl_secs)?);
//! let engine = TurnEngine::new(client, store, config.chat_temperature, config.observe_temperature);
//!
//! let state = RoomState::new().set_topic("PlayStation 5", "");
//! // load personas, parse moderator input, take turns...
//! # Ok(())
//! # }
//! ```
//!
//! Continue exploring the modules re-exported from the crate root for progressively
//! richer interaction patterns.

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// The helper is intentionally lightweight so that applications embedding FocusRoom
/// can opt-in to simple `RUST_LOG` driven diagnostics without having to choose a
/// specific logging backend upfront.
///
/// ```rust
/// focusroom::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `focusroom` module.
pub mod focusroom;

// Re-exporting key items for easier external access.
pub use crate::focusroom::client_wrapper;
pub use crate::focusroom::client_wrapper::{ClientWrapper, Message, MessageChunk, Role};
pub use crate::focusroom::clients;
pub use crate::focusroom::clients::ollama::OllamaClient;
pub use crate::focusroom::command;
pub use crate::focusroom::command::Command;
pub use crate::focusroom::config::RoomConfig;
pub use crate::focusroom::directory;
pub use crate::focusroom::directory::{
    DirectoryError, FileDirectory, PersonaDirectory, PersonaRecord,
};
pub use crate::focusroom::history;
pub use crate::focusroom::history::{
    FileHistoryStore, HistoryRole, HistoryStore, HistoryTurn, MemoryHistoryStore,
};
pub use crate::focusroom::image_analysis;
pub use crate::focusroom::image_analysis::{AnalysisResult, ImageError, ImageService, LoadedImage};
pub use crate::focusroom::observe;
pub use crate::focusroom::observe::{run_observe, ObserveOptions, ObserveOutcome};
pub use crate::focusroom::prompt;
pub use crate::focusroom::registry;
pub use crate::focusroom::registry::{PersonaRegistry, RegistryEntry};
pub use crate::focusroom::room;
pub use crate::focusroom::room::{
    ImageRef, PersonaContext, RoomError, RoomMode, RoomState, TranscriptEntry, TranscriptKind,
};
pub use crate::focusroom::summary;
pub use crate::focusroom::topic;
pub use crate::focusroom::turn;
pub use crate::focusroom::turn::{extract_thinking, ThinkFilter, TurnEngine, TurnOutcome};
