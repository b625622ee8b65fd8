// src/focusroom/mod.rs

pub mod client_wrapper;
pub mod clients;
pub mod command;
pub mod config;
pub mod directory;
pub mod history;
pub mod image_analysis;
pub mod observe;
pub mod prompt;
pub mod registry;
pub mod room;
pub mod summary;
pub mod topic;
pub mod turn;

// Export the most used types at the module root so callers can write
// focusroom::RoomState instead of focusroom::room::RoomState.
pub use room::RoomState;
pub use turn::TurnEngine;
