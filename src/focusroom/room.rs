//! Authoritative room state and its transitions.
//!
//! `RoomState` is a value: every transition takes `&self` and returns a new
//! state, leaving the input untouched. Command handling clones-with-change
//! instead of mutating in place, so a failed command can simply drop the
//! derived state and keep the old one.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::focusroom::history::HistoryTurn;

/// Room-level failures surfaced to the moderator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// A command named a participant the room cannot resolve.
    UnknownParticipant(String),
    /// Observe requires at least two active participants.
    NotEnoughParticipants,
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomError::UnknownParticipant(name) => {
                write!(f, "unknown participant: {}", name)
            }
            RoomError::NotEnoughParticipants => {
                write!(f, "observe mode needs at least 2 active participants")
            }
        }
    }
}

impl std::error::Error for RoomError {}

/// How the room is currently taking turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomMode {
    /// Moderator drives; responder set depends on focus.
    Idle,
    /// Participants respond to each other with no moderator input.
    Observe,
}

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    Moderator,
    Participant,
    System,
}

/// One append-only transcript record. Entries are never edited in place.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: TranscriptKind,
    /// Empty for moderator and system entries.
    pub participant_key: String,
    pub participant_name: String,
    /// Private reasoning, withheld from the live view. May be empty.
    pub thoughts: String,
    pub content: String,
}

impl TranscriptEntry {
    pub fn moderator(content: impl Into<String>) -> Self {
        TranscriptEntry {
            timestamp: Utc::now(),
            kind: TranscriptKind::Moderator,
            participant_key: String::new(),
            participant_name: "Moderator".to_string(),
            thoughts: String::new(),
            content: content.into(),
        }
    }

    pub fn participant(
        key: impl Into<String>,
        name: impl Into<String>,
        thoughts: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        TranscriptEntry {
            timestamp: Utc::now(),
            kind: TranscriptKind::Participant,
            participant_key: key.into(),
            participant_name: name.into(),
            thoughts: thoughts.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        TranscriptEntry {
            timestamp: Utc::now(),
            kind: TranscriptKind::System,
            participant_key: String::new(),
            participant_name: "System".to_string(),
            thoughts: String::new(),
            content: content.into(),
        }
    }
}

/// Per-room materialization of a registry entry. The in-memory `history` is a
/// working copy; the history store holds the persistent one.
#[derive(Debug, Clone)]
pub struct PersonaContext {
    pub key: String,
    pub name: String,
    pub history_key: String,
    /// Assembled once at load time (identity, anchors, disposition, rules).
    pub system_prompt: String,
    pub history: Vec<HistoryTurn>,
    /// Exchange rounds completed in this and prior sessions.
    pub rounds_exchanged: usize,
}

impl PersonaContext {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        history_key: impl Into<String>,
        system_prompt: impl Into<String>,
        history: Vec<HistoryTurn>,
    ) -> Self {
        let rounds_exchanged = history.len() / 2;
        PersonaContext {
            key: key.into(),
            name: name.into(),
            history_key: history_key.into(),
            system_prompt: system_prompt.into(),
            history,
            rounds_exchanged,
        }
    }
}

/// Reference to an image loaded into the room, deduplicated by content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub filename: String,
    pub hash: String,
}

/// The whole room. Active-key order is turn order.
#[derive(Debug, Clone, Default)]
pub struct RoomState {
    pub active: Vec<String>,
    /// Empty string means no focus. If set, always a member of `active`.
    pub focus: String,
    pub mode: Option<RoomMode>,
    pub personas: HashMap<String, PersonaContext>,
    pub transcript: Vec<TranscriptEntry>,
    pub topic: String,
    pub topic_briefing: String,
    pub images: Vec<ImageRef>,
}

impl RoomState {
    pub fn new() -> Self {
        RoomState {
            mode: Some(RoomMode::Idle),
            ..RoomState::default()
        }
    }

    /// Append a key to the active set. Already-present keys are a no-op, so
    /// the set stays duplicate-free.
    pub fn add(&self, key: &str) -> RoomState {
        let mut next = self.clone();
        if !next.active.iter().any(|k| k == key) {
            next.active.push(key.to_string());
        }
        next
    }

    /// Remove a key from the active set, clearing focus if it pointed there.
    pub fn kick(&self, key: &str) -> RoomState {
        let mut next = self.clone();
        next.active.retain(|k| k != key);
        if next.focus == key {
            next.focus.clear();
        }
        next
    }

    /// Callers verify the key is active before focusing.
    pub fn set_focus(&self, key: &str) -> RoomState {
        let mut next = self.clone();
        next.focus = key.to_string();
        next
    }

    pub fn clear_focus(&self) -> RoomState {
        let mut next = self.clone();
        next.focus.clear();
        next
    }

    pub fn set_mode(&self, mode: RoomMode) -> RoomState {
        let mut next = self.clone();
        next.mode = Some(mode);
        next
    }

    pub fn append_transcript(&self, entry: TranscriptEntry) -> RoomState {
        let mut next = self.clone();
        next.transcript.push(entry);
        next
    }

    /// Topic and briefing change together; a topic name is never paired with
    /// a stale briefing.
    pub fn set_topic(&self, topic: &str, briefing: &str) -> RoomState {
        let mut next = self.clone();
        next.topic = topic.to_string();
        next.topic_briefing = briefing.to_string();
        next
    }

    pub fn clear_topic(&self, default_topic: &str, default_briefing: &str) -> RoomState {
        self.set_topic(default_topic, default_briefing)
    }

    pub fn insert_persona(&self, ctx: PersonaContext) -> RoomState {
        let mut next = self.clone();
        next.personas.insert(ctx.key.clone(), ctx);
        next
    }

    pub fn update_history(&self, key: &str, history: Vec<HistoryTurn>) -> RoomState {
        let mut next = self.clone();
        if let Some(ctx) = next.personas.get_mut(key) {
            ctx.rounds_exchanged = history.len() / 2;
            ctx.history = history;
        }
        next
    }

    /// Identical content loaded twice (even under different names) stays a
    /// single entry.
    pub fn add_image(&self, image: ImageRef) -> RoomState {
        let mut next = self.clone();
        if !next.images.iter().any(|i| i.hash == image.hash) {
            next.images.push(image);
        }
        next
    }

    pub fn clear_images(&self) -> RoomState {
        let mut next = self.clone();
        next.images.clear();
        next
    }

    /// Keys that answer the next moderator turn: the focused participant
    /// alone, or every active participant in join order.
    pub fn responders(&self) -> Vec<String> {
        if !self.focus.is_empty() && self.active.iter().any(|k| k == &self.focus) {
            vec![self.focus.clone()]
        } else {
            self.active.clone()
        }
    }

    /// Display names of everyone active, in turn order.
    pub fn roster_names(&self) -> Vec<String> {
        self.active
            .iter()
            .filter_map(|k| self.personas.get(k).map(|c| c.name.clone()))
            .collect()
    }

    pub fn display_name(&self, key: &str) -> String {
        self.personas
            .get(key)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_with(keys: &[&str]) -> RoomState {
        let mut state = RoomState::new();
        for key in keys {
            state = state.add(key).insert_persona(PersonaContext::new(
                *key,
                format!("Name{}", key),
                format!("session:{}:messages", key),
                "system",
                Vec::new(),
            ));
        }
        state
    }

    #[test]
    fn add_is_idempotent() {
        let state = room_with(&["1"]).add("1");
        assert_eq!(state.active, vec!["1".to_string()]);
    }

    #[test]
    fn kick_clears_focus_on_the_kicked_key() {
        let state = room_with(&["1", "2"]).set_focus("1");
        let after = state.kick("1");
        assert!(after.focus.is_empty());
        assert_eq!(after.active, vec!["2".to_string()]);
        // The input state is untouched.
        assert_eq!(state.focus, "1");
    }

    #[test]
    fn transitions_never_mutate_the_input() {
        let state = room_with(&["1"]);
        let _ = state.append_transcript(TranscriptEntry::moderator("hi"));
        let _ = state.set_topic("espresso", "briefing");
        assert!(state.transcript.is_empty());
        assert!(state.topic.is_empty());
    }

    #[test]
    fn responders_honor_focus() {
        let state = room_with(&["1", "2", "3"]);
        assert_eq!(state.responders(), vec!["1", "2", "3"]);
        assert_eq!(state.set_focus("2").responders(), vec!["2"]);
        // A stale focus key falls back to everyone.
        assert_eq!(
            state.set_focus("2").kick("2").responders(),
            vec!["1", "3"]
        );
    }

    #[test]
    fn images_dedupe_by_hash() {
        let state = RoomState::new()
            .add_image(ImageRef {
                filename: "a.png".into(),
                hash: "h1".into(),
            })
            .add_image(ImageRef {
                filename: "copy-of-a.png".into(),
                hash: "h1".into(),
            });
        assert_eq!(state.images.len(), 1);
        assert_eq!(state.images[0].filename, "a.png");
    }

    #[test]
    fn topic_and_briefing_change_together() {
        let state = RoomState::new().set_topic("PS5", "console briefing");
        let cleared = state.clear_topic("PlayStation 5", "default briefing");
        assert_eq!(cleared.topic, "PlayStation 5");
        assert_eq!(cleared.topic_briefing, "default briefing");
    }
}
