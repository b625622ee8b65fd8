//! One generation turn for one persona.
//!
//! The engine assembles the message list, calls the backend (streamed or not),
//! separates private reasoning from the visible reply, and persists the
//! exchange. Persistence happens exactly once per call and only after the
//! backend succeeds; a failed call leaves both history copies untouched.

use std::error::Error;
use std::sync::Arc;

use futures_util::StreamExt;
use log::debug;

use crate::focusroom::client_wrapper::{ClientWrapper, Message, Role};
use crate::focusroom::history::HistoryStore;
use crate::focusroom::prompt::{self, TurnPromptInputs, THINK_CLOSE, THINK_OPEN};
use crate::focusroom::room::PersonaContext;

/// Result of a completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Private reasoning, empty if the reply carried no thinking block.
    pub thoughts: String,
    /// The visible reply, persisted to history.
    pub reply: String,
}

/// Split a reply into (thoughts, visible) on the first matching marker pair.
/// Without a complete pair, everything is visible.
pub fn extract_thinking(text: &str) -> (String, String) {
    if let Some(open) = text.find(THINK_OPEN) {
        let body_start = open + THINK_OPEN.len();
        if let Some(close_rel) = text[body_start..].find(THINK_CLOSE) {
            let close = body_start + close_rel;
            let thoughts = text[body_start..close].trim().to_string();
            let mut visible = String::new();
            visible.push_str(&text[..open]);
            visible.push_str(&text[close + THINK_CLOSE.len()..]);
            return (thoughts, visible.trim().to_string());
        }
    }
    (String::new(), text.trim().to_string())
}

#[derive(Debug, PartialEq, Eq)]
enum FilterState {
    /// Holding tokens back until the thinking block resolves.
    Buffering,
    /// Thinking block closed (or ruled out); tokens pass straight through.
    Closed,
}

/// Streaming gate that keeps the thinking block out of the visible stream.
///
/// Tokens are buffered until either the first closing marker arrives (the
/// remainder after it is released) or the buffered head proves it is not a
/// thinking block at all (everything is released). Stream end releases any
/// leftover buffer via [`ThinkFilter::finish`].
pub struct ThinkFilter {
    state: FilterState,
    buf: String,
}

impl ThinkFilter {
    pub fn new() -> Self {
        ThinkFilter {
            state: FilterState::Buffering,
            buf: String::new(),
        }
    }

    /// Feed one chunk; returns the text now safe to show.
    pub fn push(&mut self, chunk: &str) -> String {
        match self.state {
            FilterState::Closed => chunk.to_string(),
            FilterState::Buffering => {
                self.buf.push_str(chunk);
                if let Some(pos) = self.buf.find(THINK_CLOSE) {
                    let visible = self.buf[pos + THINK_CLOSE.len()..].to_string();
                    self.state = FilterState::Closed;
                    self.buf.clear();
                    return visible;
                }
                // A reply that does not open with the marker has no thinking
                // block; stop withholding as soon as that is provable.
                let head = self.buf.trim_start();
                let still_possible = THINK_OPEN.starts_with(head) || head.starts_with(THINK_OPEN);
                if !still_possible {
                    self.state = FilterState::Closed;
                    return std::mem::take(&mut self.buf);
                }
                String::new()
            }
        }
    }

    /// Release whatever is still buffered at end of stream.
    pub fn finish(&mut self) -> String {
        self.state = FilterState::Closed;
        std::mem::take(&mut self.buf)
    }
}

impl Default for ThinkFilter {
    fn default() -> Self {
        ThinkFilter::new()
    }
}

/// Drives turns against a backend and a history store.
pub struct TurnEngine {
    client: Arc<dyn ClientWrapper>,
    history_store: Arc<dyn HistoryStore>,
    chat_temperature: f32,
    observe_temperature: f32,
}

impl TurnEngine {
    pub fn new(
        client: Arc<dyn ClientWrapper>,
        history_store: Arc<dyn HistoryStore>,
        chat_temperature: f32,
        observe_temperature: f32,
    ) -> Self {
        TurnEngine {
            client,
            history_store,
            chat_temperature,
            observe_temperature,
        }
    }

    pub fn history_store(&self) -> Arc<dyn HistoryStore> {
        Arc::clone(&self.history_store)
    }

    /// Run one turn for `ctx` responding to `input`.
    ///
    /// With a callback the backend is streamed and visible tokens are
    /// forwarded as they arrive; without one a single blocking call is made.
    /// On success the (input, visible reply) pair is appended both to the
    /// store and to `ctx.history`.
    #[allow(clippy::too_many_arguments)]
    pub async fn take_turn(
        &self,
        ctx: &mut PersonaContext,
        input: &str,
        is_observe: bool,
        roster: &[String],
        topic_briefing: &str,
        image_briefing: &str,
        mut on_token: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> Result<TurnOutcome, Box<dyn Error>> {
        let turn_prompt = prompt::build_turn_prompt(&TurnPromptInputs {
            topic_briefing,
            image_briefing,
            roster,
            speaker_name: &ctx.name,
            rounds_exchanged: ctx.rounds_exchanged,
        });

        let mut messages = Vec::with_capacity(ctx.history.len() + 3);
        messages.push(Message {
            role: Role::System,
            content: ctx.system_prompt.clone(),
        });
        if !turn_prompt.is_empty() {
            messages.push(Message {
                role: Role::System,
                content: turn_prompt,
            });
        }
        for turn in &ctx.history {
            messages.push(Message {
                role: if turn.is_moderator() {
                    Role::Moderator
                } else {
                    Role::Participant
                },
                content: turn.content.clone(),
            });
        }
        messages.push(Message {
            role: Role::Moderator,
            content: input.to_string(),
        });

        let temperature = if is_observe {
            self.observe_temperature
        } else {
            self.chat_temperature
        };
        debug!(
            "turn: persona={} messages={} temp={}",
            ctx.name,
            messages.len(),
            temperature
        );

        let raw = match &mut on_token {
            Some(sink) => {
                let mut stream = self
                    .client
                    .send_message_stream(&messages, temperature)
                    .await?;
                let mut filter = ThinkFilter::new();
                let mut full = String::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| -> Box<dyn Error> { e })?;
                    full.push_str(&chunk.content);
                    let visible = filter.push(&chunk.content);
                    if !visible.is_empty() {
                        sink(&visible);
                    }
                }
                let tail = filter.finish();
                if !tail.is_empty() {
                    sink(&tail);
                }
                full
            }
            None => {
                self.client
                    .send_message(&messages, temperature)
                    .await?
                    .content
            }
        };

        let (thoughts, reply) = extract_thinking(&raw);

        self.history_store
            .append(&ctx.history_key, input, &reply)
            .await?;
        ctx.history.push(crate::focusroom::history::HistoryTurn::moderator(input));
        ctx.history
            .push(crate::focusroom::history::HistoryTurn::participant(&reply));
        ctx.rounds_exchanged += 1;

        Ok(TurnOutcome { thoughts, reply })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_splits_on_the_first_pair() {
        let (thoughts, visible) =
            extract_thinking("<think>\nhmm, pricing\n</think>\nI'd wait for a sale.");
        assert_eq!(thoughts, "hmm, pricing");
        assert_eq!(visible, "I'd wait for a sale.");
    }

    #[test]
    fn extraction_without_markers_is_all_visible() {
        let (thoughts, visible) = extract_thinking("  plain reply  ");
        assert_eq!(thoughts, "");
        assert_eq!(visible, "plain reply");
    }

    #[test]
    fn extraction_tolerates_empty_interior() {
        let (thoughts, visible) = extract_thinking("<think></think>Sure.");
        assert_eq!(thoughts, "");
        assert_eq!(visible, "Sure.");
    }

    #[test]
    fn unclosed_marker_stays_visible() {
        let (thoughts, visible) = extract_thinking("<think>never closed");
        assert_eq!(thoughts, "");
        assert_eq!(visible, "<think>never closed");
    }

    #[test]
    fn filter_withholds_the_thinking_block() {
        let mut filter = ThinkFilter::new();
        let mut seen = String::new();
        for chunk in ["<th", "ink>secret ", "plan</th", "ink>he", "llo"] {
            seen.push_str(&filter.push(chunk));
        }
        seen.push_str(&filter.finish());
        assert_eq!(seen, "hello");
    }

    #[test]
    fn filter_passes_plain_replies_immediately() {
        let mut filter = ThinkFilter::new();
        assert_eq!(filter.push("Hi there"), "Hi there");
        assert_eq!(filter.push(", all good."), ", all good.");
    }

    #[test]
    fn filter_flushes_unclosed_buffer_at_end() {
        let mut filter = ThinkFilter::new();
        assert_eq!(filter.push("<think>trailing"), "");
        assert_eq!(filter.finish(), "<think>trailing");
    }
}
