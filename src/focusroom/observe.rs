//! Autonomous persona-to-persona discussion rounds.
//!
//! The moderator steps back and the active participants respond to each other
//! in round-robin order for a fixed number of rounds. Natural completion runs
//! one extra synthesis round; cancellation ends the loop immediately and
//! skips synthesis. A turn in flight when cancellation lands is dropped
//! before its persist step, so the store never holds half an exchange.

use log::warn;
use tokio_util::sync::CancellationToken;

use crate::focusroom::room::{RoomError, RoomMode, RoomState, TranscriptEntry};
use crate::focusroom::turn::TurnEngine;

/// Rounds used when the moderator gives no count.
pub const DEFAULT_OBSERVE_ROUNDS: usize = 3;

const SYNTHESIS_QUESTION: &str =
    "Given everything discussed, what specific offer or condition would make you say yes?";

/// Per-turn events the caller renders however it likes.
pub enum ObserveEvent<'a> {
    TurnStarted {
        key: &'a str,
        name: &'a str,
        round: usize,
    },
    /// A visible streamed token (thinking already filtered out).
    Token { text: &'a str },
    TurnFinished {
        name: &'a str,
        thoughts: &'a str,
        reply: &'a str,
    },
    SynthesisStarted,
    Note { text: &'a str },
}

/// Options for one observe run.
#[derive(Debug, Clone, Default)]
pub struct ObserveOptions {
    /// Explicit seed topic; absent falls back to the last moderator line,
    /// then to a generic question about the room topic.
    pub seed_topic: Option<String>,
    pub rounds: Option<usize>,
}

/// What happened during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserveOutcome {
    pub turns_completed: usize,
    pub interrupted: bool,
    pub synthesis_ran: bool,
}

fn resolve_seed(state: &RoomState, opts: &ObserveOptions) -> String {
    if let Some(seed) = &opts.seed_topic {
        return seed.clone();
    }
    if let Some(entry) = state
        .transcript
        .iter()
        .rev()
        .find(|e| e.kind == crate::focusroom::room::TranscriptKind::Moderator)
    {
        return entry.content.clone();
    }
    format!("What does everyone really think about {}?", state.topic)
}

/// Run observe mode against a snapshot of the room, returning the updated
/// room plus an outcome. Requires at least two active participants; with
/// fewer, the error is returned and the input state is unchanged.
pub async fn run_observe(
    state: &RoomState,
    engine: &TurnEngine,
    opts: &ObserveOptions,
    image_briefing: &str,
    cancel: &CancellationToken,
    sink: &mut (dyn FnMut(ObserveEvent<'_>) + Send),
) -> Result<(RoomState, ObserveOutcome), RoomError> {
    if state.active.len() < 2 {
        return Err(RoomError::NotEnoughParticipants);
    }

    let rounds = opts.rounds.unwrap_or(DEFAULT_OBSERVE_ROUNDS);
    let seed = resolve_seed(state, opts);
    let roster = state.roster_names();
    let mut next = state.set_mode(RoomMode::Observe);
    let mut outcome = ObserveOutcome {
        turns_completed: 0,
        interrupted: false,
        synthesis_ran: false,
    };

    // The first speaker answers the seed directly; everyone after responds
    // to whoever spoke last, with the seed pinned so rounds cannot drift.
    let mut prompt = format!(
        "The moderator has stepped back to observe. Discuss this with the other \
         participants, speaking only for yourself: {}",
        seed
    );

    'rounds: for round in 1..=rounds {
        for key in state.active.clone() {
            if cancel.is_cancelled() {
                outcome.interrupted = true;
                break 'rounds;
            }
            let name = next.display_name(&key);
            let mut ctx = match next.personas.get(&key).cloned() {
                Some(ctx) => ctx,
                None => return Err(RoomError::UnknownParticipant(key)),
            };
            sink(ObserveEvent::TurnStarted {
                key: &key,
                name: &name,
                round,
            });

            let result = {
                let mut forward = |tok: &str| sink(ObserveEvent::Token { text: tok });
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    res = engine.take_turn(
                        &mut ctx,
                        &prompt,
                        true,
                        &roster,
                        &next.topic_briefing,
                        image_briefing,
                        Some(&mut forward),
                    ) => Some(res),
                }
            };
            let result = match result {
                None => {
                    outcome.interrupted = true;
                    break 'rounds;
                }
                Some(res) => res,
            };
            match result {
                Ok(turn) => {
                    sink(ObserveEvent::TurnFinished {
                        name: &name,
                        thoughts: &turn.thoughts,
                        reply: &turn.reply,
                    });
                    next = next
                        .insert_persona(ctx)
                        .append_transcript(TranscriptEntry::participant(
                            &key,
                            &name,
                            &turn.thoughts,
                            &turn.reply,
                        ));
                    outcome.turns_completed += 1;
                    prompt = format!(
                        "{} just said:\n\"{}\"\n\nRespond directly to the other participants, \
                         speaking only for yourself. Keep the discussion anchored on: {}",
                        name, turn.reply, seed
                    );
                }
                Err(e) => {
                    // One failed generation skips that speaker, not the run.
                    warn!("observe turn failed for {}: {}", name, e);
                    sink(ObserveEvent::Note {
                        text: &format!("{} had nothing to add ({})", name, e),
                    });
                }
            }
        }
    }

    if !outcome.interrupted {
        outcome.synthesis_ran = true;
        sink(ObserveEvent::SynthesisStarted);
        match run_synthesis(&mut next, engine, &roster, image_briefing, cancel, sink).await {
            Ok(turns) => outcome.turns_completed += turns,
            Err(interrupted) => {
                outcome.interrupted = interrupted;
            }
        }
    }

    next = next.set_mode(RoomMode::Idle);
    Ok((next, outcome))
}

/// One wrap-up turn per participant. Returns turns taken, or Err(true) when
/// cancellation cut the round short.
async fn run_synthesis(
    state: &mut RoomState,
    engine: &TurnEngine,
    roster: &[String],
    image_briefing: &str,
    cancel: &CancellationToken,
    sink: &mut (dyn FnMut(ObserveEvent<'_>) + Send),
) -> Result<usize, bool> {
    let mut turns = 0;
    for key in state.active.clone() {
        if cancel.is_cancelled() {
            return Err(true);
        }
        let name = state.display_name(&key);
        let mut ctx = match state.personas.get(&key).cloned() {
            Some(ctx) => ctx,
            None => continue,
        };
        sink(ObserveEvent::TurnStarted {
            key: &key,
            name: &name,
            round: 0,
        });
        let result = {
            let mut forward = |tok: &str| sink(ObserveEvent::Token { text: tok });
            tokio::select! {
                _ = cancel.cancelled() => None,
                res = engine.take_turn(
                    &mut ctx,
                    SYNTHESIS_QUESTION,
                    true,
                    roster,
                    &state.topic_briefing,
                    image_briefing,
                    Some(&mut forward),
                ) => Some(res),
            }
        };
        match result {
            None => return Err(true),
            Some(Ok(turn)) => {
                sink(ObserveEvent::TurnFinished {
                    name: &name,
                    thoughts: &turn.thoughts,
                    reply: &turn.reply,
                });
                *state = state
                    .insert_persona(ctx)
                    .append_transcript(TranscriptEntry::participant(
                        &key,
                        &name,
                        &turn.thoughts,
                        &turn.reply,
                    ));
                turns += 1;
            }
            Some(Err(e)) => {
                warn!("synthesis turn failed for {}: {}", name, e);
            }
        }
    }
    Ok(turns)
}
