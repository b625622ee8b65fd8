use std::collections::VecDeque;
use std::error::Error;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use focusroom::client_wrapper::{MessageChunk, MessageChunkStream, SendError};
use focusroom::{
    ClientWrapper, HistoryStore, MemoryHistoryStore, Message, PersonaContext, Role, RoomState,
    TranscriptEntry, TranscriptKind, TurnEngine,
};

/// Scripted backend: returns queued replies in order, or fails on demand.
struct MockClient {
    replies: Mutex<VecDeque<String>>,
    fail_always: bool,
}

impl MockClient {
    fn with_replies(replies: &[&str]) -> Self {
        MockClient {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            fail_always: false,
        }
    }

    fn failing() -> Self {
        MockClient {
            replies: Mutex::new(VecDeque::new()),
            fail_always: true,
        }
    }

    fn next_reply(&self) -> String {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "Noted.".to_string())
    }
}

#[async_trait]
impl ClientWrapper for MockClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _temperature: f32,
    ) -> Result<Message, Box<dyn Error>> {
        if self.fail_always {
            return Err("backend unavailable".into());
        }
        Ok(Message {
            role: Role::Participant,
            content: self.next_reply(),
        })
    }

    async fn send_message_stream(
        &self,
        _messages: &[Message],
        _temperature: f32,
    ) -> Result<MessageChunkStream, Box<dyn Error>> {
        if self.fail_always {
            return Err("backend unavailable".into());
        }
        let content = self.next_reply();
        // Chunk boundaries deliberately cut through the thinking markers.
        let bytes: Vec<char> = content.chars().collect();
        let mut chunks: Vec<Result<MessageChunk, SendError>> = bytes
            .chunks(5)
            .map(|c| {
                Ok(MessageChunk {
                    content: c.iter().collect(),
                    is_final: false,
                })
            })
            .collect();
        chunks.push(Ok(MessageChunk {
            content: String::new(),
            is_final: true,
        }));
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

fn engine_with(client: MockClient) -> (TurnEngine, Arc<MemoryHistoryStore>) {
    let store = Arc::new(MemoryHistoryStore::new());
    let engine = TurnEngine::new(
        Arc::new(client),
        store.clone() as Arc<dyn HistoryStore>,
        0.75,
        0.85,
    );
    (engine, store)
}

fn persona(key: &str, name: &str) -> PersonaContext {
    PersonaContext::new(
        key,
        name,
        format!("session:{}:messages", name.to_lowercase()),
        format!("You are {}.", name),
        Vec::new(),
    )
}

fn room_with_two() -> RoomState {
    RoomState::new()
        .add("1")
        .add("2")
        .insert_persona(persona("1", "Lena"))
        .insert_persona(persona("2", "Marcus"))
}

/// Mirror of the REPL's conversational path: log the moderator line, then one
/// turn per responder with its own transcript entry.
async fn moderator_turn(mut state: RoomState, engine: &TurnEngine, input: &str) -> RoomState {
    state = state.append_transcript(TranscriptEntry::moderator(input));
    let roster = state.roster_names();
    for key in state.responders() {
        let mut ctx = state.personas.get(&key).cloned().unwrap();
        let topic_briefing = state.topic_briefing.clone();
        let turn = engine
            .take_turn(&mut ctx, input, false, &roster, &topic_briefing, "", None)
            .await
            .unwrap();
        let name = ctx.name.clone();
        state = state
            .insert_persona(ctx)
            .append_transcript(TranscriptEntry::participant(
                &key,
                &name,
                &turn.thoughts,
                &turn.reply,
            ));
    }
    state
}

#[tokio::test]
async fn unfocused_turn_produces_three_transcript_entries() {
    let (engine, _) = engine_with(MockClient::with_replies(&[
        "<think>price again</think>Too expensive.",
        "Worth it for the exclusives.",
    ]));
    let state = moderator_turn(room_with_two(), &engine, "Thoughts on the price?").await;

    assert_eq!(state.transcript.len(), 3);
    assert_eq!(state.transcript[0].kind, TranscriptKind::Moderator);
    assert_eq!(state.transcript[1].participant_name, "Lena");
    assert_eq!(state.transcript[1].thoughts, "price again");
    assert_eq!(state.transcript[1].content, "Too expensive.");
    assert_eq!(state.transcript[2].participant_name, "Marcus");
    assert_eq!(state.transcript[2].thoughts, "");
}

#[tokio::test]
async fn focused_turn_only_reaches_the_focused_persona() {
    let (engine, store) = engine_with(MockClient::with_replies(&["Just me answering."]));
    let state = room_with_two().set_focus("2");
    let state = moderator_turn(state, &engine, "Marcus, your take?").await;

    assert_eq!(state.transcript.len(), 2);
    assert_eq!(state.transcript[1].participant_name, "Marcus");
    assert!(store.load("session:lena:messages").await.unwrap().is_empty());
    assert_eq!(store.load("session:marcus:messages").await.unwrap().len(), 2);
}

#[tokio::test]
async fn exchange_persists_exactly_once_per_turn() {
    let (engine, store) = engine_with(MockClient::with_replies(&["First.", "Second."]));
    let mut ctx = persona("1", "Lena");

    engine
        .take_turn(&mut ctx, "q1", false, &[], "", "", None)
        .await
        .unwrap();
    engine
        .take_turn(&mut ctx, "q2", false, &[], "", "", None)
        .await
        .unwrap();

    let stored = store.load("session:lena:messages").await.unwrap();
    assert_eq!(stored.len(), 4);
    assert!(stored[0].is_moderator());
    assert_eq!(stored[1].content, "First.");
    assert_eq!(stored[3].content, "Second.");
    assert_eq!(ctx.history.len(), 4);
    assert_eq!(ctx.rounds_exchanged, 2);
}

#[tokio::test]
async fn backend_failure_persists_nothing() {
    let (engine, store) = engine_with(MockClient::failing());
    let mut ctx = persona("1", "Lena");

    let result = engine
        .take_turn(&mut ctx, "anyone there?", false, &[], "", "", None)
        .await;

    assert!(result.is_err());
    assert!(store.load("session:lena:messages").await.unwrap().is_empty());
    assert!(ctx.history.is_empty());
    assert_eq!(ctx.rounds_exchanged, 0);
}

#[tokio::test]
async fn streamed_tokens_never_leak_thinking() {
    let (engine, _) = engine_with(MockClient::with_replies(&[
        "<think>the secret reasoning stays hidden</think>Visible answer only.",
    ]));
    let mut ctx = persona("1", "Lena");
    let mut streamed = String::new();
    let mut on_token = |tok: &str| streamed.push_str(tok);

    let turn = engine
        .take_turn(&mut ctx, "hi", false, &[], "", "", Some(&mut on_token))
        .await
        .unwrap();

    assert!(!streamed.contains("secret"));
    assert_eq!(streamed.trim(), "Visible answer only.");
    assert_eq!(turn.thoughts, "the secret reasoning stays hidden");
    assert_eq!(turn.reply, "Visible answer only.");
}

#[tokio::test]
async fn persisted_history_carries_across_contexts() {
    let (engine, store) = engine_with(MockClient::with_replies(&["I said so earlier."]));
    let mut ctx = persona("1", "Lena");
    engine
        .take_turn(&mut ctx, "remember this", false, &[], "", "", None)
        .await
        .unwrap();

    // A fresh context rebuilt from the store sees the prior exchange.
    let reloaded = store.load("session:lena:messages").await.unwrap();
    let ctx2 = PersonaContext::new("1", "Lena", "session:lena:messages", "sys", reloaded);
    assert_eq!(ctx2.history.len(), 2);
    assert_eq!(ctx2.rounds_exchanged, 1);
}

/// Backend that accepts the request and then never produces a token.
struct StalledClient;

#[async_trait]
impl ClientWrapper for StalledClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _temperature: f32,
    ) -> Result<Message, Box<dyn Error>> {
        std::future::pending().await
    }

    async fn send_message_stream(
        &self,
        _messages: &[Message],
        _temperature: f32,
    ) -> Result<MessageChunkStream, Box<dyn Error>> {
        Ok(Box::pin(futures_util::stream::pending()))
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

#[tokio::test]
async fn interrupted_turn_is_dropped_before_persist() {
    let store = Arc::new(MemoryHistoryStore::new());
    let engine = TurnEngine::new(
        Arc::new(StalledClient),
        store.clone() as Arc<dyn HistoryStore>,
        0.75,
        0.85,
    );
    let mut ctx = persona("1", "Lena");
    let mut on_token = |_: &str| {};

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = tokio::select! {
        _ = cancel.cancelled() => None,
        res = engine.take_turn(&mut ctx, "still there?", false, &[], "", "", Some(&mut on_token)) => {
            Some(res)
        }
    };

    assert!(result.is_none());
    assert!(store.load("session:lena:messages").await.unwrap().is_empty());
    assert!(ctx.history.is_empty());
    assert_eq!(ctx.rounds_exchanged, 0);
}
