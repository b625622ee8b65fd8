use std::collections::VecDeque;
use std::error::Error;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use focusroom::client_wrapper::{MessageChunk, MessageChunkStream, SendError};
use focusroom::observe::{run_observe, ObserveEvent, ObserveOptions};
use focusroom::{
    ClientWrapper, HistoryStore, MemoryHistoryStore, Message, PersonaContext, Role, RoomError,
    RoomState, TranscriptEntry, TranscriptKind, TurnEngine,
};

struct MockClient {
    replies: Mutex<VecDeque<String>>,
}

impl MockClient {
    fn with_replies(replies: &[&str]) -> Self {
        MockClient {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        }
    }

    fn next_reply(&self) -> String {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "Agreed, mostly.".to_string())
    }
}

#[async_trait]
impl ClientWrapper for MockClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _temperature: f32,
    ) -> Result<Message, Box<dyn Error>> {
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
        let chunks: Vec<Result<MessageChunk, SendError>> = vec![
            Ok(MessageChunk {
                content: self.next_reply(),
                is_final: false,
            }),
            Ok(MessageChunk {
                content: String::new(),
                is_final: true,
            }),
        ];
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
        .set_topic("PlayStation 5", "briefing")
}

#[tokio::test]
async fn two_rounds_then_synthesis_logs_six_entries() {
    let (engine, _) = engine_with(MockClient::with_replies(&[]));
    let opts = ObserveOptions {
        seed_topic: Some("is it worth the price".to_string()),
        rounds: Some(2),
    };
    let cancel = CancellationToken::new();
    let speaker_keys = Arc::new(Mutex::new(Vec::<String>::new()));
    let keys_inside = speaker_keys.clone();
    let mut sink = move |event: ObserveEvent<'_>| {
        if let ObserveEvent::TurnStarted { key, .. } = event {
            keys_inside.lock().unwrap().push(key.to_string());
        }
    };

    let (state, outcome) = run_observe(&room_with_two(), &engine, &opts, "", &cancel, &mut sink)
        .await
        .unwrap();

    // 2 participants x 2 rounds, plus one synthesis turn each.
    assert_eq!(outcome.turns_completed, 6);
    assert!(outcome.synthesis_ran);
    assert!(!outcome.interrupted);
    // Speakers alternate in room order through dialogue and synthesis.
    assert_eq!(
        *speaker_keys.lock().unwrap(),
        vec!["1", "2", "1", "2", "1", "2"]
    );
    let participant_entries = state
        .transcript
        .iter()
        .filter(|e| e.kind == TranscriptKind::Participant)
        .count();
    assert_eq!(participant_entries, 6);
    // Round-robin order: Lena speaks first each round.
    assert_eq!(state.transcript[0].participant_name, "Lena");
    assert_eq!(state.transcript[1].participant_name, "Marcus");
}

#[tokio::test]
async fn cancellation_after_first_turn_skips_synthesis() {
    let (engine, _) = engine_with(MockClient::with_replies(&[]));
    let opts = ObserveOptions {
        seed_topic: None,
        rounds: Some(3),
    };
    let cancel = CancellationToken::new();
    let cancel_inside = cancel.clone();
    let mut sink = move |event: ObserveEvent<'_>| {
        if let ObserveEvent::TurnFinished { .. } = event {
            cancel_inside.cancel();
        }
    };

    let (state, outcome) = run_observe(&room_with_two(), &engine, &opts, "", &cancel, &mut sink)
        .await
        .unwrap();

    assert_eq!(outcome.turns_completed, 1);
    assert!(outcome.interrupted);
    assert!(!outcome.synthesis_ran);
    assert_eq!(state.transcript.len(), 1);
}

#[tokio::test]
async fn one_participant_is_rejected_without_mutation() {
    let (engine, store) = engine_with(MockClient::with_replies(&[]));
    let state = RoomState::new().add("1").insert_persona(persona("1", "Lena"));
    let cancel = CancellationToken::new();
    let mut sink = |_: ObserveEvent<'_>| {};

    let result = run_observe(
        &state,
        &engine,
        &ObserveOptions::default(),
        "",
        &cancel,
        &mut sink,
    )
    .await;

    assert!(matches!(result, Err(RoomError::NotEnoughParticipants)));
    assert!(store.load("session:lena:messages").await.unwrap().is_empty());
}

#[tokio::test]
async fn seed_falls_back_to_the_last_moderator_line() {
    let replies_seen = Arc::new(Mutex::new(Vec::<String>::new()));

    struct RecordingClient {
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ClientWrapper for RecordingClient {
        async fn send_message(
            &self,
            messages: &[Message],
            _temperature: f32,
        ) -> Result<Message, Box<dyn Error>> {
            self.prompts
                .lock()
                .unwrap()
                .push(messages.last().unwrap().content.clone());
            Ok(Message {
                role: Role::Participant,
                content: "Sure.".to_string(),
            })
        }

        async fn send_message_stream(
            &self,
            messages: &[Message],
            _temperature: f32,
        ) -> Result<MessageChunkStream, Box<dyn Error>> {
            self.prompts
                .lock()
                .unwrap()
                .push(messages.last().unwrap().content.clone());
            let chunks: Vec<Result<MessageChunk, SendError>> = vec![Ok(MessageChunk {
                content: "Sure.".to_string(),
                is_final: true,
            })];
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    let store = Arc::new(MemoryHistoryStore::new());
    let engine = TurnEngine::new(
        Arc::new(RecordingClient {
            prompts: replies_seen.clone(),
        }),
        store as Arc<dyn HistoryStore>,
        0.75,
        0.85,
    );
    let state = room_with_two()
        .append_transcript(TranscriptEntry::moderator("Would you buy the digital edition?"));
    let opts = ObserveOptions {
        seed_topic: None,
        rounds: Some(1),
    };
    let cancel = CancellationToken::new();
    let mut sink = |_: ObserveEvent<'_>| {};

    run_observe(&state, &engine, &opts, "", &cancel, &mut sink)
        .await
        .unwrap();

    let prompts = replies_seen.lock().unwrap();
    assert!(prompts[0].contains("Would you buy the digital edition?"));
}

#[tokio::test]
async fn observe_turns_brief_personas_on_loaded_images() {
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));

    struct TranscribingClient {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ClientWrapper for TranscribingClient {
        async fn send_message(
            &self,
            messages: &[Message],
            _temperature: f32,
        ) -> Result<Message, Box<dyn Error>> {
            for m in messages {
                self.seen.lock().unwrap().push(m.content.clone());
            }
            Ok(Message {
                role: Role::Participant,
                content: "Noted.".to_string(),
            })
        }

        async fn send_message_stream(
            &self,
            messages: &[Message],
            _temperature: f32,
        ) -> Result<MessageChunkStream, Box<dyn Error>> {
            for m in messages {
                self.seen.lock().unwrap().push(m.content.clone());
            }
            let chunks: Vec<Result<MessageChunk, SendError>> = vec![Ok(MessageChunk {
                content: "Noted.".to_string(),
                is_final: true,
            })];
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }

        fn model_name(&self) -> &str {
            "transcribing"
        }
    }

    let store = Arc::new(MemoryHistoryStore::new());
    let engine = TurnEngine::new(
        Arc::new(TranscribingClient { seen: seen.clone() }),
        store as Arc<dyn HistoryStore>,
        0.75,
        0.85,
    );
    let opts = ObserveOptions {
        seed_topic: Some("first impressions".to_string()),
        rounds: Some(1),
    };
    let cancel = CancellationToken::new();
    let mut sink = |_: ObserveEvent<'_>| {};
    let briefing = "Image 1: a console advertisement on a billboard.";

    run_observe(&room_with_two(), &engine, &opts, briefing, &cancel, &mut sink)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen.iter().any(|content| content.contains(briefing)));
}
