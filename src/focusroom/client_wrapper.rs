use async_trait::async_trait;
use futures_util::Stream;
use std::error::Error;
use std::pin::Pin;

/// A ClientWrapper is a wrapper around a specific text-generation backend.
/// It provides a common interface for one-shot and streaming chat completions.
/// It does not keep track of the conversation; that is the job of the room's
/// per-persona contexts, which carry the history and hand it to the wrapper
/// on every turn.

/// Represents the possible roles for a message in a focus-group exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// Set by the engine to steer the persona (identity, anchors, briefings).
    System,
    /// A message spoken by the human moderator (or, in observe mode, a relayed
    /// persona utterance reframed as input).
    Moderator,
    /// Content generated by the persona itself.
    Participant,
}

/// Represents a generic message to be sent to the generation backend.
#[derive(Clone, Debug)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: String,
}

/// Represents a chunk of a streaming message response.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    /// The incremental content in this chunk.
    pub content: String,
    /// Whether this is the final chunk in the stream.
    pub is_final: bool,
}

/// Type alias for a Send-able error box
pub type SendError = Box<dyn Error + Send>;

/// A pinned, boxed stream of message chunks.
pub type MessageChunkStream = Pin<Box<dyn Stream<Item = Result<MessageChunk, SendError>> + Send>>;

/// Trait defining the interface to interact with a generation backend.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a message list to the backend and get a single complete response.
    /// - `messages`: the ordered role-tagged messages of the request.
    /// - `temperature`: creativity knob; direct moderator turns use a lower
    ///   value than inter-persona observe turns.
    async fn send_message(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<Message, Box<dyn Error>>;

    /// Send a message list and get the response as an incremental token stream.
    /// This method has a default implementation that returns an error, so
    /// backends that cannot stream don't break. Backends that support
    /// streaming should override this.
    async fn send_message_stream(
        &self,
        _messages: &[Message],
        _temperature: f32,
    ) -> Result<MessageChunkStream, Box<dyn Error>> {
        Err("Streaming not supported by this client".into())
    }

    /// The model identifier this wrapper talks to.
    fn model_name(&self) -> &str;
}
