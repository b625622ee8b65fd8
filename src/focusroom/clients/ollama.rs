//! The `OllamaClient` struct implements [`ClientWrapper`] for Ollama's `/api/chat`
//! endpoint, covering local daemons and the hosted cloud endpoint alike.
//!
//! # Key Features
//!
//! - **send_message(...)**: one-shot completion with the caller's temperature.
//! - **send_message_stream(...)**: newline-delimited JSON chunks surfaced as a
//!   [`MessageChunk`] stream, so tokens can be rendered as they arrive.
//! - **chat_with_images(...)**: vision calls used by the image-analysis service.
//!
//! # Example
//!
//! ```rust,no_run
//! use focusroom::clients::ollama::OllamaClient;
//! use focusroom::client_wrapper::{ClientWrapper, Message, Role};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OllamaClient::new("http://localhost:11434", "llama3.1:8b");
//!     let reply = client
//!         .send_message(
//!             &[
//!                 Message { role: Role::System, content: "You are terse.".into() },
//!                 Message { role: Role::Moderator, content: "Hello!".into() },
//!             ],
//!             0.75,
//!         )
//!         .await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```

use std::collections::VecDeque;
use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::focusroom::client_wrapper::{
    ClientWrapper, Message, MessageChunk, MessageChunkStream, Role, SendError,
};
use crate::focusroom::clients::StreamError;

fn role_to_wire(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Moderator => "user",
        Role::Participant => "assistant",
    }
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct WireReply {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: WireReply,
}

#[derive(Deserialize)]
struct ChatStreamLine {
    #[serde(default)]
    message: Option<WireReply>,
    #[serde(default)]
    done: bool,
}

/// Client wrapper for Ollama's chat API.
///
/// The wrapper owns its [`reqwest::Client`]. It is constructed once and passed
/// into every component that needs to generate text, never held as a hidden
/// process-wide singleton, so tests can swap in mocks at the [`ClientWrapper`]
/// seam.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OllamaClient {
    /// Construct a client for a local (keyless) Ollama daemon.
    pub fn new(base_url: &str, model: &str) -> Self {
        Self::build(base_url, model, None)
    }

    /// Construct a client for an authenticated endpoint (e.g. ollama.com cloud).
    pub fn new_with_api_key(base_url: &str, model: &str, api_key: &str) -> Self {
        let key = if api_key.trim().is_empty() {
            None
        } else {
            Some(api_key.to_string())
        };
        Self::build(base_url, model, key)
    }

    fn build(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        let http = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_default();
        OllamaClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    fn wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: role_to_wire(&m.role).to_string(),
                content: m.content.clone(),
                images: None,
            })
            .collect()
    }

    /// One-shot vision call: a single user message carrying base64-encoded
    /// image payloads. Used by the image-analysis service.
    pub async fn chat_with_images(
        &self,
        prompt: &str,
        images_b64: Vec<String>,
        temperature: f32,
    ) -> Result<String, Box<dyn Error>> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![WireMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
                images: Some(images_b64),
            }],
            stream: false,
            options: ChatOptions { temperature },
        };

        let response = self
            .request(&self.chat_url())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let parsed: ChatResponse = response.json().await?;
        Ok(parsed.message.content)
    }
}

#[async_trait]
impl ClientWrapper for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<Message, Box<dyn Error>> {
        let body = ChatRequest {
            model: &self.model,
            messages: Self::wire_messages(messages),
            stream: false,
            options: ChatOptions { temperature },
        };

        let result = self
            .request(&self.chat_url())
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(response) => {
                let parsed: ChatResponse = response.json().await?;
                Ok(Message {
                    role: Role::Participant,
                    content: parsed.message.content,
                })
            }
            Err(err) => {
                log::error!("OllamaClient::send_message(...): chat API error: {}", err);
                Err(err.into())
            }
        }
    }

    async fn send_message_stream(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<MessageChunkStream, Box<dyn Error>> {
        let body = ChatRequest {
            model: &self.model,
            messages: Self::wire_messages(messages),
            stream: true,
            options: ChatOptions { temperature },
        };

        let response = self
            .request(&self.chat_url())
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|err| {
                log::error!("OllamaClient::send_message_stream(...): chat API error: {}", err);
                err
            })?;

        // Ollama streams newline-delimited JSON objects; accumulate raw bytes
        // and emit one MessageChunk per complete line.
        struct LineState {
            inner: futures_util::stream::BoxStream<'static, Result<bytes::Bytes, reqwest::Error>>,
            buf: Vec<u8>,
            pending: VecDeque<MessageChunk>,
            finished: bool,
        }

        let state = LineState {
            inner: response.bytes_stream().boxed(),
            buf: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        };

        let stream = futures_util::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(chunk) = st.pending.pop_front() {
                    return Some((Ok(chunk), st));
                }
                if st.finished {
                    return None;
                }
                match st.inner.next().await {
                    Some(Ok(bytes)) => {
                        st.buf.extend_from_slice(&bytes);
                        while let Some(pos) = st.buf.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = st.buf.drain(..=pos).collect();
                            let text = String::from_utf8_lossy(&line);
                            let text = text.trim();
                            if text.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<ChatStreamLine>(text) {
                                Ok(parsed) => {
                                    let content =
                                        parsed.message.map(|m| m.content).unwrap_or_default();
                                    if parsed.done {
                                        st.finished = true;
                                    }
                                    st.pending.push_back(MessageChunk {
                                        content,
                                        is_final: parsed.done,
                                    });
                                }
                                Err(err) => {
                                    st.finished = true;
                                    st.pending.clear();
                                    return Some((
                                        Err(Box::new(StreamError(format!(
                                            "unparseable stream line: {}",
                                            err
                                        ))) as SendError),
                                        st,
                                    ));
                                }
                            }
                        }
                    }
                    Some(Err(err)) => {
                        st.finished = true;
                        return Some((
                            Err(Box::new(StreamError(format!("stream chunk error: {}", err)))
                                as SendError),
                            st,
                        ));
                    }
                    None => {
                        st.finished = true;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
