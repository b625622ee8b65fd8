//! Generation-backend client implementations.
//!
//! Each submodule exposes a [`ClientWrapper`](crate::ClientWrapper) implementation
//! for a specific endpoint. FocusRoom ships with an Ollama chat client (local or
//! cloud); any OpenAI-style chat backend can be added by implementing the trait.

pub mod ollama;

use std::fmt;

/// Error produced while consuming a streaming response.
#[derive(Debug)]
pub struct StreamError(pub String);

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StreamError {}
