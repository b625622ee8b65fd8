//! Configuration for FocusRoom.
//!
//! Provides the [`RoomConfig`] struct covering the generation backend, the
//! history and image stores, and the tuning knobs for turn generation. Values
//! come from environment variables with the same names the service has always
//! used, but the struct itself is plain data; construct it by hand in tests.
//!
//! # Example
//!
//! ```rust
//! use focusroom::RoomConfig;
//!
//! let config = RoomConfig::from_env();
//! assert!(config.chat_temperature < config.observe_temperature);
//! ```

use std::env;
use std::path::PathBuf;

/// Global configuration for a focus-group session.
#[derive(Clone, Debug)]
pub struct RoomConfig {
    /// Chat model identifier.
    pub model: String,
    /// Base URL of the chat endpoint.
    pub base_url: String,
    /// Vision model used for image analysis.
    pub vision_model: String,
    /// Base URL of the vision endpoint (cloud by default).
    pub vision_base_url: String,
    /// API key for the vision endpoint; empty means image commands are unavailable.
    pub vision_api_key: String,
    /// Directory holding per-participant history files.
    pub history_dir: PathBuf,
    /// History expiry in seconds.
    pub history_ttl_secs: u64,
    /// Directory holding cached image analyses, keyed by content hash.
    pub image_cache_dir: PathBuf,
    /// Image-analysis cache expiry in seconds.
    pub image_ttl_secs: u64,
    /// Directory where Markdown session summaries are written.
    pub summaries_dir: PathBuf,
    /// Directory holding persona documents and the custom registry.
    pub personas_dir: PathBuf,
    /// Temperature for direct moderator-addressed turns.
    pub chat_temperature: f32,
    /// Temperature for inter-persona observe turns.
    pub observe_temperature: f32,
    /// Temperature for summary and exit-brief generation.
    pub summary_temperature: f32,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64_or(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl RoomConfig {
    /// Read configuration from the environment, falling back to defaults
    /// suitable for a local Ollama daemon.
    pub fn from_env() -> Self {
        RoomConfig {
            model: env_or("OLLAMA_MODEL", "llama3.1:8b"),
            base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434"),
            vision_model: env_or("OLLAMA_VISION_MODEL", "qwen3-vl:235b-cloud"),
            vision_base_url: env_or("OLLAMA_HOST", "https://ollama.com"),
            vision_api_key: env_or("OLLAMA_API_KEY", ""),
            history_dir: PathBuf::from(env_or("FOCUSROOM_HISTORY_DIR", ".focusroom/history")),
            history_ttl_secs: env_u64_or("FOCUSROOM_SESSION_TTL", 86_400),
            image_cache_dir: PathBuf::from(env_or(
                "FOCUSROOM_IMAGE_CACHE_DIR",
                ".focusroom/images",
            )),
            image_ttl_secs: env_u64_or("FOCUSROOM_IMAGE_TTL", 604_800),
            summaries_dir: PathBuf::from(env_or("FOCUSROOM_SUMMARIES_DIR", "chat_summaries")),
            personas_dir: PathBuf::from(env_or("FOCUSROOM_PERSONAS_DIR", "personas")),
            chat_temperature: 0.75,
            observe_temperature: 0.85,
            summary_temperature: 0.3,
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
