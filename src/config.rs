//! TOML configuration.
//!
//! Every field has a default, so an empty (or absent) file is a valid
//! configuration. The Gemini API key is read from `GEMINI_API_KEY` only and is
//! never stored in the file.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:3000"
//! database = "textify.db"
//!
//! [assistant]
//! models = ["gemini-pro", "gemini-1.5-pro", "gemini-1.0-pro"]
//!
//! [client]
//! server_url = "http://127.0.0.1:3000"
//! poll_interval_ms = 3000
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TextifyError};

/// Environment variable holding the generative-text API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub assistant: AssistantConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address of the HTTP server.
    pub bind: String,
    /// SQLite database file.
    pub database: String,
    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            database: "textify.db".to_string(),
            max_body_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssistantConfig {
    pub api_base: String,
    /// Models tried in order until one answers.
    pub models: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            models: vec![
                "gemini-pro".to_string(),
                "gemini-1.5-pro".to_string(),
                "gemini-1.0-pro".to_string(),
            ],
            request_timeout_secs: 30,
        }
    }
}

impl AssistantConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Timing knobs of the polling client.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub poll_interval_ms: u64,
    /// How long the "just arrived" flag stays on a message.
    pub new_flag_ms: u64,
    /// Simulated typing latency before an AI reply is shown.
    pub ai_reply_delay_ms: u64,
    /// Max creation-time distance for matching a pending message to a polled one.
    pub dedup_window_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".to_string(),
            poll_interval_ms: 3000,
            new_flag_ms: 1500,
            ai_reply_delay_ms: 800,
            dedup_window_ms: 10_000,
            request_timeout_secs: 60,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn new_flag_delay(&self) -> Duration {
        Duration::from_millis(self.new_flag_ms)
    }

    pub fn ai_reply_delay(&self) -> Duration {
        Duration::from_millis(self.ai_reply_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| TextifyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                Self::from_toml(&text)
            }
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.assistant.models.is_empty() {
            return Err(TextifyError::Config(
                "assistant.models must name at least one model".to_string(),
            ));
        }
        if self.client.poll_interval_ms == 0 {
            return Err(TextifyError::Config(
                "client.poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The API key from the environment, if set and non-empty.
pub fn api_key_from_env() -> Option<String> {
    std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty())
}
