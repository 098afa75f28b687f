//! The `@AI` assistant: request detection, the ordered model fallback chain,
//! and the apology text substituted when every model fails.

use tracing::{info, warn};

use crate::providers::{ModelBackend, ProviderError};

/// Prefix (compared case-insensitively) that addresses the assistant.
pub const AI_PREFIX: &str = "@ai";

/// Substituted when a model answers with empty text.
pub const EMPTY_REPLY: &str = "Sorry, I couldn't process that request.";

/// True when `content` begins with `@ai`, ignoring case.
pub fn is_ai_request(content: &str) -> bool {
    content
        .get(..AI_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(AI_PREFIX))
}

/// The prompt sent to the model: content minus the prefix, trimmed.
pub fn extract_prompt(content: &str) -> &str {
    content.get(AI_PREFIX.len()..).unwrap_or("").trim()
}

/// Text of the AI message posted when the assistant could not answer.
pub fn apology(reason: &AssistantError) -> String {
    format!("I'm having trouble processing your request right now. Error: {reason}")
}

/// One failed model attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFailure {
    pub model: String,
    pub error: ProviderError,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssistantError {
    #[error("GEMINI_API_KEY is not set")]
    MissingApiKey,
    #[error("all {} models failed; last error: {}", .attempts.len(), last_error(.attempts))]
    AllModelsFailed { attempts: Vec<ModelFailure> },
}

fn last_error(attempts: &[ModelFailure]) -> String {
    attempts
        .last()
        .map(|f| format!("{} ({})", f.error, f.model))
        .unwrap_or_else(|| "no models configured".to_string())
}

/// Tries each configured model in order and returns the first answer.
pub struct Assistant<B> {
    backend: Option<B>,
    models: Vec<String>,
}

impl<B: ModelBackend> Assistant<B> {
    pub fn new(backend: B, models: Vec<String>) -> Self {
        Self {
            backend: Some(backend),
            models,
        }
    }

    /// An assistant with no backend: every request fails with
    /// [`AssistantError::MissingApiKey`].
    pub fn unconfigured(models: Vec<String>) -> Self {
        Self {
            backend: None,
            models,
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Run `prompt` through the fallback chain.
    ///
    /// # Errors
    /// - [`AssistantError::MissingApiKey`] when no backend is configured.
    /// - [`AssistantError::AllModelsFailed`] with one entry per model tried.
    pub async fn ask(&self, prompt: &str) -> Result<String, AssistantError> {
        let backend = self.backend.as_ref().ok_or(AssistantError::MissingApiKey)?;
        let mut attempts = Vec::new();

        for model in &self.models {
            match backend.generate(model, prompt).await {
                Ok(text) => {
                    info!(model = %model, chars = text.len(), "assistant reply generated");
                    return Ok(text);
                }
                Err(error) => {
                    warn!(model = %model, error = %error, "model failed, trying next");
                    attempts.push(ModelFailure {
                        model: model.clone(),
                        error,
                    });
                }
            }
        }

        Err(AssistantError::AllModelsFailed { attempts })
    }

    /// Text of the AI message for `prompt`: the answer, [`EMPTY_REPLY`] for a
    /// blank answer, or an [`apology`] when the chain is exhausted.
    pub async fn reply_for(&self, prompt: &str) -> String {
        match self.ask(prompt).await {
            Ok(text) if text.trim().is_empty() => EMPTY_REPLY.to_string(),
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "assistant unavailable, posting apology");
                apology(&e)
            }
        }
    }
}
