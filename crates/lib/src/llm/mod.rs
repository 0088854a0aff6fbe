//! Completion client: one user utterance in, one generated reply out.
//!
//! The relay only depends on [`CompletionBackend`]; [`AzureOpenAiClient`] is the
//! production implementation.

mod azure_openai;

pub use azure_openai::{AzureOpenAiClient, ChatMessage};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion service not configured: {0}")]
    NotConfigured(&'static str),
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("completion api error: {0}")]
    Api(String),
}

/// Outcome of one completion call. Lets callers tell "model said nothing" apart from "call failed".
#[derive(Debug)]
pub enum Completion {
    /// Non-empty generated text.
    Reply(String),
    /// The service answered but produced no content.
    Empty,
    /// The call did not produce an answer.
    Failed(CompletionError),
}

impl Completion {
    /// Reply text; empty for both `Empty` and `Failed`.
    pub fn text(&self) -> &str {
        match self {
            Completion::Reply(text) => text,
            Completion::Empty | Completion::Failed(_) => "",
        }
    }

    /// Map raw generated content to `Reply` or `Empty`.
    pub fn from_content(content: Option<String>) -> Self {
        match content {
            Some(text) if !text.trim().is_empty() => Completion::Reply(text),
            _ => Completion::Empty,
        }
    }
}

/// A remote chat-completion call. Implementations never fail outward: errors become [`Completion::Failed`].
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, input: &str) -> Completion;
}
