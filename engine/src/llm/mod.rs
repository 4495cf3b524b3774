//! Reasoner Abstraction Layer
//!
//! The engine consumes natural-language inference through a single narrow
//! capability: [`Reasoner::generate`] maps a prompt (plus a system prompt and
//! a sampling temperature) to text. Decomposition, tool choice, parameter
//! inference, error diagnosis and validation all go through it.
//!
//! [`ReasonerClient`] wraps a reasoner with the per-call deadline and the
//! execution tree's cancellation token so every reasoning call is a bounded
//! suspension point.

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod ollama;
pub mod parse;
pub mod scripted;

pub use ollama::OllamaReasoner;
pub use scripted::ScriptedReasoner;

/// Result type for reasoner operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur while talking to a reasoner
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Message in a chat-style request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Natural-language inference capability
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Returns the name of the backing provider
    fn name(&self) -> &str;

    /// Map a prompt to text
    async fn generate(&self, prompt: &str, system: &str, temperature: f32) -> Result<String>;
}

/// Deadline- and cancellation-aware handle to a [`Reasoner`]
#[derive(Clone)]
pub struct ReasonerClient {
    inner: Arc<dyn Reasoner>,
    timeout: Duration,
    temperature: f32,
    calls: Arc<AtomicUsize>,
}

impl ReasonerClient {
    pub fn new(inner: Arc<dyn Reasoner>, timeout: Duration, temperature: f32) -> Self {
        Self {
            inner,
            timeout,
            temperature,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Ask with the configured default temperature
    pub async fn ask(
        &self,
        prompt: &str,
        system: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, EngineError> {
        self.ask_with_temperature(prompt, system, self.temperature, cancel)
            .await
    }

    /// Ask at an explicit temperature. Returns `Cancelled` as soon as the
    /// token fires and `Timeout` once the deadline passes.
    pub async fn ask_with_temperature(
        &self,
        prompt: &str,
        system: &str,
        temperature: f32,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Reasoner call via {}: prompt={} chars",
            self.inner.name(),
            prompt.len()
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.inner.generate(prompt, system, temperature)) => {
                match res {
                    Ok(Ok(text)) => Ok(text),
                    Ok(Err(LLMError::Timeout)) | Err(_) => Err(EngineError::Timeout(self.timeout)),
                    Ok(Err(e)) => Err(EngineError::Reasoner(e.to_string())),
                }
            }
        }
    }

    /// Number of reasoner calls issued through this client (and its clones)
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn provider_name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl Reasoner for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _prompt: &str, _system: &str, _t: f32) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl Reasoner for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _prompt: &str, _system: &str, _t: f32) -> Result<String> {
            Err(LLMError::RateLimitExceeded)
        }
    }

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content, "Hello");
        assert_eq!(Message::system("s").role.to_string(), "system");
    }

    #[tokio::test]
    async fn test_deadline_maps_to_timeout() {
        let client = ReasonerClient::new(Arc::new(Slow), Duration::from_millis(20), 0.0);
        let err = client
            .ask("p", "s", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(d) if d == Duration::from_millis(20)));
        assert_eq!(err.to_string(), "Operation timed out after 20ms");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_short_circuits() {
        let client = ReasonerClient::new(Arc::new(Slow), Duration::from_secs(60), 0.0);
        let token = CancellationToken::new();
        let child = token.child_token();
        token.cancel();
        let err = client.ask("p", "s", &child).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_error_mapping() {
        let client = ReasonerClient::new(Arc::new(Failing), Duration::from_secs(1), 0.0);
        let err = client
            .ask("p", "s", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Reasoner(msg) if msg.contains("Rate limit")));
    }
}
