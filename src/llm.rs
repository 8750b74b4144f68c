//! Completion client: the text-completion backend the orchestrator calls
//!
//! Defines the client trait, call options and error kinds. Two
//! implementations live here:
//! - any backend adapter supplied by the embedding application
//! - `MockClient`: returns scripted responses (testing)
//!
//! Timeouts are a distinct error kind: they are retryable, while a
//! response that cannot be parsed or validated is not.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Per-call options passed to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Caller-supplied deadline; enforced by the orchestrator
    pub timeout: Option<Duration>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 4096,
            timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// Errors from completion calls.
///
/// Serializable so a batch result can be cached alongside its slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CompletionError {
    #[error("completion backend unavailable: {0}")]
    Unavailable(String),
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("completion failed: {0}")]
    Failed(String),
}

impl CompletionError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Failed(_))
    }
}

/// Client trait for the text-completion backend.
///
/// Abstracts over transport so the orchestrator does not depend on how
/// the model is reached.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError>;
}

type Handler = dyn Fn(&str, &str) -> Result<String, CompletionError> + Send + Sync;

/// Mock client for testing; returns scripted responses.
///
/// Queued responses are served first, in order; once the queue is empty
/// the handler (if any) answers, otherwise the call fails as unavailable.
pub struct MockClient {
    queue: Mutex<VecDeque<Result<String, CompletionError>>>,
    handler: Option<Arc<Handler>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, String)>>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            handler: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response.
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.lock_queue().push_back(Ok(text.into()));
        self
    }

    /// Queue a failure.
    pub fn with_failure(self, error: CompletionError) -> Self {
        self.lock_queue().push_back(Err(error));
        self
    }

    /// Answer calls with `handler` once the queue is drained.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String, CompletionError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// A client whose every call fails as unavailable.
    pub fn unavailable() -> Self {
        Self::new().with_handler(|_, _| {
            Err(CompletionError::Unavailable(
                "mock client configured as unavailable".to_string(),
            ))
        })
    }

    /// `(system, user)` prompts received so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, CompletionError>>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CompletionClient for MockClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((system_prompt.to_string(), user_prompt.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(queued) = self.lock_queue().pop_front() {
            return queued;
        }
        match &self.handler {
            Some(handler) => handler(system_prompt, user_prompt),
            None => Err(CompletionError::Unavailable(
                "no scripted response left".to_string(),
            )),
        }
    }
}
