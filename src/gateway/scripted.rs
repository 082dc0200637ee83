//! Scripted backend
//!
//! Replays a fixed queue of responses and records every prompt it receives.
//! Useful for tests and for dry runs without network access.

use super::{CompletionBackend, GatewayError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

pub struct ScriptedBackend {
    model: String,
    responses: Mutex<VecDeque<Result<String, GatewayError>>>,
    prompts: Mutex<Vec<Vec<String>>>,
}

impl ScriptedBackend {
    /// Responses are served front to back. Once exhausted, every call fails
    /// with a transport error.
    pub fn new(responses: Vec<Result<String, GatewayError>>) -> Self {
        Self {
            model: "scripted".to_string(),
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Convenience for a queue of successful completions.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| Ok(t.into())).collect())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<Vec<String>> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Prompt of the `n`th call, fragments joined with newlines.
    pub fn prompt_text(&self, n: usize) -> Option<String> {
        self.prompts().get(n).map(|parts| parts.join("\n"))
    }

    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, parts: &[String]) -> Result<String, GatewayError> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(parts.to_vec());

        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(GatewayError::Transport("no scripted response left".to_string()))
            })
    }
}
