//! Model Gateway
//!
//! Single-call boundary over the text-completion service. A gateway owns one
//! backend (one credential), checks it once on connect, and then answers one
//! completion per call. Failed calls are never retried here; callers decide.
//!
//! ```text
//! pipeline stage → ModelGateway::complete → CompletionBackend
//!                                              → [GeminiBackend, ScriptedBackend]
//! ```

pub mod gemini;
pub mod scripted;

pub use gemini::GeminiBackend;
pub use scripted::ScriptedBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Prompt sent by the liveness check on connect.
pub const LIVENESS_PROMPT: &str = "Test";

/// Why a single completion produced no usable text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("model returned no text")]
    EmptyCompletion,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// What a completion was requested for. Used for logging and the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Liveness,
    Strategy,
    Code,
    Validation,
    Refinement,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKind::Liveness => write!(f, "liveness"),
            CallKind::Strategy => write!(f, "strategy"),
            CallKind::Code => write!(f, "code"),
            CallKind::Validation => write!(f, "validation"),
            CallKind::Refinement => write!(f, "refinement"),
        }
    }
}

/// A text-completion provider.
///
/// `parts` is one logical prompt made of ordered fragments. Implementations
/// return the raw completion text; emptiness is judged by the gateway.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, parts: &[String]) -> Result<String, GatewayError>;
}

/// What a failed liveness check does to pipeline construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialPolicy {
    /// Log "API not valid" and leave the pipeline unusable.
    Report,
    /// Fail construction with `InvalidCredential`.
    Reject,
}

/// One recorded gateway call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub kind: CallKind,
    pub started_at: DateTime<Utc>,
    pub prompt_parts: usize,
    pub prompt_chars: usize,
    pub response_chars: usize,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl Exchange {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Every call a gateway has made, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub model: String,
    pub exchanges: Vec<Exchange>,
}

impl Transcript {
    pub fn count(&self, kind: CallKind) -> usize {
        self.exchanges.iter().filter(|e| e.kind == kind).count()
    }
}

/// Authenticated session with the completion service.
pub struct ModelGateway {
    backend: Arc<dyn CompletionBackend>,
    transcript: Mutex<Transcript>,
}

impl fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelGateway")
            .field("model", &self.backend.model_name())
            .finish()
    }
}

impl ModelGateway {
    /// Wrap a backend and confirm it answers a trivial prompt.
    pub async fn connect(backend: Arc<dyn CompletionBackend>) -> Result<Self, GatewayError> {
        let gateway = Self {
            transcript: Mutex::new(Transcript {
                model: backend.model_name().to_string(),
                exchanges: Vec::new(),
            }),
            backend,
        };

        gateway
            .complete(CallKind::Liveness, &[LIVENESS_PROMPT.to_string()])
            .await?;
        Ok(gateway)
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// One completion attempt. Empty or whitespace-only text is a failure.
    pub async fn complete(&self, kind: CallKind, parts: &[String]) -> Result<String, GatewayError> {
        let prompt_chars: usize = parts.iter().map(|p| p.chars().count()).sum();
        debug!(%kind, parts = parts.len(), prompt_chars, "sending completion request");

        let started_at = Utc::now();
        let clock = Instant::now();
        let result = match self.backend.generate(parts).await {
            Ok(text) if text.trim().is_empty() => Err(GatewayError::EmptyCompletion),
            other => other,
        };
        let latency_ms = clock.elapsed().as_millis() as u64;

        let response_chars = result.as_ref().map(|t| t.chars().count()).unwrap_or(0);
        match &result {
            Ok(_) => debug!(%kind, response_chars, latency_ms, "completion received"),
            Err(e) => warn!(%kind, latency_ms, "completion failed: {}", e),
        }

        self.record(Exchange {
            kind,
            started_at,
            prompt_parts: parts.len(),
            prompt_chars,
            response_chars,
            latency_ms,
            error: result.as_ref().err().map(|e| e.to_string()),
        });

        result
    }

    /// Snapshot of every call made so far.
    pub fn transcript(&self) -> Transcript {
        self.transcript
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, exchange: Exchange) {
        self.transcript
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .exchanges
            .push(exchange);
    }
}
