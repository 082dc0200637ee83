use crate::gateway::GatewayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutoprocessError {
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Failed to generate strategy: {0}")]
    StrategyGenerationFailed(#[source] GatewayError),

    #[error("Failed to generate code: {0}")]
    CodeGenerationFailed(#[source] GatewayError),

    #[error("Failed to validate the generated code: {0}")]
    ValidationCallFailed(#[source] GatewayError),

    #[error("Failed to refine the code after feedback: {0}")]
    RefinementCallFailed(#[source] GatewayError),

    #[error("Pipeline failed: {0}")]
    PipelineFailed(String),

    #[error("Profiling error: {0}")]
    Profiling(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for AutoprocessError {
    fn from(err: polars::error::PolarsError) -> Self {
        AutoprocessError::Polars(err.to_string())
    }
}

impl AutoprocessError {
    /// The gateway failure behind a stage error, if any.
    pub fn gateway_cause(&self) -> Option<&GatewayError> {
        match self {
            AutoprocessError::StrategyGenerationFailed(e)
            | AutoprocessError::CodeGenerationFailed(e)
            | AutoprocessError::ValidationCallFailed(e)
            | AutoprocessError::RefinementCallFailed(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AutoprocessError>;
