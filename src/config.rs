//! Configuration
//!
//! Gateway settings come from the environment (optionally seeded from a `.env`
//! file by the binary). Pipeline task parameters are per call and live with
//! each pipeline.

use crate::error::{AutoprocessError, Result};
use serde::{Deserialize, Serialize};

/// Model used by every pipeline unless the caller picks one (skew correction only).
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Public Gemini REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Refinement rounds allowed when the caller does not say otherwise.
pub const DEFAULT_MAX_ITERATIONS: usize = 3;

/// Whole rows included in a dataset profile.
pub const DEFAULT_SAMPLE_SIZE: usize = 2;

/// Seed for every random draw made while profiling.
pub const SAMPLE_SEED: u64 = 42;

pub const EXAMPLE_VALUE_LIMIT: usize = 5;
pub const TOP_VALUE_LIMIT: usize = 3;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const MODEL_ENV: &str = "GEMINI_MODEL";
pub const BASE_URL_ENV: &str = "GEMINI_BASE_URL";

/// Connection settings for the text-completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl GatewayConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: default_model(),
            base_url: default_base_url(),
        }
    }

    /// Read `GEMINI_API_KEY`, `GEMINI_MODEL` and `GEMINI_BASE_URL`.
    ///
    /// An explicit key wins over the environment.
    pub fn from_env(api_key: Option<String>) -> Result<Self> {
        let api_key = api_key
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AutoprocessError::Config(format!(
                    "no API key given and {} is not set",
                    API_KEY_ENV
                ))
            })?;

        Ok(Self {
            api_key,
            model: std::env::var(MODEL_ENV).unwrap_or_else(|_| default_model()),
            base_url: std::env::var(BASE_URL_ENV).unwrap_or_else(|_| default_base_url()),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_key_wins() {
        let config = GatewayConfig::from_env(Some("explicit-key".to_string())).unwrap();
        assert_eq!(config.api_key, "explicit-key");
        assert!(!config.model.is_empty());
    }

    #[test]
    fn test_blank_key_rejected() {
        let err = GatewayConfig::from_env(Some("   ".to_string())).unwrap_err();
        assert!(matches!(err, AutoprocessError::Config(_)));
    }

    #[test]
    fn test_new_uses_defaults() {
        let config = GatewayConfig::new("k");
        assert_eq!(config.api_key, "k");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_builders() {
        let config = GatewayConfig::new("k")
            .with_model("gemini-1.5-pro")
            .with_base_url("http://localhost:8080");
        assert_eq!(config.model, "gemini-1.5-pro");
        assert_eq!(config.base_url, "http://localhost:8080");
    }
}
