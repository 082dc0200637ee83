//! Gemini backend
//!
//! Calls the `generateContent` REST endpoint. All prompt fragments are sent as
//! the parts of a single user turn, and the completion is the concatenated
//! text of the first candidate.

use super::{CompletionBackend, GatewayError};
use crate::config::GatewayConfig;
use async_trait::async_trait;

#[derive(Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

/// Request body with one user turn made of the given fragments.
pub fn request_body(parts: &[String]) -> serde_json::Value {
    let parts: Vec<serde_json::Value> = parts
        .iter()
        .map(|text| serde_json::json!({ "text": text }))
        .collect();

    serde_json::json!({
        "contents": [
            { "role": "user", "parts": parts }
        ]
    })
}

/// Text of the first candidate. A response without candidates (for example a
/// blocked prompt) yields an empty string.
pub fn extract_text(response_json: &serde_json::Value) -> Result<String, GatewayError> {
    if let Some(error) = response_json.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        let status = error.get("code").and_then(|c| c.as_u64()).unwrap_or(0) as u16;
        return Err(GatewayError::Api { status, message });
    }

    let Some(candidate) = response_json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
    else {
        return Ok(String::new());
    };

    let text = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok(text)
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, parts: &[String]) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(&request_body(parts))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("Gemini API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| {
                GatewayError::InvalidResponse(format!("Failed to parse Gemini response: {}", e))
            })?;

        extract_text(&response_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_keeps_fragment_order() {
        let body = request_body(&["first".to_string(), "second".to_string()]);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "first");
        assert_eq!(body["contents"][0]["parts"][1]["text"], "second");
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response = serde_json::json!({
            "candidates": [
                { "content": { "parts": [ { "text": "import pandas" }, { "text": " as pd" } ] } },
                { "content": { "parts": [ { "text": "ignored" } ] } }
            ]
        });
        assert_eq!(extract_text(&response).unwrap(), "import pandas as pd");
    }

    #[test]
    fn test_extract_text_without_candidates_is_empty() {
        let response = serde_json::json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert_eq!(extract_text(&response).unwrap(), "");
    }

    #[test]
    fn test_extract_text_reports_api_error() {
        let response = serde_json::json!({
            "error": { "code": 400, "message": "API key not valid. Please pass a valid API key." }
        });
        let err = extract_text(&response).unwrap_err();
        assert!(matches!(err, GatewayError::Api { status: 400, .. }));
    }

    #[test]
    fn test_endpoint() {
        let config = GatewayConfig::new("k").with_base_url("http://localhost:9000/v1beta/");
        let backend = GeminiBackend::new(&config);
        assert_eq!(
            backend.endpoint(),
            "http://localhost:9000/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }
}
