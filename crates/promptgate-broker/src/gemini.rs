//! Gemini - generative text API wire client
//!
//! Implements the `generateContent` protocol over reqwest and classifies
//! every attempt into a closed [`ProviderOutcome`] so the orchestrator can
//! branch without inspecting HTTP details. The [`TextProvider`] trait is
//! the seam tests mock.

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::util::mask_api_key;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Longest provider error message surfaced to callers
const MAX_ERROR_LEN: usize = 200;

// ============================================================================
// Provider seam
// ============================================================================

/// Classified result of one provider attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    /// HTTP 200 with generated text extracted
    Success(String),
    /// HTTP 429; `retry_hint` is the provider-suggested delay in seconds
    Throttled {
        /// Parsed `retryDelay` hint, when the error body carried one
        retry_hint: Option<f64>,
    },
    /// Any other non-2xx status; not retryable
    Failed {
        /// HTTP status code
        status: u16,
        /// Sanitized error message
        message: String,
    },
    /// No usable HTTP response (connect error, timeout, garbled body)
    Transport(String),
}

/// One prompt-completion attempt against the provider.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Issue a single generation request using `api_key`.
    async fn generate(
        &self,
        api_key: &str,
        prompt: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> ProviderOutcome;
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    /// Error details array (may contain retryDelay for 429 responses)
    #[serde(default)]
    details: Option<Vec<serde_json::Value>>,
}

// ============================================================================
// Body parsing
// ============================================================================

/// Parse the `retryDelay` hint from a 429 error body.
///
/// The hint arrives inside `error.details[]` as decimal seconds suffixed
/// with `s`, e.g. `"1.23s"`.
fn parse_retry_hint(body: &str) -> Option<f64> {
    let parsed: ApiError = serde_json::from_str(body).ok()?;
    for detail in parsed.error.details? {
        if let Some(delay) = detail.get("retryDelay").and_then(|v| v.as_str()) {
            if let Some(secs) = delay.strip_suffix('s').and_then(|s| s.parse::<f64>().ok()) {
                return Some(secs);
            }
        }
    }
    None
}

/// Generated text from a success body, or `None` when the shape is off.
fn extract_text(body: &str) -> Option<String> {
    let parsed: GenerateResponse = serde_json::from_str(body).ok()?;
    let candidate = parsed.candidates.into_iter().next()?;
    let part = candidate.content.parts.into_iter().next()?;
    if part.text.is_empty() {
        None
    } else {
        Some(part.text)
    }
}

/// Error message for a hard failure, truncated and without raw body spill.
fn provider_error_message(body: &str, status: u16) -> String {
    let message = match serde_json::from_str::<ApiError>(body) {
        Ok(parsed) if parsed.error.status.is_empty() => parsed.error.message,
        Ok(parsed) => format!("{}: {}", parsed.error.status, parsed.error.message),
        Err(_) => format!("HTTP {}", status),
    };
    if message.chars().count() > MAX_ERROR_LEN {
        let truncated: String = message.chars().take(MAX_ERROR_LEN).collect();
        format!("{}...(truncated)", truncated)
    } else {
        message
    }
}

// ============================================================================
// Client
// ============================================================================

/// Gemini `generateContent` client.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
}

impl GeminiClient {
    /// Create a client from the broker configuration.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TextProvider for GeminiClient {
    async fn generate(
        &self,
        api_key: &str,
        prompt: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> ProviderOutcome {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, api_key
        );
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens,
            },
        };

        debug!(
            model = %self.model,
            key = %mask_api_key(api_key),
            "sending generation request"
        );

        let response = match self.client.post(&url).json(&request).send().await {
            Ok(resp) => resp,
            // reqwest errors can echo the URL, which carries the key
            Err(e) => return ProviderOutcome::Transport(e.without_url().to_string()),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return ProviderOutcome::Transport(e.without_url().to_string()),
        };

        if status.as_u16() == 429 {
            let retry_hint = parse_retry_hint(&body);
            warn!(model = %self.model, hint_secs = ?retry_hint, "provider throttled request");
            return ProviderOutcome::Throttled { retry_hint };
        }

        if !status.is_success() {
            warn!(status = %status, "provider rejected request");
            return ProviderOutcome::Failed {
                status: status.as_u16(),
                message: provider_error_message(&body, status.as_u16()),
            };
        }

        match extract_text(&body) {
            Some(text) => ProviderOutcome::Success(text),
            None => ProviderOutcome::Transport("malformed success body".to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: "hi".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.5,
                max_output_tokens: 1000,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "contents": [{"parts": [{"text": "hi"}]}],
                "generationConfig": {"temperature": 0.5, "maxOutputTokens": 1000}
            })
        );
    }

    #[test]
    fn test_extract_text() {
        let body = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "generated answer"}]}}
            ]
        }"#;
        assert_eq!(extract_text(body).as_deref(), Some("generated answer"));
    }

    #[test]
    fn test_extract_text_empty_candidates() {
        assert_eq!(extract_text(r#"{"candidates": []}"#), None);
        assert_eq!(extract_text(r#"{}"#), None);
        assert_eq!(extract_text("not json"), None);
    }

    #[test]
    fn test_parse_retry_hint() {
        let body = r#"{
            "error": {
                "code": 429,
                "message": "Resource has been exhausted",
                "status": "RESOURCE_EXHAUSTED",
                "details": [
                    {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "1.23s"}
                ]
            }
        }"#;
        assert_eq!(parse_retry_hint(body), Some(1.23));
    }

    #[test]
    fn test_parse_retry_hint_absent() {
        let body = r#"{"error": {"code": 429, "message": "slow down", "status": "RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(parse_retry_hint(body), None);
        assert_eq!(parse_retry_hint("garbage"), None);
    }

    #[test]
    fn test_parse_retry_hint_whole_seconds() {
        let body = r#"{"error": {"details": [{"retryDelay": "15s"}]}}"#;
        assert_eq!(parse_retry_hint(body), Some(15.0));
    }

    #[test]
    fn test_provider_error_message_from_body() {
        let body = r#"{"error": {"message": "API key not valid", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(
            provider_error_message(body, 400),
            "INVALID_ARGUMENT: API key not valid"
        );
    }

    #[test]
    fn test_provider_error_message_unparseable_body() {
        assert_eq!(provider_error_message("<html>nope</html>", 502), "HTTP 502");
    }

    #[test]
    fn test_provider_error_message_truncates() {
        let body = format!(
            r#"{{"error": {{"message": "{}", "status": "INTERNAL"}}}}"#,
            "x".repeat(500)
        );
        let message = provider_error_message(&body, 500);
        assert!(message.len() < 250);
        assert!(message.ends_with("...(truncated)"));
    }
}
