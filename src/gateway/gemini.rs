use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::GeminiConfig;
use crate::error::GatewayError;
use crate::gateway::TextGenerator;

/// Google Generative Language REST client (`generateContent`).
pub struct GeminiClient {
    client: Client,
    base: String,
    model: String,
    api_key: String,
    temperature: f64,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<PartIn<'a>>,
}

#[derive(Serialize)]
struct PartIn<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartOut>,
}

#[derive(Deserialize, Debug)]
struct PartOut {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

impl GeminiClient {
    pub fn new(cfg: &GeminiConfig, api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(cfg.timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
            temperature: cfg.temperature,
        }
    }

    /// Builds a client when `GEMINI_API_KEY` is configured.
    pub fn from_config(cfg: &GeminiConfig) -> Option<Self> {
        cfg.api_key.clone().map(|key| Self::new(cfg, key))
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base, self.model)
    }
}

/// Maps a non-success response onto the gateway taxonomy.
///
/// Throttling is recognised from the HTTP status or the provider's
/// `RESOURCE_EXHAUSTED` status code, never from message text.
fn classify_failure(status: StatusCode, body: &str) -> GatewayError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let provider_status = envelope.as_ref().map(|e| e.error.status.as_str()).unwrap_or("");
    let message = envelope
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    if status == StatusCode::TOO_MANY_REQUESTS || provider_status == "RESOURCE_EXHAUSTED" {
        GatewayError::Throttled(message)
    } else {
        GatewayError::Provider(message)
    }
}

fn extract_text(resp: GenerateResponse) -> Result<String, GatewayError> {
    resp.candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .find_map(|p| p.text)
        .ok_or_else(|| GatewayError::Provider("response carried no text".to_string()))
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, GatewayError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![PartIn { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        let resp = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Provider(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_failure(status, &text));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Provider(e.to_string()))?;
        extract_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_429_as_throttled() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(err.is_throttled());
    }

    #[test]
    fn test_classify_resource_exhausted_body() {
        let body = r#"{"error":{"code":400,"status":"RESOURCE_EXHAUSTED","message":"quota"}}"#;
        let err = classify_failure(StatusCode::BAD_REQUEST, body);
        assert_eq!(err, GatewayError::Throttled("quota".into()));
    }

    #[test]
    fn test_classify_other_failures_as_provider() {
        let body = r#"{"error":{"code":500,"status":"INTERNAL","message":"429 things went wrong"}}"#;
        let err = classify_failure(StatusCode::INTERNAL_SERVER_ERROR, body);
        assert_eq!(err, GatewayError::Provider("429 things went wrong".into()));
    }

    #[test]
    fn test_extract_text_from_first_candidate() {
        let resp: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"breathe"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(resp).unwrap(), "breathe");
    }

    #[test]
    fn test_extract_text_empty_is_provider_error() {
        let resp: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(extract_text(resp), Err(GatewayError::Provider(_))));
    }

    #[test]
    fn test_endpoint_format() {
        let cfg = GeminiConfig::default();
        let client = GeminiClient::new(&cfg, "k".into());
        assert_eq!(
            client.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }
}
