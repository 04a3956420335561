use crate::prompt;
use crate::SqlGenerator;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` client.
///
/// Temperature is pinned to zero so repeated questions translate deterministically.
#[derive(Clone)]
pub struct GeminiClient {
    endpoint: String,
    model: String,
    api_key: String,
    max_limit: u64,
    http: reqwest::Client,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("max_limit", &self.max_limit)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, max_limit: u64) -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, api_key, model, max_limit)
    }

    /// Endpoint override, for tests and proxies.
    pub fn with_endpoint(
        endpoint: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_limit: u64,
    ) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            max_limit,
            http: reqwest::Client::new(),
        }
    }

    async fn generate_content(&self, prompt_text: String) -> anyhow::Result<String> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt_text }],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("POST generateContent")?;
        let resp = resp
            .error_for_status()
            .context("generateContent status")?;
        let decoded: GenerateContentResponse = resp
            .json()
            .await
            .context("decode generateContent response")?;

        let text = decoded
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .context("model returned no candidates")?;

        let text = text.trim();
        if text.is_empty() {
            anyhow::bail!("model returned empty output");
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl SqlGenerator for GeminiClient {
    async fn generate_sql(&self, question: &str) -> anyhow::Result<String> {
        self.generate_content(prompt::sql_prompt(question, self.max_limit))
            .await
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::{GenerateContentRequest, GenerateContentResponse, GeminiClient};

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let client = GeminiClient::with_endpoint("http://localhost:9999/", "k", "m", 200);
        assert_eq!(client.endpoint, "http://localhost:9999");
    }

    #[test]
    fn request_serializes_camel_case() {
        let body = GenerateContentRequest {
            contents: vec![super::Content {
                parts: vec![super::Part {
                    text: "hi".to_string(),
                }],
            }],
            generation_config: super::GenerationConfig { temperature: 0.0 },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["generationConfig"]["temperature"], 0.0);
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn response_text_is_reachable() {
        let raw = r#"{
            "candidates": [
                {
                    "content": {
                        "role": "model",
                        "parts": [{"text": "SELECT 1"}]
                    },
                    "finishReason": "STOP"
                }
            ]
        }"#;
        let decoded: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let text = decoded
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text);
        assert_eq!(text.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn empty_response_yields_no_candidates() {
        let decoded: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(decoded.candidates.is_empty());
    }
}
