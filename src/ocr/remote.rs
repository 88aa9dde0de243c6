//! HTTP OCR provider client.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{OcrError, OcrOutcome, OcrProvider, Result, TokenUsage};

/// Configuration for the remote OCR endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrProviderConfig {
    /// Provider endpoint base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// API key sent as a bearer token, if required.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model to request.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature forwarded to the model.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Request timeout in seconds. OCR on large scans is slow.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://localhost:8070".to_string()
}
fn default_model() -> String {
    "ocr-standard-v1".to_string()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_timeout_secs() -> u64 {
    300
}

impl Default for OcrProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// OCR provider speaking a JSON convert API.
pub struct HttpOcrProvider {
    config: OcrProviderConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ConvertRequest<'a> {
    model: &'a str,
    file_name: &'a str,
    mime_type: &'a str,
    /// Document bytes, base64-encoded.
    content: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    pages: Vec<PageResult>,
    model: String,
    usage: UsageResult,
}

#[derive(Debug, Deserialize)]
struct PageResult {
    markdown: String,
}

#[derive(Debug, Deserialize)]
struct UsageResult {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

impl HttpOcrProvider {
    pub fn new(config: OcrProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    pub fn config(&self) -> &OcrProviderConfig {
        &self.config
    }

    /// Check if the provider endpoint answers.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.config.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl OcrProvider for HttpOcrProvider {
    async fn convert(&self, data: &[u8], mime: &str, file_name: &str) -> Result<OcrOutcome> {
        let request = ConvertRequest {
            model: &self.config.model,
            file_name,
            mime_type: mime,
            content: base64::engine::general_purpose::STANDARD.encode(data),
            temperature: self.config.temperature,
        };

        debug!(file_name, mime, bytes = data.len(), "submitting OCR request");

        let url = format!("{}/v1/convert", self.config.endpoint);
        let mut req = self.client.post(&url).json(&request);
        if let Some(ref key) = self.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| OcrError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(OcrError::Api(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ConvertResponse = resp
            .json()
            .await
            .map_err(|e| OcrError::Parse(e.to_string()))?;

        if parsed.pages.is_empty() {
            return Err(OcrError::Parse("provider returned no pages".to_string()));
        }

        Ok(OcrOutcome {
            pages: parsed.pages.into_iter().map(|p| p.markdown).collect(),
            model: parsed.model,
            tokens: TokenUsage {
                prompt_tokens: parsed.usage.prompt_tokens,
                completion_tokens: parsed.usage.completion_tokens,
                total_tokens: parsed.usage.total_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OcrProviderConfig::default();
        assert!(config.endpoint.starts_with("http"));
        assert_eq!(config.temperature, 0.0);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_response_shape_parses() {
        let raw = r##"{
            "pages": [{"markdown": "# One"}, {"markdown": "# Two"}],
            "model": "ocr-standard-v1",
            "usage": {"prompt_tokens": 900, "completion_tokens": 150, "total_tokens": 1050}
        }"##;
        let parsed: ConvertResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.pages.len(), 2);
        assert_eq!(parsed.usage.total_tokens, 1050);
    }
}
