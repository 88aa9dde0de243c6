//! OCR provider collaborator.
//!
//! The worker hands over raw bytes and gets back per-page Markdown plus
//! token usage. A provider either returns a full result or fails; partial
//! results are not tolerated.

mod remote;

pub use remote::{HttpOcrProvider, OcrProviderConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR connection error: {0}")]
    Connection(String),
    #[error("OCR API error: {0}")]
    Api(String),
    #[error("OCR response parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, OcrError>;

/// Token usage reported by the provider for one conversion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A complete conversion result.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    /// Markdown content, one entry per extracted page.
    pub pages: Vec<String>,
    /// Model that produced the result.
    pub model: String,
    pub tokens: TokenUsage,
}

impl OcrOutcome {
    /// Join pages into a single Markdown document.
    pub fn markdown(&self) -> String {
        self.pages.join("\n\n")
    }
}

/// Contract for OCR invocation, consumed by convert workers.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn convert(&self, data: &[u8], mime: &str, file_name: &str) -> Result<OcrOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_joins_pages() {
        let outcome = OcrOutcome {
            pages: vec!["# Page 1".into(), "# Page 2".into()],
            model: "test".into(),
            tokens: TokenUsage::default(),
        };
        assert_eq!(outcome.markdown(), "# Page 1\n\n# Page 2");
    }
}
