// Summarizer module
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use super::{extract_json_from_text, LlmProvider, LlmRequest};
use crate::error::{DigestError, Result};

/// Summary text plus the topic tags the ranker scores on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArticleSummary {
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, title: &str, content: &str) -> Result<ArticleSummary>;
}

const DEFAULT_MAX_CONTENT_CHARS: usize = 8000;

/// Summarizer backed by any [`LlmProvider`], asking for strict JSON output.
pub struct LlmSummarizer {
    provider: Arc<dyn LlmProvider>,
    max_tokens: usize,
    max_content_chars: usize,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, max_tokens: usize) -> Self {
        Self {
            provider,
            max_tokens,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
        }
    }

    pub fn with_max_content_chars(mut self, max_content_chars: usize) -> Self {
        self.max_content_chars = max_content_chars;
        self
    }

    fn prompt(&self, title: &str, content: &str) -> String {
        format!(
            r#"You summarize technology news for a daily digest.

INSTRUCTIONS:
1. Write a concise summary of 2-3 sentences covering the key point of the article.
2. Pick 1 to 5 short topic tags (single words or hyphenated, lowercase), e.g. "rust", "databases", "startups".
3. Write in English even if the article is not.

OUTPUT FORMAT (strict JSON, nothing else):
{{
  "summary": "...",
  "tags": ["tag1", "tag2"]
}}

TITLE: {}

ARTICLE:
{}
"#,
            title,
            truncate_chars(content, self.max_content_chars)
        )
    }
}

#[async_trait::async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, title: &str, content: &str) -> Result<ArticleSummary> {
        let request = LlmRequest {
            prompt: self.prompt(title, content),
            max_tokens: Some(self.max_tokens),
            temperature: Some(0.3), // Low temperature keeps the JSON shape stable
            timeout_seconds: None,
        };

        let response = self.provider.generate(request).await?;
        debug!(
            model = %response.model,
            tokens = response.usage.total_tokens,
            "summarizer: LLM responded"
        );
        parse_summary(&response.content)
    }
}

/// Parse the model output, tolerating code fences and chatty preambles.
pub fn parse_summary(text: &str) -> Result<ArticleSummary> {
    let json = extract_json_from_text(text).ok_or_else(|| {
        DigestError::InvalidResponse("no JSON object in summarizer output".to_string())
    })?;

    let parsed: ArticleSummary = serde_json::from_str(&json).map_err(|e| {
        DigestError::InvalidResponse(format!("summarizer JSON did not match schema: {}", e))
    })?;

    if parsed.summary.trim().is_empty() {
        return Err(DigestError::InvalidResponse("summarizer returned an empty summary".to_string()));
    }
    Ok(parsed)
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
