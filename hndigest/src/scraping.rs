use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DigestError, Result};

/// Turns an article URL into readable plain text.
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<String>;
}

const CONTENT_SELECTORS: &[&str] = &["article", "main", ".post-content", ".entry-content", "#content"];

/// Pages declaring more than this are refused; undeclared bodies are cut off here.
pub const DEFAULT_MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;

/// Fetches the page and pulls the main content out with CSS heuristics.
pub struct HtmlExtractor {
    client: Client,
    max_page_bytes: usize,
}

impl HtmlExtractor {
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            max_page_bytes: DEFAULT_MAX_PAGE_BYTES,
        })
    }

    pub fn with_max_page_bytes(mut self, max_page_bytes: usize) -> Self {
        self.max_page_bytes = max_page_bytes.max(1);
        self
    }

    async fn read_capped(&self, mut response: reqwest::Response, url: &str) -> Result<String> {
        if let Some(len) = response.content_length() {
            if len > self.max_page_bytes as u64 {
                return Err(DigestError::Parse(format!(
                    "{} is too large ({} bytes, limit {})",
                    url, len, self.max_page_bytes
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let room = self.max_page_bytes - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                debug!("scraping: truncated {} at {} bytes", url, self.max_page_bytes);
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait::async_trait]
impl Extractor for HtmlExtractor {
    async fn extract(&self, url: &str) -> Result<String> {
        let parsed = url::Url::parse(url)
            .map_err(|e| DigestError::Parse(format!("bad article URL {}: {}", url, e)))?;

        let response = self.client.get(parsed).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::Unavailable(format!(
                "article fetch failed with status: {}",
                status
            )));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(true);
        if !is_html {
            return Err(DigestError::Parse(format!("{} is not an HTML page", url)));
        }

        let html = self.read_capped(response, url).await?;
        let extracted = tokio::task::spawn_blocking(move || extract_main_text(&html))
            .await
            .map_err(|e| DigestError::Parse(format!("extraction task failed: {}", e)))?;
        match extracted {
            Some(text) => {
                info!("scraping: extracted {} chars from {}", text.len(), url);
                Ok(text)
            }
            None => Err(DigestError::Parse(format!("could not extract content for {}", url))),
        }
    }
}

/// Heuristic main-content extraction: first matching content container, else all `<p>`.
pub fn extract_main_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    for selector_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            if let Some(text) = html_to_text(&element.html()) {
                debug!("scraping: found content using selector '{}'", selector_str);
                return Some(text);
            }
        }
    }

    // Fallback: just get all paragraphs
    let p_selector = Selector::parse("p").ok()?;
    let mut full_html = String::new();
    for element in document.select(&p_selector) {
        full_html.push_str(&element.html());
        full_html.push('\n');
    }
    html_to_text(&full_html)
}

fn html_to_text(html: &str) -> Option<String> {
    let text = html2text::from_read(html.as_bytes(), 80).ok()?;
    let cleaned = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
