use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::llm::summarizer::Summarizer;
use crate::model::{CandidateItem, EnrichedArticle};
use crate::scraping::Extractor;
use crate::shutdown::Shutdown;

pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of enriching one batch of candidates.
#[derive(Debug, Default)]
pub struct Enriched {
    pub articles: Vec<EnrichedArticle>,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Per-candidate fetch, extract and summarize.
///
/// Extraction problems degrade to the title as content; summarizer problems drop the
/// candidate. Nothing is persisted here.
pub struct ContentPipeline {
    extractor: Arc<dyn Extractor>,
    summarizer: Arc<dyn Summarizer>,
    clock: Arc<dyn Clock>,
    extract_timeout: Duration,
}

impl ContentPipeline {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        summarizer: Arc<dyn Summarizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            extractor,
            summarizer,
            clock,
            extract_timeout: DEFAULT_EXTRACT_TIMEOUT,
        }
    }

    pub fn with_extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }

    pub async fn enrich(&self, item: CandidateItem) -> Option<EnrichedArticle> {
        let extracted = match item.url.as_deref() {
            Some(url) => self.extract_content(item.id, url).await,
            None => None,
        };
        let content = extracted.unwrap_or_else(|| item.title.clone());

        let summarized = self.summarizer.summarize(&item.title, &content).await;
        match summarized {
            Ok(summary) => Some(EnrichedArticle {
                summary: summary.summary.trim().to_string(),
                tags: normalize_tags(summary.tags),
                fetched_at: self.clock.now(),
                item,
            }),
            Err(e) => {
                warn!(article_id = item.id, error = %e, "processing: summarizer failed, skipping candidate");
                None
            }
        }
    }

    async fn extract_content(&self, article_id: i64, url: &str) -> Option<String> {
        match tokio::time::timeout(self.extract_timeout, self.extractor.extract(url)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
            Ok(Ok(_)) => {
                debug!(article_id, "processing: extractor returned no text, using title");
                None
            }
            Ok(Err(e)) => {
                warn!(article_id, error = %e, "processing: extraction failed, using title");
                None
            }
            Err(_) => {
                warn!(article_id, "processing: extraction timed out, using title");
                None
            }
        }
    }

    /// Enrich with at most `concurrency` candidates in flight, in input order.
    /// Stops as soon as `shutdown` fires; whatever finished before that is kept.
    pub async fn enrich_all(
        &self,
        candidates: Vec<CandidateItem>,
        concurrency: usize,
        shutdown: &Shutdown,
    ) -> Enriched {
        let mut result = Enriched::default();
        if shutdown.is_triggered() {
            result.cancelled = true;
            return result;
        }

        let total = candidates.len();
        let stream = stream::iter(candidates)
            .map(|item| self.enrich(item))
            .buffered(concurrency.max(1));
        tokio::pin!(stream);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    info!("processing: shutdown requested, abandoning in-flight candidates");
                    result.cancelled = true;
                    break;
                }
                next = stream.next() => match next {
                    Some(Some(article)) => result.articles.push(article),
                    Some(None) => result.skipped += 1,
                    None => break,
                },
            }
        }

        info!(
            "processing: enriched {}/{} candidates ({} skipped)",
            result.articles.len(),
            total,
            result.skipped
        );
        result
    }
}

/// Trim, lowercase, drop empties and duplicates.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
