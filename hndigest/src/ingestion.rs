use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DigestError, Result};
use crate::model::CandidateItem;

pub const DEFAULT_HN_API_URL: &str = "https://hacker-news.firebaseio.com/v0";

/// Source of candidate items.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    /// Up to `limit` candidates in source order.
    async fn top_candidates(&self, limit: usize) -> Result<Vec<CandidateItem>>;

    async fn fetch_detail(&self, id: i64) -> Result<CandidateItem>;
}

/// Client for the Hacker News Firebase API.
pub struct HackerNewsClient {
    client: Client,
    base_url: String,
    concurrency: usize,
}

impl HackerNewsClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            concurrency: 8,
        })
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.client.get(&url).send().await.map_err(|e| {
            DigestError::Unavailable(format!("network error fetching {}: {}", url, e))
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DigestError::Unavailable(format!("server error: {}", status)));
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(DigestError::Unavailable(format!("rate limited: {}", status)));
        } else if !status.is_success() {
            return Err(DigestError::Unavailable(format!(
                "feed fetch failed with status: {}",
                status
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| DigestError::InvalidResponse(format!("bad JSON from {}: {}", url, e)))
    }
}

#[async_trait::async_trait]
impl FeedSource for HackerNewsClient {
    async fn top_candidates(&self, limit: usize) -> Result<Vec<CandidateItem>> {
        let ids: Vec<i64> = self.get_json("topstories.json").await?;
        info!("ingestion: {} top story ids, fetching up to {}", ids.len(), limit);

        // buffered keeps feed order while fetching in parallel
        let items: Vec<Result<CandidateItem>> = stream::iter(ids.into_iter().take(limit))
            .map(|id| self.fetch_detail(id))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut candidates = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Ok(c) => candidates.push(c),
                Err(DigestError::NotFound(msg)) => debug!("ingestion: skipping {}", msg),
                Err(e) => warn!(error = %e, "ingestion: failed to fetch item"),
            }
        }
        Ok(candidates)
    }

    async fn fetch_detail(&self, id: i64) -> Result<CandidateItem> {
        let item: Option<HnItem> = self.get_json(&format!("item/{}.json", id)).await?;
        let item = item.ok_or_else(|| DigestError::NotFound(format!("item {}", id)))?;
        item.into_candidate()
            .ok_or_else(|| DigestError::NotFound(format!("item {} is not a live story", id)))
    }
}

#[derive(Debug, Deserialize)]
struct HnItem {
    id: i64,
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    url: Option<String>,
    score: Option<u32>,
    descendants: Option<u32>,
    #[serde(default)]
    dead: bool,
    #[serde(default)]
    deleted: bool,
}

impl HnItem {
    fn into_candidate(self) -> Option<CandidateItem> {
        if self.dead || self.deleted || self.kind.as_deref() != Some("story") {
            return None;
        }
        let title = self.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;
        Some(CandidateItem {
            id: self.id,
            title,
            url: self.url.filter(|u| !u.is_empty()),
            popularity: self.score.unwrap_or(0),
            discussion_count: self.descendants.unwrap_or(0),
        })
    }
}
