use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A raw feed item before enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: i64,
    pub title: String,
    pub url: Option<String>,
    /// Upvote count at fetch time
    pub popularity: u32,
    pub discussion_count: u32,
}

/// A candidate after extraction and summarization.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedArticle {
    pub item: CandidateItem,
    pub summary: String,
    pub tags: BTreeSet<String>,
    pub fetched_at: DateTime<Utc>,
}

impl EnrichedArticle {
    pub fn id(&self) -> i64 {
        self.item.id
    }
}

/// Opaque identifier the transport assigns to a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryHandle(pub String);

impl DeliveryHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for DeliveryHandle {
    fn from(message_id: i64) -> Self {
        DeliveryHandle(message_id.to_string())
    }
}

/// Row of the `articles` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArticle {
    pub id: i64,
    pub title: String,
    pub url: Option<String>,
    pub summary: String,
    pub tags: BTreeSet<String>,
    pub popularity: u32,
    pub fetched_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivery_handle: Option<DeliveryHandle>,
}

impl From<&EnrichedArticle> for StoredArticle {
    fn from(article: &EnrichedArticle) -> Self {
        Self {
            id: article.item.id,
            title: article.item.title.clone(),
            url: article.item.url.clone(),
            summary: article.summary.clone(),
            tags: article.tags.clone(),
            popularity: article.item.popularity,
            fetched_at: article.fetched_at,
            sent_at: None,
            delivery_handle: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagWeight {
    pub tag: String,
    pub weight: f64,
    pub occurrences: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub articles_sent: i64,
    pub likes: i64,
    pub tags: i64,
}
