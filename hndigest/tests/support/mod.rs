//! Hand-written fake collaborators and a wired-up orchestrator over an in-memory store.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hndigest::clock::{Clock, ManualClock};
use hndigest::delivery::Transport;
use hndigest::digest::{DigestOrchestrator, RunOptions};
use hndigest::error::{DigestError, Result};
use hndigest::ingestion::FeedSource;
use hndigest::llm::summarizer::{ArticleSummary, Summarizer};
use hndigest::model::{CandidateItem, DeliveryHandle};
use hndigest::processing::ContentPipeline;
use hndigest::scraping::Extractor;
use hndigest::settings::{RuntimeSettings, SettingsService};
use hndigest::storage::PreferenceStore;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}

pub fn item(id: i64, title: &str, popularity: u32) -> CandidateItem {
    CandidateItem {
        id,
        title: title.to_string(),
        url: Some(format!("https://example.com/{}", id)),
        popularity,
        discussion_count: popularity / 2,
    }
}

pub async fn memory_store(clock: Arc<dyn Clock>) -> PreferenceStore {
    PreferenceStore::open_in_memory(clock).await.unwrap()
}

/// Set a weight directly, bypassing boost arithmetic.
pub async fn set_weight(store: &PreferenceStore, tag: &str, weight: f64) {
    sqlx::query("INSERT OR REPLACE INTO tag_weights (tag, weight, occurrences) VALUES (?, ?, 0)")
        .bind(tag)
        .bind(weight)
        .execute(store.pool())
        .await
        .unwrap();
}

#[derive(Default)]
pub struct FakeFeed {
    items: Mutex<Vec<CandidateItem>>,
    failing: Mutex<bool>,
    delay: Mutex<Duration>,
    pub requested_limits: Mutex<Vec<usize>>,
}

impl FakeFeed {
    pub fn set_items(&self, items: Vec<CandidateItem>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait::async_trait]
impl FeedSource for FakeFeed {
    async fn top_candidates(&self, limit: usize) -> Result<Vec<CandidateItem>> {
        self.requested_limits.lock().unwrap().push(limit);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.failing.lock().unwrap() {
            return Err(DigestError::Unavailable("feed is down".to_string()));
        }
        Ok(self.items.lock().unwrap().iter().take(limit).cloned().collect())
    }

    async fn fetch_detail(&self, id: i64) -> Result<CandidateItem> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| DigestError::NotFound(format!("item {}", id)))
    }
}

#[derive(Default)]
pub struct FakeExtractor {
    failing_urls: Mutex<HashSet<String>>,
}

impl FakeExtractor {
    pub fn fail_for(&self, url: &str) {
        self.failing_urls.lock().unwrap().insert(url.to_string());
    }
}

#[async_trait::async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, url: &str) -> Result<String> {
        if self.failing_urls.lock().unwrap().contains(url) {
            return Err(DigestError::Unavailable(format!("cannot fetch {}", url)));
        }
        Ok(format!("full text of {}", url))
    }
}

/// Tags per title; records every `(title, content)` it sees.
#[derive(Default)]
pub struct FakeSummarizer {
    tags: Mutex<HashMap<String, Vec<String>>>,
    failing_titles: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    pub seen: Mutex<Vec<(String, String)>>,
}

impl FakeSummarizer {
    pub fn tag(&self, title: &str, tags: &[&str]) {
        self.tags
            .lock()
            .unwrap()
            .insert(title.to_string(), tags.iter().map(|t| t.to_string()).collect());
    }

    pub fn fail_for(&self, title: &str) {
        self.failing_titles.lock().unwrap().insert(title.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn content_seen_for(&self, title: &str) -> Option<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| t == title)
            .map(|(_, c)| c.clone())
    }
}

#[async_trait::async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, title: &str, content: &str) -> Result<ArticleSummary> {
        self.seen
            .lock()
            .unwrap()
            .push((title.to_string(), content.to_string()));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_titles.lock().unwrap().contains(title) {
            return Err(DigestError::InvalidResponse("not JSON".to_string()));
        }
        let tags = self.tags.lock().unwrap().get(title).cloned().unwrap_or_default();
        Ok(ArticleSummary {
            summary: format!("Summary of {}", title),
            tags,
        })
    }
}

/// Records deliveries and hands out increasing message ids starting at 1000.
pub struct RecordingTransport {
    next_id: AtomicI64,
    failing_marker: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(1000),
            failing_marker: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingTransport {
    /// Fail every delivery whose text contains `marker`.
    pub fn fail_when_contains(&self, marker: &str) {
        *self.failing_marker.lock().unwrap() = Some(marker.to_string());
    }

    /// Hold every delivery for `delay` before it is recorded.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, recipient: &str, rendered: &str) -> Result<DeliveryHandle> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(marker) = self.failing_marker.lock().unwrap().as_deref() {
            if rendered.contains(marker) {
                return Err(DigestError::Unavailable("send failed".to_string()));
            }
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), rendered.to_string()));
        Ok(DeliveryHandle::from(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }
}

pub const RECIPIENT: &str = "4242";

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: PreferenceStore,
    pub settings: Arc<SettingsService>,
    pub feed: Arc<FakeFeed>,
    pub extractor: Arc<FakeExtractor>,
    pub summarizer: Arc<FakeSummarizer>,
    pub transport: Arc<RecordingTransport>,
    pub orchestrator: Arc<DigestOrchestrator>,
}

impl Harness {
    pub async fn new(items_per_run: usize, recipient: Option<&str>) -> Self {
        Self::with_options(
            items_per_run,
            recipient,
            RunOptions {
                decay_on_run: false,
                ..RunOptions::default()
            },
        )
        .await
    }

    pub async fn with_options(items_per_run: usize, recipient: Option<&str>, options: RunOptions) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let store = memory_store(clock.clone()).await;
        let settings = Arc::new(
            SettingsService::load(
                store.clone(),
                RuntimeSettings {
                    recipient: recipient.map(str::to_string),
                    digest_time: chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    items_per_run,
                },
            )
            .await
            .unwrap(),
        );
        let feed = Arc::new(FakeFeed::default());
        let extractor = Arc::new(FakeExtractor::default());
        let summarizer = Arc::new(FakeSummarizer::default());
        let transport = Arc::new(RecordingTransport::default());

        let pipeline = ContentPipeline::new(extractor.clone(), summarizer.clone(), clock.clone());
        let orchestrator = Arc::new(DigestOrchestrator::new(
            store.clone(),
            settings.clone(),
            feed.clone(),
            pipeline,
            transport.clone(),
            clock.clone(),
            options,
        ));

        Self {
            clock,
            store,
            settings,
            feed,
            extractor,
            summarizer,
            transport,
            orchestrator,
        }
    }
}
