use chrono::Duration;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::delivery::{render_article, Transport};
use crate::error::Result;
use crate::ingestion::FeedSource;
use crate::model::{DeliveryHandle, EnrichedArticle, StoredArticle};
use crate::processing::ContentPipeline;
use crate::ranking;
use crate::recency;
use crate::settings::SettingsService;
use crate::shutdown::Shutdown;
use crate::storage::PreferenceStore;

/// Where a run currently is; `Idle` between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestState {
    Idle,
    Collecting,
    Filtering,
    Enriching,
    Ranking,
    Delivering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scheduled,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Scheduled => f.write_str("scheduled"),
            Trigger::Manual => f.write_str("manual"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub recency_window: Duration,
    pub max_concurrency: usize,
    /// Decay all weights at the start of every run.
    pub decay_on_run: bool,
    pub decay_rate: f64,
    pub min_weight: f64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            recency_window: recency::default_window(),
            max_concurrency: 4,
            decay_on_run: true,
            decay_rate: 0.02,
            min_weight: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentArticle {
    pub article_id: i64,
    pub handle: DeliveryHandle,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DigestReport {
    pub trigger: Trigger,
    pub candidates: usize,
    pub fresh: usize,
    pub enriched: usize,
    pub skipped: usize,
    pub sent: Vec<SentArticle>,
    pub failed_sends: Vec<i64>,
    /// Sent but the sent-state could not be stored.
    pub unpersisted: Vec<i64>,
    pub cancelled: bool,
}

impl DigestReport {
    fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            candidates: 0,
            fresh: 0,
            enriched: 0,
            skipped: 0,
            sent: Vec::new(),
            failed_sends: Vec::new(),
            unpersisted: Vec::new(),
            cancelled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(DigestReport),
    AlreadyRunning,
    NoRecipient,
}

/// Runs one digest end to end: fetch, drop recently sent, enrich, rank, deliver top N.
///
/// Runs never overlap; a trigger that arrives mid-run gets [`RunOutcome::AlreadyRunning`].
pub struct DigestOrchestrator {
    store: PreferenceStore,
    settings: Arc<SettingsService>,
    feed: Arc<dyn FeedSource>,
    pipeline: ContentPipeline,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    options: RunOptions,
    run_lock: Mutex<()>,
    state: watch::Sender<DigestState>,
}

impl DigestOrchestrator {
    pub fn new(
        store: PreferenceStore,
        settings: Arc<SettingsService>,
        feed: Arc<dyn FeedSource>,
        pipeline: ContentPipeline,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        options: RunOptions,
    ) -> Self {
        let (state, _rx) = watch::channel(DigestState::Idle);
        Self {
            store,
            settings,
            feed,
            pipeline,
            transport,
            clock,
            options,
            run_lock: Mutex::new(()),
            state,
        }
    }

    pub fn state(&self) -> DigestState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DigestState> {
        self.state.subscribe()
    }

    /// Resolves once no run is in flight. A run that is delivering finishes (or stops
    /// at its next item on shutdown) and records what it sent before this returns.
    pub async fn wait_idle(&self) {
        let _idle = self.run_lock.lock().await;
    }

    pub async fn run(&self, trigger: Trigger, shutdown: &Shutdown) -> Result<RunOutcome> {
        let Ok(_running) = self.run_lock.try_lock() else {
            info!(%trigger, "digest: run already in progress, ignoring trigger");
            return Ok(RunOutcome::AlreadyRunning);
        };
        let _idle = IdleOnExit(&self.state);
        info!(%trigger, "digest: run started");

        if self.options.decay_on_run {
            match self
                .store
                .decay_all(self.options.decay_rate, self.options.min_weight)
                .await
            {
                Ok(n) => info!("digest: decayed {} tag weights", n),
                Err(e) => error!(error = %e, "digest: decay failed, continuing"),
            }
        }

        let settings = self.settings.snapshot();
        let Some(recipient) = settings.recipient else {
            warn!("digest: no recipient configured, nothing to deliver");
            return Ok(RunOutcome::NoRecipient);
        };
        let target = settings.items_per_run;
        let mut report = DigestReport::new(trigger);

        self.set_state(DigestState::Collecting);
        let candidates = tokio::select! {
            biased;
            _ = shutdown.triggered() => {
                report.cancelled = true;
                info!("digest: cancelled while collecting candidates");
                return Ok(RunOutcome::Completed(report));
            }
            fetched = self.feed.top_candidates(target * 2) => fetched?,
        };
        report.candidates = candidates.len();

        self.set_state(DigestState::Filtering);
        let sent_ids = self.store.recently_sent_ids(self.options.recency_window).await?;
        let fresh = recency::filter_recent(candidates, &sent_ids);
        report.fresh = fresh.len();
        info!(
            "digest: {} candidates, {} not sent in the last {} days",
            report.candidates,
            report.fresh,
            self.options.recency_window.num_days()
        );

        self.set_state(DigestState::Enriching);
        let enriched = self
            .pipeline
            .enrich_all(fresh, self.options.max_concurrency, shutdown)
            .await;
        report.enriched = enriched.articles.len();
        report.skipped = enriched.skipped;
        if enriched.cancelled {
            report.cancelled = true;
            info!("digest: cancelled during enrichment");
            return Ok(RunOutcome::Completed(report));
        }

        self.set_state(DigestState::Ranking);
        let weights = self.store.all_weights().await?;
        let ranked = ranking::rank(enriched.articles, &weights);

        self.set_state(DigestState::Delivering);
        for scored in ranked.into_iter().take(target) {
            if shutdown.is_triggered() {
                report.cancelled = true;
                info!("digest: cancelled before delivering remaining items");
                break;
            }
            self.deliver_one(&recipient, scored.article, scored.score, &mut report)
                .await;
        }

        info!(
            %trigger,
            sent = report.sent.len(),
            failed = report.failed_sends.len(),
            cancelled = report.cancelled,
            "digest: run finished"
        );
        Ok(RunOutcome::Completed(report))
    }

    async fn deliver_one(
        &self,
        recipient: &str,
        article: EnrichedArticle,
        score: f64,
        report: &mut DigestReport,
    ) {
        let article_id = article.id();
        let handle = match self.transport.deliver(recipient, &render_article(&article)).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(article_id, error = %e, "digest: delivery failed");
                report.failed_sends.push(article_id);
                return;
            }
        };

        if let Err(e) = self.persist_sent(&article, &handle).await {
            error!(article_id, error = %e, "digest: failed to record sent article");
            report.unpersisted.push(article_id);
        }
        report.sent.push(SentArticle {
            article_id,
            handle,
            score,
        });
    }

    async fn persist_sent(&self, article: &EnrichedArticle, handle: &DeliveryHandle) -> Result<()> {
        self.store.upsert_article(&StoredArticle::from(article)).await?;
        self.store
            .mark_sent(article.id(), handle, self.clock.now())
            .await
    }

    fn set_state(&self, state: DigestState) {
        self.state.send_replace(state);
    }
}

struct IdleOnExit<'a>(&'a watch::Sender<DigestState>);

impl Drop for IdleOnExit<'_> {
    fn drop(&mut self) {
        self.0.send_replace(DigestState::Idle);
    }
}
