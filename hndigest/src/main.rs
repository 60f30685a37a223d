/*
hndigest - single-binary main.rs
This binary runs the Telegram event loop and the daily digest schedule inside the same process.
*/

use anyhow::{Context, Result};
use chrono::FixedOffset;
use clap::Parser;
use common::{init_db_pool, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use hndigest::clock::{Clock, SystemClock};
use hndigest::delivery::Transport;
use hndigest::digest::{DigestOrchestrator, RunOptions, RunOutcome, Trigger};
use hndigest::events::EventLoop;
use hndigest::feedback::ReactionLearner;
use hndigest::ingestion::{HackerNewsClient, DEFAULT_HN_API_URL};
use hndigest::llm::summarizer::LlmSummarizer;
use hndigest::llm::LlmProvider;
use hndigest::processing::ContentPipeline;
use hndigest::scheduler;
use hndigest::scraping::HtmlExtractor;
use hndigest::settings::{RuntimeSettings, SettingsService};
use hndigest::shutdown;
use hndigest::storage::PreferenceStore;
use hndigest::telegram::{self, TelegramClient};

const DEFAULT_USER_AGENT: &str = "hndigest/0.1.0";

#[derive(Parser, Debug)]
#[command(name = "hndigest", about = "Hacker News digest bot that learns from Telegram reactions")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run one digest immediately and exit
    #[arg(long)]
    once: bool,

    /// Do not poll Telegram for commands and reactions
    #[arg(long)]
    no_events: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    // Load configuration with defaults
    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(default_path.as_path()) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    // Initialize DB pool - resolve and log the absolute DB path before connecting
    let db_path_abs = match tokio::fs::canonicalize(&config.database.path).await {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(_) => config.database.path.clone(),
    };
    info!(db_path = %db_path_abs, "resolved DB path");

    let db_pool = match init_db_pool(&db_path_abs).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %db_path_abs, "failed to initialize database pool");
            return Err(e);
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = PreferenceStore::new(db_pool, clock.clone());
    store.ensure_schema().await.context("failed to create DB schema")?;

    let tg_config = config.telegram.clone().unwrap_or_default();
    let settings = Arc::new(
        SettingsService::load(
            store.clone(),
            RuntimeSettings {
                recipient: tg_config.chat_id.clone().filter(|c| !c.trim().is_empty()),
                digest_time: config.scheduler.parsed_digest_time()?,
                items_per_run: config.digest.items_per_run,
            },
        )
        .await
        .context("failed to load runtime settings")?,
    );

    let telegram = Arc::new(create_telegram_client(&tg_config)?);
    let transport: Arc<dyn Transport> = telegram.clone();

    let politeness = config.politeness.clone().unwrap_or_default();
    let fetch_timeout = politeness.fetch_timeout_seconds.unwrap_or(10);
    let user_agent = politeness
        .user_agent
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

    let feed_url = config
        .feed
        .as_ref()
        .and_then(|f| f.api_url.clone())
        .unwrap_or_else(|| DEFAULT_HN_API_URL.to_string());
    let feed = HackerNewsClient::new(feed_url, fetch_timeout, &user_agent)
        .context("failed to build Hacker News client")?
        .with_concurrency(config.digest.max_concurrency);

    let extractor = HtmlExtractor::new(fetch_timeout, &user_agent)
        .context("failed to build article extractor")?;

    let llm_config = config
        .llm
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[llm] section is required to summarize articles"))?;
    let provider: Arc<dyn LlmProvider> = Arc::from(create_llm_provider(llm_config)?);
    let max_tokens = llm_config
        .remote
        .as_ref()
        .and_then(|r| r.max_tokens)
        .unwrap_or(500);
    let summarizer = LlmSummarizer::new(provider, max_tokens);

    let pipeline = ContentPipeline::new(Arc::new(extractor), Arc::new(summarizer), clock.clone())
        .with_extract_timeout(Duration::from_secs(
            politeness.extract_timeout_seconds.unwrap_or(10),
        ));

    let learning = config.learning.clone();
    let decay_interval = config.scheduler.decay_interval_hours;
    let orchestrator = Arc::new(DigestOrchestrator::new(
        store.clone(),
        settings.clone(),
        Arc::new(feed),
        pipeline,
        transport.clone(),
        clock.clone(),
        RunOptions {
            recency_window: chrono::Duration::days(config.digest.recency_window_days),
            max_concurrency: config.digest.max_concurrency,
            // An explicit decay interval replaces decay-per-run
            decay_on_run: decay_interval.is_none(),
            decay_rate: learning.decay_rate,
            min_weight: learning.min_weight,
        },
    ));

    let (shutdown_trigger, shutdown) = shutdown::channel();

    if args.once {
        info!("Running a single digest (--once)");
        let run = orchestrator.run(Trigger::Manual, &shutdown);
        tokio::pin!(run);
        let outcome = tokio::select! {
            outcome = &mut run => outcome,
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, cancelling digest");
                shutdown_trigger.trigger();
                run.await
            }
        };
        match outcome? {
            RunOutcome::Completed(report) => info!(
                sent = report.sent.len(),
                failed = report.failed_sends.len(),
                cancelled = report.cancelled,
                "digest finished"
            ),
            other => warn!(?other, "digest did not run"),
        }
        return Ok(());
    }

    let offset_secs = config.scheduler.utc_offset_minutes * 60;
    let offset = FixedOffset::east_opt(offset_secs)
        .with_context(|| format!("invalid scheduler.utc_offset_minutes: {}", config.scheduler.utc_offset_minutes))?;

    let mut tasks: Vec<(&str, JoinHandle<()>)> = Vec::new();

    info!("Spawning digest schedule");
    tasks.push((
        "digest schedule",
        tokio::spawn(scheduler::run_digest_schedule(
            orchestrator.clone(),
            settings.subscribe(),
            offset,
            clock.clone(),
            shutdown.clone(),
        )),
    ));

    if let Some(hours) = decay_interval {
        info!(hours, "Spawning decay schedule");
        tasks.push((
            "decay schedule",
            tokio::spawn(scheduler::run_decay_schedule(
                store.clone(),
                Duration::from_secs(hours * 3600),
                learning.decay_rate,
                learning.min_weight,
                shutdown.clone(),
            )),
        ));
    }

    if !args.no_events {
        info!("Spawning Telegram event loop");
        let learner = Arc::new(ReactionLearner::new(store.clone(), clock.clone(), learning.boost_amount));
        let events = EventLoop::new(
            telegram.clone(),
            transport.clone(),
            settings.clone(),
            learner,
            orchestrator.clone(),
            store.clone(),
            learning.like_reactions.clone(),
            tg_config.poll_timeout_seconds.unwrap_or(30),
        );
        let events_shutdown = shutdown.clone();
        tasks.push((
            "event loop",
            tokio::spawn(async move { events.run(events_shutdown).await }),
        ));
    } else {
        info!("Telegram event loop disabled via CLI (--no-events)");
    }

    // Wait for CTRL-C, then notify tasks and give them a grace period
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("ctrl-c received, notifying tasks to shutdown");
    shutdown_trigger.trigger();

    for (name, handle) in tasks {
        match tokio::time::timeout(Duration::from_secs(20), handle).await {
            Ok(Ok(())) => info!("{} exited cleanly", name),
            Ok(Err(join_err)) => error!(%join_err, "{} task panicked", name),
            Err(_) => info!("Timed out waiting for {} to exit; continuing shutdown", name),
        }
    }

    // Digest runs are spawned outside `tasks`; an in-flight one must record its sends first.
    match tokio::time::timeout(Duration::from_secs(20), orchestrator.wait_idle()).await {
        Ok(()) => info!("No digest run in flight"),
        Err(_) => warn!("Timed out waiting for the digest run to finish; continuing shutdown"),
    }

    info!("Shutdown complete");
    Ok(())
}

fn create_telegram_client(tg_config: &common::TelegramConfig) -> Result<TelegramClient> {
    let token_env = tg_config
        .bot_token_env
        .as_deref()
        .unwrap_or("TELEGRAM_BOT_TOKEN");
    let token = std::env::var(token_env)
        .with_context(|| format!("Telegram bot token env var '{}' not set", token_env))?;
    let api_url = tg_config
        .api_url
        .clone()
        .unwrap_or_else(|| telegram::DEFAULT_API_URL.to_string());
    TelegramClient::new(api_url, token).context("failed to build Telegram client")
}

/// Create an LLM provider based on configuration
fn create_llm_provider(llm_config: &common::LlmConfig) -> Result<Box<dyn LlmProvider>> {
    let adapter = llm_config.adapter.as_deref().unwrap_or("remote");
    match adapter {
        "remote" => {
            let remote_config = llm_config
                .remote
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Remote adapter selected but [llm.remote] is missing"))?;

            // Fetch API key from env var
            let api_key_env = remote_config
                .api_key_env
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Missing api_key_env in remote config"))?;
            let api_key = std::env::var(api_key_env)
                .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;

            let model = remote_config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            let api_url = remote_config
                .api_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434/v1/chat/completions".to_string());
            let timeout_secs = remote_config.timeout_seconds.unwrap_or(30);
            let max_tokens = remote_config.max_tokens.unwrap_or(500);

            info!(model = %model, "LLM provider initialized");
            let provider = hndigest::llm::remote::RemoteLlmProvider::new(api_url, api_key, model)
                .with_defaults(timeout_secs, max_tokens, 0.3);
            Ok(Box::new(provider))
        }
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    }
}
