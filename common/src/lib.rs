/*!
common/src/lib.rs

Shared configuration types and DB helper functions for hndigest.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default and an override config file
- A helper to open the SQLite pool backing the preference store
*/

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Upper bounds that keep date arithmetic on these settings in range.
pub const MAX_RECENCY_WINDOW_DAYS: i64 = 3650;
pub const MAX_DECAY_INTERVAL_HOURS: u64 = 24 * 365;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/hndigest.db")
    pub path: String,
}

/// Scheduler configuration (digest time of day, optional independent decay cadence)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Wall-clock time in "HH:MM" 24h format when the daily digest runs
    #[serde(default = "default_digest_time")]
    pub digest_time: String,
    /// Offset of the recipient's wall clock from UTC, in minutes
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// When set, decay runs on its own timer instead of at the start of each digest
    pub decay_interval_hours: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            digest_time: default_digest_time(),
            utc_offset_minutes: 0,
            decay_interval_hours: None,
        }
    }
}

impl SchedulerConfig {
    pub fn parsed_digest_time(&self) -> Result<NaiveTime> {
        parse_time_of_day(&self.digest_time)
    }
}

/// Digest run sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    #[serde(default = "default_items_per_run")]
    pub items_per_run: usize,
    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: i64,
    /// Upper bound on candidates enriched concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            items_per_run: default_items_per_run(),
            recency_window_days: default_recency_window_days(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Preference learning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_boost_amount")]
    pub boost_amount: f64,
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
    /// Reaction emojis that count as a "like"
    #[serde(default = "default_like_reactions")]
    pub like_reactions: Vec<String>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            boost_amount: default_boost_amount(),
            decay_rate: default_decay_rate(),
            min_weight: default_min_weight(),
            like_reactions: default_like_reactions(),
        }
    }
}

/// Politeness / fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolitenessConfig {
    pub fetch_timeout_seconds: Option<u64>,
    pub extract_timeout_seconds: Option<u64>,
    pub user_agent: Option<String>,
}

/// Source feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Base URL of the Hacker News Firebase API (".../v0")
    pub api_url: Option<String>,
}

/// Remote LLM config (used if `llm.adapter = "remote"`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
}

/// LLM top-level config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote"
    pub remote: Option<RemoteLlmConfig>,
}

/// Telegram bot configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Name of the environment variable holding the bot token
    pub bot_token_env: Option<String>,
    pub api_url: Option<String>,
    /// Default recipient chat; a stored `recipient` setting takes precedence
    pub chat_id: Option<String>,
    pub poll_timeout_seconds: Option<u64>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub digest: DigestConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    pub politeness: Option<PolitenessConfig>,
    pub feed: Option<FeedConfig>,
    pub llm: Option<LlmConfig>,
    pub telegram: Option<TelegramConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the runtime cannot work with before anything is started.
    pub fn validate(&self) -> Result<()> {
        self.scheduler
            .parsed_digest_time()
            .context("scheduler.digest_time must be HH:MM")?;
        if self.scheduler.utc_offset_minutes.abs() >= 24 * 60 {
            anyhow::bail!("scheduler.utc_offset_minutes must be within +/- 24h");
        }
        if let Some(hours) = self.scheduler.decay_interval_hours {
            if !(1..=MAX_DECAY_INTERVAL_HOURS).contains(&hours) {
                anyhow::bail!(
                    "scheduler.decay_interval_hours must be between 1 and {}",
                    MAX_DECAY_INTERVAL_HOURS
                );
            }
        }
        if !(1..=50).contains(&self.digest.items_per_run) {
            anyhow::bail!("digest.items_per_run must be between 1 and 50");
        }
        if self.digest.max_concurrency == 0 {
            anyhow::bail!("digest.max_concurrency must be at least 1");
        }
        if !(0..=MAX_RECENCY_WINDOW_DAYS).contains(&self.digest.recency_window_days) {
            anyhow::bail!(
                "digest.recency_window_days must be between 0 and {}",
                MAX_RECENCY_WINDOW_DAYS
            );
        }
        let l = &self.learning;
        if !(l.boost_amount.is_finite() && l.boost_amount > 0.0) {
            anyhow::bail!("learning.boost_amount must be a positive number");
        }
        if !(0.0..1.0).contains(&l.decay_rate) {
            anyhow::bail!("learning.decay_rate must be in [0, 1)");
        }
        if !(l.min_weight.is_finite() && l.min_weight > 0.0) {
            anyhow::bail!("learning.min_weight must be a positive number");
        }
        Ok(())
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Parse a "HH:MM" wall-clock time.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .with_context(|| format!("invalid time of day '{}', expected HH:MM", s))
}

fn default_digest_time() -> String {
    "09:00".to_string()
}

fn default_items_per_run() -> usize {
    10
}

fn default_recency_window_days() -> i64 {
    7
}

fn default_max_concurrency() -> usize {
    4
}

fn default_boost_amount() -> f64 {
    0.2
}

fn default_decay_rate() -> f64 {
    0.02
}

fn default_min_weight() -> f64 {
    0.1
}

fn default_like_reactions() -> Vec<String> {
    vec!["👍".to_string(), "❤".to_string(), "🔥".to_string()]
}

/// Initialize an SQLite connection pool.
///
/// This function will create the parent directory if necessary, ensure the DB file exists
/// (attempting to create it if missing), and return a configured `SqlitePool`. Defaults are
/// conservative for resource-constrained platforms:
/// - max_connections: 5
/// - WAL journal so the event loop can read while a digest run writes
///
/// Example:
///   let pool = init_db_pool("data/hndigest.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create DB parent directory: {}", parent.display())
        })?;
    }

    // Create the file up front so permission or path problems surface with a clear message
    // instead of only via the SQLite connection attempt.
    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create or open DB file: {}", path))?;

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [database]
        path = "data/test.db"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: Config = toml::from_str(MINIMAL).expect("parse config");
        assert_eq!(cfg.scheduler.digest_time, "09:00");
        assert_eq!(cfg.digest.items_per_run, 10);
        assert_eq!(cfg.digest.recency_window_days, 7);
        assert_eq!(cfg.learning.like_reactions.len(), 3);
        assert!(cfg.telegram.is_none());
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn validate_rejects_bad_learning_parameters() {
        let mut cfg: Config = toml::from_str(MINIMAL).expect("parse config");
        cfg.learning.decay_rate = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg: Config = toml::from_str(MINIMAL).expect("parse config");
        cfg.learning.min_weight = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg: Config = toml::from_str(MINIMAL).expect("parse config");
        cfg.scheduler.digest_time = "25:99".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_bounds_time_windows() {
        let mut cfg: Config = toml::from_str(MINIMAL).expect("parse config");
        cfg.digest.recency_window_days = MAX_RECENCY_WINDOW_DAYS;
        cfg.validate().expect("largest window is accepted");

        cfg.digest.recency_window_days = 999_999_999;
        assert!(cfg.validate().is_err());

        let mut cfg: Config = toml::from_str(MINIMAL).expect("parse config");
        cfg.scheduler.decay_interval_hours = Some(u64::MAX);
        assert!(cfg.validate().is_err());
        cfg.scheduler.decay_interval_hours = Some(24);
        cfg.validate().expect("daily decay is accepted");
    }

    #[test]
    fn merge_prefers_override_values() {
        let mut base: toml::Value = toml::from_str(
            r#"
            [database]
            path = "a.db"
            [digest]
            items_per_run = 5
            max_concurrency = 2
            "#,
        )
        .unwrap();
        let over: toml::Value = toml::from_str(
            r#"
            [digest]
            items_per_run = 12
            "#,
        )
        .unwrap();
        merge_toml(&mut base, over);
        let cfg: Config = base.try_into().unwrap();
        assert_eq!(cfg.digest.items_per_run, 12);
        assert_eq!(cfg.digest.max_concurrency, 2);
        assert_eq!(cfg.database.path, "a.db");
    }

    #[tokio::test]
    async fn load_with_defaults_and_db_pool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");
        let db_path = dir.path().join("nested").join("digest.db");

        tokio::fs::write(
            &default_path,
            format!("[database]\npath = \"{}\"\n[scheduler]\ndigest_time = \"07:30\"\n", db_path.display()),
        )
        .await
        .unwrap();
        tokio::fs::write(&override_path, "[digest]\nitems_per_run = 3\n")
            .await
            .unwrap();

        let cfg = Config::load_with_defaults(Some(default_path.as_path()), Some(override_path.as_path()))
            .await
            .expect("load config");
        assert_eq!(cfg.digest.items_per_run, 3);
        assert_eq!(
            cfg.scheduler.parsed_digest_time().unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );

        let pool = init_db_pool(&cfg.database.path).await.expect("init pool");
        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
    }
}
