use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{DigestError, Result};
use crate::model::{DeliveryHandle, StoreStats, StoredArticle, TagWeight};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        url TEXT,
        summary TEXT NOT NULL,
        tags TEXT NOT NULL DEFAULT '[]',
        popularity INTEGER NOT NULL DEFAULT 0,
        fetched_at TEXT NOT NULL,
        sent_at TEXT,
        delivery_handle TEXT UNIQUE
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_articles_sent_at ON articles(sent_at);",
    r#"
    CREATE TABLE IF NOT EXISTS likes (
        article_id INTEGER PRIMARY KEY REFERENCES articles(id) ON DELETE CASCADE,
        liked_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tag_weights (
        tag TEXT PRIMARY KEY,
        weight REAL NOT NULL,
        occurrences INTEGER NOT NULL DEFAULT 0
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "#,
];

/// Persisted preference state: sent articles, likes, tag weights and runtime settings.
///
/// Cheap to clone; every clone shares the same pool. Each tag read-modify-write is a
/// single statement (or one transaction per call), so boosts and decays issued from
/// different tasks compose regardless of interleaving.
#[derive(Clone)]
pub struct PreferenceStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl PreferenceStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Open a private in-memory database with the schema applied.
    ///
    /// A single connection that is never reaped: each SQLite memory connection is its own
    /// database.
    pub async fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool, clock);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        info!("storage: ensuring DB schema (CREATE TABLE IF NOT EXISTS ...)");
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    // Articles

    /// Insert or replace an article by id.
    pub async fn upsert_article(&self, article: &StoredArticle) -> Result<()> {
        let tags_json = serde_json::to_string(&article.tags)?;
        sqlx::query(
            r#"
            INSERT INTO articles
                (id, title, url, summary, tags, popularity, fetched_at, sent_at, delivery_handle)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                url = excluded.url,
                summary = excluded.summary,
                tags = excluded.tags,
                popularity = excluded.popularity,
                fetched_at = excluded.fetched_at,
                sent_at = excluded.sent_at,
                delivery_handle = excluded.delivery_handle
            "#,
        )
        .bind(article.id)
        .bind(&article.title)
        .bind(&article.url)
        .bind(&article.summary)
        .bind(tags_json)
        .bind(i64::from(article.popularity))
        .bind(to_db_timestamp(article.fetched_at))
        .bind(article.sent_at.map(to_db_timestamp))
        .bind(article.delivery_handle.as_ref().map(|h| h.0.clone()))
        .execute(&self.pool)
        .await?;

        debug!(article_id = article.id, "storage: upserted article");
        Ok(())
    }

    pub async fn mark_sent(
        &self,
        article_id: i64,
        handle: &DeliveryHandle,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE articles SET sent_at = ?, delivery_handle = ? WHERE id = ?",
        )
        .bind(to_db_timestamp(sent_at))
        .bind(handle.as_str())
        .bind(article_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DigestError::NotFound(format!("article {}", article_id)));
        }
        Ok(())
    }

    pub async fn find_by_handle(&self, handle: &DeliveryHandle) -> Result<StoredArticle> {
        let row = sqlx::query(
            r#"
            SELECT id, title, url, summary, tags, popularity, fetched_at, sent_at, delivery_handle
            FROM articles
            WHERE delivery_handle = ?
            "#,
        )
        .bind(handle.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => article_from_row(&row),
            None => Err(DigestError::NotFound(format!("delivery handle {}", handle))),
        }
    }

    /// Ids whose `sent_at` falls within `[now - window, now]`.
    pub async fn recently_sent_ids(&self, window: Duration) -> Result<HashSet<i64>> {
        let now = self.clock.now();
        let since = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM articles WHERE sent_at IS NOT NULL AND sent_at >= ? AND sent_at <= ?",
        )
        .bind(to_db_timestamp(since))
        .bind(to_db_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    // Likes

    pub async fn is_liked(&self, article_id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE article_id = ?")
            .bind(article_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Idempotent. Returns `true` only for the call that created the like.
    pub async fn record_like(&self, article_id: i64, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO likes (article_id, liked_at) VALUES (?, ?)")
            .bind(article_id)
            .bind(to_db_timestamp(at))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record the first like of `article_id` and boost `tags` in one transaction.
    ///
    /// Returns `false` (and boosts nothing) when the article was already liked. If any
    /// boost fails the like is rolled back too, so a later like can still boost.
    pub async fn record_like_and_boost<I, S>(
        &self,
        article_id: i64,
        at: DateTime<Utc>,
        tags: I,
        boost_amount: f64,
    ) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        check_boost_amount(boost_amount)?;
        let tags = collect_tags(tags);

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query("INSERT OR IGNORE INTO likes (article_id, liked_at) VALUES (?, ?)")
            .bind(article_id)
            .bind(to_db_timestamp(at))
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;
        if !inserted {
            tx.rollback().await?;
            return Ok(false);
        }
        apply_boosts(&mut tx, &tags, boost_amount).await?;
        tx.commit().await?;

        debug!(article_id, count = tags.len(), "storage: recorded like and boosted tags");
        Ok(true)
    }

    // Tag weights

    /// Add `boost_amount` to every tag (creating absent ones at `1.0 + boost_amount`).
    /// All tags of one call commit together.
    pub async fn boost_tags<I, S>(&self, tags: I, boost_amount: f64) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        check_boost_amount(boost_amount)?;
        let tags = collect_tags(tags);
        if tags.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        apply_boosts(&mut tx, &tags, boost_amount).await?;
        tx.commit().await?;

        debug!(count = tags.len(), boost_amount, "storage: boosted tags");
        Ok(tags.len())
    }

    /// `weight = max(weight * (1 - decay_rate), min_weight)` for every tag.
    pub async fn decay_all(&self, decay_rate: f64, min_weight: f64) -> Result<u64> {
        if !(0.0..1.0).contains(&decay_rate) {
            return Err(DigestError::InvalidArgument(format!(
                "decay rate must be in [0, 1), got {}",
                decay_rate
            )));
        }
        if !(min_weight.is_finite() && min_weight > 0.0) {
            return Err(DigestError::InvalidArgument(format!(
                "min weight must be positive, got {}",
                min_weight
            )));
        }

        let result = sqlx::query("UPDATE tag_weights SET weight = MAX(weight * ?, ?)")
            .bind(1.0 - decay_rate)
            .bind(min_weight)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn all_weights(&self) -> Result<HashMap<String, f64>> {
        let rows = sqlx::query("SELECT tag, weight FROM tag_weights")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<(String, f64)> {
                Ok((row.try_get("tag")?, row.try_get("weight")?))
            })
            .collect()
    }

    /// Highest weights first, ties broken by tag name.
    pub async fn top_tags(&self, limit: usize) -> Result<Vec<TagWeight>> {
        let rows = sqlx::query(
            "SELECT tag, weight, occurrences FROM tag_weights ORDER BY weight DESC, tag ASC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<TagWeight> {
                Ok(TagWeight {
                    tag: row.try_get("tag")?,
                    weight: row.try_get("weight")?,
                    occurrences: row.try_get("occurrences")?,
                })
            })
            .collect()
    }

    // Settings

    pub async fn get_setting(&self, key: &str) -> Result<String> {
        sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DigestError::NotFound(format!("setting {}", key)))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM articles WHERE sent_at IS NOT NULL) AS articles_sent,
                (SELECT COUNT(*) FROM likes) AS likes,
                (SELECT COUNT(*) FROM tag_weights) AS tags
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            articles_sent: row.try_get("articles_sent")?,
            likes: row.try_get("likes")?,
            tags: row.try_get("tags")?,
        })
    }
}

fn check_boost_amount(boost_amount: f64) -> Result<()> {
    if boost_amount.is_finite() && boost_amount > 0.0 {
        Ok(())
    } else {
        Err(DigestError::InvalidArgument(format!(
            "boost amount must be positive, got {}",
            boost_amount
        )))
    }
}

fn collect_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter().map(|t| t.as_ref().to_string()).collect()
}

async fn apply_boosts(
    tx: &mut Transaction<'_, Sqlite>,
    tags: &BTreeSet<String>,
    boost_amount: f64,
) -> Result<()> {
    for tag in tags {
        sqlx::query(
            r#"
            INSERT INTO tag_weights (tag, weight, occurrences)
            VALUES (?, 1.0 + ?, 1)
            ON CONFLICT(tag) DO UPDATE SET
                weight = weight + ?,
                occurrences = occurrences + 1
            "#,
        )
        .bind(tag)
        .bind(boost_amount)
        .bind(boost_amount)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Fixed-width UTC form so that string comparison in SQL is chronological.
pub fn to_db_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_db_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DigestError::Parse(format!("bad timestamp '{}': {}", s, e)))
}

fn article_from_row(row: &SqliteRow) -> Result<StoredArticle> {
    let tags_json: String = row.try_get("tags")?;
    let popularity: i64 = row.try_get("popularity")?;
    let fetched_at: String = row.try_get("fetched_at")?;
    let sent_at: Option<String> = row.try_get("sent_at")?;
    let handle: Option<String> = row.try_get("delivery_handle")?;

    Ok(StoredArticle {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        summary: row.try_get("summary")?,
        tags: serde_json::from_str(&tags_json)?,
        popularity: u32::try_from(popularity.max(0)).unwrap_or(u32::MAX),
        fetched_at: parse_db_timestamp(&fetched_at)?,
        sent_at: sent_at.as_deref().map(parse_db_timestamp).transpose()?,
        delivery_handle: handle.map(DeliveryHandle),
    })
}
