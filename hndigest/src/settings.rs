//! Runtime settings cache.
//!
//! Values live in a `watch` channel so readers always see a consistent snapshot and the
//! digest schedule can react to changes. Every update is written to the store before it
//! is published.

use chrono::NaiveTime;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::error::{DigestError, Result};
use crate::storage::PreferenceStore;

pub const KEY_RECIPIENT: &str = "recipient";
pub const KEY_DIGEST_TIME: &str = "digest_time";
pub const KEY_ITEMS_PER_RUN: &str = "items_per_run";

pub const MAX_ITEMS_PER_RUN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub recipient: Option<String>,
    pub digest_time: NaiveTime,
    pub items_per_run: usize,
}

pub struct SettingsService {
    store: PreferenceStore,
    tx: watch::Sender<RuntimeSettings>,
    write_lock: Mutex<()>,
}

impl SettingsService {
    /// Stored values win over `defaults`; missing or unreadable ones fall back.
    pub async fn load(store: PreferenceStore, defaults: RuntimeSettings) -> Result<Self> {
        let mut settings = defaults;

        if let Some(recipient) = read_setting(&store, KEY_RECIPIENT).await? {
            let recipient = recipient.trim().to_string();
            if !recipient.is_empty() {
                settings.recipient = Some(recipient);
            }
        }
        if let Some(raw) = read_setting(&store, KEY_DIGEST_TIME).await? {
            match parse_digest_time(&raw) {
                Ok(t) => settings.digest_time = t,
                Err(e) => warn!(error = %e, "settings: ignoring stored digest_time"),
            }
        }
        if let Some(raw) = read_setting(&store, KEY_ITEMS_PER_RUN).await? {
            match parse_items_per_run(&raw) {
                Ok(n) => settings.items_per_run = n,
                Err(e) => warn!(error = %e, "settings: ignoring stored items_per_run"),
            }
        }

        info!(
            recipient = settings.recipient.as_deref().unwrap_or("<none>"),
            digest_time = %settings.digest_time.format("%H:%M"),
            items_per_run = settings.items_per_run,
            "settings: loaded"
        );

        let (tx, _rx) = watch::channel(settings);
        Ok(Self {
            store,
            tx,
            write_lock: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> RuntimeSettings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RuntimeSettings> {
        self.tx.subscribe()
    }

    pub async fn set_recipient(&self, recipient: &str) -> Result<()> {
        let recipient = recipient.trim();
        if recipient.is_empty() {
            return Err(DigestError::InvalidArgument("recipient must not be empty".to_string()));
        }
        let _guard = self.write_lock.lock().await;
        self.store.set_setting(KEY_RECIPIENT, recipient).await?;
        self.tx
            .send_modify(|s| s.recipient = Some(recipient.to_string()));
        info!(recipient, "settings: recipient updated");
        Ok(())
    }

    pub async fn set_digest_time(&self, raw: &str) -> Result<NaiveTime> {
        let time = parse_digest_time(raw)?;
        let _guard = self.write_lock.lock().await;
        self.store
            .set_setting(KEY_DIGEST_TIME, &time.format("%H:%M").to_string())
            .await?;
        self.tx.send_modify(|s| s.digest_time = time);
        info!(digest_time = %time.format("%H:%M"), "settings: digest time updated");
        Ok(time)
    }

    pub async fn set_items_per_run(&self, items_per_run: usize) -> Result<()> {
        validate_items_per_run(items_per_run)?;
        let _guard = self.write_lock.lock().await;
        self.store
            .set_setting(KEY_ITEMS_PER_RUN, &items_per_run.to_string())
            .await?;
        self.tx.send_modify(|s| s.items_per_run = items_per_run);
        info!(items_per_run, "settings: items per run updated");
        Ok(())
    }
}

async fn read_setting(store: &PreferenceStore, key: &str) -> Result<Option<String>> {
    match store.get_setting(key).await {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn parse_digest_time(raw: &str) -> Result<NaiveTime> {
    common::parse_time_of_day(raw.trim())
        .map_err(|_| DigestError::InvalidArgument(format!("expected HH:MM, got '{}'", raw.trim())))
}

pub fn parse_items_per_run(raw: &str) -> Result<usize> {
    let n: usize = raw
        .trim()
        .parse()
        .map_err(|_| DigestError::InvalidArgument(format!("expected a number, got '{}'", raw.trim())))?;
    validate_items_per_run(n)?;
    Ok(n)
}

fn validate_items_per_run(n: usize) -> Result<()> {
    if (1..=MAX_ITEMS_PER_RUN).contains(&n) {
        Ok(())
    } else {
        Err(DigestError::InvalidArgument(format!(
            "items per run must be between 1 and {}, got {}",
            MAX_ITEMS_PER_RUN, n
        )))
    }
}
