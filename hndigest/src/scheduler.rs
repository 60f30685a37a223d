use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveTime, TimeZone, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::clock::Clock;
use crate::digest::{DigestOrchestrator, RunOutcome, Trigger};
use crate::settings::RuntimeSettings;
use crate::shutdown::Shutdown;
use crate::storage::PreferenceStore;

/// Handle to at most one pending background task.
///
/// Scheduling again replaces (aborts) the previous task; dropping the handle cancels it.
#[derive(Debug, Default)]
pub struct ScheduledTask {
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(task));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// First instant strictly after `now` whose wall-clock time at `offset` is `time`.
pub fn next_occurrence(now: DateTime<Utc>, time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let local_date = now.with_timezone(&offset).date_naive();
    let local_minus_utc = ChronoDuration::seconds(i64::from(offset.local_minus_utc()));

    let mut candidate = Utc.from_utc_datetime(&(local_date.and_time(time) - local_minus_utc));
    while candidate <= now {
        candidate = candidate + ChronoDuration::days(1);
    }
    candidate
}

/// Keep the daily digest armed at the current `digest_time`, re-arming on every change.
///
/// Each run is spawned on its own so re-arming never aborts a delivery in progress.
pub async fn run_digest_schedule(
    orchestrator: Arc<DigestOrchestrator>,
    mut settings: watch::Receiver<RuntimeSettings>,
    offset: FixedOffset,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
) {
    let mut task = ScheduledTask::new();
    let mut armed_at = settings.borrow_and_update().digest_time;
    arm_daily(&mut task, &orchestrator, armed_at, offset, &clock, &shutdown);

    loop {
        tokio::select! {
            _ = shutdown.triggered() => {
                info!("scheduler: shutdown requested, stopping digest schedule");
                break;
            }
            changed = settings.changed() => {
                if changed.is_err() {
                    info!("scheduler: settings closed, stopping digest schedule");
                    break;
                }
                let digest_time = settings.borrow_and_update().digest_time;
                if digest_time != armed_at {
                    armed_at = digest_time;
                    arm_daily(&mut task, &orchestrator, armed_at, offset, &clock, &shutdown);
                }
            }
        }
    }
    task.cancel();
}

fn arm_daily(
    task: &mut ScheduledTask,
    orchestrator: &Arc<DigestOrchestrator>,
    time: NaiveTime,
    offset: FixedOffset,
    clock: &Arc<dyn Clock>,
    shutdown: &Shutdown,
) {
    let orchestrator = orchestrator.clone();
    let clock = clock.clone();
    let shutdown = shutdown.clone();

    info!(
        "scheduler: digest armed for {} (next at {})",
        time.format("%H:%M"),
        next_occurrence(clock.now(), time, offset)
    );

    task.schedule(async move {
        loop {
            let now = clock.now();
            let wait = (next_occurrence(now, time, offset) - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            let orchestrator = orchestrator.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                match orchestrator.run(Trigger::Scheduled, &shutdown).await {
                    Ok(RunOutcome::Completed(report)) => {
                        info!(sent = report.sent.len(), "scheduler: scheduled digest completed")
                    }
                    Ok(outcome) => info!(?outcome, "scheduler: scheduled digest did not run"),
                    Err(e) => error!(error = %e, "scheduler: scheduled digest failed"),
                }
            });
        }
    });
}

/// Decay all weights every `interval`; the first decay happens one interval after start.
pub async fn run_decay_schedule(
    store: PreferenceStore,
    interval: Duration,
    decay_rate: f64,
    min_weight: f64,
    shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.triggered() => {
                info!("scheduler: shutdown requested, stopping decay schedule");
                break;
            }
            _ = ticker.tick() => {
                match store.decay_all(decay_rate, min_weight).await {
                    Ok(n) => info!("scheduler: decayed {} tag weights", n),
                    Err(e) => error!(error = %e, "scheduler: decay failed"),
                }
            }
        }
    }
}
