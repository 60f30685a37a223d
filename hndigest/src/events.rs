use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::commands::{Command, HELP_TEXT};
use crate::delivery::{escape_html, Transport};
use crate::digest::{DigestOrchestrator, RunOutcome, Trigger};
use crate::error::{DigestError, Result};
use crate::feedback::{LikeOutcome, ReactionLearner};
use crate::model::DeliveryHandle;
use crate::settings::{parse_items_per_run, SettingsService};
use crate::shutdown::Shutdown;
use crate::storage::PreferenceStore;
use crate::telegram::events::{decode, InboundEvent, MessageEvent, ReactionEvent};
use crate::telegram::UpdateSource;

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);
const TOP_TAGS_SHOWN: usize = 10;

/// Long-polls inbound updates and dispatches commands and like reactions.
pub struct EventLoop {
    updates: Arc<dyn UpdateSource>,
    replies: Arc<dyn Transport>,
    settings: Arc<SettingsService>,
    learner: Arc<ReactionLearner>,
    orchestrator: Arc<DigestOrchestrator>,
    store: PreferenceStore,
    like_reactions: Vec<String>,
    poll_timeout_secs: u64,
}

impl EventLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        updates: Arc<dyn UpdateSource>,
        replies: Arc<dyn Transport>,
        settings: Arc<SettingsService>,
        learner: Arc<ReactionLearner>,
        orchestrator: Arc<DigestOrchestrator>,
        store: PreferenceStore,
        like_reactions: Vec<String>,
        poll_timeout_secs: u64,
    ) -> Self {
        Self {
            updates,
            replies,
            settings,
            learner,
            orchestrator,
            store,
            like_reactions: like_reactions.iter().map(|e| normalize_emoji(e)).collect(),
            poll_timeout_secs,
        }
    }

    pub async fn run(&self, shutdown: Shutdown) {
        info!("events: polling for updates");
        let mut offset = 0i64;

        loop {
            let polled = tokio::select! {
                _ = shutdown.triggered() => break,
                polled = self.updates.poll(offset, self.poll_timeout_secs) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let Some(event) = decode(update) else {
                            continue;
                        };
                        if let Err(e) = self.handle(event, &shutdown).await {
                            warn!(error = %e, "events: handler failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "events: polling failed, backing off");
                    tokio::select! {
                        _ = shutdown.triggered() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        info!("events: shutdown requested, stopping");
    }

    pub async fn handle(&self, event: InboundEvent, shutdown: &Shutdown) -> Result<()> {
        match event {
            InboundEvent::Message(message) => self.on_message(message, shutdown).await,
            InboundEvent::Reaction(reaction) => self.on_reaction(reaction).await,
        }
    }

    async fn on_reaction(&self, reaction: ReactionEvent) -> Result<()> {
        if self.settings.snapshot().recipient.as_deref() != Some(reaction.chat_id.as_str()) {
            debug!(chat_id = %reaction.chat_id, "events: reaction from foreign chat ignored");
            return Ok(());
        }
        let is_like = reaction
            .added
            .iter()
            .any(|e| self.like_reactions.contains(&normalize_emoji(e)));
        if !is_like {
            return Ok(());
        }

        let handle = DeliveryHandle::from(reaction.message_id);
        match self.learner.on_like(&handle).await? {
            LikeOutcome::Boosted { article_id, tags } => {
                info!(article_id, tags = ?tags, "events: like recorded");
            }
            outcome => debug!(?outcome, "events: like had no effect"),
        }
        Ok(())
    }

    async fn on_message(&self, message: MessageEvent, shutdown: &Shutdown) -> Result<()> {
        let Some(command) = Command::parse(&message.text) else {
            return Ok(());
        };
        let chat = message.chat_id.as_str();

        match self.settings.snapshot().recipient {
            None if command == Command::Start => {
                self.settings.set_recipient(chat).await?;
                info!(chat_id = chat, sender = ?message.sender, "events: bot claimed by chat");
                return self
                    .reply(chat, &format!("Welcome! Digests will be sent to this chat.\n\n{}", HELP_TEXT))
                    .await;
            }
            None => {
                debug!(chat_id = chat, "events: no recipient yet, only /start is accepted");
                return Ok(());
            }
            Some(ref recipient) if recipient != chat => {
                warn!(chat_id = chat, "events: command from foreign chat ignored");
                return Ok(());
            }
            Some(_) => {}
        }

        match command {
            Command::Start => self.reply(chat, &format!("Already set up.\n\n{}", HELP_TEXT)).await,
            Command::Help => self.reply(chat, HELP_TEXT).await,
            Command::Digest => {
                self.spawn_manual_digest(chat, shutdown);
                Ok(())
            }
            Command::SetTime(arg) => match self.settings.set_digest_time(&arg).await {
                Ok(time) => {
                    self.reply(chat, &format!("Daily digest time set to {}.", time.format("%H:%M")))
                        .await
                }
                Err(DigestError::InvalidArgument(_)) => self.reply(chat, "Usage: /settime HH:MM").await,
                Err(e) => Err(e),
            },
            Command::SetCount(arg) => {
                let applied = match parse_items_per_run(&arg) {
                    Ok(n) => self.settings.set_items_per_run(n).await.map(|_| n),
                    Err(e) => Err(e),
                };
                match applied {
                    Ok(n) => self.reply(chat, &format!("Digests will contain up to {} articles.", n)).await,
                    Err(DigestError::InvalidArgument(_)) => self.reply(chat, "Usage: /setcount N (1-50)").await,
                    Err(e) => Err(e),
                }
            }
            Command::Tags => {
                let tags = self.store.top_tags(TOP_TAGS_SHOWN).await?;
                let text = if tags.is_empty() {
                    "No preferences learned yet. React to articles you like.".to_string()
                } else {
                    let mut text = String::from("<b>Top topics</b>\n");
                    for t in &tags {
                        let _ = writeln!(text, "{} · {:.2} ({} likes)", escape_html(&t.tag), t.weight, t.occurrences);
                    }
                    text
                };
                self.reply(chat, &text).await
            }
            Command::Stats => {
                let stats = self.store.stats().await?;
                self.reply(
                    chat,
                    &format!(
                        "Articles sent: {}\nLikes: {}\nTopics tracked: {}",
                        stats.articles_sent, stats.likes, stats.tags
                    ),
                )
                .await
            }
            Command::Unknown(name) => {
                self.reply(chat, &format!("Unknown command /{}.\n\n{}", escape_html(&name), HELP_TEXT))
                    .await
            }
        }
    }

    fn spawn_manual_digest(&self, chat: &str, shutdown: &Shutdown) {
        let orchestrator = self.orchestrator.clone();
        let replies = self.replies.clone();
        let chat = chat.to_string();
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            let text = match orchestrator.run(Trigger::Manual, &shutdown).await {
                Ok(RunOutcome::Completed(report)) if report.sent.is_empty() => {
                    "Nothing new to send right now.".to_string()
                }
                Ok(RunOutcome::Completed(report)) => format!(
                    "Digest done: {} sent, {} failed.",
                    report.sent.len(),
                    report.failed_sends.len()
                ),
                Ok(RunOutcome::AlreadyRunning) => "A digest is already running.".to_string(),
                Ok(RunOutcome::NoRecipient) => "No recipient configured.".to_string(),
                Err(e) => {
                    warn!(error = %e, "events: manual digest failed");
                    "Digest failed, the feed may be unavailable. Try again later.".to_string()
                }
            };
            if let Err(e) = replies.deliver(&chat, &text).await {
                warn!(error = %e, "events: failed to report digest outcome");
            }
        });
    }

    async fn reply(&self, chat: &str, text: &str) -> Result<()> {
        self.replies.deliver(chat, text).await.map(|_| ())
    }
}

// Telegram sends ❤ without the emoji variation selector
fn normalize_emoji(e: &str) -> String {
    e.chars().filter(|c| *c != '\u{fe0f}').collect()
}
