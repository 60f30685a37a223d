use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::Result;
use crate::model::DeliveryHandle;
use crate::storage::PreferenceStore;

#[derive(Debug, Clone, PartialEq)]
pub enum LikeOutcome {
    /// The handle does not belong to any delivered article.
    Untracked,
    AlreadyLiked { article_id: i64 },
    Boosted { article_id: i64, tags: BTreeSet<String> },
}

/// Turns like reactions into tag-weight boosts, at most once per article.
pub struct ReactionLearner {
    store: PreferenceStore,
    clock: Arc<dyn Clock>,
    boost_amount: f64,
}

impl ReactionLearner {
    pub fn new(store: PreferenceStore, clock: Arc<dyn Clock>, boost_amount: f64) -> Self {
        Self {
            store,
            clock,
            boost_amount,
        }
    }

    pub async fn on_like(&self, handle: &DeliveryHandle) -> Result<LikeOutcome> {
        let article = match self.store.find_by_handle(handle).await {
            Ok(article) => article,
            Err(e) if e.is_not_found() => {
                debug!(handle = %handle, "feedback: like on untracked message");
                return Ok(LikeOutcome::Untracked);
            }
            Err(e) => return Err(e),
        };

        let recorded = self
            .store
            .record_like_and_boost(article.id, self.clock.now(), &article.tags, self.boost_amount)
            .await?;
        if !recorded {
            debug!(article_id = article.id, "feedback: already liked");
            return Ok(LikeOutcome::AlreadyLiked { article_id: article.id });
        }

        info!(
            article_id = article.id,
            tags = article.tags.len(),
            "feedback: boosted tags from like"
        );
        Ok(LikeOutcome::Boosted {
            article_id: article.id,
            tags: article.tags,
        })
    }
}
