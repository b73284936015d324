//! Combined ranking across several leaderboards
//!
//! An entity's member is built from its 0-based rank on every
//! sub-leaderboard, so byte order on members sorts by the first
//! sub-ranking, then the second, and so on, with the update time as the
//! last tie-break. Below, alice is 6th and 43rd:
//!
//! ```text
//! 005-042-8299999999999:alice
//! ```
//!
//! Ranks run `0..max_users`, which always fit the rank width. Members all
//! carry score 0. A recompute only replaces the stored member
//! when the new one sorts strictly before it, so a stale recompute never
//! pushes an entity down.

use crate::composite_key::{CompositeKeyFormat, RecencyOrder};
use crate::index::MemberIndex;
use crate::{Entry, Leaderboard, LeaderboardError, LeaderboardResult};
use async_trait::async_trait;
use futures::future::try_join_all;
use rank_store::{Clock, Order, RankStore, RankedPath};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

fn default_recency() -> RecencyOrder {
    RecencyOrder::LaterWins
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiMetricOptions {
    pub path: String,
    /// Upper bound on entities per sub-leaderboard; sets the rank width
    pub max_users: u64,
    #[serde(default = "default_recency")]
    pub recency: RecencyOrder,
}

impl MultiMetricOptions {
    pub fn new(path: impl Into<String>, max_users: u64) -> Self {
        Self {
            path: path.into(),
            max_users,
            recency: default_recency(),
        }
    }
}

pub struct MultiMetricLeaderboard {
    index: MemberIndex,
    clock: Arc<dyn Clock>,
    format: CompositeKeyFormat,
    subs: Vec<Arc<dyn Leaderboard>>,
}

impl MultiMetricLeaderboard {
    pub fn new(
        store: Arc<dyn RankStore>,
        clock: Arc<dyn Clock>,
        options: MultiMetricOptions,
        subs: Vec<Arc<dyn Leaderboard>>,
    ) -> LeaderboardResult<Self> {
        if subs.is_empty() {
            return Err(LeaderboardError::Configuration(format!(
                "multi-metric leaderboard {} needs at least one sub-leaderboard",
                options.path
            )));
        }
        let format = CompositeKeyFormat::new(subs.len(), options.max_users, options.recency)?;

        Ok(Self {
            index: MemberIndex::new(store, options.path, Order::Ascending, format.prefix_len()),
            clock,
            format,
            subs,
        })
    }

    pub fn format(&self) -> &CompositeKeyFormat {
        &self.format
    }

    pub fn subs(&self) -> &[Arc<dyn Leaderboard>] {
        &self.subs
    }

    pub fn ranked_path(&self) -> RankedPath {
        self.index.ranked()
    }

    /// Member `id` would get from the current sub-rankings, or `None` when
    /// it is missing from any of them.
    pub async fn candidate(&self, id: &str) -> LeaderboardResult<Option<String>> {
        let ranks = try_join_all(self.subs.iter().map(|sub| sub.rank(id))).await?;
        let Some(ranks) = ranks
            .into_iter()
            .map(|rank| rank.map(|rank| rank.saturating_sub(1)))
            .collect::<Option<Vec<u64>>>()
        else {
            return Ok(None);
        };

        let key = self.format.compose(ranks, self.clock.now_millis(), id);
        self.format.encode(&key).map(Some)
    }

    /// Recompute `id`'s combined member from its sub-ranks.
    ///
    /// Returns whether the stored member was replaced. Fails with
    /// [`LeaderboardError::PreconditionFailure`] without touching the store
    /// when `id` is missing from a sub-leaderboard.
    pub async fn update_rank(&self, id: &str) -> LeaderboardResult<bool> {
        let Some(member) = self.candidate(id).await? else {
            return Err(LeaderboardError::PreconditionFailure {
                id: id.to_string(),
                path: self.index.path().to_string(),
            });
        };

        let replaced = self
            .index
            .store()
            .replace_if_lower(&self.index.slot(id), &member)
            .await?;

        debug!(
            path = %self.index.path(),
            id = %id,
            member = %member,
            replaced,
            "Combined rank recomputed"
        );
        Ok(replaced)
    }
}

#[async_trait]
impl Leaderboard for MultiMetricLeaderboard {
    fn path(&self) -> &str {
        self.index.path()
    }

    fn order(&self) -> Order {
        self.index.order()
    }

    async fn peek(&self, id: &str) -> LeaderboardResult<Option<Entry>> {
        self.index.peek(id).await
    }

    async fn score(&self, id: &str) -> LeaderboardResult<Option<f64>> {
        self.index.score(id).await
    }

    async fn rank(&self, id: &str) -> LeaderboardResult<Option<u64>> {
        self.index.rank(id).await
    }

    async fn list(&self, low: u64, high: u64) -> LeaderboardResult<Vec<Entry>> {
        self.index.list(low, high).await
    }

    async fn around(
        &self,
        id: &str,
        distance: u64,
        fill_borders: bool,
    ) -> LeaderboardResult<Vec<Entry>> {
        self.index.around(id, distance, fill_borders).await
    }

    async fn count(&self) -> LeaderboardResult<u64> {
        self.index.count().await
    }

    async fn clear(&self) -> LeaderboardResult<()> {
        let removed = self.index.clear().await?;
        debug!(path = %self.index.path(), removed, "Cleared multi-metric leaderboard");
        Ok(())
    }
}
