//! Recency-ordered leaderboard
//!
//! Each entity owns one member `<recency>:<id>`, where the 13-digit recency
//! field breaks ties between equal scores. A new submission writes a fresh
//! member and retires the previous one found through the pointer record.
//!
//! Two mutation paths:
//! - [`UpdateMode::Atomic`] runs every read-compute-replace as one store
//!   procedure.
//! - [`UpdateMode::Pipelined`] reads the pointer, then sends the replace as a
//!   batch. Two concurrent submissions for the same entity can both read the
//!   same pointer and leave an orphaned member behind. Kept for stores
//!   without a procedure facility; do not use it under concurrent writers.

use crate::composite_key::{CompositeKeyFormat, RecencyOrder};
use crate::index::MemberIndex;
use crate::{Entry, Leaderboard, LeaderboardResult, MutableLeaderboard};
use async_trait::async_trait;
use rank_store::{Clock, IndexSlot, Order, PipelineOp, RankStore, RankedPath};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

fn default_earlier_wins() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    #[default]
    Atomic,
    Pipelined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecencyOptions {
    pub path: String,
    /// Rank 1 holds the lowest score
    #[serde(default)]
    pub low_to_high: bool,
    /// On equal scores the entity that reached the score first ranks ahead
    #[serde(default = "default_earlier_wins")]
    pub earlier_wins: bool,
    #[serde(default)]
    pub mode: UpdateMode,
}

impl RecencyOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            low_to_high: false,
            earlier_wins: default_earlier_wins(),
            mode: UpdateMode::default(),
        }
    }

    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }
}

pub struct RecencyLeaderboard {
    index: MemberIndex,
    clock: Arc<dyn Clock>,
    format: CompositeKeyFormat,
    mode: UpdateMode,
}

impl RecencyLeaderboard {
    pub fn new(store: Arc<dyn RankStore>, clock: Arc<dyn Clock>, options: RecencyOptions) -> Self {
        let order = Order::from_low_to_high(options.low_to_high);
        let recency = RecencyOrder::from_earlier_wins(options.earlier_wins);
        // Descending ranges list equal scores in reverse byte order.
        let recency = match order {
            Order::Ascending => recency,
            Order::Descending => recency.reversed(),
        };
        let format = CompositeKeyFormat::recency_only(recency);

        Self {
            index: MemberIndex::new(store, options.path, order, format.prefix_len()),
            clock,
            format,
            mode: options.mode,
        }
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub fn ranked_path(&self) -> RankedPath {
        self.index.ranked()
    }

    fn fresh_member(&self, id: &str) -> LeaderboardResult<String> {
        let key = self
            .format
            .compose(Vec::new(), self.clock.now_millis(), id);
        self.format.encode(&key)
    }

    /// Current member and its score, read without any guard
    async fn current(&self, slot: &IndexSlot) -> LeaderboardResult<Option<(String, Option<f64>)>> {
        let store = self.index.store();
        let Some(member) = store.get(&slot.pointer).await? else {
            return Ok(None);
        };
        let score = store.zscore(&slot.path, &member).await?;
        Ok(Some((member, score)))
    }

    async fn replace_pipelined(
        &self,
        slot: IndexSlot,
        previous: Option<String>,
        member: String,
        score: f64,
    ) -> LeaderboardResult<()> {
        let mut ops = Vec::with_capacity(3);
        if let Some(previous) = previous {
            ops.push(PipelineOp::ZRem {
                key: slot.path.clone(),
                member: previous,
            });
        }
        ops.push(PipelineOp::ZAdd {
            key: slot.path,
            member: member.clone(),
            score,
        });
        ops.push(PipelineOp::Set {
            key: slot.pointer,
            value: member,
        });
        self.index.store().pipeline(ops).await?;
        Ok(())
    }
}

#[async_trait]
impl Leaderboard for RecencyLeaderboard {
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
        debug!(path = %self.index.path(), removed, "Cleared recency leaderboard");
        Ok(())
    }
}

#[async_trait]
impl MutableLeaderboard for RecencyLeaderboard {
    async fn add(&self, id: &str, score: f64) -> LeaderboardResult<()> {
        let slot = self.index.slot(id);
        let member = self.fresh_member(id)?;

        match self.mode {
            UpdateMode::Atomic => {
                self.index.store().recency_add(&slot, &member, score).await?;
            }
            UpdateMode::Pipelined => {
                let previous = self.index.store().getset(&slot.pointer, &member).await?;
                let mut ops = Vec::with_capacity(2);
                if let Some(previous) = previous {
                    ops.push(PipelineOp::ZRem {
                        key: slot.path.clone(),
                        member: previous,
                    });
                }
                ops.push(PipelineOp::ZAdd {
                    key: slot.path,
                    member,
                    score,
                });
                self.index.store().pipeline(ops).await?;
            }
        }
        Ok(())
    }

    async fn improve(&self, id: &str, score: f64) -> LeaderboardResult<bool> {
        let slot = self.index.slot(id);
        let member = self.fresh_member(id)?;
        let order = self.index.order();

        match self.mode {
            UpdateMode::Atomic => Ok(self
                .index
                .store()
                .recency_improve(&slot, &member, score, order)
                .await?),
            UpdateMode::Pipelined => {
                let current = self.current(&slot).await?;
                if let Some((_, Some(current))) = &current {
                    if !order.improves(score, *current) {
                        return Ok(false);
                    }
                }
                let previous = current.map(|(member, _)| member);
                self.replace_pipelined(slot, previous, member, score).await?;
                Ok(true)
            }
        }
    }

    async fn incr(&self, id: &str, amount: f64) -> LeaderboardResult<f64> {
        let slot = self.index.slot(id);
        let member = self.fresh_member(id)?;

        match self.mode {
            UpdateMode::Atomic => Ok(self
                .index
                .store()
                .recency_incr(&slot, &member, amount)
                .await?),
            UpdateMode::Pipelined => {
                let current = self.current(&slot).await?;
                let score = current.as_ref().and_then(|(_, score)| *score).unwrap_or(0.0) + amount;
                let previous = current.map(|(member, _)| member);
                self.replace_pipelined(slot, previous, member, score).await?;
                Ok(score)
            }
        }
    }

    async fn remove(&self, id: &str) -> LeaderboardResult<()> {
        let slot = self.index.slot(id);

        match self.mode {
            UpdateMode::Atomic => {
                self.index.store().recency_remove(&slot).await?;
            }
            UpdateMode::Pipelined => {
                let Some(previous) = self.index.store().get(&slot.pointer).await? else {
                    return Ok(());
                };
                self.index
                    .store()
                    .pipeline(vec![
                        PipelineOp::Del { key: slot.pointer },
                        PipelineOp::ZRem {
                            key: slot.path,
                            member: previous,
                        },
                    ])
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rank_store::{ManualClock, MemoryStore, SortedSetStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
            Self {
                store: Arc::new(MemoryStore::new()),
                clock: Arc::new(ManualClock::new(start)),
            }
        }

        fn board(&self, options: RecencyOptions) -> RecencyLeaderboard {
            RecencyLeaderboard::new(self.store.clone(), self.clock.clone(), options)
        }

        fn tick(&self) {
            self.clock.advance(Duration::milliseconds(10));
        }
    }

    fn options(mode: UpdateMode) -> RecencyOptions {
        RecencyOptions {
            mode,
            ..RecencyOptions::new("lb")
        }
    }

    #[tokio::test]
    async fn test_add_replaces_previous_member() {
        for mode in [UpdateMode::Atomic, UpdateMode::Pipelined] {
            let fx = Fixture::new();
            let board = fx.board(options(mode));

            board.add("alice", 10.0).await.unwrap();
            fx.tick();
            board.add("alice", 25.0).await.unwrap();

            assert_eq!(fx.store.zcard("lb").await.unwrap(), 1);
            assert_eq!(board.score("alice").await.unwrap(), Some(25.0));
            assert_eq!(board.rank("alice").await.unwrap(), Some(1));
        }
    }

    #[tokio::test]
    async fn test_improve_only_on_strictly_better() {
        for mode in [UpdateMode::Atomic, UpdateMode::Pipelined] {
            let fx = Fixture::new();
            let board = fx.board(options(mode));

            assert!(board.improve("bob", 10.0).await.unwrap());
            fx.tick();
            assert!(!board.improve("bob", 10.0).await.unwrap());
            assert!(!board.improve("bob", 5.0).await.unwrap());
            assert!(board.improve("bob", 11.0).await.unwrap());
            assert_eq!(board.score("bob").await.unwrap(), Some(11.0));
        }
    }

    #[tokio::test]
    async fn test_improve_low_to_high() {
        let fx = Fixture::new();
        let board = fx.board(RecencyOptions {
            low_to_high: true,
            ..RecencyOptions::new("laps")
        });

        assert!(board.improve("carol", 61.2).await.unwrap());
        assert!(!board.improve("carol", 62.0).await.unwrap());
        assert!(board.improve("carol", 59.9).await.unwrap());
        assert_eq!(board.score("carol").await.unwrap(), Some(59.9));
    }

    #[tokio::test]
    async fn test_incr_accumulates() {
        for mode in [UpdateMode::Atomic, UpdateMode::Pipelined] {
            let fx = Fixture::new();
            let board = fx.board(options(mode));

            assert_eq!(board.incr("dave", 3.0).await.unwrap(), 3.0);
            fx.tick();
            assert_eq!(board.incr("dave", 4.5).await.unwrap(), 7.5);
            assert_eq!(board.score("dave").await.unwrap(), Some(7.5));
            assert_eq!(fx.store.zcard("lb").await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_remove_drops_member_and_pointer() {
        for mode in [UpdateMode::Atomic, UpdateMode::Pipelined] {
            let fx = Fixture::new();
            let board = fx.board(options(mode));

            board.add("erin", 1.0).await.unwrap();
            board.remove("erin").await.unwrap();
            board.remove("erin").await.unwrap();

            assert_eq!(board.peek("erin").await.unwrap(), None);
            assert_eq!(fx.store.key_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_earlier_wins_on_equal_scores() {
        let fx = Fixture::new();
        let board = fx.board(RecencyOptions::new("lb"));

        board.add("first", 50.0).await.unwrap();
        fx.tick();
        board.add("second", 50.0).await.unwrap();
        board.add("top", 80.0).await.unwrap();

        let ids: Vec<_> = board
            .top(10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["top", "first", "second"]);
    }

    #[tokio::test]
    async fn test_later_wins_on_equal_scores() {
        for low_to_high in [false, true] {
            let fx = Fixture::new();
            let board = fx.board(RecencyOptions {
                low_to_high,
                earlier_wins: false,
                ..RecencyOptions::new("lb")
            });

            board.add("first", 50.0).await.unwrap();
            fx.tick();
            board.add("second", 50.0).await.unwrap();

            assert_eq!(board.rank("second").await.unwrap(), Some(1));
            assert_eq!(board.rank("first").await.unwrap(), Some(2));
        }
    }

    #[tokio::test]
    async fn test_around_and_clear() {
        let fx = Fixture::new();
        let board = fx.board(RecencyOptions::new("lb"));
        for (i, id) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            board.add(id, 100.0 - i as f64).await.unwrap();
        }

        let around: Vec<_> = board
            .around("a", 1, true)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.id, e.rank))
            .collect();
        assert_eq!(
            around,
            vec![("a".to_string(), 1), ("b".to_string(), 2), ("c".to_string(), 3)]
        );

        board.clear().await.unwrap();
        assert_eq!(board.count().await.unwrap(), 0);
        assert_eq!(fx.store.key_count(), 0);
    }

    #[test]
    fn test_options_deserialize_defaults() {
        let options: RecencyOptions = serde_json::from_str(r#"{"path":"lb"}"#).unwrap();
        assert!(!options.low_to_high);
        assert!(options.earlier_wins);
        assert_eq!(options.mode, UpdateMode::Atomic);

        let options: RecencyOptions =
            serde_json::from_str(r#"{"path":"lb","mode":"pipelined"}"#).unwrap();
        assert_eq!(options.mode, UpdateMode::Pipelined);
    }
}
