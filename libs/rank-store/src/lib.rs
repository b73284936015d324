//! Sorted-set store for ranking structures
//!
//! Provides the storage surface the leaderboard layers are written against:
//! - Sorted-set primitives (members ordered by score, ties broken by member)
//! - A key-value facility for per-entity pointer records
//! - Named procedures that run server-side as one atomic unit
//! - An injectable clock
//!
//! Two backends implement the surface: [`RedisStore`] (sorted sets plus Lua
//! scripts) and [`MemoryStore`] (in-process, every call serialised behind one
//! lock).
//!
//! # Pointer records
//!
//! ```text
//! <path>             → sorted set of encoded members
//! <path>/ids/<id>    → the member currently representing <id> in <path>
//! ```

mod clock;
mod config;
mod error;
mod memory;
mod pool;
mod redis_store;
mod scripts;

pub mod keys;
pub mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use pool::{RedisPool, SharedConnectionManager};
pub use redis_store::RedisStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Direction in which a structure is ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    /// Rank 0 holds the lowest score
    Ascending,
    /// Rank 0 holds the highest score
    Descending,
}

impl Order {
    pub fn from_low_to_high(low_to_high: bool) -> Self {
        if low_to_high {
            Order::Ascending
        } else {
            Order::Descending
        }
    }

    pub fn is_ascending(self) -> bool {
        matches!(self, Order::Ascending)
    }

    /// True when `candidate` ranks strictly ahead of `current`.
    pub fn improves(self, candidate: f64, current: f64) -> bool {
        match self {
            Order::Ascending => candidate < current,
            Order::Descending => candidate > current,
        }
    }
}

/// One command of a best-effort pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOp {
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    ZRem {
        key: String,
        member: String,
    },
    Set {
        key: String,
        value: String,
    },
    Del {
        key: String,
    },
}

/// An ordered index together with the pointer record of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSlot {
    pub path: String,
    pub pointer: String,
}

impl IndexSlot {
    pub fn new(path: &str, id: &str) -> Self {
        Self {
            path: path.to_string(),
            pointer: keys::pointer_key(path, id),
        }
    }
}

/// A structure to rank by, and how entity ids are recovered from its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedPath {
    pub path: String,
    pub order: Order,
    /// Number of leading characters to strip from a member to get its id
    pub prefix_len: usize,
}

/// One ranked entity with its scores in each requested structure.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub id: String,
    pub scores: Vec<Option<f64>>,
}

/// Result of the multi-structure retrieval procedures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreTable {
    /// 0-based position of the first row in the ranked structure
    pub start: u64,
    pub rows: Vec<ScoreRow>,
}

impl ScoreTable {
    /// Assemble rows from the column-major layout the scripts return.
    pub fn from_columns(start: u64, ids: Vec<String>, columns: Vec<Vec<Option<f64>>>) -> Self {
        let rows = ids
            .into_iter()
            .enumerate()
            .map(|(row, id)| ScoreRow {
                id,
                scores: columns
                    .iter()
                    .map(|column| column.get(row).copied().flatten())
                    .collect(),
            })
            .collect();
        Self { start, rows }
    }
}

/// Sorted-set and key-value primitives.
#[async_trait]
pub trait SortedSetStore: Send + Sync {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// Returns whether the member existed
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    /// 0-based rank of a member in the given direction
    async fn zrank(&self, key: &str, member: &str, order: Order) -> StoreResult<Option<u64>>;

    /// Members between two 0-based ranks (inclusive), with scores
    async fn zrange(
        &self,
        key: &str,
        start: u64,
        stop: u64,
        order: Order,
    ) -> StoreResult<Vec<(String, f64)>>;

    /// Every member, lowest score first
    async fn zmembers(&self, key: &str) -> StoreResult<Vec<String>>;

    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Store `value` and return what was there before
    async fn getset(&self, key: &str, value: &str) -> StoreResult<Option<String>>;

    /// Returns the number of keys removed
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    /// Send several mutations in one round trip. Not atomic.
    async fn pipeline(&self, ops: Vec<PipelineOp>) -> StoreResult<()>;
}

/// Server-side procedures. Each call executes as one indivisible unit.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Insert `member` with `score`, retiring the entity's previous member.
    async fn recency_add(&self, slot: &IndexSlot, member: &str, score: f64) -> StoreResult<()>;

    /// Replace the entity's member only when `score` improves on the stored
    /// score (or nothing is stored). Returns whether a replacement happened.
    async fn recency_improve(
        &self,
        slot: &IndexSlot,
        member: &str,
        score: f64,
        order: Order,
    ) -> StoreResult<bool>;

    /// Replace the entity's member with one scored `previous + delta`.
    /// Returns the resulting score.
    async fn recency_incr(&self, slot: &IndexSlot, member: &str, delta: f64) -> StoreResult<f64>;

    /// Remove the entity's member and pointer. Returns whether one existed.
    async fn recency_remove(&self, slot: &IndexSlot) -> StoreResult<bool>;

    /// Delete the pointer record of every member, then the structure itself.
    /// Returns the number of members found.
    async fn clear_indexed(&self, path: &str, prefix_len: usize) -> StoreResult<u64>;

    /// Insert `member` with score 0 when nothing is stored for the entity or
    /// `member` sorts strictly before the stored one. Returns whether it did.
    async fn replace_if_lower(&self, slot: &IndexSlot, member: &str) -> StoreResult<bool>;

    /// Score of one entity in each of `paths`.
    async fn retrieve_entity(&self, paths: &[String], id: &str) -> StoreResult<Vec<Option<f64>>>;

    /// Entities ranked `start..=stop` in `ranked`, with their scores in each
    /// of `score_paths`.
    async fn retrieve_range(
        &self,
        ranked: &RankedPath,
        score_paths: &[String],
        start: u64,
        stop: u64,
    ) -> StoreResult<ScoreTable>;

    /// Entities around `id` in `ranked` (see [`window::around_window`]), with
    /// their scores in each of `score_paths`. `None` when `id` is not ranked.
    async fn retrieve_around(
        &self,
        ranked: &RankedPath,
        id: &str,
        distance: u64,
        fill_borders: bool,
        score_paths: &[String],
    ) -> StoreResult<Option<ScoreTable>>;
}

/// Everything a leaderboard needs from its backing store.
pub trait RankStore: SortedSetStore + ScriptExecutor {}

impl<T: SortedSetStore + ScriptExecutor + ?Sized> RankStore for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_improves() {
        assert!(Order::Ascending.improves(1.0, 2.0));
        assert!(!Order::Ascending.improves(2.0, 2.0));
        assert!(Order::Descending.improves(3.0, 2.0));
        assert!(!Order::Descending.improves(1.0, 2.0));
    }

    #[test]
    fn test_score_table_from_columns() {
        let table = ScoreTable::from_columns(
            4,
            vec!["a".to_string(), "b".to_string()],
            vec![vec![Some(1.0), None], vec![Some(5.0), Some(6.0)]],
        );
        assert_eq!(table.start, 4);
        assert_eq!(table.rows[0].scores, vec![Some(1.0), Some(5.0)]);
        assert_eq!(table.rows[1].scores, vec![None, Some(6.0)]);
    }

    #[test]
    fn test_index_slot_pointer() {
        let slot = IndexSlot::new("board", "alice");
        assert_eq!(slot.path, "board");
        assert_eq!(slot.pointer, "board/ids/alice");
    }
}
