//! Composable leaderboards over a sorted-set store
//!
//! Layers, each wrapping the one below through the [`Leaderboard`] trait:
//! - [`RecencyLeaderboard`]: one live member per entity, ties broken by update time
//! - [`MultiMetricLeaderboard`]: lexicographic ranking across several leaderboards
//! - [`PeriodicLeaderboard`]: one leaderboard per time window, rotated on access
//! - [`LeaderboardMatrix`]: (dimension, feature) grid with a combined `allMetrics` view
//!
//! All coordination state lives in the store; see [`rank_store`] for the
//! Redis and in-memory backends.

mod composite_key;
mod config;
mod error;
mod index;
mod matrix;
mod multi_metric;
mod periodic;
mod recency;

pub use composite_key::{digits_for, CompositeKey, CompositeKeyFormat, RecencyOrder};
pub use config::{DimensionDefinition, FeatureDefinition, MatrixOptions};
pub use error::{LeaderboardError, LeaderboardResult};
pub use matrix::{LeaderboardMatrix, MatrixCell, MatrixEntry, ALL_METRICS};
pub use multi_metric::{MultiMetricLeaderboard, MultiMetricOptions};
pub use periodic::{
    bucket_key, Cadence, MultiMetricWindows, PeriodicLeaderboard, RecencyWindows, WindowBuilder,
    WindowSource,
};
pub use recency::{RecencyLeaderboard, RecencyOptions, UpdateMode};

use async_trait::async_trait;
use rank_store::Order;
use serde::{Deserialize, Serialize};

/// One ranked entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub score: f64,
    /// 1-based
    pub rank: u64,
}

/// Read side of a ranking structure.
///
/// Ranks are 1-based. A missing entity is `None` (or an empty list), never
/// an error.
#[async_trait]
pub trait Leaderboard: Send + Sync {
    /// Key of the backing sorted set
    fn path(&self) -> &str;

    fn order(&self) -> Order;

    async fn peek(&self, id: &str) -> LeaderboardResult<Option<Entry>>;

    async fn score(&self, id: &str) -> LeaderboardResult<Option<f64>>;

    async fn rank(&self, id: &str) -> LeaderboardResult<Option<u64>>;

    /// Entries ranked `low..=high`
    async fn list(&self, low: u64, high: u64) -> LeaderboardResult<Vec<Entry>>;

    async fn top(&self, max: u64) -> LeaderboardResult<Vec<Entry>> {
        self.list(1, max).await
    }

    /// Up to `distance` entries on each side of `id`. With `fill_borders`
    /// the window is shifted away from the ends of the board so it keeps
    /// its full size.
    async fn around(
        &self,
        id: &str,
        distance: u64,
        fill_borders: bool,
    ) -> LeaderboardResult<Vec<Entry>>;

    async fn count(&self) -> LeaderboardResult<u64>;

    /// Remove every entry together with its pointer record
    async fn clear(&self) -> LeaderboardResult<()>;
}

/// Write side, for leaderboards whose scores are set directly.
#[async_trait]
pub trait MutableLeaderboard: Leaderboard {
    async fn add(&self, id: &str, score: f64) -> LeaderboardResult<()>;

    /// Store `score` only if it beats the current one. Returns whether it did.
    async fn improve(&self, id: &str, score: f64) -> LeaderboardResult<bool>;

    /// Returns the resulting score
    async fn incr(&self, id: &str, amount: f64) -> LeaderboardResult<f64>;

    async fn remove(&self, id: &str) -> LeaderboardResult<()>;
}
