//! Time-windowed leaderboards
//!
//! A periodic leaderboard owns one board per window at `<base>:<bucket key>`.
//! The board for "now" is cached and replaced lazily: each access compares
//! the current bucket key with the cached one, no timer involved.

use crate::composite_key::RecencyOrder;
use crate::{
    Leaderboard, LeaderboardError, LeaderboardResult, MultiMetricLeaderboard, MultiMetricOptions,
    RecencyLeaderboard, RecencyOptions,
};
use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use rank_store::{Clock, RankStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Length of one leaderboard cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cadence {
    Minute,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    #[default]
    AllTime,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Minute => "minute",
            Cadence::Hourly => "hourly",
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
            Cadence::Yearly => "yearly",
            Cadence::AllTime => "all-time",
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = LeaderboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(Cadence::Minute),
            "hourly" => Ok(Cadence::Hourly),
            "daily" => Ok(Cadence::Daily),
            "weekly" => Ok(Cadence::Weekly),
            "monthly" => Ok(Cadence::Monthly),
            "yearly" => Ok(Cadence::Yearly),
            "all-time" => Ok(Cadence::AllTime),
            other => Err(LeaderboardError::Configuration(format!(
                "unknown cadence: {}",
                other
            ))),
        }
    }
}

/// Window key for `at` (UTC)
///
/// | Cadence | Key |
/// |---|---|
/// | all-time | `all` |
/// | yearly | `2024` |
/// | monthly | `2024-01` |
/// | weekly | `2024-w01` (ISO week-numbering year and week) |
/// | daily | `2024-01-01` |
/// | hourly | `2024-01-01-10` |
/// | minute | `2024-01-01-10-05` |
pub fn bucket_key(cadence: Cadence, at: DateTime<Utc>) -> String {
    match cadence {
        Cadence::AllTime => "all".to_string(),
        Cadence::Yearly => at.format("%Y").to_string(),
        Cadence::Monthly => at.format("%Y-%m").to_string(),
        Cadence::Weekly => {
            let week = at.iso_week();
            format!("{}-w{:02}", week.year(), week.week())
        }
        Cadence::Daily => at.format("%Y-%m-%d").to_string(),
        Cadence::Hourly => at.format("%Y-%m-%d-%H").to_string(),
        Cadence::Minute => at.format("%Y-%m-%d-%H-%M").to_string(),
    }
}

/// Builds the board that lives at one window path.
pub trait WindowBuilder: Send + Sync {
    type Board: Leaderboard + 'static;

    fn build(&self, path: &str, at: DateTime<Utc>) -> LeaderboardResult<Self::Board>;
}

/// Object-safe view of a periodic leaderboard, used to feed windows of one
/// periodic leaderboard into another.
pub trait WindowSource: Send + Sync {
    fn window_at(&self, at: DateTime<Utc>) -> LeaderboardResult<Arc<dyn Leaderboard>>;
}

/// [`RecencyLeaderboard`] windows sharing one set of options
pub struct RecencyWindows {
    store: Arc<dyn RankStore>,
    clock: Arc<dyn Clock>,
    options: RecencyOptions,
}

impl RecencyWindows {
    /// `options.path` is replaced by each window's path
    pub fn new(store: Arc<dyn RankStore>, clock: Arc<dyn Clock>, options: RecencyOptions) -> Self {
        Self {
            store,
            clock,
            options,
        }
    }
}

impl WindowBuilder for RecencyWindows {
    type Board = RecencyLeaderboard;

    fn build(&self, path: &str, _at: DateTime<Utc>) -> LeaderboardResult<RecencyLeaderboard> {
        Ok(RecencyLeaderboard::new(
            self.store.clone(),
            self.clock.clone(),
            self.options.with_path(path),
        ))
    }
}

/// [`MultiMetricLeaderboard`] windows over the same-instant windows of
/// other periodic leaderboards
pub struct MultiMetricWindows {
    store: Arc<dyn RankStore>,
    clock: Arc<dyn Clock>,
    max_users: u64,
    recency: RecencyOrder,
    subs: Vec<Arc<dyn WindowSource>>,
}

impl MultiMetricWindows {
    pub fn new(
        store: Arc<dyn RankStore>,
        clock: Arc<dyn Clock>,
        max_users: u64,
        subs: Vec<Arc<dyn WindowSource>>,
    ) -> LeaderboardResult<Self> {
        if subs.is_empty() {
            return Err(LeaderboardError::Configuration(
                "periodic multi-metric leaderboard needs at least one sub-leaderboard".to_string(),
            ));
        }

        Ok(Self {
            store,
            clock,
            max_users,
            recency: RecencyOrder::LaterWins,
            subs,
        })
    }

    pub fn with_recency(mut self, recency: RecencyOrder) -> Self {
        self.recency = recency;
        self
    }
}

impl WindowBuilder for MultiMetricWindows {
    type Board = MultiMetricLeaderboard;

    fn build(&self, path: &str, at: DateTime<Utc>) -> LeaderboardResult<MultiMetricLeaderboard> {
        let subs = self
            .subs
            .iter()
            .map(|sub| sub.window_at(at))
            .collect::<LeaderboardResult<Vec<_>>>()?;

        MultiMetricLeaderboard::new(
            self.store.clone(),
            self.clock.clone(),
            MultiMetricOptions {
                path: path.to_string(),
                max_users: self.max_users,
                recency: self.recency,
            },
            subs,
        )
    }
}

enum WindowCache<T> {
    Uncached,
    Cached { key: String, board: Arc<T> },
}

pub struct PeriodicLeaderboard<B: WindowBuilder> {
    base: String,
    cadence: Cadence,
    clock: Arc<dyn Clock>,
    builder: B,
    current: Mutex<WindowCache<B::Board>>,
}

impl<B: WindowBuilder> PeriodicLeaderboard<B> {
    pub fn new(base: impl Into<String>, cadence: Cadence, clock: Arc<dyn Clock>, builder: B) -> Self {
        Self {
            base: base.into(),
            cadence,
            clock,
            builder,
            current: Mutex::new(WindowCache::Uncached),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    pub fn key(&self, at: DateTime<Utc>) -> String {
        bucket_key(self.cadence, at)
    }

    pub fn current_key(&self) -> String {
        self.key(self.clock.now())
    }

    fn window_path(&self, key: &str) -> String {
        format!("{}:{}", self.base, key)
    }

    /// A fresh board for the window containing `at`
    pub fn get(&self, at: DateTime<Utc>) -> LeaderboardResult<B::Board> {
        self.builder.build(&self.window_path(&self.key(at)), at)
    }

    /// The board for "now". Repeated calls within one window return the same
    /// instance.
    pub fn get_current(&self) -> LeaderboardResult<Arc<B::Board>> {
        let now = self.clock.now();
        let key = self.key(now);

        let mut current = self.current.lock();
        if let WindowCache::Cached { key: cached, board } = &*current {
            if *cached == key {
                return Ok(board.clone());
            }
        }

        let board = Arc::new(self.builder.build(&self.window_path(&key), now)?);
        if let WindowCache::Cached { key: previous, .. } = &*current {
            info!(base = %self.base, from = %previous, to = %key, "Leaderboard window rolled over");
        }
        *current = WindowCache::Cached {
            key,
            board: board.clone(),
        };
        Ok(board)
    }

    pub async fn clear(&self, at: DateTime<Utc>) -> LeaderboardResult<()> {
        self.get(at)?.clear().await
    }

    pub async fn clear_current(&self) -> LeaderboardResult<()> {
        self.get_current()?.clear().await
    }
}

impl<B: WindowBuilder> WindowSource for PeriodicLeaderboard<B> {
    fn window_at(&self, at: DateTime<Utc>) -> LeaderboardResult<Arc<dyn Leaderboard>> {
        if self.key(at) == self.current_key() {
            return Ok(self.get_current()?);
        }
        Ok(Arc::new(self.get(at)?))
    }
}
