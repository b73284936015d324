//! Grid of leaderboards indexed by (dimension, feature)
//!
//! Each dimension has its own cadence; each feature its own ordering. Every
//! dimension also gets a synthetic [`ALL_METRICS`] feature: a multi-metric
//! leaderboard over the dimension's other features, recomputed after every
//! write.
//!
//! Cells are created on first access and live at
//! `<path>:<dimension>:<feature>:<window>`. Multi-feature reads go through a
//! single store procedure so every column comes from the same snapshot.

use crate::periodic::{RecencyWindows, WindowBuilder, WindowSource};
use crate::{
    Entry, Leaderboard, LeaderboardError, LeaderboardResult, MatrixOptions, MultiMetricLeaderboard,
    MultiMetricWindows, MutableLeaderboard, PeriodicLeaderboard, RecencyLeaderboard,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rank_store::{Clock, Order, RankStore, RankedPath, ScoreTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Name of the synthetic combined-ranking feature
pub const ALL_METRICS: &str = "allMetrics";

type FeatureWindows = PeriodicLeaderboard<RecencyWindows>;
type CombinedWindows = PeriodicLeaderboard<MultiMetricWindows>;

/// One row of a matrix read. Serialises flat:
/// `{"id": "u1", "rank": 1, "wins": 10.0, "losses": 2.0}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixEntry {
    pub id: String,
    /// 1-based rank on the feature the read was ranked by; 0 when unranked
    pub rank: u64,
    #[serde(flatten)]
    pub scores: BTreeMap<String, f64>,
}

/// The leaderboard behind one (dimension, feature) window
#[derive(Clone)]
pub enum MatrixCell {
    Feature(Arc<RecencyLeaderboard>),
    Combined(Arc<MultiMetricLeaderboard>),
}

impl MatrixCell {
    fn board(&self) -> &dyn Leaderboard {
        match self {
            MatrixCell::Feature(board) => board.as_ref(),
            MatrixCell::Combined(board) => board.as_ref(),
        }
    }

    pub fn is_combined(&self) -> bool {
        matches!(self, MatrixCell::Combined(_))
    }

    pub fn ranked_path(&self) -> RankedPath {
        match self {
            MatrixCell::Feature(board) => board.ranked_path(),
            MatrixCell::Combined(board) => board.ranked_path(),
        }
    }

    /// Recompute the combined rank of `id`; only valid on the combined cell
    pub async fn update_rank(&self, id: &str) -> LeaderboardResult<bool> {
        match self {
            MatrixCell::Combined(board) => board.update_rank(id).await,
            MatrixCell::Feature(board) => Err(LeaderboardError::NotSupported(format!(
                "{} is not a combined leaderboard",
                board.path()
            ))),
        }
    }

    fn feature(&self) -> LeaderboardResult<&RecencyLeaderboard> {
        match self {
            MatrixCell::Feature(board) => Ok(board.as_ref()),
            MatrixCell::Combined(board) => Err(LeaderboardError::NotSupported(format!(
                "{} is derived from the other features and cannot be written",
                board.path()
            ))),
        }
    }
}

#[async_trait]
impl Leaderboard for MatrixCell {
    fn path(&self) -> &str {
        self.board().path()
    }

    fn order(&self) -> Order {
        self.board().order()
    }

    async fn peek(&self, id: &str) -> LeaderboardResult<Option<Entry>> {
        self.board().peek(id).await
    }

    async fn score(&self, id: &str) -> LeaderboardResult<Option<f64>> {
        self.board().score(id).await
    }

    async fn rank(&self, id: &str) -> LeaderboardResult<Option<u64>> {
        self.board().rank(id).await
    }

    async fn list(&self, low: u64, high: u64) -> LeaderboardResult<Vec<Entry>> {
        self.board().list(low, high).await
    }

    async fn around(
        &self,
        id: &str,
        distance: u64,
        fill_borders: bool,
    ) -> LeaderboardResult<Vec<Entry>> {
        self.board().around(id, distance, fill_borders).await
    }

    async fn count(&self) -> LeaderboardResult<u64> {
        self.board().count().await
    }

    async fn clear(&self) -> LeaderboardResult<()> {
        self.board().clear().await
    }
}

#[async_trait]
impl MutableLeaderboard for MatrixCell {
    async fn add(&self, id: &str, score: f64) -> LeaderboardResult<()> {
        self.feature()?.add(id, score).await
    }

    async fn improve(&self, id: &str, score: f64) -> LeaderboardResult<bool> {
        self.feature()?.improve(id, score).await
    }

    async fn incr(&self, id: &str, amount: f64) -> LeaderboardResult<f64> {
        self.feature()?.incr(id, amount).await
    }

    async fn remove(&self, id: &str) -> LeaderboardResult<()> {
        self.feature()?.remove(id).await
    }
}

#[derive(Debug, Clone, Copy)]
enum FeatureWrite {
    Add,
    Incr,
    Improve,
}

fn window_for<B: WindowBuilder>(
    windows: &PeriodicLeaderboard<B>,
    at: Option<DateTime<Utc>>,
) -> LeaderboardResult<Arc<B::Board>> {
    match at {
        Some(at) => Ok(Arc::new(windows.get(at)?)),
        None => windows.get_current(),
    }
}

pub struct LeaderboardMatrix {
    store: Arc<dyn RankStore>,
    clock: Arc<dyn Clock>,
    options: MatrixOptions,
    features: DashMap<(usize, usize), Arc<FeatureWindows>>,
    combined: DashMap<usize, Arc<CombinedWindows>>,
}

impl LeaderboardMatrix {
    pub fn new(
        store: Arc<dyn RankStore>,
        clock: Arc<dyn Clock>,
        options: MatrixOptions,
    ) -> LeaderboardResult<Self> {
        options.validate()?;

        Ok(Self {
            store,
            clock,
            options,
            features: DashMap::new(),
            combined: DashMap::new(),
        })
    }

    pub fn options(&self) -> &MatrixOptions {
        &self.options
    }

    fn dimension_index(&self, name: &str) -> Option<usize> {
        self.options.dimensions.iter().position(|d| d.name == name)
    }

    fn feature_index(&self, name: &str) -> Option<usize> {
        self.options.features.iter().position(|f| f.name == name)
    }

    fn cell_base(&self, dimension: usize, feature: &str) -> String {
        format!(
            "{}:{}:{}",
            self.options.path, self.options.dimensions[dimension].name, feature
        )
    }

    fn feature_windows(&self, dimension: usize, feature: usize) -> Arc<FeatureWindows> {
        self.features
            .entry((dimension, feature))
            .or_insert_with(|| {
                let definition = &self.options.features[feature];
                let base = self.cell_base(dimension, &definition.name);
                debug!(base = %base, "Creating matrix cell");

                Arc::new(PeriodicLeaderboard::new(
                    base.clone(),
                    self.options.dimensions[dimension].cadence,
                    self.clock.clone(),
                    RecencyWindows::new(
                        self.store.clone(),
                        self.clock.clone(),
                        definition.cell_options(base, self.options.mode),
                    ),
                ))
            })
            .clone()
    }

    fn combined_windows(&self, dimension: usize) -> LeaderboardResult<Arc<CombinedWindows>> {
        if let Some(existing) = self.combined.get(&dimension) {
            return Ok(existing.clone());
        }

        let subs = (0..self.options.features.len())
            .map(|feature| self.feature_windows(dimension, feature) as Arc<dyn WindowSource>)
            .collect();
        let builder = MultiMetricWindows::new(
            self.store.clone(),
            self.clock.clone(),
            self.options.max_users,
            subs,
        )?;
        let base = self.cell_base(dimension, ALL_METRICS);
        debug!(base = %base, "Creating combined matrix cell");

        let windows = Arc::new(PeriodicLeaderboard::new(
            base,
            self.options.dimensions[dimension].cadence,
            self.clock.clone(),
            builder,
        ));
        Ok(self.combined.entry(dimension).or_insert(windows).clone())
    }

    /// The window of one cell at `at` (or now). `None` for unknown names.
    pub fn get(
        &self,
        dimension: &str,
        feature: &str,
        at: Option<DateTime<Utc>>,
    ) -> LeaderboardResult<Option<MatrixCell>> {
        let Some(d) = self.dimension_index(dimension) else {
            return Ok(None);
        };
        if feature == ALL_METRICS {
            let windows = self.combined_windows(d)?;
            return Ok(Some(MatrixCell::Combined(window_for(&windows, at)?)));
        }
        let Some(f) = self.feature_index(feature) else {
            return Ok(None);
        };
        let windows = self.feature_windows(d, f);
        Ok(Some(MatrixCell::Feature(window_for(&windows, at)?)))
    }

    /// Requested dimensions, or all of them when none are named. Unknown
    /// names are skipped.
    fn target_dimensions(&self, dimensions: &[&str]) -> Vec<usize> {
        if dimensions.is_empty() {
            return (0..self.options.dimensions.len()).collect();
        }
        let mut targets = Vec::with_capacity(dimensions.len());
        for index in dimensions.iter().filter_map(|name| self.dimension_index(name)) {
            if !targets.contains(&index) {
                targets.push(index);
            }
        }
        targets
    }

    fn target_features(&self, scores: &[(&str, f64)]) -> LeaderboardResult<Vec<(usize, f64)>> {
        if scores.iter().any(|(name, _)| *name == ALL_METRICS) {
            return Err(LeaderboardError::NotSupported(format!(
                "{} is derived from the other features and cannot be written",
                ALL_METRICS
            )));
        }
        Ok(scores
            .iter()
            .filter_map(|(name, value)| self.feature_index(name).map(|f| (f, *value)))
            .collect())
    }

    async fn write(
        &self,
        op: FeatureWrite,
        id: &str,
        scores: &[(&str, f64)],
        dimensions: &[&str],
    ) -> LeaderboardResult<BTreeMap<String, bool>> {
        let features = self.target_features(scores)?;
        let mut changed = BTreeMap::new();

        for d in self.target_dimensions(dimensions) {
            let mut any = false;
            for &(f, value) in &features {
                let cell = self.feature_windows(d, f).get_current()?;
                any |= match op {
                    FeatureWrite::Add => {
                        cell.add(id, value).await?;
                        true
                    }
                    FeatureWrite::Incr => {
                        cell.incr(id, value).await?;
                        true
                    }
                    FeatureWrite::Improve => cell.improve(id, value).await?,
                };
            }
            self.refresh(d, id).await?;
            changed.insert(self.options.dimensions[d].name.clone(), any);
        }

        Ok(changed)
    }

    /// Recompute the combined rank of `id` in one dimension. An entity not
    /// yet present in every feature has no combined rank; that is skipped.
    async fn refresh(&self, dimension: usize, id: &str) -> LeaderboardResult<()> {
        let combined = self.combined_windows(dimension)?.get_current()?;
        match combined.update_rank(id).await {
            Ok(_) => Ok(()),
            Err(LeaderboardError::PreconditionFailure { path, .. }) => {
                debug!(path = %path, id = %id, "Entity not in every feature yet, combined rank skipped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Set feature scores for `id` in the given dimensions (all when empty).
    ///
    /// ```text
    /// matrix.add("u1", &[("wins", 10.0), ("losses", 2.0)], &[]).await?;
    /// ```
    ///
    /// Unknown feature or dimension names are ignored. Each dimension is
    /// written independently; a failure leaves earlier dimensions updated.
    pub async fn add(
        &self,
        id: &str,
        scores: &[(&str, f64)],
        dimensions: &[&str],
    ) -> LeaderboardResult<()> {
        self.write(FeatureWrite::Add, id, scores, dimensions).await?;
        Ok(())
    }

    pub async fn incr(
        &self,
        id: &str,
        amounts: &[(&str, f64)],
        dimensions: &[&str],
    ) -> LeaderboardResult<()> {
        self.write(FeatureWrite::Incr, id, amounts, dimensions).await?;
        Ok(())
    }

    /// Returns, per dimension, whether any feature score improved
    pub async fn improve(
        &self,
        id: &str,
        scores: &[(&str, f64)],
        dimensions: &[&str],
    ) -> LeaderboardResult<BTreeMap<String, bool>> {
        self.write(FeatureWrite::Improve, id, scores, dimensions).await
    }

    /// Current window paths of every user feature in a dimension
    fn score_paths(&self, dimension: usize) -> LeaderboardResult<Vec<String>> {
        (0..self.options.features.len())
            .map(|f| -> LeaderboardResult<String> {
                Ok(self.feature_windows(dimension, f).get_current()?.path().to_string())
            })
            .collect()
    }

    fn entries(&self, table: ScoreTable) -> Vec<MatrixEntry> {
        let start = table.start;
        table
            .rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| MatrixEntry {
                id: row.id,
                rank: start + 1 + i as u64,
                scores: self.score_map(&row.scores),
            })
            .collect()
    }

    fn score_map(&self, scores: &[Option<f64>]) -> BTreeMap<String, f64> {
        self.options
            .features
            .iter()
            .zip(scores)
            .filter_map(|(feature, score)| score.map(|score| (feature.name.clone(), score)))
            .collect()
    }

    /// Every feature score of `id` in a dimension.
    ///
    /// With `feature`, the row is ranked on that feature; without, `rank`
    /// is 0 and all scores come from one store call.
    pub async fn peek(
        &self,
        id: &str,
        dimension: &str,
        feature: Option<&str>,
    ) -> LeaderboardResult<Option<MatrixEntry>> {
        if let Some(feature) = feature {
            let rows = self.around(dimension, feature, id, 0, false).await?;
            return Ok(rows.into_iter().next());
        }

        let Some(d) = self.dimension_index(dimension) else {
            return Ok(None);
        };
        let scores = self
            .store
            .retrieve_entity(&self.score_paths(d)?, id)
            .await?;
        if scores.iter().all(Option::is_none) {
            return Ok(None);
        }

        Ok(Some(MatrixEntry {
            id: id.to_string(),
            rank: 0,
            scores: self.score_map(&scores),
        }))
    }

    /// Entries ranked `low..=high` on `feature`, with every feature score
    pub async fn list(
        &self,
        dimension: &str,
        feature: &str,
        low: u64,
        high: u64,
    ) -> LeaderboardResult<Vec<MatrixEntry>> {
        let Some(cell) = self.get(dimension, feature, None)? else {
            return Ok(Vec::new());
        };
        let low = low.max(1);
        if high < low {
            return Ok(Vec::new());
        }

        let d = self.dimension_index(dimension).unwrap_or_default();
        let table = self
            .store
            .retrieve_range(&cell.ranked_path(), &self.score_paths(d)?, low - 1, high - 1)
            .await?;
        Ok(self.entries(table))
    }

    pub async fn top(
        &self,
        dimension: &str,
        feature: &str,
        max: u64,
    ) -> LeaderboardResult<Vec<MatrixEntry>> {
        self.list(dimension, feature, 1, max).await
    }

    /// Entries around `id` on `feature`, with every feature score
    pub async fn around(
        &self,
        dimension: &str,
        feature: &str,
        id: &str,
        distance: u64,
        fill_borders: bool,
    ) -> LeaderboardResult<Vec<MatrixEntry>> {
        let Some(cell) = self.get(dimension, feature, None)? else {
            return Ok(Vec::new());
        };

        let d = self.dimension_index(dimension).unwrap_or_default();
        let table = self
            .store
            .retrieve_around(
                &cell.ranked_path(),
                id,
                distance,
                fill_borders,
                &self.score_paths(d)?,
            )
            .await?;
        Ok(table.map(|table| self.entries(table)).unwrap_or_default())
    }

    /// Clear every cell's window at `at` (or now) and drop all cached cells
    pub async fn clear(&self, at: Option<DateTime<Utc>>) -> LeaderboardResult<()> {
        let at = at.unwrap_or_else(|| self.clock.now());

        for d in 0..self.options.dimensions.len() {
            self.combined_windows(d)?.clear(at).await?;
            for f in 0..self.options.features.len() {
                self.feature_windows(d, f).clear(at).await?;
            }
        }

        self.combined.clear();
        self.features.clear();
        debug!(path = %self.options.path, "Matrix cleared and cells evicted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FeatureDefinition;
    use chrono::TimeZone;
    use rank_store::{ManualClock, MemoryStore};

    fn matrix() -> (Arc<MemoryStore>, LeaderboardMatrix) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
        ));
        let options = MatrixOptions::new(
            vec![
                FeatureDefinition::new("wins"),
                FeatureDefinition {
                    low_to_high: true,
                    ..FeatureDefinition::new("losses")
                },
            ],
            1000,
        );
        let matrix = LeaderboardMatrix::new(store.clone(), clock, options).unwrap();
        (store, matrix)
    }

    #[test]
    fn test_get_resolves_names() {
        let (_, matrix) = matrix();

        let cell = matrix.get("global", "wins", None).unwrap().unwrap();
        assert_eq!(cell.path(), "multimetriclbmatrix:global:wins:all");
        assert!(!cell.is_combined());

        let cell = matrix.get("global", ALL_METRICS, None).unwrap().unwrap();
        assert_eq!(cell.path(), "multimetriclbmatrix:global:allMetrics:all");
        assert!(cell.is_combined());

        assert!(matrix.get("weekly", "wins", None).unwrap().is_none());
        assert!(matrix.get("global", "kills", None).unwrap().is_none());
    }

    #[test]
    fn test_cells_are_cached() {
        let (_, matrix) = matrix();
        let first = matrix.feature_windows(0, 1);
        let second = matrix.feature_windows(0, 1);
        assert!(Arc::ptr_eq(&first, &second));

        let combined = matrix.combined_windows(0).unwrap();
        assert!(Arc::ptr_eq(&combined, &matrix.combined_windows(0).unwrap()));
    }

    #[tokio::test]
    async fn test_writing_combined_feature_is_rejected_before_store() {
        let (store, matrix) = matrix();

        let err = matrix
            .add("u1", &[("wins", 1.0), (ALL_METRICS, 5.0)], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LeaderboardError::NotSupported(_)));
        assert_eq!(store.key_count(), 0);

        let cell = matrix.get("global", ALL_METRICS, None).unwrap().unwrap();
        assert!(matches!(
            cell.add("u1", 1.0).await,
            Err(LeaderboardError::NotSupported(_))
        ));
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_write_skips_combined_rank() {
        let (_, matrix) = matrix();

        matrix.add("u1", &[("wins", 3.0), ("kills", 9.0)], &["global", "nope"]).await.unwrap();
        let combined = matrix.get("global", ALL_METRICS, None).unwrap().unwrap();
        assert_eq!(combined.count().await.unwrap(), 0);

        matrix.add("u1", &[("losses", 1.0)], &[]).await.unwrap();
        assert_eq!(combined.rank("u1").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_improve_reports_per_dimension() {
        let (_, matrix) = matrix();

        let changed = matrix.improve("u1", &[("wins", 5.0)], &[]).await.unwrap();
        assert_eq!(changed.get("global"), Some(&true));
        let changed = matrix.improve("u1", &[("wins", 4.0)], &[]).await.unwrap();
        assert_eq!(changed.get("global"), Some(&false));
    }

    #[tokio::test]
    async fn test_list_ranked_by_feature_with_all_scores() {
        let (_, matrix) = matrix();
        matrix.add("a", &[("wins", 10.0), ("losses", 5.0)], &[]).await.unwrap();
        matrix.add("b", &[("wins", 20.0), ("losses", 1.0)], &[]).await.unwrap();
        matrix.add("c", &[("wins", 15.0)], &[]).await.unwrap();

        let rows = matrix.top("global", "wins", 10).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| (r.id.as_str(), r.rank)).collect();
        assert_eq!(ids, vec![("b", 1), ("c", 2), ("a", 3)]);
        assert_eq!(rows[0].scores.get("losses"), Some(&1.0));
        assert_eq!(rows[1].scores.get("losses"), None);
        assert!(!rows[0].scores.contains_key(ALL_METRICS));

        let rows = matrix.list("global", "losses", 1, 1).await.unwrap();
        assert_eq!(rows[0].id, "b");

        assert!(matrix.list("global", "nope", 1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_peek_with_feature_is_ranked() {
        let (_, matrix) = matrix();
        matrix.add("a", &[("wins", 10.0), ("losses", 5.0)], &[]).await.unwrap();
        matrix.add("b", &[("wins", 20.0), ("losses", 1.0)], &[]).await.unwrap();

        let row = matrix.peek("a", "global", Some("wins")).await.unwrap().unwrap();
        assert_eq!(row.rank, 2);
        assert_eq!(row.scores.get("wins"), Some(&10.0));

        assert!(matrix.peek("zz", "global", None).await.unwrap().is_none());
        assert!(matrix.peek("a", "nope", None).await.unwrap().is_none());
    }

    #[test]
    fn test_matrix_entry_serialises_flat() {
        let entry = MatrixEntry {
            id: "u1".to_string(),
            rank: 0,
            scores: BTreeMap::from([("losses".to_string(), 2.0), ("wins".to_string(), 10.0)]),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "u1", "rank": 0, "losses": 2.0, "wins": 10.0})
        );
    }
}
