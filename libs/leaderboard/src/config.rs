//! Matrix layout
//!
//! Loadable from JSON:
//!
//! ```json
//! {
//!   "path": "season1",
//!   "dimensions": [{ "name": "global" }, { "name": "daily", "cadence": "daily" }],
//!   "features": [{ "name": "wins" }, { "name": "deaths", "low_to_high": true }],
//!   "max_users": 100000
//! }
//! ```

use crate::matrix::ALL_METRICS;
use crate::{Cadence, LeaderboardError, LeaderboardResult, RecencyOptions, UpdateMode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

fn default_path() -> String {
    "multimetriclbmatrix".to_string()
}

fn default_dimensions() -> Vec<DimensionDefinition> {
    vec![DimensionDefinition {
        name: "global".to_string(),
        cadence: Cadence::AllTime,
    }]
}

fn default_earlier_wins() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionDefinition {
    pub name: String,
    #[serde(default)]
    pub cadence: Cadence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDefinition {
    pub name: String,
    #[serde(default)]
    pub low_to_high: bool,
    #[serde(default = "default_earlier_wins")]
    pub earlier_wins: bool,
}

impl FeatureDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            low_to_high: false,
            earlier_wins: default_earlier_wins(),
        }
    }

    /// Options for the cell at `path`
    pub(crate) fn cell_options(&self, path: String, mode: UpdateMode) -> RecencyOptions {
        RecencyOptions {
            path,
            low_to_high: self.low_to_high,
            earlier_wins: self.earlier_wins,
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixOptions {
    /// Cells live at `<path>:<dimension>:<feature>:<window>`
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<DimensionDefinition>,
    pub features: Vec<FeatureDefinition>,
    /// Upper bound on entities per cell; sets the combined-rank width
    pub max_users: u64,
    #[serde(default)]
    pub mode: UpdateMode,
}

impl MatrixOptions {
    pub fn new(features: Vec<FeatureDefinition>, max_users: u64) -> Self {
        Self {
            path: default_path(),
            dimensions: default_dimensions(),
            features,
            max_users,
            mode: UpdateMode::default(),
        }
    }

    pub fn from_json(json: &str) -> LeaderboardResult<Self> {
        let options: MatrixOptions = serde_json::from_str(json)
            .map_err(|e| LeaderboardError::Configuration(format!("invalid matrix options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> LeaderboardResult<()> {
        if self.dimensions.is_empty() {
            return Err(LeaderboardError::Configuration(
                "at least one dimension is required".to_string(),
            ));
        }
        if self.features.is_empty() {
            return Err(LeaderboardError::Configuration(
                "at least one feature is required".to_string(),
            ));
        }
        if self.max_users < 2 {
            return Err(LeaderboardError::Configuration(format!(
                "max_users must be at least 2, got {}",
                self.max_users
            )));
        }

        let mut seen = HashSet::new();
        for dimension in &self.dimensions {
            if !seen.insert(dimension.name.as_str()) {
                return Err(LeaderboardError::Configuration(format!(
                    "duplicate dimension: {}",
                    dimension.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for feature in &self.features {
            if feature.name == ALL_METRICS {
                return Err(LeaderboardError::Configuration(format!(
                    "feature name {} is reserved",
                    ALL_METRICS
                )));
            }
            if !seen.insert(feature.name.as_str()) {
                return Err(LeaderboardError::Configuration(format!(
                    "duplicate feature: {}",
                    feature.name
                )));
            }
        }

        Ok(())
    }
}
