//! Leaderboard error types

use rank_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeaderboardError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Entity {id} is missing from a sub-leaderboard of {path}")]
    PreconditionFailure { id: String, path: String },

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type LeaderboardResult<T> = Result<T, LeaderboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LeaderboardError::Configuration("max_users must be at least 2".to_string());
        assert_eq!(err.to_string(), "Configuration error: max_users must be at least 2");

        let err = LeaderboardError::PreconditionFailure {
            id: "u1".to_string(),
            path: "mm:all".to_string(),
        };
        assert_eq!(err.to_string(), "Entity u1 is missing from a sub-leaderboard of mm:all");
    }

    #[test]
    fn test_error_from_store() {
        let err: LeaderboardError = StoreError::InvalidReply("bad".to_string()).into();
        assert!(matches!(err, LeaderboardError::Store(_)));
    }
}
