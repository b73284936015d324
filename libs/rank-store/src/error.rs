//! Store error types

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid reply: {0}")]
    InvalidReply(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
