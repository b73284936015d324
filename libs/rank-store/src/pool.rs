use crate::StoreConfig;
use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Redis connection manager plus the per-command time budget.
pub struct RedisPool {
    manager: SharedConnectionManager,
    command_timeout: Duration,
}

impl RedisPool {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let info = config
            .redis_url
            .as_str()
            .into_connection_info()
            .context("failed to parse REDIS_URL connection string")?;

        let client = Client::open(info).context("failed to construct Redis client")?;

        let manager = tokio::time::timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .context("timed out connecting to Redis")?
            .context("failed to initialize Redis connection manager")?;

        info!(
            command_timeout_ms = config.redis_command_timeout_ms,
            "Redis connection manager ready"
        );

        Ok(Self {
            manager: Arc::new(Mutex::new(manager)),
            command_timeout: config.command_timeout(),
        })
    }

    pub fn from_manager(manager: SharedConnectionManager, command_timeout: Duration) -> Self {
        Self {
            manager,
            command_timeout,
        }
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Multiplexed connection cloned out of the guard, so the lock is not
    /// held across a round trip.
    pub async fn connection(&self) -> ConnectionManager {
        self.manager.lock().await.clone()
    }
}
