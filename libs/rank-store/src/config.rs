//! Store configuration loaded from the environment

use serde::Deserialize;
use std::time::Duration;

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_command_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// REDIS_URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// REDIS_CONNECT_TIMEOUT_MS
    #[serde(default = "default_connect_timeout_ms")]
    pub redis_connect_timeout_ms: u64,
    /// REDIS_COMMAND_TIMEOUT_MS
    #[serde(default = "default_command_timeout_ms")]
    pub redis_command_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            redis_connect_timeout_ms: default_connect_timeout_ms(),
            redis_command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<StoreConfig>()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env() {
        env::remove_var("REDIS_URL");
        env::remove_var("REDIS_CONNECT_TIMEOUT_MS");
        env::remove_var("REDIS_COMMAND_TIMEOUT_MS");
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = StoreConfig::from_env().unwrap();
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.command_timeout(), Duration::from_secs(1));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("REDIS_URL", "redis://cache.internal:6380/2");
        env::set_var("REDIS_COMMAND_TIMEOUT_MS", "250");

        let config = StoreConfig::from_env().unwrap();
        assert_eq!(config.redis_url, "redis://cache.internal:6380/2");
        assert_eq!(config.command_timeout(), Duration::from_millis(250));
        assert_eq!(config.redis_connect_timeout_ms, 3000);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_timeout() {
        clear_env();
        env::set_var("REDIS_CONNECT_TIMEOUT_MS", "soon");
        assert!(StoreConfig::from_env().is_err());
        clear_env();
    }
}
