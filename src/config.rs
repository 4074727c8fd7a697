use std::time::Duration;

use crate::errors::AccessError;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub min_password_length: usize,
}

impl EngineConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            min_password_length: 1,
        }
    }

    pub fn from_env() -> Result<Self, AccessError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| AccessError::configuration("DATABASE_URL not set"))?;

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .map(|val| val.parse::<u32>())
            .unwrap_or(Ok(5))
            .map_err(|_| AccessError::configuration("DB_MAX_CONNECTIONS must be a valid integer"))?;

        let acquire_timeout_secs = std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
            .map(|val| val.parse::<u64>())
            .unwrap_or(Ok(10))
            .map_err(|_| AccessError::configuration("DB_ACQUIRE_TIMEOUT_SECS must be a valid integer"))?;

        let min_password_length = std::env::var("MIN_PASSWORD_LENGTH")
            .map(|val| val.parse::<usize>())
            .unwrap_or(Ok(1))
            .map_err(|_| AccessError::configuration("MIN_PASSWORD_LENGTH must be a valid integer"))?;

        if max_connections == 0 {
            return Err(AccessError::configuration("DB_MAX_CONNECTIONS must be at least 1"));
        }

        Ok(Self {
            database_url,
            max_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
            min_password_length: min_password_length.max(1),
        })
    }

    pub fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = EngineConfig::new("sqlite::memory:");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.min_password_length, 1);
        assert_eq!(config.with_min_password_length(0).min_password_length, 1);
    }
}
