use crate::error::ConfigError;
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub cache: CacheConfig,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct IndexConfig {
    pub max_file_size_bytes: u64,
    pub batch_size: usize,
    pub build_timeout_secs: u64,
}

#[derive(Clone)]
pub struct SearchConfig {
    pub timeout_ms: u64,
    pub max_results: usize,
    pub min_score: f64,
}

#[derive(Clone)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub namespace: String,
    pub mongodb_uri: Option<SecretString>,
    pub mongodb_db: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig {
                host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env("PORT", 8080)?,
            },
            index: IndexConfig {
                max_file_size_bytes: parse_env::<u64>("INDEX_MAX_FILE_SIZE_MB", 10)? * 1024 * 1024,
                batch_size: parse_env("INDEX_BATCH_SIZE", 64)?,
                build_timeout_secs: parse_env("INDEX_TIMEOUT_SECS", 120)?,
            },
            search: SearchConfig {
                timeout_ms: parse_env("SEARCH_TIMEOUT_MS", 2000)?,
                max_results: parse_env("SEARCH_MAX_RESULTS", 5)?,
                min_score: parse_env("SEARCH_MIN_SCORE", 0.5)?,
            },
            cache: CacheConfig {
                ttl_secs: parse_env("INDEX_CACHE_TTL_SECS", 1800)?,
                namespace: std::env::var("INDEX_CACHE_NAMESPACE")
                    .unwrap_or_else(|_| "repo-index".to_string()),
                mongodb_uri: std::env::var("MONGODB_URI").ok().map(SecretString::from),
                mongodb_db: std::env::var("MONGODB_DB")
                    .unwrap_or_else(|_| "review_engine".to_string()),
            },
        })
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

impl IndexConfig {
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * 1024 * 1024,
            batch_size: 64,
            build_timeout_secs: 120,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            max_results: 5,
            min_score: 0.5,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 1800,
            namespace: "repo-index".to_string(),
            mongodb_uri: None,
            mongodb_db: "review_engine".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let server = ServerConfig::default();
        assert_eq!(server.port, 8080);
        assert_eq!(server.host, "0.0.0.0");
    }

    #[test]
    fn test_index_config_default() {
        let index = IndexConfig::default();
        assert_eq!(index.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(index.build_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_cache_config_default() {
        let cache = CacheConfig::default();
        assert!(cache.mongodb_uri.is_none());
        assert_eq!(cache.ttl(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_parse_env_invalid_value() {
        std::env::set_var("REVIEW_LOCATOR_TEST_BATCH", "not-a-number");
        let result: Result<usize, _> = parse_env("REVIEW_LOCATOR_TEST_BATCH", 4);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
        std::env::remove_var("REVIEW_LOCATOR_TEST_BATCH");
    }

    #[test]
    fn test_parse_env_default_when_unset() {
        let value: u64 = parse_env("REVIEW_LOCATOR_TEST_UNSET", 42).unwrap();
        assert_eq!(value, 42);
    }
}
