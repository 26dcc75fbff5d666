use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::filter::SortDirection;

/// Token secret of the development preset; never acceptable outside development
pub const DEV_TOKEN_SECRET: &str = "TEST-DEV-SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOKEN_SECRET must be set to a non-default value in {0:?}")]
    MissingTokenSecret(Environment),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    /// Application name, used to namespace cache keys
    pub name: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub query: QueryConfig,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub enable_query_logging: bool,
}

/// Defaults and limits for list queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub default_page_size: i64,
    pub default_page_index: i64,
    pub max_page_size: i64,
    pub default_sort: String,
    pub default_order: SortDirection,
    /// Allow keyword search and `alias.field` filters against included relations
    pub related_search: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheBackendKind {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub permission_ttl_secs: u64,
    pub max_capacity: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub token_secret: String,
    pub token_expiry_secs: i64,
    pub enable_audit_logging: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 30,
            default_page_index: 1,
            max_page_size: 400,
            default_sort: "createdAt".to_string(),
            default_order: SortDirection::Desc,
            related_search: true,
        }
    }
}

impl CacheConfig {
    pub fn permission_ttl(&self) -> Duration {
        Duration::from_secs(self.permission_ttl_secs)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").or_else(|_| env::var("NODE_ENV")).as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("APP_NAME") {
            self.name = v;
        }

        // Server overrides
        if let Ok(v) = env::var("HTTP_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("HTTP_PORT").or_else(|_| env::var("PORT")) {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_QUERY_LOGGING") {
            self.database.enable_query_logging = v.parse().unwrap_or(self.database.enable_query_logging);
        }

        // Query overrides
        if let Ok(v) = env::var("QUERY_DEFAULT_PAGE_SIZE") {
            self.query.default_page_size = positive(&v).unwrap_or(self.query.default_page_size);
        }
        if let Ok(v) = env::var("QUERY_DEFAULT_PAGE_INDEX") {
            self.query.default_page_index = positive(&v).unwrap_or(self.query.default_page_index);
        }
        if let Ok(v) = env::var("QUERY_MAX_PAGE_SIZE") {
            self.query.max_page_size = positive(&v).unwrap_or(self.query.max_page_size);
        }
        if let Ok(v) = env::var("QUERY_DEFAULT_SORT") {
            self.query.default_sort = v;
        }
        if let Ok(v) = env::var("QUERY_DEFAULT_ORDER") {
            self.query.default_order = SortDirection::parse(&v.to_ascii_lowercase())
                .unwrap_or(self.query.default_order);
        }
        if let Ok(v) = env::var("QUERY_RELATED_SEARCH") {
            self.query.related_search = v.parse().unwrap_or(self.query.related_search);
        }

        // Cache overrides
        if let Ok(v) = env::var("CACHE_BACKEND") {
            self.cache.backend = match v.to_ascii_lowercase().as_str() {
                "postgres" | "pg" | "shared" => CacheBackendKind::Postgres,
                _ => CacheBackendKind::Memory,
            };
        }
        if let Ok(v) = env::var("PERMISSION_CACHE_TIME") {
            self.cache.permission_ttl_secs = v.parse().unwrap_or(self.cache.permission_ttl_secs);
        }
        if let Ok(v) = env::var("CACHE_MAX_CAPACITY") {
            self.cache.max_capacity = v.parse().unwrap_or(self.cache.max_capacity);
        }

        // Security overrides
        if let Ok(v) = env::var("TOKEN_SECRET") {
            self.security.token_secret = v;
        }
        if let Ok(v) = env::var("TOKEN_EXPIRY") {
            self.security.token_expiry_secs = v.parse().unwrap_or(self.security.token_expiry_secs);
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_AUDIT_LOGGING") {
            self.security.enable_audit_logging = v.parse().unwrap_or(self.security.enable_audit_logging);
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            name: "SIMPLE_APP_NAME".to_string(),
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
                enable_query_logging: true,
            },
            query: QueryConfig::default(),
            cache: CacheConfig {
                backend: CacheBackendKind::Memory,
                permission_ttl_secs: 30,
                max_capacity: 10_000,
            },
            security: SecurityConfig {
                token_secret: DEV_TOKEN_SECRET.to_string(),
                token_expiry_secs: 60 * 60 * 24 * 3, // 3 days
                enable_audit_logging: false,
            },
        }
    }

    fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.database.max_connections = 20;
        config.database.connection_timeout = 10;
        config.security.enable_audit_logging = true;
        config
    }

    fn production() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Production;
        config.database.max_connections = 50;
        config.database.connection_timeout = 5;
        config.database.enable_query_logging = false;
        config.cache.max_capacity = 100_000;
        config.security.token_expiry_secs = 60 * 60 * 24;
        config.security.enable_audit_logging = true;
        config
    }
}

impl AppConfig {
    /// Refuse settings that are only safe for local development
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment != Environment::Development
            && (self.security.token_secret.is_empty() || self.security.token_secret == DEV_TOKEN_SECRET)
        {
            return Err(ConfigError::MissingTokenSecret(self.environment));
        }
        Ok(())
    }
}

/// Parse a strictly positive integer setting
fn positive(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok().filter(|n| *n > 0)
}

// Process-wide config, read once. Only the environment check below reaches for it;
// everything else receives its section explicitly.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}
