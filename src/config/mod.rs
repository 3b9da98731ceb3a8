use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrmConfig {
    pub environment: Environment,
    pub filter: FilterConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Upper bound applied to every `limit` count
    pub max_limit: Option<u64>,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection
    pub connection_timeout: u64,
    pub enable_query_logging: bool,
    pub enable_slow_query_warning: bool,
    pub slow_query_threshold_ms: u64,
}

impl OrmConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("ORM_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        Self::preset(environment).with_env_overrides()
    }

    pub fn preset(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
    }

    fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    /// Apply `FILTER_*` and `DATABASE_*` settings; unparseable values keep the preset.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
            if let Some(value) = lookup(key).and_then(|v| v.trim().parse().ok()) {
                *target = value;
            }
        }

        // An unparseable limit removes the cap
        if let Some(v) = lookup("FILTER_MAX_LIMIT") {
            self.filter.max_limit = v.trim().parse().ok();
        }
        parsed(&lookup, "FILTER_DEBUG_LOGGING", &mut self.filter.debug_logging);

        let db = &mut self.database;
        parsed(&lookup, "DATABASE_MAX_CONNECTIONS", &mut db.max_connections);
        parsed(&lookup, "DATABASE_CONNECTION_TIMEOUT", &mut db.connection_timeout);
        parsed(&lookup, "DATABASE_ENABLE_QUERY_LOGGING", &mut db.enable_query_logging);
        parsed(&lookup, "DATABASE_ENABLE_SLOW_QUERY_WARNING", &mut db.enable_slow_query_warning);
        parsed(&lookup, "DATABASE_SLOW_QUERY_THRESHOLD_MS", &mut db.slow_query_threshold_ms);

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            filter: FilterConfig {
                max_limit: Some(1000),
                debug_logging: true,
            },
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 30,
                enable_query_logging: true,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 100,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            filter: FilterConfig {
                max_limit: Some(500),
                debug_logging: false,
            },
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 10,
                enable_query_logging: true,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 500,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            filter: FilterConfig {
                max_limit: Some(100),
                debug_logging: false,
            },
            database: DatabaseConfig {
                max_connections: 50,
                connection_timeout: 5,
                enable_query_logging: false,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 1000,
            },
        }
    }
}

// Global singleton config - initialized on first use
pub static CONFIG: Lazy<OrmConfig> = Lazy::new(OrmConfig::from_env);

pub fn config() -> &'static OrmConfig {
    &CONFIG
}
