//! Process-wide configuration for the rules engine.
//!
//! Mirrors the teacher pipeline's `PipelineConfig`: a nested, serde-
//! derived struct loadable from TOML (`Config::load`) or environment
//! variables (`Config::from_env`), with a conservative `Default`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub database: DatabaseConfig,
    pub correlator: CorrelatorConfig,
    pub properties: PropertiesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Target SQL dialect the SQL provider compiles CEL predicates for.
    pub dialect: Dialect,
    pub connection_string: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Postgres,
    Mysql,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CorrelatorConfig {
    /// Default timeframe (seconds) applied when a rule omits one.
    pub default_timeframe_secs: u64,
    /// Default threshold applied when a rule omits one.
    pub default_threshold: u32,
    /// Wall-clock bound on a single `matches()` regex evaluation (§5).
    pub regex_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PropertiesConfig {
    /// When a CEL property has no metadata mapping: `true` degrades the
    /// predicate to constant-false, `false` raises `UnmappedProperty`
    /// (§4.3 "must degrade ... when configured for lenient mode").
    pub lenient_unmapped_properties: bool,
}

impl CorrelatorConfig {
    pub fn regex_timeout(&self) -> Duration {
        Duration::from_millis(self.regex_timeout_ms)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::config(format!("failed to read config file: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| EngineError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(conn) = std::env::var("RULES_ENGINE_DATABASE_URL") {
            config.database.connection_string = conn;
        }
        if let Ok(dialect) = std::env::var("RULES_ENGINE_DIALECT") {
            config.database.dialect = match dialect.to_lowercase().as_str() {
                "postgres" | "postgresql" => Dialect::Postgres,
                "mysql" => Dialect::Mysql,
                "sqlite" => Dialect::Sqlite,
                other => {
                    return Err(EngineError::config(format!("unknown dialect: {other}")));
                }
            };
        }
        if let Ok(lenient) = std::env::var("RULES_ENGINE_LENIENT_PROPERTIES") {
            config.properties.lenient_unmapped_properties =
                lenient.parse().unwrap_or(config.properties.lenient_unmapped_properties);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.correlator.default_threshold == 0 {
            return Err(EngineError::config("default_threshold must be >= 1"));
        }
        if self.database.connection_string.is_empty() {
            return Err(EngineError::config("database.connection_string must not be empty"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                dialect: Dialect::Postgres,
                connection_string: "postgres://localhost/rules_engine".to_string(),
                max_connections: 20,
                min_connections: 2,
                connection_timeout_secs: 30,
            },
            correlator: CorrelatorConfig {
                default_timeframe_secs: 3600,
                default_threshold: 1,
                regex_timeout_ms: 250,
            },
            properties: PropertiesConfig {
                lenient_unmapped_properties: true,
            },
        }
    }
}
