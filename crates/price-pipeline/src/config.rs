//! Configuration types for the ingestion pipeline.
//!
//! Two values configure a run: [`PipelineConfig`] controls how sources are
//! read and cleaned, and [`SinkConfig`] describes the relational store. Both
//! are plain values handed to constructors; nothing here is global.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Area label assigned when a source carries no area column.
pub const DEFAULT_AREA: &str = "Finland";

/// Table the cleaned prices are written to.
pub const DEFAULT_TABLE_NAME: &str = "electric_prices";

/// Largest rows-per-INSERT. Each row binds three parameters, and SQLite
/// caps a statement at 32,766.
pub const MAX_INSERT_BATCH_SIZE: usize = 10_000;

/// Maximum stored length of an area label.
pub const AREA_MAX_LEN: usize = 50;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("identifier pattern is valid")
});

/// Check that a name is safe to splice into DDL as a bare identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Configuration for loading and cleaning a price table.
///
/// Use [`PipelineConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use price_pipeline::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .separator(b';')
///     .default_area("FI")
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Field separator of delimited sources.
    /// Default: `,`
    pub separator: u8,

    /// Area label for rows whose source has no (or a blank) area value.
    /// Default: "Finland"
    pub default_area: String,

    /// Timeout for fetching HTTP sources, in seconds.
    /// Default: 30
    pub source_timeout_secs: u64,

    /// Number of rows per multi-row INSERT statement.
    /// Default: 500
    pub insert_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            separator: b',',
            default_area: DEFAULT_AREA.to_string(),
            source_timeout_secs: 30,
            insert_batch_size: 500,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let area = self.default_area.trim();
        if area.is_empty() || area.chars().count() > AREA_MAX_LEN {
            return Err(ConfigValidationError::InvalidDefaultArea(
                self.default_area.clone(),
            ));
        }

        if !self.separator.is_ascii() || self.separator == b'"' || self.separator == b'\n' {
            return Err(ConfigValidationError::InvalidSeparator(self.separator as char));
        }

        if self.source_timeout_secs == 0 {
            return Err(ConfigValidationError::ZeroTimeout("source_timeout_secs"));
        }

        if self.insert_batch_size == 0 || self.insert_batch_size > MAX_INSERT_BATCH_SIZE {
            return Err(ConfigValidationError::InvalidBatchSize(self.insert_batch_size));
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid default area '{0}' (must be 1-50 characters)")]
    InvalidDefaultArea(String),

    #[error("Invalid separator '{0}'")]
    InvalidSeparator(char),

    #[error("Timeout '{0}' must be at least one second")]
    ZeroTimeout(&'static str),

    #[error("Invalid insert batch size: {0} (must be 1-{max})", max = MAX_INSERT_BATCH_SIZE)]
    InvalidBatchSize(usize),

    #[error("Invalid table name '{0}' (letters, digits and '_' only)")]
    InvalidTableName(String),

    #[error("Invalid value '{value}' for {var}")]
    InvalidEnvValue { var: String, value: String },

    #[error("A pipeline needs a sink")]
    MissingSink,
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    separator: Option<u8>,
    default_area: Option<String>,
    source_timeout_secs: Option<u64>,
    insert_batch_size: Option<usize>,
}

impl PipelineConfigBuilder {
    /// Set the field separator for delimited sources.
    pub fn separator(mut self, separator: u8) -> Self {
        self.separator = Some(separator);
        self
    }

    /// Set the area label used when the source has none.
    pub fn default_area(mut self, area: impl Into<String>) -> Self {
        self.default_area = Some(area.into());
        self
    }

    /// Set the HTTP source timeout in seconds.
    pub fn source_timeout_secs(mut self, secs: u64) -> Self {
        self.source_timeout_secs = Some(secs);
        self
    }

    /// Set the number of rows per INSERT statement.
    pub fn insert_batch_size(mut self, size: usize) -> Self {
        self.insert_batch_size = Some(size);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `PipelineConfig` or an error if validation fails.
    pub fn build(self) -> Result<PipelineConfig, ConfigValidationError> {
        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            separator: self.separator.unwrap_or(defaults.separator),
            default_area: self.default_area.unwrap_or(defaults.default_area),
            source_timeout_secs: self
                .source_timeout_secs
                .unwrap_or(defaults.source_timeout_secs),
            insert_batch_size: self.insert_batch_size.unwrap_or(defaults.insert_batch_size),
        };

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Sink configuration
// =============================================================================

/// Connection parameters for a MySQL server.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MySqlSettings {
    pub host: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub port: u16,
}

impl Default for MySqlSettings {
    /// Local development defaults. Deployments must override the credentials.
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            database: "electric_data".to_string(),
            user: "electric".to_string(),
            password: "electric".to_string(),
            port: 3306,
        }
    }
}

impl fmt::Debug for MySqlSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlSettings")
            .field("host", &self.host)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("port", &self.port)
            .finish()
    }
}

/// Which relational store backs the sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkBackend {
    /// Networked MySQL server.
    MySql(MySqlSettings),
    /// SQLite database file, or `:memory:`.
    Sqlite { path: PathBuf },
}

/// Configuration of the relational sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub backend: SinkBackend,

    /// Target table name.
    /// Default: "electric_prices"
    pub table_name: String,

    /// Column default for `area`.
    /// Default: "Finland"
    pub default_area: String,

    /// Upper bound on establishing a connection, in seconds.
    /// Default: 10
    pub connect_timeout_secs: u64,

    /// Pool size.
    /// Default: 4
    pub max_connections: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backend: SinkBackend::MySql(MySqlSettings::default()),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            default_area: DEFAULT_AREA.to_string(),
            connect_timeout_secs: 10,
            max_connections: 4,
        }
    }
}

impl SinkConfig {
    /// A MySQL sink with the given connection settings and default options.
    pub fn mysql(settings: MySqlSettings) -> Self {
        Self {
            backend: SinkBackend::MySql(settings),
            ..Self::default()
        }
    }

    /// A SQLite sink stored at `path`.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: SinkBackend::Sqlite { path: path.into() },
            ..Self::default()
        }
    }

    /// A private in-memory SQLite sink, used for tests and dry runs.
    pub fn sqlite_in_memory() -> Self {
        Self::sqlite(":memory:")
    }

    /// Override the target table name.
    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    /// Override the connect timeout.
    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Read the sink configuration from the process environment.
    ///
    /// | Variable         | Default           |
    /// |------------------|-------------------|
    /// | `DB_BACKEND`     | `mysql`           |
    /// | `DB_HOST`        | `localhost`       |
    /// | `DB_NAME`        | `electric_data`   |
    /// | `DB_USER`        | `electric`        |
    /// | `DB_PASSWORD`    | `electric`        |
    /// | `DB_PORT`        | `3306`            |
    /// | `DB_SQLITE_PATH` | `electric_data.db`|
    /// | `DB_TABLE`       | `electric_prices` |
    /// | `DB_CONNECT_TIMEOUT_SECS` | `10`     |
    pub fn from_env() -> Result<Self, ConfigValidationError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = MySqlSettings::default();
        let backend_name = lookup("DB_BACKEND").unwrap_or_else(|| "mysql".to_string());

        let backend = match backend_name.trim().to_ascii_lowercase().as_str() {
            "mysql" => {
                let port = match lookup("DB_PORT") {
                    Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                        ConfigValidationError::InvalidEnvValue {
                            var: "DB_PORT".to_string(),
                            value: raw.clone(),
                        }
                    })?,
                    None => defaults.port,
                };
                SinkBackend::MySql(MySqlSettings {
                    host: lookup("DB_HOST").unwrap_or(defaults.host),
                    database: lookup("DB_NAME").unwrap_or(defaults.database),
                    user: lookup("DB_USER").unwrap_or(defaults.user),
                    password: lookup("DB_PASSWORD").unwrap_or(defaults.password),
                    port,
                })
            }
            "sqlite" => SinkBackend::Sqlite {
                path: lookup("DB_SQLITE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("electric_data.db")),
            },
            _ => {
                return Err(ConfigValidationError::InvalidEnvValue {
                    var: "DB_BACKEND".to_string(),
                    value: backend_name,
                });
            }
        };

        let connect_timeout_secs = match lookup("DB_CONNECT_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ConfigValidationError::InvalidEnvValue {
                    var: "DB_CONNECT_TIMEOUT_SECS".to_string(),
                    value: raw.clone(),
                }
            })?,
            None => 10,
        };

        let config = SinkConfig {
            backend,
            table_name: lookup("DB_TABLE").unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            default_area: lookup("DEFAULT_AREA").unwrap_or_else(|| DEFAULT_AREA.to_string()),
            connect_timeout_secs,
            max_connections: 4,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !is_valid_identifier(&self.table_name) {
            return Err(ConfigValidationError::InvalidTableName(
                self.table_name.clone(),
            ));
        }

        let area = self.default_area.trim();
        if area.is_empty() || area.chars().count() > AREA_MAX_LEN {
            return Err(ConfigValidationError::InvalidDefaultArea(
                self.default_area.clone(),
            ));
        }

        if self.connect_timeout_secs == 0 {
            return Err(ConfigValidationError::ZeroTimeout("connect_timeout_secs"));
        }

        Ok(())
    }

    /// Human-readable target, without credentials.
    pub fn describe(&self) -> String {
        match &self.backend {
            SinkBackend::MySql(s) => format!(
                "mysql://{}@{}:{}/{} (table {})",
                s.user, s.host, s.port, s.database, self.table_name
            ),
            SinkBackend::Sqlite { path } => {
                format!("sqlite:{} (table {})", path.display(), self.table_name)
            }
        }
    }
}
