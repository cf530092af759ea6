//! Configuration types for the query builder.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading a [`QueryBuilderConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How a page window is expressed in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaginationDialect {
    /// `LIMIT n OFFSET m`
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`
    OffsetFetch,
}

impl PaginationDialect {
    /// Map the DAO's dialect flag onto a dialect.
    pub fn from_limit_offset_support(supports_limit_offset: bool) -> Self {
        if supports_limit_offset {
            Self::LimitOffset
        } else {
            Self::OffsetFetch
        }
    }

    pub fn clause(&self, offset: u64, limit: u32) -> String {
        match self {
            Self::LimitOffset => format!(" LIMIT {limit} OFFSET {offset}"),
            Self::OffsetFetch => format!(" OFFSET {offset} ROWS FETCH NEXT {limit} ROWS ONLY"),
        }
    }
}

/// How bind values reach the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindStyle {
    /// `?` placeholders plus an ordered bind list.
    #[default]
    Parameter,
    /// Encoded literals in the SQL text, empty bind list.
    Inline,
}

/// Per-cache enable switches. A disabled cache always asks the DAO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub parameter_names_enabled: bool,
    #[serde(default = "default_true")]
    pub code_systems_enabled: bool,
    #[serde(default = "default_true")]
    pub resource_types_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            parameter_names_enabled: true,
            code_systems_enabled: true,
            resource_types_enabled: true,
        }
    }
}

impl CacheConfig {
    /// All caches off, every lookup goes to the DAO.
    pub fn disabled() -> Self {
        Self {
            parameter_names_enabled: false,
            code_systems_enabled: false,
            resource_types_enabled: false,
        }
    }
}

/// Search features a deployment may switch off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default = "default_true")]
    pub chained_search: bool,
    #[serde(default = "default_true")]
    pub compartment_search: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            chained_search: true,
            compartment_search: true,
        }
    }
}

/// Configuration for [`QueryBuilder`](crate::QueryBuilder).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryBuilderConfig {
    /// Forces a pagination dialect. When unset the DAO's dialect flag decides.
    #[serde(default)]
    pub pagination_dialect: Option<PaginationDialect>,

    #[serde(default)]
    pub bind_style: BindStyle,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub capabilities: Capabilities,

    /// Maximum number of top-level search parameters per query.
    #[serde(default = "default_max_parameters")]
    pub max_parameters: usize,

    /// Maximum number of hops in a chained parameter.
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,

    #[serde(default = "default_max_composite_components")]
    pub max_composite_components: usize,

    /// Upper bound on `page_size`.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_parameters() -> usize {
    100
}

fn default_max_chain_depth() -> usize {
    5
}

fn default_max_composite_components() -> usize {
    3
}

fn default_max_page_size() -> u32 {
    1000
}

impl Default for QueryBuilderConfig {
    fn default() -> Self {
        Self {
            pagination_dialect: None,
            bind_style: BindStyle::default(),
            cache: CacheConfig::default(),
            capabilities: Capabilities::default(),
            max_parameters: default_max_parameters(),
            max_chain_depth: default_max_chain_depth(),
            max_composite_components: default_max_composite_components(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl QueryBuilderConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    #[must_use]
    pub fn with_pagination_dialect(mut self, dialect: PaginationDialect) -> Self {
        self.pagination_dialect = Some(dialect);
        self
    }

    #[must_use]
    pub fn with_bind_style(mut self, style: BindStyle) -> Self {
        self.bind_style = style;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_max_parameters(mut self, max: usize) -> Self {
        self.max_parameters = max;
        self
    }

    #[must_use]
    pub fn with_max_chain_depth(mut self, max: usize) -> Self {
        self.max_chain_depth = max;
        self
    }
}
