//! FHIR search query construction.
//!
//! Turns typed search parameters into one parameterized SQL statement (or
//! its count variant) over a normalized schema with per-resource-type values
//! tables. Parameter names, code systems and resource types are referenced
//! by surrogate ids, resolved through a tenant-scoped [`IdentityCache`].
//!
//! ```ignore
//! let builder = QueryBuilder::new(cache, registry, QueryBuilderConfig::default());
//! let query = builder.build_query(&tenant, "Patient", &params, &Pagination::default())?;
//! ```

pub mod aggregator;
pub mod builder;
pub mod cache;
pub mod common;
pub mod compartment;
pub mod config;
pub mod encoder;
pub mod error;
pub mod fragment;
pub mod parameters;
pub mod predicates;
pub mod query;
pub mod registry;
pub mod schema;

pub use aggregator::{GeneratedQuery, QuerySegmentAggregator};
pub use builder::QueryBuilder;
pub use cache::{IdentityCache, IdentityDao, MemoryIdentityDao, TenantKey};
pub use compartment::CompartmentRules;
pub use config::{BindStyle, Capabilities, CacheConfig, ConfigError, PaginationDialect, QueryBuilderConfig};
pub use error::{DataAccessError, QueryBuilderError};
pub use fragment::{Fragment, RenderedFragment, SqlValue};
pub use parameters::{SearchModifier, SearchParameter, SearchParameterType, SearchPrefix, ValueType};
pub use query::{Pagination, ParameterValue, QueryParameter, QueryParameterValue};
pub use registry::SearchParameterRegistry;
