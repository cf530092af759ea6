//! Tenant-scoped name/id caches.
//!
//! ## Architecture
//!
//! The normalized schema stores parameter names, code system URIs and resource
//! type names as small integer surrogate ids. Each tenant/datastore pair owns
//! its own id space, so every map is partitioned by [`TenantKey`].
//!
//! ```text
//! lookup → NameIdCache (DashMap) → IdentityDao (single row)
//! init_cache → IdentityDao (bulk, one loader at a time)
//! ```
//!
//! Entries are never evicted or invalidated: an id, once assigned by the
//! database, does not change.

pub mod dao;
pub mod name_id;
pub mod service;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use dao::{IdentityDao, MemoryIdentityDao};
pub use name_id::NameIdCache;
pub use service::{CacheDiscrepancy, CacheDump, IdentityCache};

/// Partition key for every cache: tenant plus datastore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantKey {
    pub tenant_id: String,
    pub datastore_id: String,
}

impl TenantKey {
    pub fn new(tenant_id: impl Into<String>, datastore_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            datastore_id: datastore_id.into(),
        }
    }
}

impl Default for TenantKey {
    fn default() -> Self {
        Self::new("default", "default")
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.tenant_id, self.datastore_id)
    }
}

/// The three kinds of surrogate id the schema uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    ParameterName,
    CodeSystem,
    ResourceType,
}

impl CacheKind {
    pub const ALL: [CacheKind; 3] = [
        CacheKind::ParameterName,
        CacheKind::CodeSystem,
        CacheKind::ResourceType,
    ];
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheKind::ParameterName => "parameter_name",
            CacheKind::CodeSystem => "code_system",
            CacheKind::ResourceType => "resource_type",
        };
        f.write_str(s)
    }
}
