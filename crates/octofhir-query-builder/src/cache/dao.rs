use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::{CacheKind, TenantKey};
use crate::error::DataAccessError;

/// Database access needed by the identity caches.
///
/// Calls are synchronous and made on the caller's thread. Single-row reads
/// return `Ok(None)` for names the database has never assigned.
pub trait IdentityDao: Send + Sync {
    fn read_parameter_name_id(
        &self,
        tenant: &TenantKey,
        name: &str,
    ) -> Result<Option<i32>, DataAccessError>;

    fn read_code_system_id(
        &self,
        tenant: &TenantKey,
        system: &str,
    ) -> Result<Option<i32>, DataAccessError>;

    fn read_resource_type_id(
        &self,
        tenant: &TenantKey,
        resource_type: &str,
    ) -> Result<Option<i32>, DataAccessError>;

    fn read_all_parameter_names(
        &self,
        tenant: &TenantKey,
    ) -> Result<HashMap<String, i32>, DataAccessError>;

    fn read_all_code_systems(
        &self,
        tenant: &TenantKey,
    ) -> Result<HashMap<String, i32>, DataAccessError>;

    fn read_all_resource_types(
        &self,
        tenant: &TenantKey,
    ) -> Result<HashMap<String, i32>, DataAccessError>;

    /// Whether the database understands `LIMIT n OFFSET m`.
    fn supports_limit_offset(&self) -> bool;
}

#[derive(Debug, Default)]
struct TenantIds {
    parameter_names: HashMap<String, i32>,
    code_systems: HashMap<String, i32>,
    resource_types: HashMap<String, i32>,
}

impl TenantIds {
    fn ids_of(&self, kind: CacheKind) -> &HashMap<String, i32> {
        match kind {
            CacheKind::ParameterName => &self.parameter_names,
            CacheKind::CodeSystem => &self.code_systems,
            CacheKind::ResourceType => &self.resource_types,
        }
    }

    fn ids_of_mut(&mut self, kind: CacheKind) -> &mut HashMap<String, i32> {
        match kind {
            CacheKind::ParameterName => &mut self.parameter_names,
            CacheKind::CodeSystem => &mut self.code_systems,
            CacheKind::ResourceType => &mut self.resource_types,
        }
    }
}

/// In-memory [`IdentityDao`] for tests and embedded use.
///
/// Counts single-row and bulk reads so callers can observe cache behavior,
/// and can be told to fail every call.
#[derive(Debug)]
pub struct MemoryIdentityDao {
    tenants: DashMap<TenantKey, TenantIds>,
    limit_offset: bool,
    lookups: AtomicUsize,
    bulk_loads: AtomicUsize,
    failure: Mutex<Option<DataAccessError>>,
}

impl Default for MemoryIdentityDao {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityDao {
    pub fn new() -> Self {
        Self {
            tenants: DashMap::new(),
            limit_offset: true,
            lookups: AtomicUsize::new(0),
            bulk_loads: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_limit_offset(mut self, supported: bool) -> Self {
        self.limit_offset = supported;
        self
    }

    /// Assign an id, builder style.
    #[must_use]
    pub fn with_id(self, kind: CacheKind, tenant: &TenantKey, name: &str, id: i32) -> Self {
        self.insert(kind, tenant, name, id);
        self
    }

    pub fn insert(&self, kind: CacheKind, tenant: &TenantKey, name: &str, id: i32) {
        self.tenants
            .entry(tenant.clone())
            .or_default()
            .ids_of_mut(kind)
            .insert(name.to_string(), id);
    }

    /// Make every subsequent call fail with `error`, or succeed again with `None`.
    pub fn set_failure(&self, error: Option<DataAccessError>) {
        *self.failure.lock() = error;
    }

    /// Number of single-row reads served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Number of bulk reads served so far.
    pub fn bulk_load_count(&self) -> usize {
        self.bulk_loads.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), DataAccessError> {
        match self.failure.lock().as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn read_one(
        &self,
        kind: CacheKind,
        tenant: &TenantKey,
        name: &str,
    ) -> Result<Option<i32>, DataAccessError> {
        self.check_failure()?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tenants
            .get(tenant)
            .and_then(|ids| ids.ids_of(kind).get(name).copied()))
    }

    fn read_all(
        &self,
        kind: CacheKind,
        tenant: &TenantKey,
    ) -> Result<HashMap<String, i32>, DataAccessError> {
        self.check_failure()?;
        self.bulk_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tenants
            .get(tenant)
            .map(|ids| ids.ids_of(kind).clone())
            .unwrap_or_default())
    }
}

impl IdentityDao for MemoryIdentityDao {
    fn read_parameter_name_id(
        &self,
        tenant: &TenantKey,
        name: &str,
    ) -> Result<Option<i32>, DataAccessError> {
        self.read_one(CacheKind::ParameterName, tenant, name)
    }

    fn read_code_system_id(
        &self,
        tenant: &TenantKey,
        system: &str,
    ) -> Result<Option<i32>, DataAccessError> {
        self.read_one(CacheKind::CodeSystem, tenant, system)
    }

    fn read_resource_type_id(
        &self,
        tenant: &TenantKey,
        resource_type: &str,
    ) -> Result<Option<i32>, DataAccessError> {
        self.read_one(CacheKind::ResourceType, tenant, resource_type)
    }

    fn read_all_parameter_names(
        &self,
        tenant: &TenantKey,
    ) -> Result<HashMap<String, i32>, DataAccessError> {
        self.read_all(CacheKind::ParameterName, tenant)
    }

    fn read_all_code_systems(
        &self,
        tenant: &TenantKey,
    ) -> Result<HashMap<String, i32>, DataAccessError> {
        self.read_all(CacheKind::CodeSystem, tenant)
    }

    fn read_all_resource_types(
        &self,
        tenant: &TenantKey,
    ) -> Result<HashMap<String, i32>, DataAccessError> {
        self.read_all(CacheKind::ResourceType, tenant)
    }

    fn supports_limit_offset(&self) -> bool {
        self.limit_offset
    }
}
