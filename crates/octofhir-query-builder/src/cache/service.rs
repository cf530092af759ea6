use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{CacheKind, IdentityDao, NameIdCache, TenantKey};
use crate::config::{CacheConfig, QueryBuilderConfig};
use crate::error::DataAccessError;

/// Point-in-time copy of one tenant's cached ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheDump {
    pub tenant: TenantKey,
    pub parameter_names: BTreeMap<String, i32>,
    pub code_systems: BTreeMap<String, i32>,
    pub resource_types: BTreeMap<String, i32>,
}

/// A cached id that disagrees with the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheDiscrepancy {
    pub kind: CacheKind,
    pub name: String,
    pub cached: i32,
    /// `None` when the database no longer knows the name.
    pub database: Option<i32>,
}

/// Shared surrogate-id lookup service.
///
/// Construct one per process, wrap it in an `Arc` and hand it to every
/// [`QueryBuilder`](crate::QueryBuilder). Lookups run without locks; a miss
/// goes to the DAO and the answer is cached. Concurrent misses for the same
/// name may each reach the DAO, they all store the same id.
pub struct IdentityCache {
    dao: Arc<dyn IdentityDao>,
    config: CacheConfig,
    parameter_names: NameIdCache,
    code_systems: NameIdCache,
    resource_types: NameIdCache,
    /// Tenants whose caches were bulk loaded. Held for the whole load.
    initialized: Mutex<HashSet<TenantKey>>,
}

impl std::fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("config", &self.config)
            .field("initialized", &self.initialized.lock().len())
            .finish_non_exhaustive()
    }
}

impl IdentityCache {
    pub fn new(dao: Arc<dyn IdentityDao>, config: CacheConfig) -> Self {
        Self {
            dao,
            config,
            parameter_names: NameIdCache::new(),
            code_systems: NameIdCache::new(),
            resource_types: NameIdCache::new(),
            initialized: Mutex::new(HashSet::new()),
        }
    }

    /// Cache built from the `[cache]` section of a builder configuration.
    pub fn from_config(dao: Arc<dyn IdentityDao>, config: &QueryBuilderConfig) -> Self {
        Self::new(dao, config.cache.clone())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn dao(&self) -> &Arc<dyn IdentityDao> {
        &self.dao
    }

    pub fn parameter_name_id(
        &self,
        tenant: &TenantKey,
        name: &str,
    ) -> Result<Option<i32>, DataAccessError> {
        self.lookup(CacheKind::ParameterName, tenant, name)
    }

    pub fn code_system_id(
        &self,
        tenant: &TenantKey,
        system: &str,
    ) -> Result<Option<i32>, DataAccessError> {
        self.lookup(CacheKind::CodeSystem, tenant, system)
    }

    pub fn resource_type_id(
        &self,
        tenant: &TenantKey,
        resource_type: &str,
    ) -> Result<Option<i32>, DataAccessError> {
        self.lookup(CacheKind::ResourceType, tenant, resource_type)
    }

    fn cache(&self, kind: CacheKind) -> &NameIdCache {
        match kind {
            CacheKind::ParameterName => &self.parameter_names,
            CacheKind::CodeSystem => &self.code_systems,
            CacheKind::ResourceType => &self.resource_types,
        }
    }

    fn enabled(&self, kind: CacheKind) -> bool {
        match kind {
            CacheKind::ParameterName => self.config.parameter_names_enabled,
            CacheKind::CodeSystem => self.config.code_systems_enabled,
            CacheKind::ResourceType => self.config.resource_types_enabled,
        }
    }

    fn read_one(
        &self,
        kind: CacheKind,
        tenant: &TenantKey,
        name: &str,
    ) -> Result<Option<i32>, DataAccessError> {
        match kind {
            CacheKind::ParameterName => self.dao.read_parameter_name_id(tenant, name),
            CacheKind::CodeSystem => self.dao.read_code_system_id(tenant, name),
            CacheKind::ResourceType => self.dao.read_resource_type_id(tenant, name),
        }
    }

    fn read_all(
        &self,
        kind: CacheKind,
        tenant: &TenantKey,
    ) -> Result<HashMap<String, i32>, DataAccessError> {
        match kind {
            CacheKind::ParameterName => self.dao.read_all_parameter_names(tenant),
            CacheKind::CodeSystem => self.dao.read_all_code_systems(tenant),
            CacheKind::ResourceType => self.dao.read_all_resource_types(tenant),
        }
    }

    fn lookup(
        &self,
        kind: CacheKind,
        tenant: &TenantKey,
        name: &str,
    ) -> Result<Option<i32>, DataAccessError> {
        let enabled = self.enabled(kind);
        if enabled {
            if let Some(id) = self.cache(kind).get(tenant, name) {
                return Ok(Some(id));
            }
        }

        let found = self.read_one(kind, tenant, name)?;
        match found {
            Some(id) if enabled => {
                self.cache(kind).insert(tenant, name, id);
                debug!(%tenant, %kind, name, id, "cached surrogate id");
            }
            Some(_) => {}
            None => debug!(%tenant, %kind, name, "no surrogate id assigned"),
        }
        Ok(found)
    }

    /// Bulk load every enabled cache for a tenant.
    ///
    /// One loader runs at a time per process. Calling it again for an
    /// initialized tenant does nothing.
    pub fn init_cache(&self, tenant: &TenantKey) -> Result<(), DataAccessError> {
        let mut initialized = self.initialized.lock();
        if initialized.contains(tenant) {
            return Ok(());
        }

        for kind in CacheKind::ALL {
            if !self.enabled(kind) {
                continue;
            }
            let entries = self.read_all(kind, tenant)?;
            let count = entries.len();
            self.cache(kind).insert_all(tenant, entries);
            debug!(%tenant, %kind, count, "bulk loaded surrogate ids");
        }

        initialized.insert(tenant.clone());
        info!(%tenant, "identity caches initialized");
        Ok(())
    }

    pub fn is_initialized(&self, tenant: &TenantKey) -> bool {
        self.initialized.lock().contains(tenant)
    }

    /// Sorted names of every resource type known for a tenant.
    ///
    /// Read from the resource-type cache after the bulk load, so types
    /// resolved later through [`Self::resource_type_id`] are included. A type
    /// the database gains after the load shows up once it has been looked up.
    pub fn resource_type_names(&self, tenant: &TenantKey) -> Result<Vec<String>, DataAccessError> {
        if !self.enabled(CacheKind::ResourceType) {
            let mut names: Vec<String> = self
                .read_all(CacheKind::ResourceType, tenant)?
                .into_keys()
                .collect();
            names.sort();
            return Ok(names);
        }

        self.init_cache(tenant)?;
        Ok(self.resource_types.snapshot(tenant).into_keys().collect())
    }

    /// Copy of everything cached for a tenant. Also logged at debug level.
    pub fn dump_contents(&self, tenant: &TenantKey) -> CacheDump {
        let dump = CacheDump {
            tenant: tenant.clone(),
            parameter_names: self.parameter_names.snapshot(tenant),
            code_systems: self.code_systems.snapshot(tenant),
            resource_types: self.resource_types.snapshot(tenant),
        };
        debug!(
            %tenant,
            parameter_names = dump.parameter_names.len(),
            code_systems = dump.code_systems.len(),
            resource_types = dump.resource_types.len(),
            "identity cache contents"
        );
        dump
    }

    /// Compare cached ids with the database's current view.
    ///
    /// Each mismatch is logged at warn level and returned.
    pub fn report_discrepancies(
        &self,
        tenant: &TenantKey,
    ) -> Result<Vec<CacheDiscrepancy>, DataAccessError> {
        let mut discrepancies = Vec::new();
        for kind in CacheKind::ALL {
            let cached = self.cache(kind).snapshot(tenant);
            if cached.is_empty() {
                continue;
            }
            let database = self.read_all(kind, tenant)?;
            for (name, cached_id) in cached {
                let database_id = database.get(&name).copied();
                if database_id != Some(cached_id) {
                    warn!(
                        %tenant,
                        %kind,
                        name = %name,
                        cached = cached_id,
                        database = ?database_id,
                        "identity cache disagrees with database"
                    );
                    discrepancies.push(CacheDiscrepancy {
                        kind,
                        name,
                        cached: cached_id,
                        database: database_id,
                    });
                }
            }
        }
        Ok(discrepancies)
    }
}
