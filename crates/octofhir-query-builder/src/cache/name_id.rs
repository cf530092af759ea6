use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;

use super::TenantKey;

/// Name → surrogate id map, partitioned by tenant.
///
/// The outer map hands out one inner map per tenant. Both levels are
/// DashMaps, so readers never block and writers only lock a shard.
#[derive(Debug, Default)]
pub struct NameIdCache {
    tenants: DashMap<TenantKey, Arc<DashMap<String, i32>>>,
}

impl NameIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn tenant_map(&self, tenant: &TenantKey) -> Arc<DashMap<String, i32>> {
        if let Some(map) = self.tenants.get(tenant) {
            return map.clone();
        }
        self.tenants
            .entry(tenant.clone())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone()
    }

    pub fn get(&self, tenant: &TenantKey, name: &str) -> Option<i32> {
        let map = self.tenants.get(tenant)?;
        map.get(name).map(|id| *id)
    }

    /// Last write wins. Racing writers store the same id anyway.
    pub fn insert(&self, tenant: &TenantKey, name: impl Into<String>, id: i32) {
        self.tenant_map(tenant).insert(name.into(), id);
    }

    pub fn insert_all(&self, tenant: &TenantKey, entries: HashMap<String, i32>) {
        let map = self.tenant_map(tenant);
        for (name, id) in entries {
            map.insert(name, id);
        }
    }

    /// Sorted copy of one tenant's entries.
    pub fn snapshot(&self, tenant: &TenantKey) -> BTreeMap<String, i32> {
        self.tenants
            .get(tenant)
            .map(|map| {
                map.iter()
                    .map(|entry| (entry.key().clone(), *entry.value()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of entries cached for a tenant.
    pub fn len(&self, tenant: &TenantKey) -> usize {
        self.tenants.get(tenant).map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, tenant: &TenantKey) -> bool {
        self.len(tenant) == 0
    }
}
