//! Search query builder.
//!
//! Entry point of the crate: validates a search, builds one fragment per
//! parameter and hands them to the aggregator.

use std::sync::Arc;

use crate::aggregator::{self, GeneratedQuery, QuerySegmentAggregator};
use crate::cache::{IdentityCache, TenantKey};
use crate::common::{ID, LAST_UPDATED, NEAR, NEAR_DISTANCE};
use crate::config::{PaginationDialect, QueryBuilderConfig};
use crate::error::QueryBuilderError;
use crate::fragment::RenderedFragment;
use crate::predicates::{PredicateContext, build_predicate};
use crate::query::{Pagination, ParameterValue, QueryParameter};
use crate::registry::SearchParameterRegistry;
use crate::schema::{self, ANY_RESOURCE_TYPE};

/// Alias used when a single fragment is rendered on its own.
const DIAGNOSTIC_ALIAS: &str = "P1";

/// Builds row and count queries for FHIR searches.
///
/// Cheap to share: the cache and registry are behind `Arc`, and building a
/// query never mutates the builder.
#[derive(Debug)]
pub struct QueryBuilder {
    cache: Arc<IdentityCache>,
    registry: Arc<SearchParameterRegistry>,
    config: QueryBuilderConfig,
    dialect: PaginationDialect,
}

impl QueryBuilder {
    /// Create a builder.
    ///
    /// The pagination dialect is fixed here: the configured one, else the one
    /// the identity DAO's database supports.
    pub fn new(
        cache: Arc<IdentityCache>,
        registry: Arc<SearchParameterRegistry>,
        config: QueryBuilderConfig,
    ) -> Self {
        let dialect = config.pagination_dialect.unwrap_or_else(|| {
            PaginationDialect::from_limit_offset_support(cache.dao().supports_limit_offset())
        });
        if cache.config() != &config.cache {
            tracing::warn!(
                configured = ?config.cache,
                actual = ?cache.config(),
                "identity cache was built with different cache settings"
            );
        }
        tracing::debug!(?dialect, bind_style = ?config.bind_style, "query builder created");
        Self {
            cache,
            registry,
            config,
            dialect,
        }
    }

    pub fn config(&self) -> &QueryBuilderConfig {
        &self.config
    }

    pub fn pagination_dialect(&self) -> PaginationDialect {
        self.dialect
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<SearchParameterRegistry> {
        &self.registry
    }

    /// Row query for one page of results.
    pub fn build_query(
        &self,
        tenant: &TenantKey,
        resource_type: &str,
        parameters: &[QueryParameter],
        pagination: &Pagination,
    ) -> Result<GeneratedQuery, QueryBuilderError> {
        self.validate_pagination(pagination)?;
        let parameters = self.prepare(resource_type, parameters)?;

        let query = if resource_type == ANY_RESOURCE_TYPE {
            let parts = self.system_segments(tenant, &parameters)?;
            aggregator::build_system_query(&parts, pagination)?
        } else {
            self.segments(tenant, resource_type, &parameters)?
                .build_query(pagination)?
        };

        tracing::debug!(
            tenant = %tenant,
            resource_type,
            parameters = parameters.len(),
            binds = query.binds.len(),
            page = pagination.page_number,
            "built search query"
        );
        tracing::trace!(sql = %query.sql, "search query");
        Ok(query)
    }

    /// Count query with the same filtering as [`Self::build_query`].
    pub fn build_count_query(
        &self,
        tenant: &TenantKey,
        resource_type: &str,
        parameters: &[QueryParameter],
    ) -> Result<GeneratedQuery, QueryBuilderError> {
        let parameters = self.prepare(resource_type, parameters)?;

        let query = if resource_type == ANY_RESOURCE_TYPE {
            let parts = self.system_segments(tenant, &parameters)?;
            aggregator::build_system_count_query(&parts)?
        } else {
            self.segments(tenant, resource_type, &parameters)?
                .build_count_query()?
        };

        tracing::debug!(
            tenant = %tenant,
            resource_type,
            parameters = parameters.len(),
            binds = query.binds.len(),
            "built count query"
        );
        tracing::trace!(sql = %query.sql, "count query");
        Ok(query)
    }

    /// Fragment of a single parameter, rendered under alias `P1`.
    pub fn build_parameter_fragment(
        &self,
        tenant: &TenantKey,
        resource_type: &str,
        parameter: &QueryParameter,
    ) -> Result<RenderedFragment, QueryBuilderError> {
        schema::validate_resource_type(resource_type)?;
        self.check_chain_depth(parameter)?;
        let ctx = self.context(tenant, resource_type);
        build_predicate(&ctx, parameter)?.render(DIAGNOSTIC_ALIAS, self.config.bind_style)
    }

    fn context<'a>(&'a self, tenant: &'a TenantKey, resource_type: &'a str) -> PredicateContext<'a> {
        PredicateContext {
            tenant,
            resource_type,
            cache: &self.cache,
            registry: &self.registry,
            config: &self.config,
        }
    }

    fn segments(
        &self,
        tenant: &TenantKey,
        resource_type: &str,
        parameters: &[QueryParameter],
    ) -> Result<QuerySegmentAggregator, QueryBuilderError> {
        let ctx = self.context(tenant, resource_type);
        let mut aggregator =
            QuerySegmentAggregator::new(resource_type, self.dialect, self.config.bind_style);
        for parameter in parameters {
            let fragment = build_predicate(&ctx, parameter)?;
            aggregator.add_fragment(fragment, parameter)?;
        }
        Ok(aggregator)
    }

    /// One aggregator per resource type known to the tenant.
    fn system_segments(
        &self,
        tenant: &TenantKey,
        parameters: &[QueryParameter],
    ) -> Result<Vec<QuerySegmentAggregator>, QueryBuilderError> {
        let resource_types = self.cache.resource_type_names(tenant)?;
        if resource_types.is_empty() {
            return Err(QueryBuilderError::Unsupported(
                "system-level search without any resource type".to_string(),
            ));
        }

        let mut parts = Vec::with_capacity(resource_types.len());
        for resource_type in &resource_types {
            schema::validate_resource_type(resource_type)?;
            parts.push(self.segments(tenant, resource_type, parameters)?);
        }
        Ok(parts)
    }

    /// Validate, combine `near`/`near-distance` and order the parameters.
    fn prepare(
        &self,
        resource_type: &str,
        parameters: &[QueryParameter],
    ) -> Result<Vec<QueryParameter>, QueryBuilderError> {
        if resource_type != ANY_RESOURCE_TYPE {
            schema::validate_resource_type(resource_type)?;
        }
        if parameters.len() > self.config.max_parameters {
            return Err(QueryBuilderError::QueryTooComplex(format!(
                "{} parameters, at most {} allowed",
                parameters.len(),
                self.config.max_parameters
            )));
        }
        for parameter in parameters {
            self.check_chain_depth(parameter)?;
        }

        let mut prepared = if resource_type == "Location" {
            combine_near(parameters)?
        } else {
            parameters.to_vec()
        };
        prepared.sort_by_key(|p| match p.code.as_str() {
            ID => 0,
            LAST_UPDATED => 1,
            _ => 2,
        });
        Ok(prepared)
    }

    fn check_chain_depth(&self, parameter: &QueryParameter) -> Result<(), QueryBuilderError> {
        let depth = std::iter::once(parameter)
            .chain(&parameter.inclusion)
            .map(QueryParameter::chain_depth)
            .max()
            .unwrap_or_default();
        if depth > self.config.max_chain_depth {
            return Err(QueryBuilderError::QueryTooComplex(format!(
                "chain depth {depth} on '{}' exceeds {}",
                parameter.code, self.config.max_chain_depth
            )));
        }
        Ok(())
    }

    fn validate_pagination(&self, pagination: &Pagination) -> Result<(), QueryBuilderError> {
        if pagination.page_number < 1 {
            return Err(QueryBuilderError::malformed("_page", "page numbers start at 1"));
        }
        if pagination.page_size == 0 || pagination.page_size > self.config.max_page_size {
            return Err(QueryBuilderError::malformed(
                "_count",
                format!(
                    "page size {} is outside 1..={}",
                    pagination.page_size, self.config.max_page_size
                ),
            ));
        }
        Ok(())
    }
}

/// Fold a `near-distance` parameter into the `near` values lacking a distance.
fn combine_near(parameters: &[QueryParameter]) -> Result<Vec<QueryParameter>, QueryBuilderError> {
    let mut distances = parameters
        .iter()
        .filter(|p| p.code == NEAR_DISTANCE)
        .flat_map(|p| &p.values);
    let distance = distances.next();
    if distances.next().is_some() {
        return Err(QueryBuilderError::malformed(
            NEAR_DISTANCE,
            "only one distance may be given",
        ));
    }
    let Some(distance) = distance else {
        return Ok(parameters.to_vec());
    };

    let (value, unit) = match &distance.value {
        ParameterValue::Quantity {
            value, code, unit, ..
        } => (*value, code.clone().or_else(|| unit.clone())),
        ParameterValue::Number(value) => (*value, None),
        other => {
            return Err(QueryBuilderError::malformed(
                NEAR_DISTANCE,
                format!("expected a quantity, got {}", other.kind_name()),
            ));
        }
    };
    if !parameters.iter().any(|p| p.code == NEAR) {
        return Err(QueryBuilderError::malformed(
            NEAR_DISTANCE,
            "near-distance requires a near parameter",
        ));
    }

    let mut combined = Vec::with_capacity(parameters.len());
    for parameter in parameters {
        if parameter.code == NEAR_DISTANCE {
            continue;
        }
        let mut parameter = parameter.clone();
        if parameter.code == NEAR {
            for near in &mut parameter.values {
                if let ParameterValue::Near {
                    distance: d @ None,
                    unit: u,
                    ..
                } = &mut near.value
                {
                    *d = Some(value);
                    *u = unit.clone();
                }
            }
        }
        combined.push(parameter);
    }
    tracing::trace!(distance = value, unit = ?unit, "combined near-distance into near");
    Ok(combined)
}
