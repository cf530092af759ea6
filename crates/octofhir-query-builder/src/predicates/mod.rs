//! Per-type predicate builders.
//!
//! Every builder turns one [`QueryParameter`] into a [`Fragment`] whose table
//! alias is still a variable:
//! - String: accent-insensitive prefix match, `:exact`, `:contains`
//! - URI: equality, `:below`, `:above`, `:contains`
//! - Token: code and code-system id, `:not`, `:above`, `:below`, `:contains`
//! - Number and Quantity: prefix comparisons, Range containment
//! - Date: interval algebra over point and period columns
//! - Reference: type qualification of bare ids, `:not`
//! - Chained references and compartment inclusion criteria
//! - Composite: AND of component predicates on joined component tables
//! - Location `near`: bounding boxes
//! - `:missing` on any indexed parameter
//!
//! The shape shared by all joined parameters is
//! `(<alias>.PARAMETER_NAME_ID = <id> AND (<value 1> OR <value 2> ...))`:
//! repeated parameters AND, repeated values OR.

pub mod chain;
pub mod composite;
pub mod date;
pub mod location;
pub mod missing;
pub mod number;
pub mod reference;
pub mod resource;
pub mod string;
pub mod token;
pub mod uri;

use crate::cache::{IdentityCache, TenantKey};
use crate::common::{ID, LAST_UPDATED};
use crate::config::QueryBuilderConfig;
use crate::error::QueryBuilderError;
use crate::fragment::{AliasRef, Fragment};
use crate::parameters::{SearchParameterType, SearchPrefix};
use crate::query::{ParameterValue, QueryParameter, QueryParameterValue};
use crate::registry::SearchParameterRegistry;
use crate::schema::{self, ValuesTable};

/// Surrogate id rendered for names the database has never assigned.
///
/// No row carries it, so the predicate matches nothing.
pub const UNKNOWN_ID: i32 = -1;

/// Everything a predicate builder may consult.
#[derive(Debug, Clone, Copy)]
pub struct PredicateContext<'a> {
    pub tenant: &'a TenantKey,
    /// Type whose tables the parameter is evaluated against.
    pub resource_type: &'a str,
    pub cache: &'a IdentityCache,
    pub registry: &'a SearchParameterRegistry,
    pub config: &'a QueryBuilderConfig,
}

impl<'a> PredicateContext<'a> {
    /// Same context evaluated against another resource type's tables.
    pub fn for_resource_type<'b>(&self, resource_type: &'b str) -> PredicateContext<'b>
    where
        'a: 'b,
    {
        PredicateContext {
            tenant: self.tenant,
            resource_type,
            cache: self.cache,
            registry: self.registry,
            config: self.config,
        }
    }

    pub fn parameter_name_id(&self, code: &str) -> Result<i32, QueryBuilderError> {
        Ok(self
            .cache
            .parameter_name_id(self.tenant, code)?
            .unwrap_or(UNKNOWN_ID))
    }

    pub fn code_system_id(&self, system: &str) -> Result<i32, QueryBuilderError> {
        Ok(self
            .cache
            .code_system_id(self.tenant, system)?
            .unwrap_or(UNKNOWN_ID))
    }
}

/// Where a parameter's fragment lands in the root query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Tests `R`/`LR` columns directly, no joined table.
    Root,
    /// Joins one values table under the parameter's alias.
    Joined(ValuesTable),
}

/// Decide where a parameter's fragment goes.
pub fn placement(resource_type: &str, param: &QueryParameter) -> Result<Placement, QueryBuilderError> {
    if param.is_inclusion_criteria() || param.is_chained() {
        return Ok(Placement::Joined(ValuesTable::Str));
    }
    if param.is_missing() || param.code == ID || param.code == LAST_UPDATED {
        return Ok(Placement::Root);
    }
    ValuesTable::for_type(resource_type, &param.code, param.param_type)
        .map(Placement::Joined)
        .ok_or_else(|| {
            QueryBuilderError::Unsupported(format!(
                "special parameter '{}' on {resource_type}",
                param.code
            ))
        })
}

/// Build the fragment for one parameter.
///
/// This is the single dispatch point over [`SearchParameterType`].
pub fn build_predicate(
    ctx: &PredicateContext<'_>,
    param: &QueryParameter,
) -> Result<Fragment, QueryBuilderError> {
    if param.is_inclusion_criteria() {
        if !ctx.config.capabilities.compartment_search {
            return Err(QueryBuilderError::Unsupported(
                "compartment search".to_string(),
            ));
        }
        return chain::build_inclusion(ctx, param);
    }

    if param.is_chained() {
        if !ctx.config.capabilities.chained_search {
            return Err(QueryBuilderError::Unsupported(format!(
                "chained search on '{}'",
                param.code
            )));
        }
        return chain::build(ctx, param);
    }

    if let Some(modifier) = &param.modifier {
        if !modifier.applicable_to(&param.param_type) {
            return Err(QueryBuilderError::invalid_modifier(&param.code, modifier));
        }
    }

    if param.is_missing() {
        return missing::build(ctx, param);
    }

    if param.values.is_empty() {
        return Err(QueryBuilderError::malformed(&param.code, "no values supplied"));
    }

    if param.code == ID {
        return resource::build_id(param, schema::LOGICAL_RESOURCES_ALIAS);
    }
    if param.code == LAST_UPDATED {
        return resource::build_last_updated(param, schema::RESOURCES_ALIAS);
    }

    tracing::trace!(
        code = %param.code,
        param_type = %param.param_type,
        resource_type = ctx.resource_type,
        "building predicate"
    );

    if schema::is_location_near(ctx.resource_type, &param.code) {
        return location::build(ctx, param);
    }

    match param.param_type {
        SearchParameterType::String => string::build(ctx, param),
        SearchParameterType::Uri => uri::build(ctx, param),
        SearchParameterType::Token => token::build(ctx, param),
        SearchParameterType::Number => number::build_number(ctx, param),
        SearchParameterType::Quantity => number::build_quantity(ctx, param),
        SearchParameterType::Date => date::build(ctx, param),
        SearchParameterType::Reference => reference::build(ctx, param),
        SearchParameterType::Composite => composite::build(ctx, param),
        SearchParameterType::Special => Err(QueryBuilderError::Unsupported(format!(
            "special parameter '{}' on {}",
            param.code, ctx.resource_type
        ))),
    }
}

/// `(<alias>.PARAMETER_NAME_ID = <id> AND (<c1> OR <c2> ...))`
pub(crate) fn name_segment(name_id: i32, clauses: Vec<Fragment>) -> Fragment {
    let mut fragment = Fragment::sql("(");
    fragment
        .push_column(schema::PARAMETER_NAME_ID)
        .push_sql(format!(" = {name_id} AND ("))
        .append(Fragment::join(clauses, " OR "))
        .push_sql("))");
    fragment
}

/// `<alias>.<column> <op> ?`
pub(crate) fn comparison(
    alias: AliasRef,
    column: &str,
    op: &str,
    value: crate::fragment::SqlValue,
) -> Fragment {
    let mut fragment = Fragment::new();
    fragment
        .push_column_of(alias, column)
        .push_sql(format!(" {op} "))
        .push_bind(value);
    fragment
}

/// Reject comparison prefixes on types that have none.
pub(crate) fn reject_prefix(
    param: &QueryParameter,
    value: &QueryParameterValue,
) -> Result<(), QueryBuilderError> {
    match value.prefix {
        None | Some(SearchPrefix::Eq) => Ok(()),
        Some(prefix) => Err(QueryBuilderError::invalid_prefix(&param.code, prefix)),
    }
}

/// Text payload of string-like values, rejecting empty strings.
pub(crate) fn text_value<'v>(
    param: &QueryParameter,
    value: &'v ParameterValue,
) -> Result<&'v str, QueryBuilderError> {
    let text = match value {
        ParameterValue::String(s) | ParameterValue::Uri(s) | ParameterValue::Reference(s) => s,
        other => {
            return Err(QueryBuilderError::malformed(
                &param.code,
                format!("expected a {} value, got {}", param.param_type, other.kind_name()),
            ));
        }
    };
    if text.is_empty() {
        return Err(QueryBuilderError::malformed(&param.code, "empty value"));
    }
    Ok(text)
}
