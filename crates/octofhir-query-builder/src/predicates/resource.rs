//! `_id` and `_lastUpdated`, which test the resource tables directly.

use super::date::{point_relation, range_of};
use crate::error::QueryBuilderError;
use crate::fragment::{AliasRef, Fragment, SqlValue};
use crate::query::{ParameterValue, QueryParameter};
use crate::schema::{LAST_UPDATED, LOGICAL_ID};

/// `<lr>.LOGICAL_ID IN (?, ...)`
pub fn build_id(param: &QueryParameter, logical_resources_alias: &str) -> Result<Fragment, QueryBuilderError> {
    if let Some(modifier) = &param.modifier {
        return Err(QueryBuilderError::Unsupported(format!(
            "modifier ':{modifier}' on '{}'",
            param.code
        )));
    }

    let mut ids = Vec::with_capacity(param.values.len());
    for value in &param.values {
        super::reject_prefix(param, value)?;
        let id = match &value.value {
            ParameterValue::Token {
                system: None,
                code: Some(code),
            } => code,
            ParameterValue::String(id) => id,
            other => {
                return Err(QueryBuilderError::malformed(
                    &param.code,
                    format!("expected a logical id, got {}", other.kind_name()),
                ));
            }
        };
        if id.is_empty() {
            return Err(QueryBuilderError::malformed(&param.code, "empty id"));
        }
        ids.push(SqlValue::text(id.as_str()));
    }

    let mut fragment = Fragment::new();
    fragment
        .push_column_of(AliasRef::Fixed(logical_resources_alias.to_string()), LOGICAL_ID)
        .push_sql(" IN ")
        .push_bind_list(ids);
    Ok(fragment)
}

/// Point relations on `<r>.LAST_UPDATED`, values OR-ed.
pub fn build_last_updated(param: &QueryParameter, resources_alias: &str) -> Result<Fragment, QueryBuilderError> {
    if let Some(modifier) = &param.modifier {
        return Err(QueryBuilderError::invalid_modifier(&param.code, modifier));
    }

    let alias = AliasRef::Fixed(resources_alias.to_string());
    let mut clauses = Vec::with_capacity(param.values.len());
    for value in &param.values {
        let range = range_of(param, &value.value)?;
        clauses.push(point_relation(&alias, LAST_UPDATED, value.effective_prefix(), &range));
    }
    Ok(Fragment::join(clauses, " OR ").parenthesized())
}
