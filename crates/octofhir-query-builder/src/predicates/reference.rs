//! Reference search parameter implementation.
//!
//! Stored references are `Type/id` strings (or absolute URLs). A search
//! value is brought into the same form before comparison:
//! - `Type/id` and absolute URLs are used as given
//! - `:Type` modifier plus a bare id gives `Type/id`
//! - a bare id on a parameter with exactly one target type gets that type

use url::Url;

use super::{PredicateContext, comparison, name_segment, reject_prefix, text_value};
use crate::error::QueryBuilderError;
use crate::fragment::{AliasRef, Fragment, SqlValue};
use crate::parameters::SearchModifier;
use crate::query::QueryParameter;
use crate::schema::STR_VALUE;

/// Qualify a reference search value the way references are stored.
pub fn normalize_reference(ctx: &PredicateContext<'_>, param: &QueryParameter, raw: &str) -> String {
    if raw.contains('/') {
        return raw.to_string();
    }
    if let Some(resource_type) = param.modifier_resource_type() {
        return format!("{resource_type}/{raw}");
    }
    if Url::parse(raw).is_ok() {
        return raw.to_string();
    }
    match ctx.registry.single_target(ctx.resource_type, &param.code) {
        Some(target) => format!("{target}/{raw}"),
        None => raw.to_string(),
    }
}

pub fn build(ctx: &PredicateContext<'_>, param: &QueryParameter) -> Result<Fragment, QueryBuilderError> {
    let op = match &param.modifier {
        None | Some(SearchModifier::Type(_)) => "=",
        Some(SearchModifier::Not) => "<>",
        Some(SearchModifier::Identifier) => {
            return Err(QueryBuilderError::Unsupported(format!(
                "reference modifier ':identifier' on '{}'",
                param.code
            )));
        }
        Some(other) => return Err(QueryBuilderError::invalid_modifier(&param.code, other)),
    };
    let name_id = ctx.parameter_name_id(&param.code)?;

    let mut clauses = Vec::with_capacity(param.values.len());
    for value in &param.values {
        reject_prefix(param, value)?;
        let raw = text_value(param, &value.value)?;
        let reference = normalize_reference(ctx, param, raw);
        tracing::trace!(code = %param.code, raw, reference = %reference, "normalized reference");
        clauses.push(comparison(AliasRef::Param, STR_VALUE, op, SqlValue::Text(reference)));
    }

    Ok(name_segment(name_id, clauses))
}
