//! String search parameter implementation.
//!
//! String search supports the following modifiers:
//! - (default): starts-with against the accent-folded lowercase column
//! - :exact: case-sensitive equality against the raw column
//! - :contains: substring match against the accent-folded lowercase column

use super::{PredicateContext, comparison, name_segment, reject_prefix, text_value};
use crate::encoder::{LIKE_ESCAPE_CLAUSE, escape_like, normalize_for_search};
use crate::error::QueryBuilderError;
use crate::fragment::{AliasRef, Fragment, SqlValue};
use crate::parameters::SearchModifier;
use crate::query::QueryParameter;
use crate::schema::{STR_VALUE, STR_VALUE_LCASE};

/// Build the fragment for a string parameter.
///
/// Wildcards inside the value are escaped before the operator's own
/// wildcards are added, so `50%` matches the literal text `50%`.
pub fn build(ctx: &PredicateContext<'_>, param: &QueryParameter) -> Result<Fragment, QueryBuilderError> {
    let name_id = ctx.parameter_name_id(&param.code)?;

    let mut clauses = Vec::with_capacity(param.values.len());
    for value in &param.values {
        reject_prefix(param, value)?;
        let raw = text_value(param, &value.value)?;

        let clause = match &param.modifier {
            None => like(format!("{}%", normalize_for_search(&escape_like(raw)))),
            Some(SearchModifier::Contains) => {
                like(format!("%{}%", normalize_for_search(&escape_like(raw))))
            }
            Some(SearchModifier::Exact) => {
                comparison(AliasRef::Param, STR_VALUE, "=", SqlValue::text(raw))
            }
            Some(other) => return Err(QueryBuilderError::invalid_modifier(&param.code, other)),
        };
        clauses.push(clause);
    }

    Ok(name_segment(name_id, clauses))
}

fn like(pattern: String) -> Fragment {
    let mut clause = comparison(AliasRef::Param, STR_VALUE_LCASE, "LIKE", SqlValue::Text(pattern));
    clause.push_sql(LIKE_ESCAPE_CLAUSE);
    clause
}
