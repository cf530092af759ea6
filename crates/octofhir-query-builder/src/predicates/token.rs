//! Token search parameter implementation.
//!
//! A token value is `[system]|[code]`. The code is compared against
//! `TOKEN_VALUE`, the system is resolved to its surrogate id and compared
//! against `CODE_SYSTEM_ID`. Both must match, except under `:not` where
//! either differing is enough.

use super::{PredicateContext, comparison, name_segment, reject_prefix};
use crate::encoder::{LIKE_ESCAPE_CLAUSE, escape_like};
use crate::error::QueryBuilderError;
use crate::fragment::{AliasRef, Fragment, SqlValue};
use crate::parameters::SearchModifier;
use crate::query::{ParameterValue, QueryParameter};
use crate::schema::{CODE_SYSTEM_ID, TOKEN_VALUE};

/// Operator applied to `TOKEN_VALUE` for a modifier.
fn code_operator(param: &QueryParameter) -> Result<&'static str, QueryBuilderError> {
    match &param.modifier {
        None | Some(SearchModifier::Exact) => Ok("="),
        Some(SearchModifier::Not) => Ok("<>"),
        Some(SearchModifier::Above) => Ok(">"),
        Some(SearchModifier::Below) => Ok("<"),
        Some(SearchModifier::Contains) => Ok("LIKE"),
        Some(
            modifier @ (SearchModifier::Text
            | SearchModifier::In
            | SearchModifier::NotIn
            | SearchModifier::OfType),
        ) => Err(QueryBuilderError::Unsupported(format!(
            "token modifier ':{modifier}' on '{}'",
            param.code
        ))),
        Some(other) => Err(QueryBuilderError::invalid_modifier(&param.code, other)),
    }
}

pub fn build(ctx: &PredicateContext<'_>, param: &QueryParameter) -> Result<Fragment, QueryBuilderError> {
    let op = code_operator(param)?;
    let negated = matches!(param.modifier, Some(SearchModifier::Not));
    let name_id = ctx.parameter_name_id(&param.code)?;

    let mut clauses = Vec::with_capacity(param.values.len());
    for value in &param.values {
        reject_prefix(param, value)?;
        let (system, code) = match &value.value {
            ParameterValue::Token { system, code } => (system.as_deref(), code.as_deref()),
            ParameterValue::String(code) => (None, Some(code.as_str())),
            other => {
                return Err(QueryBuilderError::malformed(
                    &param.code,
                    format!("expected a token value, got {}", other.kind_name()),
                ));
            }
        };

        let mut parts = Vec::with_capacity(2);
        if let Some(code) = code.filter(|c| !c.is_empty()) {
            let part = if op == "LIKE" {
                let mut like = comparison(
                    AliasRef::Param,
                    TOKEN_VALUE,
                    op,
                    SqlValue::Text(format!("%{}%", escape_like(code))),
                );
                like.push_sql(LIKE_ESCAPE_CLAUSE);
                like
            } else {
                comparison(AliasRef::Param, TOKEN_VALUE, op, SqlValue::text(code))
            };
            parts.push(part);
        }

        if let Some(system) = system.filter(|s| !s.is_empty()) {
            let system_id = ctx.code_system_id(system)?;
            let system_op = if negated { "<>" } else { "=" };
            parts.push(comparison(
                AliasRef::Param,
                CODE_SYSTEM_ID,
                system_op,
                SqlValue::Integer(i64::from(system_id)),
            ));
        }

        if parts.is_empty() {
            return Err(QueryBuilderError::malformed(
                &param.code,
                "token needs a code, a system, or both",
            ));
        }

        let joiner = if negated { " OR " } else { " AND " };
        clauses.push(Fragment::join(parts, joiner).parenthesized());
    }

    Ok(name_segment(name_id, clauses))
}
