//! `:missing` on any indexed parameter.
//!
//! Tested with a correlated `EXISTS` against the parameter's values table,
//! so no table is joined for it in the root query.

use super::PredicateContext;
use crate::common::{ID, LAST_UPDATED};
use crate::error::QueryBuilderError;
use crate::fragment::Fragment;
use crate::query::{ParameterValue, QueryParameter};
use crate::schema::{LOGICAL_RESOURCE_ID, LOGICAL_RESOURCES_ALIAS, PARAMETER_NAME_ID, ValuesTable};

const MISSING_ALIAS: &str = "MV";

/// The single boolean carried by a `:missing` parameter.
fn requested(param: &QueryParameter) -> Result<bool, QueryBuilderError> {
    let mut flag = None;
    for value in &param.values {
        let current = match &value.value {
            ParameterValue::Missing(b) => *b,
            ParameterValue::String(s) | ParameterValue::Token { code: Some(s), .. } => {
                match s.as_str() {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(QueryBuilderError::malformed(
                            &param.code,
                            format!("':missing' expects true or false, got '{other}'"),
                        ));
                    }
                }
            }
            other => {
                return Err(QueryBuilderError::malformed(
                    &param.code,
                    format!("':missing' expects true or false, got {}", other.kind_name()),
                ));
            }
        };
        match flag {
            Some(previous) if previous != current => {
                return Err(QueryBuilderError::malformed(
                    &param.code,
                    "':missing' cannot be both true and false",
                ));
            }
            _ => flag = Some(current),
        }
    }
    flag.ok_or_else(|| QueryBuilderError::malformed(&param.code, "':missing' needs a value"))
}

/// `[NOT ]EXISTS (SELECT 1 FROM <table> MV WHERE MV.PARAMETER_NAME_ID = n
/// AND MV.LOGICAL_RESOURCE_ID = LR.LOGICAL_RESOURCE_ID)`
pub fn build(ctx: &PredicateContext<'_>, param: &QueryParameter) -> Result<Fragment, QueryBuilderError> {
    let missing = requested(param)?;
    if param.code == ID || param.code == LAST_UPDATED {
        return Err(QueryBuilderError::Unsupported(format!(
            "':missing' on '{}'",
            param.code
        )));
    }
    let table = ValuesTable::for_type(ctx.resource_type, &param.code, param.param_type)
        .ok_or_else(|| {
            QueryBuilderError::Unsupported(format!(
                "':missing' on special parameter '{}'",
                param.code
            ))
        })?;
    let name_id = ctx.parameter_name_id(&param.code)?;

    let negation = if missing { "NOT " } else { "" };
    Ok(Fragment::sql(format!(
        "{negation}EXISTS (SELECT 1 FROM {table_name} {MISSING_ALIAS} \
         WHERE {MISSING_ALIAS}.{PARAMETER_NAME_ID} = {name_id} \
         AND {MISSING_ALIAS}.{LOGICAL_RESOURCE_ID} = {LOGICAL_RESOURCES_ALIAS}.{LOGICAL_RESOURCE_ID})",
        table_name = table.table_name(ctx.resource_type),
    )))
}
