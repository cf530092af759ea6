//! Chained reference search and compartment inclusion criteria.
//!
//! `Observation?subject:Patient.name=Smith` becomes a correlated sub-select
//! over the Patient tables projecting `'Patient' || '/' || LOGICAL_ID`, tested
//! with `IN` against the reference column of the searched resource. Every
//! further hop nests one more sub-select, so the SQL closes with one
//! parenthesis per hop plus one for the outer parameter.
//!
//! Aliases inside the sub-selects are fixed per nesting level (`CR1`, `CLR1`,
//! `CP1`, then `CR2`, ...), only the outermost column keeps the parameter
//! alias variable.

use super::{PredicateContext, build_predicate, composite, resource, text_value};
use crate::common::{ID, LAST_UPDATED};
use crate::compartment;
use crate::error::QueryBuilderError;
use crate::fragment::{AliasRef, Fragment, SqlValue};
use crate::parameters::{SearchModifier, SearchParameterType};
use crate::query::QueryParameter;
use crate::schema::{
    self, ANY_RESOURCE_TYPE, LOGICAL_ID, PARAMETER_NAME_ID, STR_VALUE, ValuesTable,
};

/// `:*` type modifier, matches a reference to any resource type.
pub const WILDCARD_TYPE: &str = "*";

/// `(<alias>.PARAMETER_NAME_ID = <id> AND <alias>.STR_VALUE IN (SELECT ...))`
pub fn build(ctx: &PredicateContext<'_>, param: &QueryParameter) -> Result<Fragment, QueryBuilderError> {
    if param.chain.is_empty() {
        return Err(QueryBuilderError::malformed(&param.code, "chain has no segments"));
    }
    if param.chain_depth() > ctx.config.max_chain_depth {
        return Err(QueryBuilderError::QueryTooComplex(format!(
            "chain depth {} on '{}' exceeds {}",
            param.chain_depth(),
            param.code,
            ctx.config.max_chain_depth
        )));
    }

    tracing::debug!(
        code = %param.code,
        depth = param.chain_depth(),
        resource_type = ctx.resource_type,
        "building chained reference"
    );

    let name_id = ctx.parameter_name_id(&param.code)?;
    let mut fragment = Fragment::sql("(");
    fragment
        .push_column(PARAMETER_NAME_ID)
        .push_sql(format!(" = {name_id} AND "))
        .append(reference_in(ctx, param, AliasRef::Param, &param.chain, 1)?)
        .push_sql(")");
    Ok(fragment)
}

/// OR of compartment membership criteria, parenthesized.
///
/// A plain criterion compares the reference column with `Compartment/id`.
/// A dotted criterion (`device.patient:Device`) is turned into a chain first.
pub fn build_inclusion(
    ctx: &PredicateContext<'_>,
    param: &QueryParameter,
) -> Result<Fragment, QueryBuilderError> {
    let mut criteria = Vec::with_capacity(param.inclusion.len());
    for criterion in &param.inclusion {
        let fragment = if criterion.code.contains('.') {
            let chained = compartment::parse_chained_inclusion_criterion(criterion)?;
            build(ctx, &chained)?
        } else {
            simple_criterion(ctx, criterion)?
        };
        criteria.push(fragment);
    }
    Ok(Fragment::join(criteria, " OR ").parenthesized())
}

fn simple_criterion(
    ctx: &PredicateContext<'_>,
    criterion: &QueryParameter,
) -> Result<Fragment, QueryBuilderError> {
    let name_id = ctx.parameter_name_id(&criterion.code)?;
    let mut references = Vec::with_capacity(criterion.values.len());
    for value in &criterion.values {
        references.push(SqlValue::text(text_value(criterion, &value.value)?));
    }

    let mut fragment = Fragment::sql("(");
    fragment
        .push_column(PARAMETER_NAME_ID)
        .push_sql(format!(" = {name_id} AND "))
        .push_column(STR_VALUE);
    match references.len() {
        0 => {
            return Err(QueryBuilderError::malformed(
                &criterion.code,
                "inclusion criterion has no reference",
            ));
        }
        1 => {
            fragment.push_sql(" = ").push_bind(references.remove(0));
        }
        _ => {
            fragment.push_sql(" IN ").push_bind_list(references);
        }
    }
    fragment.push_sql(")");
    Ok(fragment)
}

/// `<alias>.STR_VALUE IN (<sub-select> [UNION <sub-select> ...])`
fn reference_in(
    ctx: &PredicateContext<'_>,
    hop: &QueryParameter,
    alias: AliasRef,
    rest: &[QueryParameter],
    level: usize,
) -> Result<Fragment, QueryBuilderError> {
    check_hop(hop)?;
    let targets = hop_targets(ctx, hop, rest.len() == 1)?;

    let mut selects = Vec::with_capacity(targets.len());
    for target in &targets {
        selects.push(sub_select(&ctx.for_resource_type(target), rest, level)?);
    }

    let mut fragment = Fragment::new();
    fragment
        .push_column_of(alias, STR_VALUE)
        .push_sql(" IN (")
        .append(Fragment::join(selects, " UNION "))
        .push_sql(")");
    Ok(fragment)
}

fn check_hop(hop: &QueryParameter) -> Result<(), QueryBuilderError> {
    if hop.param_type != SearchParameterType::Reference {
        return Err(QueryBuilderError::malformed(
            &hop.code,
            format!("{} parameters cannot be chained", hop.param_type),
        ));
    }
    match &hop.modifier {
        None | Some(SearchModifier::Type(_)) => Ok(()),
        Some(other) => Err(QueryBuilderError::invalid_modifier(&hop.code, other)),
    }
}

/// Resource types a hop may point at.
///
/// A `:Type` modifier wins, then a single declared target. Several declared
/// targets, or `:*`, are only accepted on the last hop where one sub-select per
/// type can be UNION-ed.
fn hop_targets(
    ctx: &PredicateContext<'_>,
    hop: &QueryParameter,
    is_last_hop: bool,
) -> Result<Vec<String>, QueryBuilderError> {
    let declared: Vec<String> = ctx
        .registry
        .get(ctx.resource_type, &hop.code)
        .map(|definition| {
            definition
                .target
                .iter()
                .filter(|t| t.as_str() != ANY_RESOURCE_TYPE)
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let targets = match hop.modifier_resource_type() {
        Some(WILDCARD_TYPE) if is_last_hop => wildcard_targets(ctx, declared)?,
        Some(WILDCARD_TYPE) => {
            return Err(QueryBuilderError::malformed(
                &hop.code,
                "':*' is only allowed on the last reference hop",
            ));
        }
        Some(resource_type) => vec![resource_type.to_string()],
        None => match declared.len() {
            1 => declared,
            0 => {
                return Err(QueryBuilderError::malformed(
                    &hop.code,
                    format!(
                        "no target type declared on {}, add a :Type modifier",
                        ctx.resource_type
                    ),
                ));
            }
            _ if is_last_hop => declared,
            _ => {
                return Err(QueryBuilderError::malformed(
                    &hop.code,
                    format!("ambiguous target among {}, add a :Type modifier", declared.join(", ")),
                ));
            }
        },
    };

    for target in &targets {
        schema::validate_resource_type(target)?;
    }
    Ok(targets)
}

fn wildcard_targets(
    ctx: &PredicateContext<'_>,
    declared: Vec<String>,
) -> Result<Vec<String>, QueryBuilderError> {
    if declared.len() >= 2 {
        return Ok(declared);
    }
    let known = ctx.cache.resource_type_names(ctx.tenant)?;
    if known.is_empty() {
        return Err(QueryBuilderError::Unsupported(
            "wildcard chain without any known resource type".to_string(),
        ));
    }
    Ok(known)
}

/// One correlated sub-select over the tables of `ctx.resource_type`.
fn sub_select(
    ctx: &PredicateContext<'_>,
    rest: &[QueryParameter],
    level: usize,
) -> Result<Fragment, QueryBuilderError> {
    let Some((next, remaining)) = rest.split_first() else {
        return Err(QueryBuilderError::InvariantViolation(
            "chain hop without a following segment".to_string(),
        ));
    };
    let resource_type = ctx.resource_type;
    let cr = format!("CR{level}");
    let clr = format!("CLR{level}");
    let cp = format!("CP{level}");

    let (table, body) = if remaining.is_empty() {
        terminal(ctx, next, &cr, &clr, &cp)?
    } else {
        let next_id = ctx.parameter_name_id(&next.code)?;
        let mut body = Fragment::new();
        body.push_column_of(AliasRef::Fixed(cp.clone()), PARAMETER_NAME_ID)
            .push_sql(format!(" = {next_id} AND "))
            .append(reference_in(
                ctx,
                next,
                AliasRef::Fixed(cp.clone()),
                remaining,
                level + 1,
            )?);
        (Some(ValuesTable::Str), body)
    };

    let mut from = format!(
        "{} {cr}, {} {clr}",
        schema::resources_table(resource_type),
        schema::logical_resources_table(resource_type)
    );
    if let Some(table) = table {
        from.push_str(&format!(", {} {cp}", table.table_name(resource_type)));
        if table == ValuesTable::Composites {
            let tables = composite::component_tables(resource_type, next)?;
            from.push_str(&composite::component_joins(resource_type, &cp, &tables));
        }
    }

    let mut select = Fragment::sql(format!(
        "SELECT '{resource_type}' || '/' || {clr}.{LOGICAL_ID} FROM {from} WHERE {}",
        schema::current_version_condition(&cr, &clr)
    ));
    if table.is_some() {
        select.push_sql(format!(
            " AND {cp}.{col} = {clr}.{col}",
            col = schema::LOGICAL_RESOURCE_ID
        ));
    }
    select.push_sql(" AND ").append(body);
    Ok(select)
}

/// Predicate on the last chain segment, with the values table it needs.
fn terminal(
    ctx: &PredicateContext<'_>,
    param: &QueryParameter,
    cr: &str,
    clr: &str,
    cp: &str,
) -> Result<(Option<ValuesTable>, Fragment), QueryBuilderError> {
    if param.is_missing() {
        return Err(QueryBuilderError::Unsupported(format!(
            "':missing' at the end of a chain ('{}')",
            param.code
        )));
    }
    if param.values.is_empty() {
        return Err(QueryBuilderError::malformed(&param.code, "no values supplied"));
    }
    if param.code == ID {
        return Ok((None, resource::build_id(param, clr)?));
    }
    if param.code == LAST_UPDATED {
        return Ok((None, resource::build_last_updated(param, cr)?));
    }

    let table = ValuesTable::for_type(ctx.resource_type, &param.code, param.param_type)
        .ok_or_else(|| {
            QueryBuilderError::Unsupported(format!(
                "special parameter '{}' on {}",
                param.code, ctx.resource_type
            ))
        })?;
    Ok((Some(table), build_predicate(ctx, param)?.resolve_alias(cp)))
}
