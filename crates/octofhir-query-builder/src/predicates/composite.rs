//! Composite search parameter implementation.
//!
//! A composite row in `<Type>_COMPOSITES` points at one row per component
//! through `COMP<n>_<KIND>` columns. Each component table is joined under
//! `<alias>_p<n>` and the component predicates are AND-ed:
//!
//! ```text
//! Observation_COMPOSITES P1
//!   JOIN Observation_TOKEN_VALUES P1_p1 ON P1.COMP1_TOKEN = P1_p1.ROW_ID
//!   JOIN Observation_QUANTITY_VALUES P1_p2 ON P1.COMP2_QUANTITY = P1_p2.ROW_ID
//! ```

use super::{Placement, PredicateContext, build_predicate, name_segment, placement, reject_prefix};
use crate::error::QueryBuilderError;
use crate::fragment::Fragment;
use crate::query::{ParameterValue, QueryParameter};
use crate::schema::{ROW_ID, ValuesTable};

fn components<'p>(
    param: &QueryParameter,
    value: &'p ParameterValue,
) -> Result<&'p [QueryParameter], QueryBuilderError> {
    match value {
        ParameterValue::Composite(components) if !components.is_empty() => Ok(components),
        ParameterValue::Composite(_) => Err(QueryBuilderError::malformed(
            &param.code,
            "composite value has no components",
        )),
        other => Err(QueryBuilderError::malformed(
            &param.code,
            format!("expected a composite value, got {}", other.kind_name()),
        )),
    }
}

/// Values table of each component, in component order.
///
/// Every value of the parameter must decompose into the same tables, since
/// the joins are shared by all of them.
pub fn component_tables(
    resource_type: &str,
    param: &QueryParameter,
) -> Result<Vec<ValuesTable>, QueryBuilderError> {
    let mut tables: Option<Vec<ValuesTable>> = None;
    for value in &param.values {
        let mut current = Vec::new();
        for component in components(param, &value.value)? {
            if component.is_chained() || component.is_inclusion_criteria() || component.is_missing() {
                return Err(QueryBuilderError::malformed(
                    &param.code,
                    format!("component '{}' must be a plain parameter", component.code),
                ));
            }
            match placement(resource_type, component)? {
                Placement::Joined(ValuesTable::Composites) => {
                    return Err(QueryBuilderError::malformed(
                        &param.code,
                        "composite components cannot be composite",
                    ));
                }
                Placement::Joined(table) => current.push(table),
                Placement::Root => {
                    return Err(QueryBuilderError::malformed(
                        &param.code,
                        format!("'{}' cannot be a composite component", component.code),
                    ));
                }
            }
        }

        match &tables {
            None => tables = Some(current),
            Some(expected) if *expected == current => {}
            Some(_) => {
                return Err(QueryBuilderError::malformed(
                    &param.code,
                    "all values must have the same component types",
                ));
            }
        }
    }

    tables.ok_or_else(|| QueryBuilderError::malformed(&param.code, "no values supplied"))
}

/// ` JOIN <table> <alias>_p<n> ON <alias>.COMP<n>_<KIND> = <alias>_p<n>.ROW_ID` per component.
pub fn component_joins(resource_type: &str, alias: &str, tables: &[ValuesTable]) -> String {
    tables
        .iter()
        .enumerate()
        .map(|(i, table)| {
            let n = i + 1;
            format!(
                " JOIN {table_name} {alias}_p{n} ON {alias}.COMP{n}_{kind} = {alias}_p{n}.{ROW_ID}",
                table_name = table.table_name(resource_type),
                kind = table.abbreviation(),
            )
        })
        .collect()
}

pub fn build(ctx: &PredicateContext<'_>, param: &QueryParameter) -> Result<Fragment, QueryBuilderError> {
    let tables = component_tables(ctx.resource_type, param)?;
    if tables.len() > ctx.config.max_composite_components {
        return Err(QueryBuilderError::malformed(
            &param.code,
            format!(
                "{} components, at most {} are supported",
                tables.len(),
                ctx.config.max_composite_components
            ),
        ));
    }
    let name_id = ctx.parameter_name_id(&param.code)?;

    let mut clauses = Vec::with_capacity(param.values.len());
    for value in &param.values {
        reject_prefix(param, value)?;
        let mut parts = Vec::with_capacity(tables.len());
        for (i, component) in components(param, &value.value)?.iter().enumerate() {
            parts.push(build_predicate(ctx, component)?.into_component(i + 1));
        }
        clauses.push(Fragment::join(parts, " AND ").parenthesized());
    }

    Ok(name_segment(name_id, clauses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::SqlValue;
    use crate::parameters::{SearchParameterType, SearchPrefix};
    use crate::predicates::test_support::{Fixture, render};

    fn code_value_quantity(code: &str, value: f64) -> ParameterValue {
        ParameterValue::Composite(vec![
            QueryParameter::new("code", SearchParameterType::Token)
                .with_value(ParameterValue::token(Some("http://loinc.org"), Some(code))),
            QueryParameter::new("value-quantity", SearchParameterType::Quantity)
                .with_prefixed_value(SearchPrefix::Gt, ParameterValue::Number(value)),
        ])
    }

    #[test]
    fn test_components_use_component_aliases() {
        let fixture = Fixture::new();
        let param = QueryParameter::new("code-value-quantity", SearchParameterType::Composite)
            .with_value(code_value_quantity("8480-6", 140.0));

        let rendered = render(&build(&fixture.ctx("Observation"), &param).unwrap());
        assert_eq!(
            rendered.sql,
            "(P1.PARAMETER_NAME_ID = 10 AND ((\
             (P1_p1.PARAMETER_NAME_ID = 3 AND ((P1_p1.TOKEN_VALUE = ? AND P1_p1.CODE_SYSTEM_ID = ?))) AND \
             (P1_p2.PARAMETER_NAME_ID = 9 AND ((P1_p2.QUANTITY_VALUE > ?))))))"
        );
        assert_eq!(
            rendered.binds,
            vec![
                SqlValue::text("8480-6"),
                SqlValue::Integer(100),
                SqlValue::Float(140.0)
            ]
        );
    }

    #[test]
    fn test_joins() {
        let fixture = Fixture::new();
        let param = QueryParameter::new("code-value-quantity", SearchParameterType::Composite)
            .with_value(code_value_quantity("8480-6", 140.0))
            .with_value(code_value_quantity("8462-4", 90.0));

        let tables = component_tables("Observation", &param).unwrap();
        assert_eq!(tables, vec![ValuesTable::Token, ValuesTable::Quantity]);
        assert_eq!(
            component_joins("Observation", "P2", &tables),
            " JOIN Observation_TOKEN_VALUES P2_p1 ON P2.COMP1_TOKEN = P2_p1.ROW_ID \
             JOIN Observation_QUANTITY_VALUES P2_p2 ON P2.COMP2_QUANTITY = P2_p2.ROW_ID"
        );

        let rendered = render(&build(&fixture.ctx("Observation"), &param).unwrap());
        assert_eq!(rendered.sql.matches(") OR (").count(), 1);
        assert_eq!(rendered.binds.len(), 6);
    }

    #[test]
    fn test_malformed_composites() {
        let fixture = Fixture::new();

        let mismatched = QueryParameter::new("code-value-quantity", SearchParameterType::Composite)
            .with_value(code_value_quantity("8480-6", 140.0))
            .with_value(ParameterValue::Composite(vec![
                QueryParameter::new("code", SearchParameterType::Token)
                    .with_value(ParameterValue::token(None, Some("x"))),
            ]));
        assert!(component_tables("Observation", &mismatched).is_err());

        let nested = QueryParameter::new("outer", SearchParameterType::Composite).with_value(
            ParameterValue::Composite(vec![
                QueryParameter::new("inner", SearchParameterType::Composite)
                    .with_value(code_value_quantity("1", 1.0)),
            ]),
        );
        assert!(build(&fixture.ctx("Observation"), &nested).is_err());

        let too_many = QueryParameter::new("wide", SearchParameterType::Composite).with_value(
            ParameterValue::Composite(
                (0..4)
                    .map(|i| {
                        QueryParameter::new(format!("c{i}"), SearchParameterType::String)
                            .with_value(ParameterValue::String("x".into()))
                    })
                    .collect(),
            ),
        );
        let err = build(&fixture.ctx("Observation"), &too_many).unwrap_err();
        assert!(matches!(err, QueryBuilderError::MalformedParameter { .. }));
    }
}
