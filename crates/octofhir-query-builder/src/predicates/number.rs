//! Number and quantity search parameter implementation.
//!
//! Both compare a single stored value with the prefix-derived operator.
//! Quantities indexed from a `Range` store low and high bounds instead and
//! match when the searched value falls inside them.

use super::{PredicateContext, comparison, name_segment};
use crate::error::QueryBuilderError;
use crate::fragment::{AliasRef, Fragment, SqlValue};
use crate::parameters::{SearchPrefix, ValueType};
use crate::query::{ParameterValue, QueryParameter, QueryParameterValue};
use crate::schema::{
    CODE, CODE_SYSTEM_ID, NUMBER_VALUE, QUANTITY_VALUE, QUANTITY_VALUE_HIGH, QUANTITY_VALUE_LOW,
};

/// Map a prefix to its comparison operator.
///
/// `sa`, `eb` and `ap` have no numeric meaning here.
pub fn prefix_operator(code: &str, prefix: SearchPrefix) -> Result<&'static str, QueryBuilderError> {
    match prefix {
        SearchPrefix::Eq => Ok("="),
        SearchPrefix::Ne => Ok("<>"),
        SearchPrefix::Gt => Ok(">"),
        SearchPrefix::Ge => Ok(">="),
        SearchPrefix::Lt => Ok("<"),
        SearchPrefix::Le => Ok("<="),
        SearchPrefix::Sa | SearchPrefix::Eb | SearchPrefix::Ap => {
            Err(QueryBuilderError::invalid_prefix(code, prefix))
        }
    }
}

fn finite(param: &QueryParameter, number: f64) -> Result<SqlValue, QueryBuilderError> {
    if number.is_finite() {
        Ok(SqlValue::Float(number))
    } else {
        Err(QueryBuilderError::malformed(&param.code, "number is not finite"))
    }
}

pub fn build_number(
    ctx: &PredicateContext<'_>,
    param: &QueryParameter,
) -> Result<Fragment, QueryBuilderError> {
    let name_id = ctx.parameter_name_id(&param.code)?;

    let mut clauses = Vec::with_capacity(param.values.len());
    for value in &param.values {
        let op = prefix_operator(&param.code, value.effective_prefix())?;
        let number = match &value.value {
            ParameterValue::Number(n) => *n,
            other => {
                return Err(QueryBuilderError::malformed(
                    &param.code,
                    format!("expected a number, got {}", other.kind_name()),
                ));
            }
        };
        clauses.push(comparison(
            AliasRef::Param,
            NUMBER_VALUE,
            op,
            finite(param, number)?,
        ));
    }

    Ok(name_segment(name_id, clauses))
}

pub fn build_quantity(
    ctx: &PredicateContext<'_>,
    param: &QueryParameter,
) -> Result<Fragment, QueryBuilderError> {
    let name_id = ctx.parameter_name_id(&param.code)?;
    let is_range = ctx
        .registry
        .has_value_type(ctx.resource_type, &param.code, ValueType::Range);

    let mut clauses = Vec::with_capacity(param.values.len());
    for value in &param.values {
        clauses.push(quantity_clause(ctx, param, value, is_range)?);
    }

    Ok(name_segment(name_id, clauses))
}

fn quantity_clause(
    ctx: &PredicateContext<'_>,
    param: &QueryParameter,
    value: &QueryParameterValue,
    is_range: bool,
) -> Result<Fragment, QueryBuilderError> {
    let (number, system, code) = match &value.value {
        ParameterValue::Quantity {
            value: number,
            system,
            code,
            unit,
        } => (*number, system.as_deref(), code.as_deref().or(unit.as_deref())),
        ParameterValue::Number(n) => (*n, None, None),
        other => {
            return Err(QueryBuilderError::malformed(
                &param.code,
                format!("expected a quantity, got {}", other.kind_name()),
            ));
        }
    };
    let number = finite(param, number)?;

    let mut parts = Vec::with_capacity(3);
    if is_range {
        if value.effective_prefix() != SearchPrefix::Eq {
            return Err(QueryBuilderError::malformed(
                &param.code,
                format!(
                    "prefix '{}' is not supported for range quantities",
                    value.effective_prefix()
                ),
            ));
        }
        parts.push(comparison(AliasRef::Param, QUANTITY_VALUE_LOW, "<=", number.clone()));
        parts.push(comparison(AliasRef::Param, QUANTITY_VALUE_HIGH, ">=", number));
    } else {
        let op = prefix_operator(&param.code, value.effective_prefix())?;
        parts.push(comparison(AliasRef::Param, QUANTITY_VALUE, op, number));
    }

    if let Some(code) = code.filter(|c| !c.is_empty()) {
        parts.push(comparison(AliasRef::Param, CODE, "=", SqlValue::text(code)));
    }
    if let Some(system) = system.filter(|s| !s.is_empty()) {
        let system_id = ctx.code_system_id(system)?;
        parts.push(comparison(
            AliasRef::Param,
            CODE_SYSTEM_ID,
            "=",
            SqlValue::Integer(i64::from(system_id)),
        ));
    }

    Ok(Fragment::join(parts, " AND ").parenthesized())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::SearchParameterType;
    use crate::predicates::test_support::{Fixture, render};

    fn quantity(value: f64, system: Option<&str>, code: Option<&str>) -> ParameterValue {
        ParameterValue::Quantity {
            value,
            system: system.map(str::to_string),
            code: code.map(str::to_string),
            unit: None,
        }
    }

    #[test]
    fn test_number_prefixes() {
        let fixture = Fixture::new();
        let param = QueryParameter::new("length", SearchParameterType::Number)
            .with_prefixed_value(SearchPrefix::Ge, ParameterValue::Number(5.0))
            .with_prefixed_value(SearchPrefix::Lt, ParameterValue::Number(2.5));

        let rendered = render(&build_number(&fixture.ctx("Encounter"), &param).unwrap());
        assert_eq!(
            rendered.sql,
            "(P1.PARAMETER_NAME_ID = 8 AND (P1.NUMBER_VALUE >= ? OR P1.NUMBER_VALUE < ?))"
        );
        assert_eq!(rendered.binds, vec![SqlValue::Float(5.0), SqlValue::Float(2.5)]);
    }

    #[test]
    fn test_number_rejects_interval_prefixes() {
        let fixture = Fixture::new();
        for prefix in [SearchPrefix::Sa, SearchPrefix::Eb, SearchPrefix::Ap] {
            let param = QueryParameter::new("length", SearchParameterType::Number)
                .with_prefixed_value(prefix, ParameterValue::Number(1.0));
            let err = build_number(&fixture.ctx("Encounter"), &param).unwrap_err();
            assert!(matches!(err, QueryBuilderError::InvalidPrefix { .. }));
        }
    }

    #[test]
    fn test_quantity_with_system_and_code() {
        let fixture = Fixture::new();
        let param = QueryParameter::new("value-quantity", SearchParameterType::Quantity)
            .with_prefixed_value(
                SearchPrefix::Gt,
                quantity(5.4, Some("http://unitsofmeasure.org"), Some("mg")),
            );

        let rendered = render(&build_quantity(&fixture.ctx("Observation"), &param).unwrap());
        assert!(rendered.sql.contains(
            "(P1.QUANTITY_VALUE > ? AND P1.CODE = ? AND P1.CODE_SYSTEM_ID = ?)"
        ));
        assert_eq!(
            rendered.binds,
            vec![SqlValue::Float(5.4), SqlValue::text("mg"), SqlValue::Integer(101)]
        );
    }

    #[test]
    fn test_range_quantity_containment() {
        let fixture = Fixture::new();
        let param = QueryParameter::new("value-range", SearchParameterType::Quantity)
            .with_value(quantity(10.0, None, None));

        let rendered = render(&build_quantity(&fixture.ctx("Observation"), &param).unwrap());
        assert!(
            rendered
                .sql
                .contains("(P1.QUANTITY_VALUE_LOW <= ? AND P1.QUANTITY_VALUE_HIGH >= ?)")
        );
        assert_eq!(rendered.binds, vec![SqlValue::Float(10.0), SqlValue::Float(10.0)]);

        let bounded = QueryParameter::new("value-range", SearchParameterType::Quantity)
            .with_prefixed_value(SearchPrefix::Gt, quantity(10.0, None, None));
        let err = build_quantity(&fixture.ctx("Observation"), &bounded).unwrap_err();
        assert!(matches!(err, QueryBuilderError::MalformedParameter { .. }));
    }

    #[test]
    fn test_non_finite_rejected() {
        let fixture = Fixture::new();
        let param = QueryParameter::new("length", SearchParameterType::Number)
            .with_value(ParameterValue::Number(f64::INFINITY));
        assert!(build_number(&fixture.ctx("Encounter"), &param).is_err());
    }
}
