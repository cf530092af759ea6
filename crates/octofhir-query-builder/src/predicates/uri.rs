//! URI search parameter implementation.
//!
//! - (default): exact equality
//! - :below: the URI itself or anything under it
//! - :above: the URI or any of its path prefixes
//! - :contains: substring match

use super::{PredicateContext, comparison, name_segment, reject_prefix, text_value};
use crate::encoder::{LIKE_ESCAPE_CLAUSE, escape_like};
use crate::error::QueryBuilderError;
use crate::fragment::{AliasRef, Fragment, SqlValue};
use crate::parameters::SearchModifier;
use crate::query::QueryParameter;
use crate::schema::STR_VALUE;

pub fn build(ctx: &PredicateContext<'_>, param: &QueryParameter) -> Result<Fragment, QueryBuilderError> {
    let name_id = ctx.parameter_name_id(&param.code)?;

    let mut clauses = Vec::with_capacity(param.values.len());
    for value in &param.values {
        reject_prefix(param, value)?;
        let uri = text_value(param, &value.value)?;

        let clause = match &param.modifier {
            None => comparison(AliasRef::Param, STR_VALUE, "=", SqlValue::text(uri)),
            Some(SearchModifier::Below) => {
                let base = uri.trim_end_matches('/');
                let mut clause = Fragment::sql("(");
                clause
                    .append(comparison(AliasRef::Param, STR_VALUE, "=", SqlValue::text(uri)))
                    .push_sql(" OR ")
                    .append(comparison(
                        AliasRef::Param,
                        STR_VALUE,
                        "LIKE",
                        SqlValue::Text(format!("{}/%", escape_like(base))),
                    ))
                    .push_sql(LIKE_ESCAPE_CLAUSE)
                    .push_sql(")");
                clause
            }
            Some(SearchModifier::Above) => {
                let mut clause = Fragment::new();
                clause
                    .push_column(STR_VALUE)
                    .push_sql(" IN ")
                    .push_bind_list(path_prefixes(uri).into_iter().map(SqlValue::Text));
                clause
            }
            Some(SearchModifier::Contains) => {
                let mut clause = comparison(
                    AliasRef::Param,
                    STR_VALUE,
                    "LIKE",
                    SqlValue::Text(format!("%{}%", escape_like(uri))),
                );
                clause.push_sql(LIKE_ESCAPE_CLAUSE);
                clause
            }
            Some(other) => return Err(QueryBuilderError::invalid_modifier(&param.code, other)),
        };
        clauses.push(clause);
    }

    Ok(name_segment(name_id, clauses))
}

/// Every path prefix of a URI, shortest first, ending with the URI itself.
///
/// `http://acme.org/fhir/ValueSet/x` yields `http://acme.org`,
/// `http://acme.org/fhir`, `http://acme.org/fhir/ValueSet` and the full URI.
pub fn path_prefixes(uri: &str) -> Vec<String> {
    let path_start = uri.find("://").map(|i| i + 3).unwrap_or(0);
    let mut prefixes: Vec<String> = uri[path_start..]
        .match_indices('/')
        .map(|(i, _)| &uri[..path_start + i])
        .filter(|prefix| prefix.len() > path_start)
        .map(str::to_string)
        .collect();
    if prefixes.last().map(String::as_str) != Some(uri) {
        prefixes.push(uri.to_string());
    }
    prefixes.dedup();
    prefixes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::SearchParameterType;
    use crate::predicates::test_support::{Fixture, render};
    use crate::query::ParameterValue;

    fn make_param(modifier: Option<SearchModifier>, uri: &str) -> QueryParameter {
        let mut param = QueryParameter::new("url", SearchParameterType::Uri)
            .with_value(ParameterValue::Uri(uri.to_string()));
        param.modifier = modifier;
        param
    }

    #[test]
    fn test_default_equality() {
        let fixture = Fixture::new();
        let param = make_param(None, "http://acme.org/fhir/ValueSet/123");
        let rendered = render(&build(&fixture.ctx("ValueSet"), &param).unwrap());
        assert_eq!(
            rendered.sql,
            "(P1.PARAMETER_NAME_ID = 12 AND (P1.STR_VALUE = ?))"
        );
    }

    #[test]
    fn test_below() {
        let fixture = Fixture::new();
        let param = make_param(Some(SearchModifier::Below), "http://acme.org/fhir_v2/");
        let rendered = render(&build(&fixture.ctx("ValueSet"), &param).unwrap());
        assert!(
            rendered
                .sql
                .contains("(P1.STR_VALUE = ? OR P1.STR_VALUE LIKE ? ESCAPE '+')")
        );
        assert_eq!(
            rendered.binds,
            vec![
                SqlValue::text("http://acme.org/fhir_v2/"),
                SqlValue::text("http://acme.org/fhir+_v2/%"),
            ]
        );
    }

    #[test]
    fn test_above_lists_prefixes() {
        let fixture = Fixture::new();
        let param = make_param(Some(SearchModifier::Above), "http://acme.org/fhir/ValueSet/x");
        let rendered = render(&build(&fixture.ctx("ValueSet"), &param).unwrap());
        assert!(rendered.sql.contains("P1.STR_VALUE IN (?, ?, ?, ?)"));
        assert_eq!(rendered.binds[0], SqlValue::text("http://acme.org"));
        assert_eq!(rendered.binds[3], SqlValue::text("http://acme.org/fhir/ValueSet/x"));
    }

    #[test]
    fn test_path_prefixes_without_scheme() {
        assert_eq!(path_prefixes("urn:oid:1.2.3"), vec!["urn:oid:1.2.3"]);
        assert_eq!(path_prefixes("a/b"), vec!["a", "a/b"]);
        assert_eq!(
            path_prefixes("http://x.org/"),
            vec!["http://x.org", "http://x.org/"]
        );
    }
}
