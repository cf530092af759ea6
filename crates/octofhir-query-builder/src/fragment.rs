//! Structured SQL fragments.
//!
//! A predicate builder never writes a table alias as text. It emits column
//! tokens that reference the parameter's alias *variable*, and the aggregator
//! resolves the variable to `P1`, `P2`, ... when it renders the final query.
//! Bind values are tokens too, so each one produces exactly one placeholder
//! (or one encoded literal) no matter how fragments are nested.

use std::fmt;

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::config::BindStyle;
use crate::encoder::SqlParameterEncoder;
use crate::error::QueryBuilderError;

/// SQL value types for parameterized queries.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Timestamp(OffsetDateTime),
}

impl SqlValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Render the value as an inline SQL literal.
    pub fn to_literal(&self) -> Result<String, QueryBuilderError> {
        match self {
            Self::Text(s) => Ok(SqlParameterEncoder::quote(s)),
            Self::Integer(i) => Ok(i.to_string()),
            Self::Float(f) if f.is_finite() => Ok(f.to_string()),
            Self::Float(f) => Err(QueryBuilderError::InvariantViolation(format!(
                "non-finite number {f} cannot be rendered"
            ))),
            Self::Timestamp(ts) => {
                let utc = ts.checked_to_offset(UtcOffset::UTC).ok_or_else(|| {
                    QueryBuilderError::InvariantViolation(format!(
                        "timestamp {ts} is out of range in UTC"
                    ))
                })?;
                let formatted = utc
                    .format(format_description!(
                        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
                    ))
                    .map_err(|e| {
                        QueryBuilderError::InvariantViolation(format!(
                            "timestamp cannot be rendered: {e}"
                        ))
                    })?;
                Ok(format!("TIMESTAMP '{formatted}'"))
            }
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Timestamp(ts) => write!(f, "{ts}"),
        }
    }
}

/// Which table alias a column token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasRef {
    /// The alias assigned to the parameter being rendered.
    Param,
    /// Table of composite component `n` (1-based): `<alias>_p<n>`.
    Component(usize),
    /// An alias already fixed at build time (`LR`, `CP2`, ...).
    Fixed(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Sql(String),
    Column { alias: AliasRef, column: String },
    Bind(SqlValue),
}

/// SQL text and bind values for one parameter, still alias-independent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    tokens: Vec<Token>,
}

/// A fragment after alias resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFragment {
    pub sql: String,
    pub binds: Vec<SqlValue>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragment holding a single piece of SQL text.
    pub fn sql(text: impl Into<String>) -> Self {
        let mut fragment = Self::new();
        fragment.push_sql(text);
        fragment
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn push_sql(&mut self, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        if let Some(Token::Sql(last)) = self.tokens.last_mut() {
            last.push_str(&text);
        } else {
            self.tokens.push(Token::Sql(text));
        }
        self
    }

    /// Column on the parameter's own table.
    pub fn push_column(&mut self, column: impl Into<String>) -> &mut Self {
        self.push_column_of(AliasRef::Param, column)
    }

    pub fn push_column_of(&mut self, alias: AliasRef, column: impl Into<String>) -> &mut Self {
        self.tokens.push(Token::Column {
            alias,
            column: column.into(),
        });
        self
    }

    pub fn push_bind(&mut self, value: SqlValue) -> &mut Self {
        self.tokens.push(Token::Bind(value));
        self
    }

    /// `(?, ?, ...)` with one bind per value.
    pub fn push_bind_list(&mut self, values: impl IntoIterator<Item = SqlValue>) -> &mut Self {
        self.push_sql("(");
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.push_sql(", ");
            }
            self.push_bind(value);
        }
        self.push_sql(")")
    }

    pub fn append(&mut self, other: Fragment) -> &mut Self {
        for token in other.tokens {
            match token {
                Token::Sql(text) => {
                    self.push_sql(text);
                }
                token => self.tokens.push(token),
            }
        }
        self
    }

    /// Concatenate fragments with a separator between each pair.
    pub fn join(fragments: impl IntoIterator<Item = Fragment>, separator: &str) -> Fragment {
        let mut joined = Fragment::new();
        for (i, fragment) in fragments.into_iter().enumerate() {
            if i > 0 {
                joined.push_sql(separator);
            }
            joined.append(fragment);
        }
        joined
    }

    /// Wrap the fragment in parentheses.
    #[must_use]
    pub fn parenthesized(self) -> Fragment {
        let mut wrapped = Fragment::sql("(");
        wrapped.append(self);
        wrapped.push_sql(")");
        wrapped
    }

    /// Re-target the parameter alias to composite component `n`.
    #[must_use]
    pub fn into_component(self, n: usize) -> Fragment {
        self.map_aliases(|alias| match alias {
            AliasRef::Param => AliasRef::Component(n),
            other => other,
        })
    }

    /// Fix the parameter alias (and component aliases derived from it) now,
    /// for fragments embedded in a sub-select with its own aliases.
    #[must_use]
    pub fn resolve_alias(self, alias: &str) -> Fragment {
        self.map_aliases(|a| match a {
            AliasRef::Param => AliasRef::Fixed(alias.to_string()),
            AliasRef::Component(n) => AliasRef::Fixed(format!("{alias}_p{n}")),
            fixed => fixed,
        })
    }

    fn map_aliases(mut self, f: impl Fn(AliasRef) -> AliasRef) -> Fragment {
        for token in &mut self.tokens {
            if let Token::Column { alias, .. } = token {
                let current = std::mem::replace(alias, AliasRef::Param);
                *alias = f(current);
            }
        }
        self
    }

    pub fn bind_count(&self) -> usize {
        self.tokens
            .iter()
            .filter(|t| matches!(t, Token::Bind(_)))
            .count()
    }

    pub fn binds(&self) -> impl Iterator<Item = &SqlValue> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Bind(value) => Some(value),
            _ => None,
        })
    }

    /// Render with the parameter alias resolved to `alias`.
    pub fn render(&self, alias: &str, style: BindStyle) -> Result<RenderedFragment, QueryBuilderError> {
        let mut rendered = RenderedFragment {
            sql: String::new(),
            binds: Vec::new(),
        };
        self.render_into(alias, style, &mut rendered.sql, &mut rendered.binds)?;
        Ok(rendered)
    }

    pub(crate) fn render_into(
        &self,
        alias: &str,
        style: BindStyle,
        sql: &mut String,
        binds: &mut Vec<SqlValue>,
    ) -> Result<(), QueryBuilderError> {
        for token in &self.tokens {
            match token {
                Token::Sql(text) => sql.push_str(text),
                Token::Column { alias: a, column } => {
                    match a {
                        AliasRef::Param => sql.push_str(alias),
                        AliasRef::Component(n) => {
                            sql.push_str(alias);
                            sql.push_str("_p");
                            sql.push_str(&n.to_string());
                        }
                        AliasRef::Fixed(name) => sql.push_str(name),
                    }
                    sql.push('.');
                    sql.push_str(column);
                }
                Token::Bind(value) => match style {
                    BindStyle::Parameter => {
                        sql.push('?');
                        binds.push(value.clone());
                    }
                    BindStyle::Inline => sql.push_str(&value.to_literal()?),
                },
            }
        }
        Ok(())
    }
}

/// Count `?` placeholders outside single-quoted literals.
pub fn count_placeholders(sql: &str) -> usize {
    let mut in_literal = false;
    let mut count = 0;
    for c in sql.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => count += 1,
            _ => {}
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn name_fragment() -> Fragment {
        let mut f = Fragment::new();
        f.push_column("STR_VALUE_LCASE")
            .push_sql(" LIKE ")
            .push_bind(SqlValue::text("smi%"));
        f
    }

    #[test]
    fn test_render_resolves_alias() {
        let rendered = name_fragment()
            .render("P3", BindStyle::Parameter)
            .unwrap();
        assert_eq!(rendered.sql, "P3.STR_VALUE_LCASE LIKE ?");
        assert_eq!(rendered.binds, vec![SqlValue::text("smi%")]);
    }

    #[test]
    fn test_render_inline_encodes_literal() {
        let mut f = Fragment::new();
        f.push_column("STR_VALUE")
            .push_sql(" = ")
            .push_bind(SqlValue::text("O'Brien"));
        let rendered = f.render("P1", BindStyle::Inline).unwrap();
        assert_eq!(rendered.sql, "P1.STR_VALUE = 'O''Brien'");
        assert!(rendered.binds.is_empty());
    }

    #[test]
    fn test_alias_text_in_values_is_untouched() {
        // A value that happens to look like an alias must survive rendering.
        let mut f = Fragment::new();
        f.push_column("STR_VALUE")
            .push_sql(" = ")
            .push_bind(SqlValue::text("pX.STR_VALUE"));
        let rendered = f.render("P2", BindStyle::Inline).unwrap();
        assert_eq!(rendered.sql, "P2.STR_VALUE = 'pX.STR_VALUE'");
    }

    #[test]
    fn test_component_aliases() {
        let component = name_fragment().into_component(2);
        let rendered = component.clone().render("P1", BindStyle::Parameter).unwrap();
        assert_eq!(rendered.sql, "P1_p2.STR_VALUE_LCASE LIKE ?");

        let fixed = component.resolve_alias("CP1");
        let rendered = fixed.render("ignored", BindStyle::Parameter).unwrap();
        assert_eq!(rendered.sql, "CP1_p2.STR_VALUE_LCASE LIKE ?");
    }

    #[test]
    fn test_join_and_bind_list() {
        let mut ids = Fragment::new();
        ids.push_column_of(AliasRef::Fixed("LR".into()), "LOGICAL_ID")
            .push_sql(" IN ")
            .push_bind_list(vec![SqlValue::text("a"), SqlValue::text("b")]);
        let joined = Fragment::join(vec![ids, name_fragment()], " OR ").parenthesized();
        let rendered = joined.render("P1", BindStyle::Parameter).unwrap();
        assert_eq!(
            rendered.sql,
            "(LR.LOGICAL_ID IN (?, ?) OR P1.STR_VALUE_LCASE LIKE ?)"
        );
        assert_eq!(joined.bind_count(), 3);
        assert_eq!(count_placeholders(&rendered.sql), 3);
    }

    #[test]
    fn test_timestamp_literal() {
        let value = SqlValue::Timestamp(datetime!(2020-01-01 00:00:00 UTC));
        assert_eq!(
            value.to_literal().unwrap(),
            "TIMESTAMP '2020-01-01 00:00:00.000000'"
        );
        assert!(SqlValue::Float(f64::NAN).to_literal().is_err());
    }

    #[test]
    fn test_timestamp_literal_out_of_range_in_utc() {
        let late = OffsetDateTime::parse(
            "9999-12-31T23:00:00-05:00",
            &time::format_description::well_known::Rfc3339,
        )
        .unwrap();
        let value = SqlValue::Timestamp(late);
        let err = value.to_literal().unwrap_err();
        assert!(matches!(err, QueryBuilderError::InvariantViolation(_)));

        let shifted = SqlValue::Timestamp(datetime!(2020-01-01 01:00:00 +01:00));
        assert_eq!(
            shifted.to_literal().unwrap(),
            "TIMESTAMP '2020-01-01 00:00:00.000000'"
        );
    }

    #[test]
    fn test_count_placeholders_skips_literals() {
        assert_eq!(count_placeholders("A = ? AND B = 'why?'"), 1);
        assert_eq!(count_placeholders("A = 'it''s?' AND B = ?"), 1);
    }
}
