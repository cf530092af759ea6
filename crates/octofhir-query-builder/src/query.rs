//! Parsed search input: parameters, their values and pagination bounds.
//!
//! These types are produced by whatever parses the HTTP query string and are
//! consumed read-only by the query builder.

use serde::{Deserialize, Serialize};

use crate::parameters::{SearchModifier, SearchParameterType, SearchPrefix};

/// A single literal supplied for a search parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ParameterValue {
    String(String),
    Token {
        system: Option<String>,
        code: Option<String>,
    },
    Number(f64),
    Quantity {
        value: f64,
        system: Option<String>,
        code: Option<String>,
        unit: Option<String>,
    },
    /// Raw FHIR date or dateTime, possibly partial (`2020`, `2020-03`).
    Date(String),
    Reference(String),
    Uri(String),
    /// One entry per composite component, in component order.
    Composite(Vec<QueryParameter>),
    Near {
        latitude: f64,
        longitude: f64,
        distance: Option<f64>,
        unit: Option<String>,
    },
    /// Boolean carried by `:missing`.
    Missing(bool),
}

impl ParameterValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Token { .. } => "token",
            Self::Number(_) => "number",
            Self::Quantity { .. } => "quantity",
            Self::Date(_) => "date",
            Self::Reference(_) => "reference",
            Self::Uri(_) => "uri",
            Self::Composite(_) => "composite",
            Self::Near { .. } => "near",
            Self::Missing(_) => "missing",
        }
    }

    /// Convenience constructor for `system|code` tokens.
    pub fn token(system: Option<&str>, code: Option<&str>) -> Self {
        Self::Token {
            system: system.map(str::to_string),
            code: code.map(str::to_string),
        }
    }

    /// Parse the `system|code` token syntax.
    ///
    /// `code` has no system, `|code` explicitly has none, `system|` matches the
    /// system only.
    pub fn parse_token(raw: &str) -> Self {
        match raw.split_once('|') {
            Some((system, code)) => Self::Token {
                system: (!system.is_empty()).then(|| system.to_string()),
                code: (!code.is_empty()).then(|| code.to_string()),
            },
            None => Self::Token {
                system: None,
                code: Some(raw.to_string()),
            },
        }
    }
}

/// A value together with its optional comparison prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParameterValue {
    pub prefix: Option<SearchPrefix>,
    pub value: ParameterValue,
}

impl QueryParameterValue {
    pub fn new(value: ParameterValue) -> Self {
        Self {
            prefix: None,
            value,
        }
    }

    pub fn with_prefix(prefix: SearchPrefix, value: ParameterValue) -> Self {
        Self {
            prefix: Some(prefix),
            value,
        }
    }

    /// The prefix to apply, `eq` when none was given.
    pub fn effective_prefix(&self) -> SearchPrefix {
        self.prefix.unwrap_or_default()
    }
}

/// A parsed search parameter.
///
/// `chain` holds the segments after this one for `a.b.c=value` searches.
/// Every segment but the last is a reference hop, the last carries the values.
/// `inclusion` is non-empty for compartment inclusion criteria, whose members
/// are OR-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub code: String,
    pub param_type: SearchParameterType,
    pub modifier: Option<SearchModifier>,
    pub values: Vec<QueryParameterValue>,
    #[serde(default)]
    pub chain: Vec<QueryParameter>,
    #[serde(default)]
    pub inclusion: Vec<QueryParameter>,
}

impl QueryParameter {
    pub fn new(code: impl Into<String>, param_type: SearchParameterType) -> Self {
        Self {
            code: code.into(),
            param_type,
            modifier: None,
            values: Vec::new(),
            chain: Vec::new(),
            inclusion: Vec::new(),
        }
    }

    /// A compartment membership parameter whose criteria are OR-ed.
    pub fn inclusion_criteria(code: impl Into<String>, criteria: Vec<QueryParameter>) -> Self {
        Self {
            inclusion: criteria,
            ..Self::new(code, SearchParameterType::Reference)
        }
    }

    #[must_use]
    pub fn with_modifier(mut self, modifier: SearchModifier) -> Self {
        self.modifier = Some(modifier);
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: ParameterValue) -> Self {
        self.values.push(QueryParameterValue::new(value));
        self
    }

    #[must_use]
    pub fn with_prefixed_value(mut self, prefix: SearchPrefix, value: ParameterValue) -> Self {
        self.values.push(QueryParameterValue::with_prefix(prefix, value));
        self
    }

    #[must_use]
    pub fn with_values(mut self, values: Vec<QueryParameterValue>) -> Self {
        self.values.extend(values);
        self
    }

    #[must_use]
    pub fn with_chain(mut self, chain: Vec<QueryParameter>) -> Self {
        self.chain = chain;
        self
    }

    pub fn is_chained(&self) -> bool {
        !self.chain.is_empty()
    }

    pub fn is_inclusion_criteria(&self) -> bool {
        !self.inclusion.is_empty()
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.modifier, Some(SearchModifier::Missing))
    }

    /// Number of reference hops after this parameter.
    pub fn chain_depth(&self) -> usize {
        self.chain.len()
    }

    /// The resource type named by a `:Type` modifier.
    pub fn modifier_resource_type(&self) -> Option<&str> {
        match &self.modifier {
            Some(SearchModifier::Type(resource_type)) => Some(resource_type),
            _ => None,
        }
    }
}

/// 1-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page_number: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page_number: 1,
            page_size: 10,
        }
    }
}

impl Pagination {
    pub fn new(page_number: u32, page_size: u32) -> Self {
        Self {
            page_number,
            page_size,
        }
    }

    /// Rows skipped before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page_number.saturating_sub(1)) * u64::from(self.page_size)
    }
}
