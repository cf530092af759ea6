use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// FHIR R4 SearchParameter type enumeration
/// See: https://hl7.org/fhir/R4/search.html#ptypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterType {
    Number,
    Date,
    String,
    Token,
    Reference,
    Composite,
    Quantity,
    Uri,
    Special,
}

impl SearchParameterType {
    /// Parse a search parameter type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "number" => Some(Self::Number),
            "date" => Some(Self::Date),
            "string" => Some(Self::String),
            "token" => Some(Self::Token),
            "reference" => Some(Self::Reference),
            "composite" => Some(Self::Composite),
            "quantity" => Some(Self::Quantity),
            "uri" => Some(Self::Uri),
            "special" => Some(Self::Special),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Date => "date",
            Self::String => "string",
            Self::Token => "token",
            Self::Reference => "reference",
            Self::Composite => "composite",
            Self::Quantity => "quantity",
            Self::Uri => "uri",
            Self::Special => "special",
        }
    }
}

impl fmt::Display for SearchParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search modifiers, applied as suffix to the parameter name: `name:modifier`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchModifier {
    Missing,
    Exact,
    Contains,
    Not,
    Text,
    In,
    NotIn,
    Below,
    Above,
    Identifier,
    OfType,
    Type(String), // e.g., subject:Patient
}

impl SearchModifier {
    /// Parse a search modifier from a string.
    ///
    /// Anything that is not a known modifier keyword but looks like a
    /// resource type name (`subject:Patient`) becomes [`SearchModifier::Type`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missing" => Some(Self::Missing),
            "exact" => Some(Self::Exact),
            "contains" => Some(Self::Contains),
            "not" => Some(Self::Not),
            "text" => Some(Self::Text),
            "in" => Some(Self::In),
            "not-in" => Some(Self::NotIn),
            "below" => Some(Self::Below),
            "above" => Some(Self::Above),
            "identifier" => Some(Self::Identifier),
            "ofType" => Some(Self::OfType),
            other if other.starts_with(|c: char| c.is_ascii_uppercase()) => {
                Some(Self::Type(other.to_string()))
            }
            _ => None,
        }
    }

    /// Check if this modifier is applicable to the given parameter type.
    ///
    /// A modifier may be applicable and still not be supported by the
    /// predicate builders (`:text`, `:in`), those are rejected later as
    /// unsupported rather than invalid.
    pub fn applicable_to(&self, param_type: &SearchParameterType) -> bool {
        match self {
            Self::Missing => !matches!(param_type, SearchParameterType::Special),
            Self::Exact => matches!(
                param_type,
                SearchParameterType::String | SearchParameterType::Token
            ),
            Self::Contains => matches!(
                param_type,
                SearchParameterType::String | SearchParameterType::Uri | SearchParameterType::Token
            ),
            Self::Not => matches!(
                param_type,
                SearchParameterType::Token | SearchParameterType::Reference
            ),
            Self::Text | Self::In | Self::NotIn | Self::OfType => {
                matches!(param_type, SearchParameterType::Token)
            }
            Self::Below | Self::Above => matches!(
                param_type,
                SearchParameterType::Token | SearchParameterType::Uri
            ),
            Self::Type(_) | Self::Identifier => {
                matches!(param_type, SearchParameterType::Reference)
            }
        }
    }
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Missing => "missing",
            Self::Exact => "exact",
            Self::Contains => "contains",
            Self::Not => "not",
            Self::Text => "text",
            Self::In => "in",
            Self::NotIn => "not-in",
            Self::Below => "below",
            Self::Above => "above",
            Self::Identifier => "identifier",
            Self::OfType => "ofType",
            Self::Type(resource_type) => resource_type.as_str(),
        };
        f.write_str(s)
    }
}

/// Prefixes for number/date/quantity search values
/// e.g., `ge2020-01-01`, `lt5.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    #[default]
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa, // starts after
    Eb, // ends before
    Ap, // approximately
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchPrefix::Eq => "eq",
            SearchPrefix::Ne => "ne",
            SearchPrefix::Gt => "gt",
            SearchPrefix::Lt => "lt",
            SearchPrefix::Ge => "ge",
            SearchPrefix::Le => "le",
            SearchPrefix::Sa => "sa",
            SearchPrefix::Eb => "eb",
            SearchPrefix::Ap => "ap",
        };
        f.write_str(s)
    }
}

impl SearchPrefix {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "ge" => Some(Self::Ge),
            "le" => Some(Self::Le),
            "sa" => Some(Self::Sa),
            "eb" => Some(Self::Eb),
            "ap" => Some(Self::Ap),
            _ => None,
        }
    }

    /// Split a leading two-letter prefix off a raw search value.
    ///
    /// `ge2020` yields `(Some(Ge), "2020")`, `2020` yields `(None, "2020")`.
    pub fn strip_prefix(raw: &str) -> (Option<Self>, &str) {
        if raw.len() > 2 && raw.is_char_boundary(2) {
            if let Some(prefix) = Self::parse(&raw[..2]) {
                return (Some(prefix), &raw[2..]);
            }
        }
        (None, raw)
    }
}

/// FHIR data types a search parameter's expression can land on.
///
/// Only the types that change predicate shape are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Quantity,
    Range,
    Date,
    DateTime,
    Period,
    Reference,
}

/// A search parameter definition as held by the registry.
#[derive(Debug, Clone)]
pub struct SearchParameter {
    /// The code used in search queries (e.g., "name", "identifier")
    pub code: String,
    /// The canonical URL of this search parameter
    pub url: String,
    pub param_type: SearchParameterType,
    /// Resource types this parameter applies to
    pub base: Vec<String>,
    /// Target resource types for reference parameters
    pub target: Vec<String>,
    /// Data types the parameter's expression resolves to
    pub value_types: Vec<ValueType>,
    pub description: String,
}

impl SearchParameter {
    /// Create a new search parameter with required fields.
    pub fn new(
        code: impl Into<String>,
        url: impl Into<String>,
        param_type: SearchParameterType,
        base: Vec<String>,
    ) -> Self {
        Self {
            code: code.into(),
            url: url.into(),
            param_type,
            base,
            target: Vec::new(),
            value_types: Vec::new(),
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Set target resource types.
    #[must_use]
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.target = targets;
        self
    }

    #[must_use]
    pub fn with_value_types(mut self, value_types: Vec<ValueType>) -> Self {
        self.value_types = value_types;
        self
    }

    /// Check if this parameter applies to a given resource type.
    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.base
            .iter()
            .any(|b| b == resource_type || b == "Resource" || b == "DomainResource")
    }

    /// Check if this is a common parameter (applies to all resources).
    pub fn is_common(&self) -> bool {
        self.base
            .iter()
            .any(|b| b == "Resource" || b == "DomainResource")
    }

    /// The single target type of a reference parameter, if it has exactly one.
    pub fn single_target(&self) -> Option<&str> {
        match self.target.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    pub fn has_value_type(&self, value_type: ValueType) -> bool {
        self.value_types.contains(&value_type)
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}
