//! Compartment membership rules.
//!
//! A compartment (`Patient/123`) contains every resource that references its
//! owner through one of the parameters listed for the resource type in the
//! compartment's `CompartmentDefinition`. Searching inside a compartment adds
//! one inclusion-criteria parameter whose criteria are OR-ed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryBuilderError;
use crate::parameters::{SearchModifier, SearchParameterType};
use crate::query::{ParameterValue, QueryParameter};
use crate::schema::validate_resource_type;

/// Code of the synthesized inclusion parameter.
pub const COMPARTMENT_PARAMETER: &str = "_compartment";

/// Compartment type → resource type → membership parameter codes.
///
/// Serialized as a plain nested JSON object:
/// `{"Patient": {"Observation": ["subject", "performer"]}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompartmentRules {
    rules: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl CompartmentRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    #[must_use]
    pub fn with_rule(
        mut self,
        compartment: impl Into<String>,
        resource_type: impl Into<String>,
        criteria: Vec<String>,
    ) -> Self {
        self.rules
            .entry(compartment.into())
            .or_default()
            .insert(resource_type.into(), criteria);
        self
    }

    /// Replace the rules of one compartment from a `CompartmentDefinition`.
    ///
    /// Resource entries without `param` are not members and are skipped.
    /// Returns the number of member resource types.
    pub fn load_definition(&mut self, definition: &Value) -> usize {
        let Some(compartment) = definition.get("code").and_then(Value::as_str) else {
            tracing::warn!("CompartmentDefinition without code, skipping");
            return 0;
        };

        let mut members = BTreeMap::new();
        for entry in definition
            .get("resource")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(resource_type) = entry.get("code").and_then(Value::as_str) else {
                continue;
            };
            let params: Vec<String> = entry
                .get("param")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|p| p.as_str().map(str::to_string))
                .collect();
            if !params.is_empty() {
                members.insert(resource_type.to_string(), params);
            }
        }

        let count = members.len();
        tracing::debug!(compartment, members = count, "loaded compartment definition");
        self.rules.insert(compartment.to_string(), members);
        count
    }

    /// Membership parameter codes of `resource_type` in `compartment`.
    pub fn criteria(&self, compartment: &str, resource_type: &str) -> Option<&[String]> {
        self.rules
            .get(compartment)
            .and_then(|members| members.get(resource_type))
            .map(Vec::as_slice)
    }

    /// Resource types that can be members of `compartment`.
    pub fn member_types(&self, compartment: &str) -> Vec<&str> {
        self.rules
            .get(compartment)
            .map(|members| members.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Inclusion parameter restricting a `resource_type` search to the
    /// compartment `compartment/id`.
    pub fn build_inclusion_parameter(
        &self,
        compartment: &str,
        id: &str,
        resource_type: &str,
    ) -> Result<QueryParameter, QueryBuilderError> {
        validate_resource_type(compartment)?;
        validate_resource_type(resource_type)?;
        if id.is_empty() || id.contains('/') {
            return Err(QueryBuilderError::malformed(
                COMPARTMENT_PARAMETER,
                format!("invalid compartment id '{id}'"),
            ));
        }

        let criteria = self
            .criteria(compartment, resource_type)
            .filter(|codes| !codes.is_empty())
            .ok_or_else(|| {
                QueryBuilderError::malformed(
                    COMPARTMENT_PARAMETER,
                    format!("{resource_type} is not a member of the {compartment} compartment"),
                )
            })?;

        let owner = format!("{compartment}/{id}");
        let members = criteria
            .iter()
            .map(|code| {
                QueryParameter::new(code.as_str(), SearchParameterType::Reference)
                    .with_value(ParameterValue::Reference(owner.clone()))
            })
            .collect();
        Ok(QueryParameter::inclusion_criteria(COMPARTMENT_PARAMETER, members))
    }
}

/// Turn a dotted criterion (`device.patient:Device`) into a chained parameter.
///
/// Every hop is a reference restricted to the type after `:` when present,
/// and the last hop carries the criterion's values.
pub fn parse_chained_inclusion_criterion(
    criterion: &QueryParameter,
) -> Result<QueryParameter, QueryBuilderError> {
    let (path, resource_type) = match criterion.code.split_once(':') {
        Some((path, resource_type)) => {
            validate_resource_type(resource_type)?;
            (path, Some(resource_type))
        }
        None => (criterion.code.as_str(), None),
    };

    let hops: Vec<&str> = path.split('.').collect();
    if hops.len() < 2 || hops.iter().any(|hop| hop.is_empty()) {
        return Err(QueryBuilderError::malformed(
            &criterion.code,
            "expected a dotted reference path",
        ));
    }

    let mut segments: Vec<QueryParameter> = hops
        .into_iter()
        .map(|code| {
            let hop = QueryParameter::new(code, SearchParameterType::Reference);
            match resource_type {
                Some(resource_type) => hop.with_modifier(SearchModifier::Type(resource_type.to_string())),
                None => hop,
            }
        })
        .collect();
    if let Some(last) = segments.last_mut() {
        last.values = criterion.values.clone();
    }

    let first = segments.remove(0);
    Ok(first.with_chain(segments))
}
