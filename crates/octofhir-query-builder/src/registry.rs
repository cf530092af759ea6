//! Search parameter registry.
//!
//! Predicate builders consult the registry for facts the parsed parameter
//! does not carry: the target types of a reference parameter (to qualify bare
//! ids and resolve chain hops) and the data types a parameter indexes (a
//! quantity over a `Range` is matched by containment).
//!
//! Uses DashMap for lock-free concurrent access.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::parameters::{SearchParameter, SearchParameterType, ValueType};

/// Registry of search parameter definitions.
#[derive(Debug, Default)]
pub struct SearchParameterRegistry {
    /// Parameters indexed by (resource_type, code) as composite key
    by_resource: DashMap<(String, String), Arc<SearchParameter>>,
    by_url: DashMap<String, Arc<SearchParameter>>,
    /// Common parameters (base includes "Resource" or "DomainResource")
    common: DashMap<String, Arc<SearchParameter>>,
}

impl SearchParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the Resource-level parameters and the
    /// Location geo parameters.
    pub fn with_common_parameters() -> Self {
        let registry = Self::new();
        crate::common::register_common_parameters(&registry);
        registry
    }

    /// Register a search parameter, replacing any earlier definition with
    /// the same URL or the same (base, code).
    pub fn register(&self, param: SearchParameter) {
        let param = Arc::new(param);

        self.by_url.insert(param.url.clone(), param.clone());

        if param.is_common() {
            self.common.insert(param.code.clone(), param.clone());
        }

        for base in &param.base {
            self.by_resource
                .insert((base.clone(), param.code.clone()), param.clone());
        }
    }

    /// Register every `SearchParameter` resource found in a FHIR Bundle.
    ///
    /// Entries that are not SearchParameters, or lack `code`, `url`, `type`
    /// or `base`, are skipped. Returns the number registered.
    pub fn load_bundle(&self, bundle: &Value) -> usize {
        let Some(entries) = bundle.get("entry").and_then(Value::as_array) else {
            return 0;
        };

        let mut loaded = 0;
        for resource in entries.iter().filter_map(|e| e.get("resource")) {
            match parse_search_parameter(resource) {
                Some(param) => {
                    self.register(param);
                    loaded += 1;
                }
                None => {
                    let id = resource.get("id").and_then(Value::as_str).unwrap_or_default();
                    tracing::trace!(id, "skipping bundle entry");
                }
            }
        }
        tracing::debug!(count = loaded, "loaded search parameters from bundle");
        loaded
    }

    /// Resource-specific definition first, then the common one.
    pub fn get(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParameter>> {
        let key = (resource_type.to_string(), code.to_string());
        if let Some(param) = self.by_resource.get(&key) {
            return Some(param.clone());
        }

        self.common.get(code).map(|p| p.clone())
    }

    pub fn get_by_url(&self, url: &str) -> Option<Arc<SearchParameter>> {
        self.by_url.get(url).map(|entry| entry.value().clone())
    }

    /// The only target type of a reference parameter, if it has exactly one.
    pub fn single_target(&self, resource_type: &str, code: &str) -> Option<String> {
        self.get(resource_type, code)
            .and_then(|param| param.single_target().map(str::to_string))
    }

    pub fn has_value_type(&self, resource_type: &str, code: &str, value_type: ValueType) -> bool {
        self.get(resource_type, code)
            .is_some_and(|param| param.has_value_type(value_type))
    }

    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }

    /// List all resource types that have specific parameters.
    pub fn list_resource_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .by_resource
            .iter()
            .map(|entry| entry.key().0.clone())
            .filter(|base| base != "Resource" && base != "DomainResource")
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

fn string_list(resource: &Value, field: &str) -> Vec<String> {
    resource
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_search_parameter(resource: &Value) -> Option<SearchParameter> {
    if resource.get("resourceType").and_then(Value::as_str) != Some("SearchParameter") {
        return None;
    }
    let code = resource.get("code")?.as_str()?;
    let url = resource.get("url")?.as_str()?;
    let param_type = SearchParameterType::parse(resource.get("type")?.as_str()?)?;
    let base = string_list(resource, "base");
    if base.is_empty() {
        return None;
    }

    let mut param = SearchParameter::new(code, url, param_type, base)
        .with_targets(string_list(resource, "target"));
    if let Some(description) = resource.get("description").and_then(Value::as_str) {
        param = param.with_description(description);
    }
    Some(param)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_get() {
        let registry = SearchParameterRegistry::new();

        registry.register(
            SearchParameter::new(
                "name",
                "http://hl7.org/fhir/SearchParameter/Patient-name",
                SearchParameterType::String,
                vec!["Patient".to_string()],
            )
            .with_description("A patient's name"),
        );

        let found = registry.get("Patient", "name");
        assert!(found.is_some());
        assert_eq!(found.unwrap().code, "name");

        assert!(registry.get("Observation", "name").is_none());
    }

    #[test]
    fn test_common_parameters() {
        let registry = SearchParameterRegistry::new();

        registry.register(SearchParameter::new(
            "_id",
            "http://hl7.org/fhir/SearchParameter/Resource-id",
            SearchParameterType::Token,
            vec!["Resource".to_string()],
        ));

        assert!(registry.get("Patient", "_id").is_some());
        assert!(registry.get("Observation", "_id").is_some());
        assert!(registry.list_resource_types().is_empty());
    }

    #[test]
    fn test_single_target_and_value_types() {
        let registry = SearchParameterRegistry::new();
        registry.register(
            SearchParameter::new(
                "patient",
                "http://hl7.org/fhir/SearchParameter/clinical-patient",
                SearchParameterType::Reference,
                vec!["Observation".to_string(), "Condition".to_string()],
            )
            .with_targets(vec!["Patient".to_string()]),
        );
        registry.register(
            SearchParameter::new(
                "value-range",
                "http://example.org/SearchParameter/Observation-value-range",
                SearchParameterType::Quantity,
                vec!["Observation".to_string()],
            )
            .with_value_types(vec![ValueType::Range]),
        );

        assert_eq!(
            registry.single_target("Condition", "patient").as_deref(),
            Some("Patient")
        );
        assert!(registry.has_value_type("Observation", "value-range", ValueType::Range));
        assert!(!registry.has_value_type("Observation", "patient", ValueType::Range));
        assert_eq!(
            registry.list_resource_types(),
            vec!["Condition", "Observation"]
        );
    }

    #[test]
    fn test_load_bundle() {
        let registry = SearchParameterRegistry::new();
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": {
                    "resourceType": "SearchParameter",
                    "id": "Encounter-subject",
                    "url": "http://hl7.org/fhir/SearchParameter/Encounter-subject",
                    "code": "subject",
                    "type": "reference",
                    "base": ["Encounter"],
                    "target": ["Group", "Patient"]
                }},
                {"resource": {"resourceType": "Patient", "id": "x"}},
                {"resource": {
                    "resourceType": "SearchParameter",
                    "url": "http://example.org/broken",
                    "code": "broken",
                    "type": "nonsense",
                    "base": ["Patient"]
                }}
            ]
        });

        assert_eq!(registry.load_bundle(&bundle), 1);
        let subject = registry.get("Encounter", "subject").unwrap();
        assert_eq!(subject.target, vec!["Group", "Patient"]);
        assert_eq!(registry.single_target("Encounter", "subject"), None);
        assert!(
            registry
                .get_by_url("http://hl7.org/fhir/SearchParameter/Encounter-subject")
                .is_some()
        );
    }
}
