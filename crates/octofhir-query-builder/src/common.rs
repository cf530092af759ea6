//! Search parameters every deployment needs regardless of loaded packages.
//!
//! Resource-level parameters apply to all resource types. The Location geo
//! parameters are registered here too because the driver special-cases them.

use crate::parameters::{SearchParameter, SearchParameterType, ValueType};
use crate::registry::SearchParameterRegistry;

/// Code of the Location proximity parameter.
pub const NEAR: &str = "near";

/// Code of the distance that accompanies [`NEAR`].
pub const NEAR_DISTANCE: &str = "near-distance";

pub const ID: &str = "_id";

pub const LAST_UPDATED: &str = "_lastUpdated";

/// Register the Resource-level and Location geo search parameters.
pub fn register_common_parameters(registry: &SearchParameterRegistry) {
    registry.register(
        SearchParameter::new(
            ID,
            "http://hl7.org/fhir/SearchParameter/Resource-id",
            SearchParameterType::Token,
            vec!["Resource".to_string()],
        )
        .with_description("Logical id of this artifact"),
    );

    registry.register(
        SearchParameter::new(
            LAST_UPDATED,
            "http://hl7.org/fhir/SearchParameter/Resource-lastUpdated",
            SearchParameterType::Date,
            vec!["Resource".to_string()],
        )
        .with_value_types(vec![ValueType::DateTime])
        .with_description("When the resource version last changed"),
    );

    registry.register(
        SearchParameter::new(
            "_tag",
            "http://hl7.org/fhir/SearchParameter/Resource-tag",
            SearchParameterType::Token,
            vec!["Resource".to_string()],
        )
        .with_description("Tags applied to this resource"),
    );

    registry.register(
        SearchParameter::new(
            "_profile",
            "http://hl7.org/fhir/SearchParameter/Resource-profile",
            SearchParameterType::Uri,
            vec!["Resource".to_string()],
        )
        .with_description("Profiles this resource claims to conform to"),
    );

    registry.register(
        SearchParameter::new(
            "_security",
            "http://hl7.org/fhir/SearchParameter/Resource-security",
            SearchParameterType::Token,
            vec!["Resource".to_string()],
        )
        .with_description("Security Labels applied to this resource"),
    );

    registry.register(
        SearchParameter::new(
            "_source",
            "http://hl7.org/fhir/SearchParameter/Resource-source",
            SearchParameterType::Uri,
            vec!["Resource".to_string()],
        )
        .with_description("Identifies where the resource comes from"),
    );

    registry.register(
        SearchParameter::new(
            NEAR,
            "http://hl7.org/fhir/SearchParameter/Location-near",
            SearchParameterType::Special,
            vec!["Location".to_string()],
        )
        .with_description("Search for locations where the location.position is near to"),
    );

    registry.register(
        SearchParameter::new(
            NEAR_DISTANCE,
            "http://hl7.org/fhir/SearchParameter/Location-near-distance",
            SearchParameterType::Quantity,
            vec!["Location".to_string()],
        )
        .with_value_types(vec![ValueType::Quantity])
        .with_description("Distance from the near position"),
    );

    tracing::debug!(count = 8, "Registered common search parameters");
}
