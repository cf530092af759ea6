//! Table and column names of the normalized per-resource-type schema.
//!
//! Every resource type `T` owns `T_RESOURCES` (versions), `T_LOGICAL_RESOURCES`
//! (one row per logical id) and one values table per parameter kind.

use crate::common::NEAR;
use crate::error::QueryBuilderError;
use crate::parameters::SearchParameterType;

/// Alias of the version table in the root query.
pub const RESOURCES_ALIAS: &str = "R";
/// Alias of the logical resource table in the root query.
pub const LOGICAL_RESOURCES_ALIAS: &str = "LR";

pub const RESOURCE_ID: &str = "RESOURCE_ID";
pub const CURRENT_RESOURCE_ID: &str = "CURRENT_RESOURCE_ID";
pub const VERSION_ID: &str = "VERSION_ID";
pub const IS_DELETED: &str = "IS_DELETED";
pub const DATA: &str = "DATA";

pub const PARAMETER_NAME_ID: &str = "PARAMETER_NAME_ID";
pub const LOGICAL_RESOURCE_ID: &str = "LOGICAL_RESOURCE_ID";
pub const LOGICAL_ID: &str = "LOGICAL_ID";
pub const LAST_UPDATED: &str = "LAST_UPDATED";

pub const STR_VALUE: &str = "STR_VALUE";
pub const STR_VALUE_LCASE: &str = "STR_VALUE_LCASE";
pub const TOKEN_VALUE: &str = "TOKEN_VALUE";
pub const CODE_SYSTEM_ID: &str = "CODE_SYSTEM_ID";
pub const NUMBER_VALUE: &str = "NUMBER_VALUE";
pub const QUANTITY_VALUE: &str = "QUANTITY_VALUE";
pub const QUANTITY_VALUE_LOW: &str = "QUANTITY_VALUE_LOW";
pub const QUANTITY_VALUE_HIGH: &str = "QUANTITY_VALUE_HIGH";
pub const CODE: &str = "CODE";
pub const DATE_VALUE: &str = "DATE_VALUE";
pub const DATE_START: &str = "DATE_START";
pub const DATE_END: &str = "DATE_END";
pub const LATITUDE_VALUE: &str = "LATITUDE_VALUE";
pub const LONGITUDE_VALUE: &str = "LONGITUDE_VALUE";
pub const ROW_ID: &str = "ROW_ID";

/// Resource type name used for searches across all types.
pub const ANY_RESOURCE_TYPE: &str = "Resource";

/// Per-parameter values tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValuesTable {
    Str,
    Number,
    Quantity,
    Date,
    Token,
    LatLng,
    Composites,
}

impl ValuesTable {
    /// Table holding values of a parameter type.
    ///
    /// `Special` only has a table for Location `near`.
    pub fn for_type(
        resource_type: &str,
        code: &str,
        param_type: SearchParameterType,
    ) -> Option<Self> {
        // `near` on Location is keyed on the code, whatever type it was declared with.
        if is_location_near(resource_type, code) {
            return Some(Self::LatLng);
        }
        match param_type {
            SearchParameterType::String
            | SearchParameterType::Uri
            | SearchParameterType::Reference => Some(Self::Str),
            SearchParameterType::Number => Some(Self::Number),
            SearchParameterType::Quantity => Some(Self::Quantity),
            SearchParameterType::Date => Some(Self::Date),
            SearchParameterType::Token => Some(Self::Token),
            SearchParameterType::Composite => Some(Self::Composites),
            SearchParameterType::Special => None,
        }
    }

    /// Short name used in composite component column names (`COMP1_TOKEN`).
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Self::Str => "STR",
            Self::Number => "NUMBER",
            Self::Quantity => "QUANTITY",
            Self::Date => "DATE",
            Self::Token => "TOKEN",
            Self::LatLng => "LATLNG",
            Self::Composites => "COMPOSITE",
        }
    }

    pub fn table_name(&self, resource_type: &str) -> String {
        match self {
            Self::Composites => format!("{resource_type}_COMPOSITES"),
            other => format!("{resource_type}_{}_VALUES", other.abbreviation()),
        }
    }
}

pub fn resources_table(resource_type: &str) -> String {
    format!("{resource_type}_RESOURCES")
}

pub fn logical_resources_table(resource_type: &str) -> String {
    format!("{resource_type}_LOGICAL_RESOURCES")
}

/// `<r>.RESOURCE_ID = <lr>.CURRENT_RESOURCE_ID AND <r>.IS_DELETED <> 'Y'`
///
/// Restricts a version/logical pair to the current, non-deleted version.
pub fn current_version_condition(resources_alias: &str, logical_resources_alias: &str) -> String {
    format!(
        "{resources_alias}.{RESOURCE_ID} = {logical_resources_alias}.{CURRENT_RESOURCE_ID} \
         AND {resources_alias}.{IS_DELETED} <> 'Y'"
    )
}

pub fn is_location_near(resource_type: &str, code: &str) -> bool {
    resource_type == "Location" && code == NEAR
}

/// Check that a resource type can be used as a table name root.
///
/// FHIR resource type names are ASCII letters and digits starting with an
/// uppercase letter. Anything else never reaches SQL text.
pub fn validate_resource_type(resource_type: &str) -> Result<(), QueryBuilderError> {
    let mut chars = resource_type.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric())
        && resource_type.len() <= 64;
    if valid {
        Ok(())
    } else {
        Err(QueryBuilderError::InvalidIdentifier(resource_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert_eq!(ValuesTable::Str.table_name("Patient"), "Patient_STR_VALUES");
        assert_eq!(ValuesTable::LatLng.table_name("Location"), "Location_LATLNG_VALUES");
        assert_eq!(ValuesTable::Composites.table_name("Observation"), "Observation_COMPOSITES");
        assert_eq!(resources_table("Device"), "Device_RESOURCES");
        assert_eq!(
            current_version_condition("CR1", "CLR1"),
            "CR1.RESOURCE_ID = CLR1.CURRENT_RESOURCE_ID AND CR1.IS_DELETED <> 'Y'"
        );
    }

    #[test]
    fn test_table_for_type() {
        assert_eq!(
            ValuesTable::for_type("Patient", "general-practitioner", SearchParameterType::Reference),
            Some(ValuesTable::Str)
        );
        assert_eq!(
            ValuesTable::for_type("Location", "near", SearchParameterType::Special),
            Some(ValuesTable::LatLng)
        );
        assert_eq!(
            ValuesTable::for_type("Patient", "near", SearchParameterType::Special),
            None
        );
    }

    #[test]
    fn test_validate_resource_type() {
        assert!(validate_resource_type("Patient").is_ok());
        assert!(validate_resource_type("MedicationRequest").is_ok());
        assert!(validate_resource_type("patient").is_err());
        assert!(validate_resource_type("Patient; DROP TABLE x").is_err());
        assert!(validate_resource_type("").is_err());
    }
}
