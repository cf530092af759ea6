//! Location `near` search.
//!
//! A `near` value is a point plus a distance. It is approximated by the
//! latitude/longitude box that contains the circle, which is what the
//! `LATLNG_VALUES` columns can be range-scanned with.

use super::{PredicateContext, comparison, name_segment, reject_prefix};
use crate::error::QueryBuilderError;
use crate::fragment::{AliasRef, Fragment, SqlValue};
use crate::query::{ParameterValue, QueryParameter};
use crate::schema::{LATITUDE_VALUE, LONGITUDE_VALUE};

/// Mean earth radius used for the degree conversion.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance applied when neither the value nor `near-distance` carries one.
pub const DEFAULT_DISTANCE_KM: f64 = 5.0;

const KM_PER_MILE: f64 = 1.609_344;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

/// Convert a distance in a UCUM or plain unit to kilometers.
pub fn distance_in_km(distance: f64, unit: Option<&str>) -> Option<f64> {
    let factor = match unit.unwrap_or("km") {
        "km" | "kilometers" => 1.0,
        "m" | "meters" => 0.001,
        "mi" | "[mi_i]" | "miles" => KM_PER_MILE,
        _ => return None,
    };
    Some(distance * factor)
}

/// Box around `(latitude, longitude)` that contains every point within `km`.
///
/// The longitude span widens with latitude. Near the poles it is clamped to
/// the whole range instead of dividing by a vanishing cosine.
pub fn bounding_box(latitude: f64, longitude: f64, km: f64) -> BoundingBox {
    let lat_delta = (km / EARTH_RADIUS_KM).to_degrees();
    let cos_lat = latitude.to_radians().cos();
    let lng_delta = if cos_lat.abs() < 1e-12 {
        180.0
    } else {
        (lat_delta / cos_lat).abs().min(180.0)
    };

    BoundingBox {
        min_latitude: (latitude - lat_delta).max(-90.0),
        max_latitude: (latitude + lat_delta).min(90.0),
        min_longitude: (longitude - lng_delta).max(-180.0),
        max_longitude: (longitude + lng_delta).min(180.0),
    }
}

fn validate(
    param: &QueryParameter,
    latitude: f64,
    longitude: f64,
    km: f64,
) -> Result<(), QueryBuilderError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(QueryBuilderError::malformed(
            &param.code,
            format!("latitude {latitude} is outside [-90, 90]"),
        ));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(QueryBuilderError::malformed(
            &param.code,
            format!("longitude {longitude} is outside [-180, 180]"),
        ));
    }
    if !km.is_finite() || km < 0.0 {
        return Err(QueryBuilderError::malformed(
            &param.code,
            format!("distance {km} km is not a non-negative number"),
        ));
    }
    Ok(())
}

fn box_clause(bbox: &BoundingBox) -> Fragment {
    let bounds = [
        (LONGITUDE_VALUE, "<=", bbox.max_longitude),
        (LONGITUDE_VALUE, ">=", bbox.min_longitude),
        (LATITUDE_VALUE, "<=", bbox.max_latitude),
        (LATITUDE_VALUE, ">=", bbox.min_latitude),
    ];
    Fragment::join(
        bounds
            .into_iter()
            .map(|(column, op, bound)| comparison(AliasRef::Param, column, op, SqlValue::Float(bound))),
        " AND ",
    )
    .parenthesized()
}

pub fn build(ctx: &PredicateContext<'_>, param: &QueryParameter) -> Result<Fragment, QueryBuilderError> {
    let name_id = ctx.parameter_name_id(&param.code)?;

    let mut clauses = Vec::with_capacity(param.values.len());
    for value in &param.values {
        reject_prefix(param, value)?;
        let ParameterValue::Near {
            latitude,
            longitude,
            distance,
            unit,
        } = &value.value
        else {
            return Err(QueryBuilderError::malformed(
                &param.code,
                format!("expected latitude|longitude, got {}", value.value.kind_name()),
            ));
        };

        let km = match distance {
            Some(d) => distance_in_km(*d, unit.as_deref()).ok_or_else(|| {
                QueryBuilderError::malformed(
                    &param.code,
                    format!("unknown distance unit '{}'", unit.as_deref().unwrap_or_default()),
                )
            })?,
            None => DEFAULT_DISTANCE_KM,
        };
        validate(param, *latitude, *longitude, km)?;

        let bbox = bounding_box(*latitude, *longitude, km);
        tracing::trace!(latitude, longitude, km, ?bbox, "near bounding box");
        clauses.push(box_clause(&bbox));
    }

    Ok(name_segment(name_id, clauses))
}
