//! Proximity search: parsing `__near` and great-circle distance.

use crate::errors::QueryError;
use crate::schema::CollectionSchema;
use bson::Bson;

use super::types::NearSphere;

/// Radius used for spherical distance, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_378_100.0;

/// Parses `lon,lat[,maxDistanceMeters]`.
///
/// # Errors
/// `InvalidParameter` unless the value holds 2 or 3 finite numbers with an in-range
/// coordinate pair and a non-negative distance.
pub fn parse_near(raw: &str) -> Result<NearSphere, QueryError> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>().ok().filter(|f| f.is_finite()))
        .collect::<Option<_>>()
        .ok_or_else(|| QueryError::invalid("__near", "coordinates must be finite numbers"))?;
    let (longitude, latitude, max_distance) = match parts.as_slice() {
        [lon, lat] => (*lon, *lat, None),
        [lon, lat, max] => (*lon, *lat, Some(*max)),
        _ => {
            return Err(QueryError::invalid("__near", "expected `longitude,latitude[,maxDistance]`"));
        }
    };
    if !(-180.0..=180.0).contains(&longitude) || !(-90.0..=90.0).contains(&latitude) {
        return Err(QueryError::invalid("__near", "longitude/latitude out of bounds"));
    }
    if max_distance.is_some_and(|d| d < 0.0) {
        return Err(QueryError::invalid("__near", "max distance must not be negative"));
    }
    Ok(NearSphere { longitude, latitude, max_distance })
}

/// Resolves the collection's spatial field and builds the proximity predicate for it.
///
/// # Errors
/// `MissingGeoIndex` when the collection declares no `2dsphere` index, or a parse error
/// from [`parse_near`].
pub fn resolve_near(schema: &CollectionSchema, raw: &str) -> Result<(String, NearSphere), QueryError> {
    let field = schema
        .find_spatial_field()
        .ok_or_else(|| QueryError::MissingGeoIndex(schema.name.clone()))?;
    Ok((field.to_string(), parse_near(raw)?))
}

/// Reads a `(longitude, latitude)` pair from a GeoJSON `Point` or a legacy `[lon, lat]` array.
#[must_use]
pub fn point_of(value: &Bson) -> Option<(f64, f64)> {
    let coords = match value {
        Bson::Document(d) => {
            if d.get_str("type").ok()? != "Point" {
                return None;
            }
            d.get_array("coordinates").ok()?
        }
        Bson::Array(a) => a,
        _ => return None,
    };
    match coords.as_slice() {
        [lon, lat, ..] => Some((as_f64(lon)?, as_f64(lat)?)),
        _ => None,
    }
}

fn as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Double(f) => Some(*f),
        Bson::Int32(i) => Some(f64::from(*i)),
        #[allow(clippy::cast_precision_loss)]
        Bson::Int64(i) => Some(*i as f64),
        _ => None,
    }
}

/// Haversine distance in meters between two `(longitude, latitude)` pairs in degrees.
#[must_use]
pub fn distance_meters(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lon1, lat1) = (a.0.to_radians(), a.1.to_radians());
    let (lon2, lat2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

impl NearSphere {
    /// Distance from the query point to `value`, if it holds a point.
    #[must_use]
    pub fn distance_to(&self, value: &Bson) -> Option<f64> {
        point_of(value).map(|p| distance_meters((self.longitude, self.latitude), p))
    }

    /// Whether `value` is a point within `max_distance` (any point when unbounded).
    #[must_use]
    pub fn contains(&self, value: &Bson) -> bool {
        self.distance_to(value).is_some_and(|d| self.max_distance.is_none_or(|max| d <= max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexKind;

    #[test]
    fn parses_two_and_three_parts() {
        let n = parse_near("-122.4,37.8").unwrap();
        assert_eq!((n.longitude, n.latitude, n.max_distance), (-122.4, 37.8, None));
        let n = parse_near("-122.4, 37.8, 1000").unwrap();
        assert_eq!(n.max_distance, Some(1000.0));
    }

    #[test]
    fn rejects_bad_near() {
        assert!(parse_near("1").is_err());
        assert!(parse_near("1,2,3,4").is_err());
        assert!(parse_near("a,b").is_err());
        assert!(parse_near("200,0").is_err());
        assert!(parse_near("0,0,-5").is_err());
    }

    #[test]
    fn missing_index() {
        let err = resolve_near(&CollectionSchema::new("plain"), "0,0").unwrap_err();
        assert!(matches!(err, QueryError::MissingGeoIndex(c) if c == "plain"));
        let s = CollectionSchema::new("spots").with_index("loc", IndexKind::Sphere2d);
        assert_eq!(resolve_near(&s, "0,0").unwrap().0, "loc");
    }

    #[test]
    fn distance_is_plausible() {
        // San Francisco to Oakland, roughly 13 km.
        let d = distance_meters((-122.4194, 37.7749), (-122.2712, 37.8044));
        assert!((12_000.0..15_000.0).contains(&d), "{d}");
        let p = bson::doc! { "type": "Point", "coordinates": [-122.4, 37.8] };
        assert_eq!(point_of(&Bson::Document(p)), Some((-122.4, 37.8)));
        assert_eq!(point_of(&bson::bson!([1, 2])), Some((1.0, 2.0)));
    }
}
