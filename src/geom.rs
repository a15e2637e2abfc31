//! Coordinate validation and great-circle math.
//!
//! All distances in this crate are kilometers. Latitude/longitude bounds are
//! enforced at every entry point; out-of-range values are rejected, never
//! clamped silently.

use crate::error::{GeoWatchError, Result};
use geo::{Distance, Haversine, Point};

/// Meridional earth circumference in kilometers.
pub const EARTH_MERIDIONAL_CIRCUMFERENCE_KM: f64 = 40_007.86;

/// Equatorial earth circumference in kilometers.
pub const EARTH_EQUATORIAL_CIRCUMFERENCE_KM: f64 = 40_075.017;

/// Kilometers per degree of latitude (constant over the sphere).
pub const KM_PER_DEGREE_LATITUDE: f64 = EARTH_MERIDIONAL_CIRCUMFERENCE_KM / 360.0;

/// Largest supported query radius in kilometers.
///
/// Beyond this a circle can wrap past the antipodal point and the covering
/// geometry breaks down, so [`cap_radius`] clamps requests to this value.
pub const MAX_QUERY_RADIUS_KM: f64 = 8_587.0;

/// A validated geographic coordinate.
///
/// Construction through [`Coordinate::new`] guarantees latitude in [-90, 90],
/// longitude in [-180, 180], both finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    lat: f64,
    lng: f64,
}

impl Coordinate {
    /// Create a coordinate, rejecting out-of-range or non-finite values.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use geowatch::Coordinate;
    ///
    /// let c = Coordinate::new(40.7128, -74.0060).unwrap();
    /// assert_eq!(c.lat(), 40.7128);
    /// assert!(Coordinate::new(91.0, 0.0).is_err());
    /// ```
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        if !coordinates_valid(lat, lng) {
            return Err(GeoWatchError::InvalidCoordinate(format!(
                "latitude must be in [-90, 90] and longitude in [-180, 180], got ({lat}, {lng})"
            )));
        }
        Ok(Self { lat, lng })
    }

    /// Latitude in degrees.
    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in degrees.
    pub fn lng(&self) -> f64 {
        self.lng
    }
}

/// Check latitude/longitude bounds and finiteness.
pub fn coordinates_valid(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

/// Great-circle (haversine) distance between two coordinates in kilometers.
///
/// # Examples
///
/// ```rust
/// use geowatch::{Coordinate, geom::distance_km};
///
/// let nyc = Coordinate::new(40.7128, -74.0060).unwrap();
/// let la = Coordinate::new(34.0522, -118.2437).unwrap();
/// let d = distance_km(&nyc, &la);
/// assert!(d > 3_900.0 && d < 4_000.0);
/// ```
pub fn distance_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let pa = Point::new(a.lng(), a.lat());
    let pb = Point::new(b.lng(), b.lat());
    Haversine.distance(pa, pb) / 1000.0
}

/// Clamp a requested radius to [`MAX_QUERY_RADIUS_KM`].
///
/// Capping is documented behavior, not an error; callers that need to know
/// whether clamping happened can compare input and output.
pub fn cap_radius(requested_km: f64) -> f64 {
    requested_km.min(MAX_QUERY_RADIUS_KM)
}

/// Kilometers per degree of longitude at the given latitude.
///
/// Returns 0 at the poles; the range decomposer treats that as "the circle
/// spans all longitudes".
pub fn km_per_degree_longitude(lat: f64) -> f64 {
    EARTH_EQUATORIAL_CIRCUMFERENCE_KM / 360.0 * lat.to_radians().cos().max(0.0)
}

/// Validate a radius argument at the query API boundary.
pub(crate) fn validate_radius(radius_km: f64) -> Result<()> {
    if !radius_km.is_finite() || radius_km < 0.0 {
        return Err(GeoWatchError::InvalidInput(format!(
            "radius must be finite and non-negative, got {radius_km}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_bounds() {
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(Coordinate::new(-90.0, -180.0).is_ok());
        assert!(Coordinate::new(90.001, 0.0).is_err());
        assert!(Coordinate::new(0.0, -180.001).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
        assert!(Coordinate::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_distance_known_pairs() {
        let nyc = Coordinate::new(40.7128, -74.0060).unwrap();
        let la = Coordinate::new(34.0522, -118.2437).unwrap();
        let d = distance_km(&nyc, &la);
        assert!(d > 3_900.0 && d < 4_000.0);

        let origin = Coordinate::new(0.0, 0.0).unwrap();
        let near = Coordinate::new(0.0, 0.005).unwrap();
        let d = distance_km(&origin, &near);
        // 0.005 degrees of longitude at the equator is roughly 556 meters.
        assert!((d - 0.5565).abs() < 0.005, "got {d}");

        let far = Coordinate::new(0.0, 0.02).unwrap();
        let d = distance_km(&origin, &far);
        assert!(d > 2.0 && d < 2.4, "got {d}");
    }

    #[test]
    fn test_distance_zero() {
        let c = Coordinate::new(12.34, 56.78).unwrap();
        assert_eq!(distance_km(&c, &c), 0.0);
    }

    #[test]
    fn test_cap_radius() {
        assert_eq!(cap_radius(9_000.0), MAX_QUERY_RADIUS_KM);
        assert_eq!(cap_radius(100.0), 100.0);
        assert_eq!(cap_radius(MAX_QUERY_RADIUS_KM), MAX_QUERY_RADIUS_KM);
    }

    #[test]
    fn test_km_per_degree_longitude() {
        let equator = km_per_degree_longitude(0.0);
        assert!((equator - 111.32).abs() < 0.01);
        assert!(km_per_degree_longitude(60.0) < equator / 1.9);
        assert!(km_per_degree_longitude(90.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_radius() {
        assert!(validate_radius(0.0).is_ok());
        assert!(validate_radius(100.0).is_ok());
        assert!(validate_radius(-1.0).is_err());
        assert!(validate_radius(f64::NAN).is_err());
    }
}
