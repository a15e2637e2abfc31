//! Circle-to-range decomposition.
//!
//! The backing store understands nothing but lexicographic range scans, so a
//! "within radius R of C" query has to become a small set of geohash prefix
//! ranges whose union covers the circle. The union over-covers; exact
//! haversine filtering happens in the live query state machine.

use crate::geohash::{self, RANGE_SENTINEL};
use crate::geom::{self, Coordinate, KM_PER_DEGREE_LATITUDE};
use smallvec::SmallVec;

/// Upper bound on ranges per decomposition: the 3x3 cell grid before merging.
pub const MAX_RANGES: usize = 9;

/// A half-open lexicographic interval `[start, end)` of geohash strings.
///
/// A key belongs to the range iff its geohash sorts at or above `start` and
/// strictly below `end`. Within one decomposition, ranges are sorted
/// ascending and disjoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryRange {
    pub start: String,
    pub end: String,
}

impl QueryRange {
    /// Whether the geohash falls inside `[start, end)`.
    pub fn contains(&self, hash: &str) -> bool {
        self.start.as_str() <= hash && hash < self.end.as_str()
    }

    /// The single range covering the entire keyspace.
    fn full_keyspace() -> Self {
        Self {
            start: "0".to_string(),
            end: RANGE_SENTINEL.to_string(),
        }
    }
}

/// Decompose a query circle into a covering set of prefix ranges.
///
/// Picks the finest geohash length whose cell still contains the circle's
/// extent on both axes, enumerates the 3x3 grid of cells around the center
/// (longitude wrapping across the antimeridian, latitude clamped at the
/// poles), and turns each distinct cell into `[hash, successor(hash))`.
/// Adjacent and overlapping ranges are merged, so the result holds at most
/// [`MAX_RANGES`] entries and is typically much smaller.
///
/// `max_precision` is the length of the stored hashes the ranges will be
/// matched against, and bounds the prefix length: a string always sorts
/// strictly below its own extensions, so a prefix longer than a stored hash
/// could never contain it, no matter how close the point is.
///
/// Radii beyond the supported cap are capped first. When even length-1 cells
/// cannot contain the extent (a near-cap radius at high latitude, or a circle
/// touching a pole), the whole keyspace is returned as one range.
///
/// Deterministic: the same center and radius always produce the same set.
///
/// # Examples
///
/// ```rust
/// use geowatch::{Coordinate, range::ranges_for_circle};
///
/// let center = Coordinate::new(40.7128, -74.0060).unwrap();
/// let ranges = ranges_for_circle(&center, 1.0, 10);
/// assert!(!ranges.is_empty() && ranges.len() <= 9);
/// for pair in ranges.windows(2) {
///     assert!(pair[0].end <= pair[1].start);
/// }
/// ```
pub fn ranges_for_circle(
    center: &Coordinate,
    radius_km: f64,
    max_precision: usize,
) -> SmallVec<[QueryRange; MAX_RANGES]> {
    let radius = geom::cap_radius(radius_km);

    let lat_extent_deg = radius / KM_PER_DEGREE_LATITUDE;
    let north = center.lat() + lat_extent_deg;
    let south = center.lat() - lat_extent_deg;

    // A circle containing a pole needs every longitude; no grid covers that.
    if lat_extent_deg > 0.0 && (north >= 90.0 || south <= -90.0) {
        let mut out = SmallVec::new();
        out.push(QueryRange::full_keyspace());
        return out;
    }

    // Longitude degrees shrink toward the poles; size the extent at the
    // circle's most extreme covered latitude so it never under-covers.
    let edge_lat = north.abs().max(south.abs()).min(90.0);
    let km_per_lng_degree = geom::km_per_degree_longitude(edge_lat);
    let lng_extent_deg = if radius == 0.0 {
        0.0
    } else if km_per_lng_degree <= f64::EPSILON {
        f64::INFINITY
    } else {
        radius / km_per_lng_degree
    };

    let mut precision = geohash::precision_for_radius(radius)
        .min(max_precision)
        .max(1);
    loop {
        let (width_deg, height_deg) = geohash::cell_dimensions_deg(precision);
        if width_deg >= lng_extent_deg && height_deg >= lat_extent_deg {
            break;
        }
        if precision == 1 {
            let mut out = SmallVec::new();
            out.push(QueryRange::full_keyspace());
            return out;
        }
        precision -= 1;
    }

    let (width_deg, height_deg) = geohash::cell_dimensions_deg(precision);
    let mut hashes: SmallVec<[String; MAX_RANGES]> = SmallVec::new();
    for lat_step in [-1.0, 0.0, 1.0] {
        for lng_step in [-1.0, 0.0, 1.0] {
            let lat = (center.lat() + lat_step * height_deg).clamp(-90.0, 90.0);
            let lng = wrap_longitude(center.lng() + lng_step * width_deg);
            let coord = Coordinate::new(lat, lng).expect("perturbed coordinate stays in range");
            let hash = geohash::encode(&coord, precision)
                .expect("precision verified to be within bounds");
            if !hashes.contains(&hash) {
                hashes.push(hash);
            }
        }
    }

    let mut ranges: SmallVec<[QueryRange; MAX_RANGES]> = hashes
        .into_iter()
        .map(|hash| {
            let end = geohash::successor(&hash).expect("encode output is alphabet-only");
            QueryRange { start: hash, end }
        })
        .collect();

    merge_ranges(&mut ranges);
    ranges
}

/// Sort ranges ascending and merge adjacent or overlapping neighbors in
/// place.
pub fn merge_ranges(ranges: &mut SmallVec<[QueryRange; MAX_RANGES]>) {
    ranges.sort();
    let mut merged: SmallVec<[QueryRange; MAX_RANGES]> = SmallVec::new();
    for range in ranges.drain(..) {
        match merged.last_mut() {
            Some(prev) if prev.end >= range.start => {
                if range.end > prev.end {
                    prev.end = range.end;
                }
            }
            _ => merged.push(range),
        }
    }
    *ranges = merged;
}

/// Map a longitude onto [-180, 180), wrapping across the antimeridian.
fn wrap_longitude(lng: f64) -> f64 {
    let wrapped = (lng + 180.0).rem_euclid(360.0) - 180.0;
    debug_assert!((-180.0..180.0).contains(&wrapped));
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::distance_km;
    use geo::{Destination, Haversine, Point};

    fn assert_covers(center: &Coordinate, radius_km: f64, stored_precision: usize) {
        let ranges = ranges_for_circle(center, radius_km, stored_precision);
        assert!(!ranges.is_empty());
        assert!(ranges.len() <= MAX_RANGES);

        // Sorted, disjoint, never finer than the stored hashes.
        for pair in ranges.windows(2) {
            assert!(pair[0].end <= pair[1].start, "{pair:?} should be disjoint");
        }
        for range in &ranges {
            assert!(range.start.len() <= stored_precision, "{range:?}");
        }

        // Every point on or inside the circle hashes into some range, at the
        // length records are actually written with.
        let origin = Point::new(center.lng(), center.lat());
        for step in 0..72 {
            let bearing = f64::from(step) * 5.0;
            for fraction in [0.25, 0.7, 0.999] {
                let dest = Haversine.destination(origin, bearing, radius_km * fraction * 1000.0);
                let coord = match Coordinate::new(dest.y(), wrap_longitude(dest.x())) {
                    Ok(coord) => coord,
                    // destination() can step epsilonally past a pole
                    Err(_) => continue,
                };
                let hash = geohash::encode(&coord, stored_precision).unwrap();
                assert!(
                    ranges.iter().any(|r| r.contains(&hash)),
                    "point ({}, {}) at bearing {bearing} not covered for center \
                     ({}, {}) radius {radius_km}",
                    coord.lat(),
                    coord.lng(),
                    center.lat(),
                    center.lng(),
                );
            }
        }
    }

    #[test]
    fn test_covering_small_radius() {
        let center = Coordinate::new(0.0, 0.0).unwrap();
        assert_covers(&center, 1.0, 10);
    }

    #[test]
    fn test_covering_sub_cell_radius() {
        // Finer than a single length-10 cell; the ranges must still cover.
        let center = Coordinate::new(48.8584, 2.2945).unwrap();
        assert_covers(&center, 0.0001, 10);
    }

    #[test]
    fn test_covering_city_scale() {
        let center = Coordinate::new(40.7128, -74.0060).unwrap();
        assert_covers(&center, 50.0, 10);
    }

    #[test]
    fn test_covering_across_antimeridian() {
        let center = Coordinate::new(0.0, 179.9).unwrap();
        assert_covers(&center, 100.0, 10);
    }

    #[test]
    fn test_covering_high_latitude() {
        let center = Coordinate::new(80.0, 30.0).unwrap();
        assert_covers(&center, 500.0, 10);
    }

    #[test]
    fn test_covering_at_radius_cap() {
        let center = Coordinate::new(10.0, 10.0).unwrap();
        assert_covers(&center, geom::MAX_QUERY_RADIUS_KM, 10);
    }

    #[test]
    fn test_oversized_radius_is_capped_first() {
        let center = Coordinate::new(10.0, 10.0).unwrap();
        let capped = ranges_for_circle(&center, geom::MAX_QUERY_RADIUS_KM, 10);
        let oversized = ranges_for_circle(&center, 9_000.0, 10);
        assert_eq!(capped, oversized);
    }

    #[test]
    fn test_ranges_never_finer_than_stored_hashes() {
        // A prefix longer than a stored hash sorts above it and can never
        // contain it, so tiny radii must not out-resolve the write length.
        let center = Coordinate::new(0.0, 0.0).unwrap();
        let stored = geohash::encode(&center, 10).unwrap();
        for radius in [0.0, 0.0001, 0.001] {
            let ranges = ranges_for_circle(&center, radius, 10);
            assert!(ranges.iter().all(|r| r.start.len() <= 10));
            assert!(
                ranges.iter().any(|r| r.contains(&stored)),
                "stored hash {stored} not covered at radius {radius}"
            );
        }
    }

    #[test]
    fn test_circle_touching_pole_returns_full_keyspace() {
        let center = Coordinate::new(89.5, 0.0).unwrap();
        let ranges = ranges_for_circle(&center, 200.0, 10);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start, "0");
        assert_eq!(ranges[0].end, "~");

        // Terminates and still covers a point on the far side of the pole.
        let far = Coordinate::new(89.8, 179.0).unwrap();
        assert!(distance_km(&center, &far) < 200.0);
        let hash = geohash::encode(&far, geohash::MAX_PRECISION).unwrap();
        assert!(ranges[0].contains(&hash));
    }

    #[test]
    fn test_idempotent() {
        let center = Coordinate::new(48.8566, 2.3522).unwrap();
        let first = ranges_for_circle(&center, 25.0, 10);
        let second = ranges_for_circle(&center, 25.0, 10);
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_radius() {
        let center = Coordinate::new(48.8566, 2.3522).unwrap();
        let ranges = ranges_for_circle(&center, 0.0, 10);
        assert_eq!(ranges.len(), 1);
        let hash = geohash::encode(&center, 10).unwrap();
        assert!(ranges[0].contains(&hash));
    }

    #[test]
    fn test_merge_adjacent() {
        let mut ranges: SmallVec<[QueryRange; MAX_RANGES]> = SmallVec::new();
        ranges.push(QueryRange {
            start: "dr5".into(),
            end: "dr6".into(),
        });
        ranges.push(QueryRange {
            start: "dr6".into(),
            end: "dr7".into(),
        });
        merge_ranges(&mut ranges);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start, "dr5");
        assert_eq!(ranges[0].end, "dr7");
    }

    #[test]
    fn test_merge_overlapping_keeps_widest_end() {
        let mut ranges: SmallVec<[QueryRange; MAX_RANGES]> = SmallVec::new();
        ranges.push(QueryRange {
            start: "dr5".into(),
            end: "dr9".into(),
        });
        ranges.push(QueryRange {
            start: "dr6".into(),
            end: "dr7".into(),
        });
        merge_ranges(&mut ranges);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].end, "dr9");
    }

    #[test]
    fn test_merge_keeps_disjoint_ranges_separate() {
        let mut ranges: SmallVec<[QueryRange; MAX_RANGES]> = SmallVec::new();
        ranges.push(QueryRange {
            start: "u10".into(),
            end: "u11".into(),
        });
        ranges.push(QueryRange {
            start: "dr5".into(),
            end: "dr6".into(),
        });
        merge_ranges(&mut ranges);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].start, "dr5");
        assert_eq!(ranges[1].start, "u10");
    }

    #[test]
    fn test_range_contains_prefix_members() {
        let range = QueryRange {
            start: "dr5".into(),
            end: "dr6".into(),
        };
        assert!(range.contains("dr5"));
        assert!(range.contains("dr5zzzz"));
        assert!(!range.contains("dr6"));
        assert!(!range.contains("dr4zzz"));
    }

    #[test]
    fn test_wrap_longitude() {
        assert_eq!(wrap_longitude(0.0), 0.0);
        assert_eq!(wrap_longitude(181.0), -179.0);
        assert_eq!(wrap_longitude(-181.0), 179.0);
        assert_eq!(wrap_longitude(180.0), -180.0);
        assert_eq!(wrap_longitude(540.0), -180.0);
    }
}
