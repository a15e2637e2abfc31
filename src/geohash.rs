//! Geohash codec: order-preserving base-32 encoding of coordinates.
//!
//! A geohash interleaves quantized longitude and latitude bits (longitude
//! first, most significant bit first) and maps each 5-bit group onto a fixed
//! base-32 alphabet. Two hashes sharing a k-character prefix denote nested
//! boxes, and lexicographic order over hashes of equal length follows the
//! bit-interleaved sweep over the globe. Both properties are what let a plain
//! lexicographic range scan stand in for a spatial lookup.

use crate::error::{GeoWatchError, Result};
use crate::geom::{Coordinate, EARTH_EQUATORIAL_CIRCUMFERENCE_KM, KM_PER_DEGREE_LATITUDE};

/// The geohash base-32 alphabet, strictly ascending in ASCII.
///
/// Ascending byte order is load-bearing: it is what makes string comparison
/// of hashes agree with the numeric order of their interleaved bits.
pub const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Maximum geohash length. 22 characters is 110 bits, well below f64
/// resolution limits for either axis.
pub const MAX_PRECISION: usize = 22;

/// Sentinel that sorts above every alphabet character; used as the exclusive
/// upper bound of a range whose prefix cannot be incremented.
pub const RANGE_SENTINEL: char = '~';

const BITS_PER_CHAR: usize = 5;

/// Axis-aligned bounding box denoted by a geohash, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Whether the box contains the coordinate (edges inclusive).
    pub fn contains(&self, coord: &Coordinate) -> bool {
        coord.lat() >= self.south
            && coord.lat() <= self.north
            && coord.lng() >= self.west
            && coord.lng() <= self.east
    }
}

fn base32_index(byte: u8) -> Option<usize> {
    BASE32.iter().position(|&c| c == byte)
}

/// Encode a coordinate as a geohash of exactly `precision` characters.
///
/// Latitude is normalized to [0, 180] and longitude to [0, 360] internally,
/// then each axis is narrowed by binary search, emitting one longitude bit
/// and one latitude bit per round.
///
/// # Errors
///
/// `InvalidInput` if `precision` is outside [1, [`MAX_PRECISION`]]. The
/// coordinate itself is valid by construction.
///
/// # Examples
///
/// ```rust
/// use geowatch::{Coordinate, geohash};
///
/// let c = Coordinate::new(40.7128, -74.0060).unwrap();
/// let hash = geohash::encode(&c, 7).unwrap();
/// assert_eq!(hash, "dr5regw");
/// ```
pub fn encode(coord: &Coordinate, precision: usize) -> Result<String> {
    if precision == 0 || precision > MAX_PRECISION {
        return Err(GeoWatchError::InvalidInput(format!(
            "geohash precision must be in [1, {MAX_PRECISION}], got {precision}"
        )));
    }

    let lat = coord.lat() + 90.0;
    let lng = coord.lng() + 180.0;
    let (mut lat_lo, mut lat_hi) = (0.0_f64, 180.0_f64);
    let (mut lng_lo, mut lng_hi) = (0.0_f64, 360.0_f64);

    let mut out = String::with_capacity(precision);
    let mut current = 0usize;
    let mut bit_count = 0usize;
    let mut even_bit = true; // even bits carry longitude

    while out.len() < precision {
        let bit = if even_bit {
            let mid = (lng_lo + lng_hi) / 2.0;
            if lng >= mid {
                lng_lo = mid;
                1
            } else {
                lng_hi = mid;
                0
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            if lat >= mid {
                lat_lo = mid;
                1
            } else {
                lat_hi = mid;
                0
            }
        };
        even_bit = !even_bit;

        current = (current << 1) | bit;
        bit_count += 1;
        if bit_count == BITS_PER_CHAR {
            out.push(BASE32[current] as char);
            current = 0;
            bit_count = 0;
        }
    }

    Ok(out)
}

/// Decode a geohash back into the bounding box it denotes.
///
/// The box, not a point: a hash names an interval on each axis, and the
/// interval is all the information the string carries.
///
/// # Errors
///
/// `InvalidGeohash` for an empty string, a string longer than
/// [`MAX_PRECISION`], or characters outside the alphabet.
pub fn decode(hash: &str) -> Result<BoundingBox> {
    if hash.is_empty() || hash.len() > MAX_PRECISION {
        return Err(GeoWatchError::InvalidGeohash(format!(
            "geohash length must be in [1, {MAX_PRECISION}], got {:?}",
            hash
        )));
    }

    let (mut lat_lo, mut lat_hi) = (0.0_f64, 180.0_f64);
    let (mut lng_lo, mut lng_hi) = (0.0_f64, 360.0_f64);
    let mut even_bit = true;

    for byte in hash.bytes() {
        let value = base32_index(byte).ok_or_else(|| {
            GeoWatchError::InvalidGeohash(format!(
                "character {:?} is not in the geohash alphabet",
                byte as char
            ))
        })?;

        for shift in (0..BITS_PER_CHAR).rev() {
            let bit = (value >> shift) & 1;
            if even_bit {
                let mid = (lng_lo + lng_hi) / 2.0;
                if bit == 1 {
                    lng_lo = mid;
                } else {
                    lng_hi = mid;
                }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if bit == 1 {
                    lat_lo = mid;
                } else {
                    lat_hi = mid;
                }
            }
            even_bit = !even_bit;
        }
    }

    Ok(BoundingBox {
        south: lat_lo - 90.0,
        west: lng_lo - 180.0,
        north: lat_hi - 90.0,
        east: lng_hi - 180.0,
    })
}

/// Cell dimensions (width, height) in degrees for a given geohash length.
///
/// A hash of `precision` characters carries `ceil(5p/2)` longitude bits and
/// `floor(5p/2)` latitude bits, so each extra character roughly halves both
/// dimensions. This is the fixed degrees-per-character table, computed from
/// the bit split instead of transcribed.
pub fn cell_dimensions_deg(precision: usize) -> (f64, f64) {
    debug_assert!((1..=MAX_PRECISION).contains(&precision));
    let total_bits = precision * BITS_PER_CHAR;
    let lng_bits = total_bits.div_ceil(2);
    let lat_bits = total_bits / 2;
    let width = 360.0 / (1u128 << lng_bits) as f64;
    let height = 180.0 / (1u128 << lat_bits) as f64;
    (width, height)
}

/// The geohash length whose cell is at least `radius_km` wide and tall at the
/// equator.
///
/// Conservative rounding: when no length fits exactly, the next shorter
/// (larger-cell) length is chosen so a matching point is never excluded.
/// Total over all inputs; always returns a value in [1, [`MAX_PRECISION`]].
pub fn precision_for_radius(radius_km: f64) -> usize {
    let km_per_lng_degree = EARTH_EQUATORIAL_CIRCUMFERENCE_KM / 360.0;
    for precision in (1..=MAX_PRECISION).rev() {
        let (width_deg, height_deg) = cell_dimensions_deg(precision);
        if height_deg * KM_PER_DEGREE_LATITUDE >= radius_km
            && width_deg * km_per_lng_degree >= radius_km
        {
            return precision;
        }
    }
    1
}

/// Lexicographic successor of a geohash prefix.
///
/// Increments the last character through the base-32 alphabet, carrying into
/// shorter prefixes on overflow. An all-`z` prefix has no base-32 successor
/// and maps to the sentinel `"~"`, which sorts above every geohash.
///
/// `[prefix, successor(prefix))` is exactly the set of geohashes starting
/// with `prefix`.
pub fn successor(prefix: &str) -> Result<String> {
    let mut bytes: Vec<u8> = prefix.bytes().collect();
    if bytes.is_empty() {
        return Err(GeoWatchError::InvalidGeohash(
            "cannot take the successor of an empty prefix".to_string(),
        ));
    }

    while let Some(&last) = bytes.last() {
        let idx = base32_index(last).ok_or_else(|| {
            GeoWatchError::InvalidGeohash(format!(
                "character {:?} is not in the geohash alphabet",
                last as char
            ))
        })?;
        if idx < BASE32.len() - 1 {
            let last = bytes.last_mut().expect("checked non-empty above");
            *last = BASE32[idx + 1];
            return Ok(String::from_utf8(bytes).expect("alphabet is ASCII"));
        }
        bytes.pop();
    }

    Ok(RANGE_SENTINEL.to_string())
}
