//! Configuration and stored-record types.

use crate::error::{GeoWatchError, Result};
use crate::geohash::{self, MAX_PRECISION};
use crate::geom::Coordinate;
use serde::{Deserialize, Serialize};

/// Client configuration.
///
/// Easily serializable and loadable from JSON while keeping complexity
/// minimal.
///
/// # Example
///
/// ```rust
/// use geowatch::Config;
///
/// let config = Config::default();
/// assert_eq!(config.write_precision, 10);
///
/// let json = r#"{ "write_precision": 8 }"#;
/// let config: Config = serde_json::from_str(json).unwrap();
/// assert_eq!(config.write_precision, 8);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Geohash length written into stored records (1-22, default: 10).
    /// Higher values resolve finer query radii at the cost of longer keys.
    #[serde(default = "Config::default_write_precision")]
    pub write_precision: usize,
}

impl Config {
    const fn default_write_precision() -> usize {
        10
    }

    /// Config with a custom write precision.
    pub fn with_write_precision(precision: usize) -> Self {
        assert!(
            (1..=MAX_PRECISION).contains(&precision),
            "Write precision must be between 1 and {MAX_PRECISION}"
        );
        Self {
            write_precision: precision,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            write_precision: Self::default_write_precision(),
        }
    }
}

/// The stored document shape: a geohash string and an ordered
/// `[latitude, longitude]` pair, written together and treated as a unit.
///
/// Serialized as `{ "g": "...", "l": [lat, lng] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    /// Geohash of the location, computed once at write time.
    #[serde(rename = "g")]
    pub geohash: String,
    /// Ordered coordinate pair. Kept as a raw vector so records with the
    /// wrong element count deserialize and are then rejected explicitly.
    #[serde(rename = "l")]
    pub location: Vec<f64>,
}

impl LocationRecord {
    /// Build a record for a coordinate, encoding its geohash at `precision`.
    pub fn new(coord: &Coordinate, precision: usize) -> Result<Self> {
        let geohash = geohash::encode(coord, precision)?;
        Ok(Self {
            geohash,
            location: vec![coord.lat(), coord.lng()],
        })
    }

    /// Validate and extract the coordinate.
    ///
    /// # Errors
    ///
    /// `InvalidCoordinate` when the pair has the wrong element count or
    /// out-of-range values. Fatal to this record only; callers skip the
    /// record and keep scanning.
    pub fn coordinate(&self) -> Result<Coordinate> {
        match self.location.as_slice() {
            [lat, lng] => Coordinate::new(*lat, *lng),
            other => Err(GeoWatchError::InvalidCoordinate(format!(
                "location pair must have exactly 2 elements, got {}",
                other.len()
            ))),
        }
    }

    /// Parse a raw stored document.
    ///
    /// # Errors
    ///
    /// `MalformedRecord` when the expected fields are missing or ill-typed.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| GeoWatchError::MalformedRecord(e.to_string()))
    }

    /// Serialize into the stored document shape.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("record serialization is infallible")
    }
}
