//! The client facade: keyed location writes and live radius queries.

use crate::error::{GeoWatchError, Result};
use crate::geom::Coordinate;
use crate::query::GeoQuery;
use crate::store::{DocumentStore, MemoryStore};
use crate::types::{Config, LocationRecord};
use std::sync::Arc;

/// A geo client over a document store.
///
/// Writes one record per key (`{ "g": geohash, "l": [lat, lng] }`) and opens
/// live radius queries over whatever the store holds. Cloning is cheap and
/// shares the underlying store.
///
/// # Examples
///
/// ```rust
/// use geowatch::{Coordinate, GeoWatch};
///
/// let watch = GeoWatch::memory();
///
/// let nyc = Coordinate::new(40.7128, -74.0060).unwrap();
/// watch.set_location("cab-17", &nyc)?;
/// assert_eq!(watch.get_location("cab-17")?, Some(nyc));
///
/// watch.remove_location("cab-17")?;
/// assert_eq!(watch.get_location("cab-17")?, None);
/// # Ok::<(), geowatch::GeoWatchError>(())
/// ```
#[derive(Clone)]
pub struct GeoWatch {
    store: Arc<dyn DocumentStore>,
    config: Config,
}

impl GeoWatch {
    /// Client over a custom store backend with default configuration.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, Config::default())
    }

    /// Client over a custom store backend.
    pub fn with_config(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        Self { store, config }
    }

    /// Client over a fresh in-memory store with default configuration.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Write or overwrite the location for a key.
    ///
    /// The record's geohash is computed here, at the configured write
    /// precision; subscribed queries whose ranges cover it are notified by
    /// the store.
    pub fn set_location(&self, key: &str, coord: &Coordinate) -> Result<()> {
        Self::validate_key(key)?;
        let record = LocationRecord::new(coord, self.config.write_precision)?;
        log::trace!(
            "set {key}: ({}, {}) -> {}",
            coord.lat(),
            coord.lng(),
            record.geohash
        );
        self.store.set_document(key, record.to_value())
    }

    /// Read back the location for a key, if any.
    ///
    /// # Errors
    ///
    /// `MalformedRecord` or `InvalidCoordinate` when the stored document does
    /// not parse; absence is `Ok(None)`, not an error.
    pub fn get_location(&self, key: &str) -> Result<Option<Coordinate>> {
        Self::validate_key(key)?;
        match self.store.get_document(key)? {
            Some(value) => {
                let record = LocationRecord::from_value(&value)?;
                Ok(Some(record.coordinate()?))
            }
            None => Ok(None),
        }
    }

    /// Delete the location for a key. Removing an absent key is a no-op.
    pub fn remove_location(&self, key: &str) -> Result<()> {
        Self::validate_key(key)?;
        log::trace!("remove {key}");
        self.store.delete_document(key)
    }

    /// Open a live radius query centered at `center`.
    ///
    /// The radius is capped at [`crate::geom::MAX_QUERY_RADIUS_KM`]. The
    /// returned query is already subscribed and scanned; attach hooks to
    /// observe membership.
    pub fn query(&self, center: &Coordinate, radius_km: f64) -> Result<GeoQuery> {
        GeoQuery::start(
            Arc::clone(&self.store),
            *center,
            radius_km,
            self.config.write_precision,
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Keys must be non-empty; the store's key ordering is otherwise opaque
    /// to us.
    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(GeoWatchError::InvalidInput(
                "location key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_remove_roundtrip() {
        let watch = GeoWatch::memory();
        let coord = Coordinate::new(40.7128, -74.0060).unwrap();

        assert_eq!(watch.get_location("cab").unwrap(), None);
        watch.set_location("cab", &coord).unwrap();
        assert_eq!(watch.get_location("cab").unwrap(), Some(coord));

        watch.remove_location("cab").unwrap();
        assert_eq!(watch.get_location("cab").unwrap(), None);

        // Removing an absent key is a no-op.
        watch.remove_location("cab").unwrap();
    }

    #[test]
    fn test_write_precision_from_config() {
        let store = Arc::new(MemoryStore::new());
        let watch = GeoWatch::with_config(store.clone(), Config::with_write_precision(7));
        let coord = Coordinate::new(40.7128, -74.0060).unwrap();
        watch.set_location("cab", &coord).unwrap();

        let value = store.get_document("cab").unwrap().unwrap();
        assert_eq!(value["g"], json!("dr5regw"));
    }

    #[test]
    fn test_rejects_empty_key() {
        let watch = GeoWatch::memory();
        let coord = Coordinate::new(0.0, 0.0).unwrap();
        assert!(matches!(
            watch.set_location("", &coord),
            Err(GeoWatchError::InvalidInput(_))
        ));
        assert!(watch.get_location("").is_err());
        assert!(watch.remove_location("").is_err());
    }

    #[test]
    fn test_get_surfaces_malformed_record() {
        let store = Arc::new(MemoryStore::new());
        let watch = GeoWatch::new(store.clone());
        store
            .set_document("broken", json!({ "g": "dr5regw" }))
            .unwrap();
        assert!(matches!(
            watch.get_location("broken"),
            Err(GeoWatchError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_query_sees_existing_writes() {
        let watch = GeoWatch::memory();
        let coord = Coordinate::new(0.0, 0.005).unwrap();
        watch.set_location("cab", &coord).unwrap();

        let center = Coordinate::new(0.0, 0.0).unwrap();
        let query = watch.query(&center, 1.0).unwrap();
        assert_eq!(query.members().len(), 1);
        assert_eq!(query.members()[0].0, "cab");
    }

    #[test]
    fn test_clone_shares_store() {
        let watch = GeoWatch::memory();
        let other = watch.clone();
        let coord = Coordinate::new(10.0, 10.0).unwrap();
        watch.set_location("cab", &coord).unwrap();
        assert_eq!(other.get_location("cab").unwrap(), Some(coord));
    }
}
