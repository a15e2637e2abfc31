//! Error types for geowatch.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GeoWatchError>;

/// Errors raised by the codec, the range decomposer, the store, and live
/// queries.
///
/// Store and record failures are scoped: a malformed record poisons only that
/// record's read, and a failed range scan only the affected range. Neither
/// tears down the enclosing query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeoWatchError {
    /// Latitude/longitude out of range or non-finite.
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// Stored document is missing expected fields or has ill-typed ones.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Geohash string contains characters outside the base-32 alphabet.
    #[error("Invalid geohash: {0}")]
    InvalidGeohash(String),

    /// Invalid argument (precision out of bounds, negative radius, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The backing store failed a scan, subscription, or document operation.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The query was stopped and no longer accepts operations.
    #[error("Query has been stopped")]
    QueryStopped,
}
