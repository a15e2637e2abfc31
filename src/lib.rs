//! Real-time geo proximity queries over a range-scannable document store.
//!
//! ```rust
//! use geowatch::{Coordinate, GeoWatch};
//!
//! let watch = GeoWatch::memory();
//!
//! let cab = Coordinate::new(40.7128, -74.0060)?;
//! watch.set_location("cab-17", &cab)?;
//!
//! let center = Coordinate::new(40.7130, -74.0055)?;
//! let query = watch.query(&center, 1.0)?;
//! query.on_entered(|key, coord| {
//!     println!("{key} is nearby at ({}, {})", coord.lat(), coord.lng());
//! });
//! # Ok::<(), geowatch::GeoWatchError>(())
//! ```

pub mod builder;
pub mod db;
pub mod error;
pub mod geohash;
pub mod geom;
pub mod query;
pub mod range;
pub mod store;
pub mod types;

pub use builder::GeoWatchBuilder;
pub use db::GeoWatch;
pub use error::{GeoWatchError, Result};

pub use geohash::{BoundingBox, MAX_PRECISION};

pub use geom::{Coordinate, MAX_QUERY_RADIUS_KM, distance_km};

pub use query::GeoQuery;

pub use range::{QueryRange, ranges_for_circle};

pub use store::{DocumentStore, LocationChange, MemoryStore, RangeListener, SubscriptionId};

pub use types::{Config, LocationRecord};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{GeoWatch, GeoWatchBuilder, GeoWatchError, Result};

    pub use crate::{Coordinate, distance_km};

    pub use crate::{GeoQuery, QueryRange};

    pub use crate::{Config, LocationRecord};

    pub use crate::{DocumentStore, MemoryStore};
}
