//! Document store abstraction and the in-process reference backend.
//!
//! The store is the external collaborator: it only understands documents by
//! key plus lexicographic range scans over the records' geohash field, and it
//! can feed live changes for a subscribed range. Consistency and durability
//! are the backend's problem, not modeled here.

use crate::error::{GeoWatchError, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Handle identifying one live range subscription.
pub type SubscriptionId = Uuid;

/// A live change for a document inside a subscribed range.
///
/// Immutable, consumed once. `Removed` also fires when a document's geohash
/// moves out of the subscribed range, mirroring how a range-scoped feed on a
/// real store behaves.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationChange {
    /// The document was created or updated and its geohash lies in the range.
    Updated(Value),
    /// The document was deleted, or its geohash left the range.
    Removed,
}

/// Receiver for live changes on one subscribed range.
pub trait RangeListener: Send + Sync {
    fn on_change(&self, key: &str, change: LocationChange);
}

/// Trait for document store backends.
///
/// Implementations use interior mutability; all methods take `&self` so one
/// store can be shared across queries behind an `Arc`. Backend failures map
/// to [`GeoWatchError::StoreUnavailable`].
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by key.
    fn get_document(&self, key: &str) -> Result<Option<Value>>;

    /// Create or replace a document.
    fn set_document(&self, key: &str, value: Value) -> Result<()>;

    /// Delete a document. Deleting an absent key is a no-op.
    fn delete_document(&self, key: &str) -> Result<()>;

    /// All documents whose geohash field lies in `[start, end)`, ascending by
    /// geohash.
    fn scan_range(&self, start: &str, end: &str) -> Result<Vec<(String, Value)>>;

    /// Subscribe to live changes for documents whose geohash lies in
    /// `[start, end)`, from now on.
    fn subscribe_range(
        &self,
        start: &str,
        end: &str,
        listener: Arc<dyn RangeListener>,
    ) -> Result<SubscriptionId>;

    /// Cancel a subscription. Unknown ids are a no-op.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

struct Subscription {
    start: String,
    end: String,
    listener: Arc<dyn RangeListener>,
}

impl Subscription {
    fn covers(&self, term: &str) -> bool {
        self.start.as_str() <= term && term < self.end.as_str()
    }
}

#[derive(Default)]
struct StoreState {
    /// Primary map: key -> raw document.
    docs: BTreeMap<String, Value>,
    /// Secondary index over the geohash field: (geohash, key).
    index: BTreeSet<(String, String)>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

/// In-memory store backend.
///
/// Reference implementation of [`DocumentStore`] used in tests and as a
/// template for real backends. Listener notification happens after the
/// internal lock is released, so a listener may call back into the store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

/// The geohash index term of a document, if it carries one.
///
/// Documents without a string `"g"` field are stored but invisible to range
/// scans and subscriptions.
fn index_term(value: &Value) -> Option<String> {
    value.get("g").and_then(Value::as_str).map(str::to_owned)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(notifications: Vec<(Arc<dyn RangeListener>, String, LocationChange)>) {
        for (listener, key, change) in notifications {
            listener.on_change(&key, change);
        }
    }
}

impl DocumentStore for MemoryStore {
    fn get_document(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.state.read().docs.get(key).cloned())
    }

    fn set_document(&self, key: &str, value: Value) -> Result<()> {
        let notifications = {
            let mut state = self.state.write();

            let new_term = index_term(&value);
            let old = state.docs.insert(key.to_string(), value.clone());
            let old_term = old.as_ref().and_then(index_term);

            if let Some(term) = &old_term {
                state.index.remove(&(term.clone(), key.to_string()));
            }
            if let Some(term) = &new_term {
                state.index.insert((term.clone(), key.to_string()));
            }

            let mut notifications = Vec::new();
            for sub in state.subscriptions.values() {
                let was_in = old_term.as_deref().is_some_and(|t| sub.covers(t));
                let now_in = new_term.as_deref().is_some_and(|t| sub.covers(t));
                if now_in {
                    notifications.push((
                        Arc::clone(&sub.listener),
                        key.to_string(),
                        LocationChange::Updated(value.clone()),
                    ));
                } else if was_in {
                    notifications.push((
                        Arc::clone(&sub.listener),
                        key.to_string(),
                        LocationChange::Removed,
                    ));
                }
            }
            notifications
        };

        Self::notify(notifications);
        Ok(())
    }

    fn delete_document(&self, key: &str) -> Result<()> {
        let notifications = {
            let mut state = self.state.write();
            let Some(old) = state.docs.remove(key) else {
                return Ok(());
            };
            let old_term = index_term(&old);
            if let Some(term) = &old_term {
                state.index.remove(&(term.clone(), key.to_string()));
            }

            state
                .subscriptions
                .values()
                .filter(|sub| old_term.as_deref().is_some_and(|t| sub.covers(t)))
                .map(|sub| {
                    (
                        Arc::clone(&sub.listener),
                        key.to_string(),
                        LocationChange::Removed,
                    )
                })
                .collect::<Vec<_>>()
        };

        Self::notify(notifications);
        Ok(())
    }

    fn scan_range(&self, start: &str, end: &str) -> Result<Vec<(String, Value)>> {
        if start > end {
            return Err(GeoWatchError::InvalidInput(format!(
                "scan start {start:?} sorts above end {end:?}"
            )));
        }
        let state = self.state.read();
        let lo = (start.to_string(), String::new());
        let hi = (end.to_string(), String::new());
        Ok(state
            .index
            .range(lo..hi)
            .map(|(_, key)| {
                let value = state
                    .docs
                    .get(key)
                    .cloned()
                    .expect("index entries always shadow a document");
                (key.clone(), value)
            })
            .collect())
    }

    fn subscribe_range(
        &self,
        start: &str,
        end: &str,
        listener: Arc<dyn RangeListener>,
    ) -> Result<SubscriptionId> {
        let id = Uuid::new_v4();
        self.state.write().subscriptions.insert(
            id,
            Subscription {
                start: start.to_string(),
                end: end.to_string(),
                listener,
            },
        );
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.state.write().subscriptions.remove(&id);
        Ok(())
    }
}
