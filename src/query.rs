//! Live radius queries.
//!
//! A [`GeoQuery`] subscribes to every covering range of its circle, folds the
//! store's add/update/remove feed into a membership map, and raises
//! entered/exited/moved/ready notifications. Range membership is necessary
//! but not sufficient (the covering set over-approximates the circle), so
//! every incoming location is re-checked against the true haversine distance
//! before it is admitted or evicted.
//!
//! All mutation for one query funnels through a single mutex, and callbacks
//! are dispatched by a single-drainer pump in strict arrival order with the
//! lock released. Queries are fully independent of one another.

use crate::error::{GeoWatchError, Result};
use crate::geom::{self, Coordinate, distance_km};
use crate::range::{MAX_RANGES, QueryRange, ranges_for_circle};
use crate::store::{DocumentStore, LocationChange, RangeListener, SubscriptionId};
use crate::types::LocationRecord;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

type EnteredFn = Arc<dyn Fn(&str, Coordinate) + Send + Sync>;
type ExitedFn = Arc<dyn Fn(&str) + Send + Sync>;
type MovedFn = Arc<dyn Fn(&str, Coordinate) + Send + Sync>;
type ReadyFn = Arc<dyn Fn() + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&GeoWatchError) + Send + Sync>;

enum Listener {
    Entered(EnteredFn),
    Exited(ExitedFn),
    Moved(MovedFn),
    Ready(ReadyFn),
    Error(ErrorFn),
}

#[derive(Default)]
struct Callbacks {
    entered: Vec<EnteredFn>,
    exited: Vec<ExitedFn>,
    moved: Vec<MovedFn>,
    ready: Vec<ReadyFn>,
    error: Vec<ErrorFn>,
}

enum QueryEvent {
    Entered { key: String, coord: Coordinate },
    Exited { key: String },
    Moved { key: String, coord: Coordinate },
    Ready,
    Error(GeoWatchError),
    Register(Listener),
}

/// Last known state for a key seen inside the covering ranges.
struct TrackedLocation {
    coord: Coordinate,
    geohash: String,
    in_circle: bool,
}

struct QueryState {
    center: Coordinate,
    radius_km: f64,
    /// Stored hashes are this long; range prefixes must never be longer.
    write_precision: usize,
    ranges: SmallVec<[QueryRange; MAX_RANGES]>,
    subscriptions: Vec<(QueryRange, SubscriptionId)>,
    /// Every key seen inside the ranges, member or not. Members are the
    /// entries with `in_circle` set.
    tracked: FxHashMap<String, TrackedLocation>,
    /// Ranges whose initial scan has not settled yet.
    loading: Vec<QueryRange>,
    /// Whether the ready event has been queued for this load cycle.
    ready_fired: bool,
    stopped: bool,
    pending: VecDeque<QueryEvent>,
    dispatching: bool,
    /// Membership as observed through dispatched events; the replay source
    /// for listeners registered after events already went out.
    dispatched_members: FxHashMap<String, Coordinate>,
    ready_dispatched: bool,
    /// Errors dispatched while no error listener was registered.
    unreported_errors: Vec<GeoWatchError>,
}

impl QueryState {
    fn in_any_range(ranges: &[QueryRange], hash: &str) -> bool {
        ranges.iter().any(|r| r.contains(hash))
    }

    /// Fold an add/update into the tracked map, queueing transitions.
    fn apply_update(&mut self, key: &str, coord: Coordinate, geohash: String) {
        if !Self::in_any_range(&self.ranges, &geohash) {
            // Irrelevant to this query even if another query cares.
            return;
        }

        let inside = distance_km(&self.center, &coord) <= self.radius_km;
        if let Some(tracked) = self.tracked.get_mut(key) {
            let was_inside = tracked.in_circle;
            let coord_changed = tracked.coord != coord;
            tracked.coord = coord;
            tracked.geohash = geohash;
            tracked.in_circle = inside;
            match (was_inside, inside) {
                (false, true) => self.pending.push_back(QueryEvent::Entered {
                    key: key.to_string(),
                    coord,
                }),
                (true, false) => self.pending.push_back(QueryEvent::Exited {
                    key: key.to_string(),
                }),
                (true, true) if coord_changed => self.pending.push_back(QueryEvent::Moved {
                    key: key.to_string(),
                    coord,
                }),
                _ => {}
            }
        } else {
            self.tracked.insert(
                key.to_string(),
                TrackedLocation {
                    coord,
                    geohash,
                    in_circle: inside,
                },
            );
            if inside {
                self.pending.push_back(QueryEvent::Entered {
                    key: key.to_string(),
                    coord,
                });
            }
        }
    }

    /// Fold a removal delivered by the given range.
    ///
    /// Only evicts when the key's last known geohash lies inside the
    /// notifying range: a removal from a range the key already left is stale
    /// and must not evict a live member.
    fn apply_removal(&mut self, range: &QueryRange, key: &str) {
        let Some(tracked) = self.tracked.get(key) else {
            return;
        };
        if !range.contains(&tracked.geohash) {
            return;
        }
        let was_inside = tracked.in_circle;
        self.tracked.remove(key);
        if was_inside {
            self.pending.push_back(QueryEvent::Exited {
                key: key.to_string(),
            });
        }
    }

    /// Mark a range's initial load as settled; queue ready when the last one
    /// settles.
    fn settle_range(&mut self, range: &QueryRange) {
        self.loading.retain(|r| r != range);
        if self.loading.is_empty() && !self.ready_fired {
            self.ready_fired = true;
            self.pending.push_back(QueryEvent::Ready);
        }
    }

    fn queue_error(&mut self, error: GeoWatchError) {
        log::warn!("geo query error: {error}");
        self.pending.push_back(QueryEvent::Error(error));
    }
}

struct QueryCore {
    state: Mutex<QueryState>,
    callbacks: Mutex<Callbacks>,
}

impl QueryCore {
    /// Dispatch queued events in arrival order.
    ///
    /// Exactly one thread drains at a time; concurrent producers append and
    /// return. The state lock is released around every callback, so caller
    /// code may re-enter the query.
    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }
        loop {
            let mut state = self.state.lock();
            let Some(event) = state.pending.pop_front() else {
                state.dispatching = false;
                return;
            };
            match event {
                QueryEvent::Entered { key, coord } => {
                    state.dispatched_members.insert(key.clone(), coord);
                    drop(state);
                    let cbs = self.callbacks.lock().entered.clone();
                    for cb in cbs {
                        cb(&key, coord);
                    }
                }
                QueryEvent::Exited { key } => {
                    state.dispatched_members.remove(&key);
                    drop(state);
                    let cbs = self.callbacks.lock().exited.clone();
                    for cb in cbs {
                        cb(&key);
                    }
                }
                QueryEvent::Moved { key, coord } => {
                    state.dispatched_members.insert(key.clone(), coord);
                    drop(state);
                    let cbs = self.callbacks.lock().moved.clone();
                    for cb in cbs {
                        cb(&key, coord);
                    }
                }
                QueryEvent::Ready => {
                    state.ready_dispatched = true;
                    drop(state);
                    let cbs = self.callbacks.lock().ready.clone();
                    for cb in cbs {
                        cb();
                    }
                }
                QueryEvent::Error(error) => {
                    drop(state);
                    let cbs = self.callbacks.lock().error.clone();
                    if cbs.is_empty() {
                        self.state.lock().unreported_errors.push(error);
                    } else {
                        for cb in cbs {
                            cb(&error);
                        }
                    }
                }
                QueryEvent::Register(listener) => self.register(state, listener),
            }
        }
    }

    /// Attach a listener, replaying the already-dispatched view so late
    /// registrations observe the same net state as early ones.
    fn register(&self, state: parking_lot::MutexGuard<'_, QueryState>, listener: Listener) {
        match listener {
            Listener::Entered(cb) => {
                let mut members: Vec<(String, Coordinate)> = state
                    .dispatched_members
                    .iter()
                    .map(|(k, c)| (k.clone(), *c))
                    .collect();
                drop(state);
                members.sort_by(|a, b| a.0.cmp(&b.0));
                for (key, coord) in &members {
                    cb(key, *coord);
                }
                self.callbacks.lock().entered.push(cb);
            }
            Listener::Exited(cb) => {
                drop(state);
                self.callbacks.lock().exited.push(cb);
            }
            Listener::Moved(cb) => {
                drop(state);
                self.callbacks.lock().moved.push(cb);
            }
            Listener::Ready(cb) => {
                let already_ready = state.ready_dispatched;
                drop(state);
                if already_ready {
                    cb();
                }
                self.callbacks.lock().ready.push(cb);
            }
            Listener::Error(cb) => {
                let mut state = state;
                let backlog = std::mem::take(&mut state.unreported_errors);
                drop(state);
                for error in &backlog {
                    cb(error);
                }
                self.callbacks.lock().error.push(cb);
            }
        }
    }

    /// Fold one store change into the state machine.
    fn apply_change(&self, range: &QueryRange, key: &str, change: LocationChange) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        match change {
            LocationChange::Updated(value) => {
                match LocationRecord::from_value(&value).and_then(|r| Ok((r.coordinate()?, r))) {
                    Ok((coord, record)) => state.apply_update(key, coord, record.geohash),
                    Err(error) => state.queue_error(error),
                }
            }
            LocationChange::Removed => state.apply_removal(range, key),
        }
    }
}

/// Store-facing listener for one covering range; holds the query weakly so a
/// late event after teardown upgrades to nothing.
struct QueryRangeListener {
    core: Weak<QueryCore>,
    range: QueryRange,
}

impl RangeListener for QueryRangeListener {
    fn on_change(&self, key: &str, change: LocationChange) {
        if let Some(core) = self.core.upgrade() {
            core.apply_change(&self.range, key, change);
            core.drain();
        }
    }
}

/// A live radius query.
///
/// Obtained from [`crate::GeoWatch::query`]. Register notification hooks
/// with [`on_entered`](Self::on_entered) and friends; hooks registered after
/// events already fired are caught up on the current membership (and ready
/// state) first. Dropping the handle stops the query.
///
/// # Examples
///
/// ```rust
/// use geowatch::{Coordinate, GeoWatch};
/// use std::sync::{Arc, Mutex};
///
/// let watch = GeoWatch::memory();
/// watch.set_location("hub", &Coordinate::new(0.0, 0.0).unwrap()).unwrap();
///
/// let center = Coordinate::new(0.0, 0.0).unwrap();
/// let query = watch.query(&center, 5.0).unwrap();
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// query.on_entered(move |key, _coord| sink.lock().unwrap().push(key.to_string()));
/// assert_eq!(seen.lock().unwrap().as_slice(), ["hub".to_string()]);
/// ```
pub struct GeoQuery {
    core: Arc<QueryCore>,
    store: Arc<dyn DocumentStore>,
}

impl GeoQuery {
    pub(crate) fn start(
        store: Arc<dyn DocumentStore>,
        center: Coordinate,
        radius_km: f64,
        write_precision: usize,
    ) -> Result<Self> {
        geom::validate_radius(radius_km)?;
        let radius_km = geom::cap_radius(radius_km);
        let ranges = ranges_for_circle(&center, radius_km, write_precision);
        log::debug!(
            "starting geo query at ({}, {}) radius {radius_km} km over {} ranges",
            center.lat(),
            center.lng(),
            ranges.len()
        );

        let core = Arc::new(QueryCore {
            state: Mutex::new(QueryState {
                center,
                radius_km,
                write_precision,
                ranges: ranges.clone(),
                subscriptions: Vec::new(),
                tracked: FxHashMap::default(),
                loading: ranges.to_vec(),
                ready_fired: false,
                stopped: false,
                pending: VecDeque::new(),
                dispatching: false,
                dispatched_members: FxHashMap::default(),
                ready_dispatched: false,
                unreported_errors: Vec::new(),
            }),
            callbacks: Mutex::new(Callbacks::default()),
        });

        let query = Self { core, store };
        Self::activate_ranges(&query.core, &query.store, &ranges);
        Ok(query)
    }

    /// Subscribe to and initially scan each range. Per-range failures are
    /// surfaced through the error hook; the query stays live on the rest.
    /// Bails out as soon as the query is stopped.
    fn activate_ranges(
        core: &Arc<QueryCore>,
        store: &Arc<dyn DocumentStore>,
        ranges: &[QueryRange],
    ) {
        for range in ranges {
            if core.state.lock().stopped {
                return;
            }
            let listener = Arc::new(QueryRangeListener {
                core: Arc::downgrade(core),
                range: range.clone(),
            });
            match store.subscribe_range(&range.start, &range.end, listener) {
                Ok(id) => {
                    let mut state = core.state.lock();
                    if state.stopped {
                        drop(state);
                        if let Err(error) = store.unsubscribe(id) {
                            log::warn!(
                                "failed to unsubscribe [{}, {}): {error}",
                                range.start,
                                range.end
                            );
                        }
                        return;
                    }
                    state.subscriptions.push((range.clone(), id));
                }
                Err(error) => {
                    let mut state = core.state.lock();
                    state.queue_error(GeoWatchError::StoreUnavailable(format!(
                        "subscribe [{}, {}) failed: {error}",
                        range.start, range.end
                    )));
                    state.settle_range(range);
                    continue;
                }
            }

            match store.scan_range(&range.start, &range.end) {
                Ok(entries) => {
                    let mut state = core.state.lock();
                    for (key, value) in entries {
                        match LocationRecord::from_value(&value)
                            .and_then(|r| Ok((r.coordinate()?, r)))
                        {
                            Ok((coord, record)) => state.apply_update(&key, coord, record.geohash),
                            // Poisons this record only; the scan continues.
                            Err(error) => state.queue_error(error),
                        }
                    }
                    state.settle_range(range);
                }
                Err(error) => {
                    let mut state = core.state.lock();
                    state.queue_error(GeoWatchError::StoreUnavailable(format!(
                        "scan [{}, {}) failed: {error}",
                        range.start, range.end
                    )));
                    state.settle_range(range);
                }
            }
        }
        core.drain();
    }

    fn push_listener(&self, listener: Listener) {
        {
            let mut state = self.core.state.lock();
            if state.stopped {
                return;
            }
            state.pending.push_back(QueryEvent::Register(listener));
        }
        self.core.drain();
    }

    /// Notify when a key enters the circle. Current members are replayed to
    /// the new hook immediately.
    pub fn on_entered<F>(&self, f: F)
    where
        F: Fn(&str, Coordinate) + Send + Sync + 'static,
    {
        self.push_listener(Listener::Entered(Arc::new(f)));
    }

    /// Notify when a member leaves the circle or is removed from the store.
    pub fn on_exited<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.push_listener(Listener::Exited(Arc::new(f)));
    }

    /// Notify when a member changes coordinates but stays inside the circle.
    pub fn on_moved<F>(&self, f: F)
    where
        F: Fn(&str, Coordinate) + Send + Sync + 'static,
    {
        self.push_listener(Listener::Moved(Arc::new(f)));
    }

    /// Notify once the initial scans of all current ranges have completed.
    /// Re-armed when a center/radius update adds new ranges.
    pub fn on_ready<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.push_listener(Listener::Ready(Arc::new(f)));
    }

    /// Notify about per-record and per-range failures. Errors raised before
    /// the first error hook was attached are replayed to it.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&GeoWatchError) + Send + Sync + 'static,
    {
        self.push_listener(Listener::Error(Arc::new(f)));
    }

    /// Move the query circle.
    ///
    /// Ranges still covered keep their subscriptions, dropped ranges are torn
    /// down, new ranges are scanned fresh. Keys already tracked are
    /// re-validated against the new geometry in place rather than re-fetched.
    ///
    /// Returns before any resulting notification runs: teardown of dropped
    /// ranges, the scans of added ranges, and callback dispatch all proceed
    /// on a background thread.
    pub fn update_center_and_radius(&self, center: Coordinate, radius_km: f64) -> Result<()> {
        geom::validate_radius(radius_km)?;
        let radius_km = geom::cap_radius(radius_km);

        let (added, dropped, has_pending) = {
            let mut state = self.core.state.lock();
            if state.stopped {
                return Err(GeoWatchError::QueryStopped);
            }
            let new_ranges = ranges_for_circle(&center, radius_km, state.write_precision);

            let added: Vec<QueryRange> = new_ranges
                .iter()
                .filter(|r| !state.ranges.contains(r))
                .cloned()
                .collect();
            let (kept, dropped): (Vec<_>, Vec<_>) = state
                .subscriptions
                .drain(..)
                .partition(|(range, _)| new_ranges.contains(range));
            state.subscriptions = kept;
            state.ranges = new_ranges;
            state.center = center;
            state.radius_km = radius_km;

            // Re-validate every tracked key against the new geometry.
            let QueryState {
                ranges,
                tracked,
                pending,
                loading,
                ..
            } = &mut *state;
            loading.retain(|range| ranges.contains(range));
            let mut evicted = Vec::new();
            for (key, entry) in tracked.iter_mut() {
                if !ranges.iter().any(|r| r.contains(&entry.geohash)) {
                    evicted.push(key.clone());
                    continue;
                }
                let inside = distance_km(&center, &entry.coord) <= radius_km;
                match (entry.in_circle, inside) {
                    (true, false) => pending.push_back(QueryEvent::Exited { key: key.clone() }),
                    (false, true) => pending.push_back(QueryEvent::Entered {
                        key: key.clone(),
                        coord: entry.coord,
                    }),
                    _ => {}
                }
                entry.in_circle = inside;
            }
            for key in evicted {
                let entry = tracked.remove(&key).expect("key collected above");
                if entry.in_circle {
                    pending.push_back(QueryEvent::Exited { key });
                }
            }

            if !added.is_empty() {
                // Restart initial-load tracking for the new ranges only.
                state.ready_fired = false;
                state.ready_dispatched = false;
                state.loading.extend(added.iter().cloned());
            }

            log::debug!(
                "geo query moved to ({}, {}) radius {radius_km} km: {} added, {} dropped ranges",
                center.lat(),
                center.lng(),
                added.len(),
                dropped.len()
            );
            (added, dropped, !state.pending.is_empty())
        };

        if added.is_empty() && dropped.is_empty() && !has_pending {
            return Ok(());
        }

        // Teardown, fresh scans, and dispatch happen off this thread so no
        // caller hook ever runs inside the recomputation call.
        let core = Arc::clone(&self.core);
        let store = Arc::clone(&self.store);
        std::thread::spawn(move || {
            for (range, id) in dropped {
                if let Err(error) = store.unsubscribe(id) {
                    log::warn!("failed to unsubscribe [{}, {}): {error}", range.start, range.end);
                }
            }
            core.drain();
            Self::activate_ranges(&core, &store, &added);
        });
        Ok(())
    }

    /// Stop the query: unsubscribe every range listener, then discard the
    /// membership state. Idempotent; no callbacks fire afterwards.
    pub fn stop(&self) {
        let subscriptions = {
            let mut state = self.core.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            std::mem::take(&mut state.subscriptions)
        };

        for (range, id) in subscriptions {
            if let Err(error) = self.store.unsubscribe(id) {
                log::warn!("failed to unsubscribe [{}, {}): {error}", range.start, range.end);
            }
        }

        let mut state = self.core.state.lock();
        state.tracked.clear();
        state.pending.clear();
        state.loading.clear();
        state.dispatched_members.clear();
        *self.core.callbacks.lock() = Callbacks::default();
        log::debug!("geo query stopped");
    }

    /// Current query center.
    pub fn center(&self) -> Coordinate {
        self.core.state.lock().center
    }

    /// Current (capped) radius in kilometers.
    pub fn radius_km(&self) -> f64 {
        self.core.state.lock().radius_km
    }

    /// Snapshot of the current covering ranges.
    pub fn ranges(&self) -> Vec<QueryRange> {
        self.core.state.lock().ranges.to_vec()
    }

    /// Snapshot of the current members (keys inside the circle), sorted.
    pub fn members(&self) -> Vec<(String, Coordinate)> {
        let state = self.core.state.lock();
        let mut members: Vec<(String, Coordinate)> = state
            .tracked
            .iter()
            .filter(|(_, entry)| entry.in_circle)
            .map(|(key, entry)| (key.clone(), entry.coord))
            .collect();
        members.sort_by(|a, b| a.0.cmp(&b.0));
        members
    }

    /// Whether the initial scans for the current ranges have completed.
    pub fn is_ready(&self) -> bool {
        self.core.state.lock().ready_dispatched
    }
}

impl Drop for GeoQuery {
    fn drop(&mut self) {
        self.stop();
    }
}
