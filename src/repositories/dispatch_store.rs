//! # Dispatch Record Store
//!
//! In-memory tables for loads, drivers, blasts and their audit trails.
//!
//! Rows live in `DashMap`s. Every contended write goes through one of the `update_*_with` methods, which run
//! the caller's closure while the row's shard guard is held, so the "only if still in the expected state"
//! check and the write it guards happen as one step. Closures must not call back into the same table.
//!
//! Lock order when two tables are involved: `active_blasts` before `blasts`, and `loads` before the event
//! logs. No code path holds a `blasts` guard while touching `active_blasts`.

use std::collections::{HashSet, VecDeque};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;
use crate::errors::{DispatchError, DispatchResult};
use crate::models::{
    BlastResponse, DispatchBlast, Driver, DriverLocation, GeofenceEvent, GeofenceEventType, Load,
    LoadStatusEvent,
};

pub struct DispatchStore {
    loads: DashMap<Uuid, Load>,
    drivers: DashMap<Uuid, Driver>,
    /// Latest sample per driver, overwritten on every ping.
    locations: DashMap<Uuid, DriverLocation>,
    /// Appended samples per driver, capped at `history_limit`.
    location_history: DashMap<Uuid, VecDeque<DriverLocation>>,
    history_limit: usize,
    blasts: DashMap<Uuid, DispatchBlast>,
    /// load id -> its single non-terminal blast
    active_blasts: DashMap<Uuid, Uuid>,
    /// (blast id, driver id) -> response
    responses: DashMap<(Uuid, Uuid), BlastResponse>,
    status_events: RwLock<Vec<LoadStatusEvent>>,
    geofence_events: RwLock<Vec<GeofenceEvent>>,
    /// Debounce index: at most one geofence event per (load, event type).
    geofence_index: DashMap<(Uuid, GeofenceEventType), Uuid>,
}

impl DispatchStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            loads: DashMap::new(),
            drivers: DashMap::new(),
            locations: DashMap::new(),
            location_history: DashMap::new(),
            history_limit: history_limit.max(1),
            blasts: DashMap::new(),
            active_blasts: DashMap::new(),
            responses: DashMap::new(),
            status_events: RwLock::new(Vec::new()),
            geofence_events: RwLock::new(Vec::new()),
            geofence_index: DashMap::new(),
        }
    }

    // ---- loads ----

    pub fn insert_load(&self, load: Load) {
        self.loads.insert(load.id, load);
    }

    pub fn get_load(&self, load_id: Uuid) -> DispatchResult<Load> {
        self.loads
            .get(&load_id)
            .map(|load| load.clone())
            .ok_or(DispatchError::LoadNotFound(load_id))
    }

    /// Runs `f` against the load row while holding its guard.
    pub fn update_load_with<R>(&self, load_id: Uuid, f: impl FnOnce(&mut Load) -> R) -> DispatchResult<R> {
        let mut load = self.loads.get_mut(&load_id).ok_or(DispatchError::LoadNotFound(load_id))?;
        Ok(f(load.value_mut()))
    }

    /// Drivers currently working a load, who must not be offered another one.
    pub fn busy_driver_ids(&self) -> HashSet<Uuid> {
        self.loads
            .iter()
            .filter(|load| load.status.is_en_route())
            .filter_map(|load| load.driver_id)
            .collect()
    }

    /// The load a driver is currently working, if any.
    pub fn active_load_for_driver(&self, driver_id: Uuid) -> Option<Uuid> {
        self.loads
            .iter()
            .find(|load| load.driver_id == Some(driver_id) && load.status.is_en_route())
            .map(|load| load.id)
    }

    // ---- drivers and locations ----

    pub fn upsert_driver(&self, driver: Driver) {
        self.drivers.insert(driver.id, driver);
    }

    pub fn get_driver(&self, driver_id: Uuid) -> DispatchResult<Driver> {
        self.drivers
            .get(&driver_id)
            .map(|driver| driver.clone())
            .ok_or(DispatchError::DriverNotFound(driver_id))
    }

    pub fn push_recipient(&self, driver_id: Uuid) -> Option<String> {
        self.drivers.get(&driver_id).map(|driver| driver.push_recipient.clone())
    }

    /// Snapshot of every driver with their latest location.
    pub fn roster(&self) -> Vec<(Driver, Option<DriverLocation>)> {
        self.drivers
            .iter()
            .map(|driver| {
                let location = self.locations.get(driver.key()).map(|l| l.clone());
                (driver.clone(), location)
            })
            .collect()
    }

    /// Overwrites the current position and appends to the bounded history.
    pub fn record_location(&self, location: DriverLocation) {
        let driver_id = location.driver_id;
        {
            let mut history = self.location_history.entry(driver_id).or_default();
            history.push_back(location.clone());
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }
        self.locations.insert(driver_id, location);
    }

    pub fn location_history(&self, driver_id: Uuid) -> Vec<DriverLocation> {
        self.location_history
            .get(&driver_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ---- blasts ----

    pub fn get_blast(&self, blast_id: Uuid) -> DispatchResult<DispatchBlast> {
        self.blasts
            .get(&blast_id)
            .map(|blast| blast.clone())
            .ok_or(DispatchError::BlastNotFound(blast_id))
    }

    /// Runs `f` against the blast row while holding its guard.
    pub fn update_blast_with<R>(&self, blast_id: Uuid, f: impl FnOnce(&mut DispatchBlast) -> R) -> DispatchResult<R> {
        let mut blast = self.blasts.get_mut(&blast_id).ok_or(DispatchError::BlastNotFound(blast_id))?;
        Ok(f(blast.value_mut()))
    }

    pub fn blasts_matching(&self, predicate: impl Fn(&DispatchBlast) -> bool) -> Vec<DispatchBlast> {
        self.blasts
            .iter()
            .filter(|blast| predicate(blast))
            .map(|blast| blast.clone())
            .collect()
    }

    /// The non-terminal blast of a load, if one exists.
    pub fn active_blast_for_load(&self, load_id: Uuid) -> Option<Uuid> {
        self.active_blasts.get(&load_id).map(|id| *id)
    }

    /// Registers `blast` as the load's active blast and stores it.
    ///
    /// Fails with the id of the blast already holding the slot. A slot left behind by a blast that is
    /// already terminal is taken over.
    pub fn claim_active_blast(&self, blast: DispatchBlast) -> Result<(), Uuid> {
        match self.active_blasts.entry(blast.load_id) {
            Entry::Occupied(mut slot) => {
                let holder = *slot.get();
                let holder_open = self
                    .blasts
                    .get(&holder)
                    .map(|b| !b.status.is_terminal())
                    .unwrap_or(false);
                if holder_open {
                    return Err(holder);
                }
                warn!("Replacing stale active blast {} of load {}", holder, blast.load_id);
                slot.insert(blast.id);
                self.blasts.insert(blast.id, blast);
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(blast.id);
                self.blasts.insert(blast.id, blast);
                Ok(())
            }
        }
    }

    /// Frees the load's active slot if it is still held by `blast_id`.
    pub fn release_active_blast(&self, load_id: Uuid, blast_id: Uuid) -> bool {
        let released = self
            .active_blasts
            .remove_if(&load_id, |_, holder| *holder == blast_id)
            .is_some();
        if released {
            debug!("Released active blast {} of load {}", blast_id, load_id);
        }
        released
    }

    // ---- responses ----

    /// Inserts the response unless the driver already has one for this blast.
    pub fn insert_response_if_absent(&self, response: BlastResponse) -> bool {
        match self.responses.entry((response.blast_id, response.driver_id)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(response);
                true
            }
        }
    }

    pub fn get_response(&self, blast_id: Uuid, driver_id: Uuid) -> DispatchResult<BlastResponse> {
        self.responses
            .get(&(blast_id, driver_id))
            .map(|r| r.clone())
            .ok_or(DispatchError::DriverNotNotified { blast_id, driver_id })
    }

    /// Runs `f` against one driver's response while holding its guard.
    pub fn update_response_with<R>(
        &self,
        blast_id: Uuid,
        driver_id: Uuid,
        f: impl FnOnce(&mut BlastResponse) -> R,
    ) -> DispatchResult<R> {
        let mut response = self
            .responses
            .get_mut(&(blast_id, driver_id))
            .ok_or(DispatchError::DriverNotNotified { blast_id, driver_id })?;
        Ok(f(response.value_mut()))
    }

    pub fn responses_for_blast(&self, blast_id: Uuid) -> Vec<BlastResponse> {
        let mut responses: Vec<BlastResponse> = self
            .responses
            .iter()
            .filter(|r| r.blast_id == blast_id)
            .map(|r| r.clone())
            .collect();
        responses.sort_by(|a, b| a.distance_miles.total_cmp(&b.distance_miles));
        responses
    }

    pub fn responses_for_driver(&self, driver_id: Uuid) -> Vec<BlastResponse> {
        self.responses
            .iter()
            .filter(|r| r.driver_id == driver_id)
            .map(|r| r.clone())
            .collect()
    }

    // ---- audit logs ----

    pub fn append_status_event(&self, event: LoadStatusEvent) {
        self.status_events.write().push(event);
    }

    pub fn status_events_for_load(&self, load_id: Uuid) -> Vec<LoadStatusEvent> {
        self.status_events
            .read()
            .iter()
            .filter(|e| e.load_id == load_id)
            .cloned()
            .collect()
    }

    /// Appends the event unless one already exists for its (load, event type).
    pub fn record_geofence_event(&self, event: GeofenceEvent) -> bool {
        match self.geofence_index.entry((event.load_id, event.event_type)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(event.id);
                self.geofence_events.write().push(event);
                true
            }
        }
    }

    pub fn has_geofence_event(&self, load_id: Uuid, event_type: GeofenceEventType) -> bool {
        self.geofence_index.contains_key(&(load_id, event_type))
    }

    /// Forgets the debounce entries of a load so a reopened load can arrive again.
    pub fn clear_geofence_index(&self, load_id: Uuid) {
        self.geofence_index.retain(|(id, _), _| *id != load_id);
    }

    pub fn geofence_events_for_load(&self, load_id: Uuid) -> Vec<GeofenceEvent> {
        self.geofence_events
            .read()
            .iter()
            .filter(|e| e.load_id == load_id)
            .cloned()
            .collect()
    }
}
