use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::config::GeofenceSettings;
use crate::errors::{DispatchError, DispatchResult};
use crate::geo::GeoPoint;
use crate::models::{DriverLocation, GeofenceEvent, GeofenceEventType, Load, LoadStatus};
use crate::repositories::DispatchStore;
use crate::state_management::{LoadStatusMachine, TransitionContext, TransitionOutcome};

/// Actor recorded on transitions the monitor triggers.
pub const GEOFENCE_ACTOR: &str = "geofence";

/// Which arrival a load in `status` is waiting for, if any.
///
/// Pickup is watched from `assigned`/`in_progress` until a pickup arrival has been recorded; delivery is
/// watched while `in_transit`.
pub fn watched_geofence(status: LoadStatus, pickup_recorded: bool) -> Option<GeofenceEventType> {
    match status {
        LoadStatus::Assigned | LoadStatus::InProgress if !pickup_recorded => Some(GeofenceEventType::ArrivedPickup),
        LoadStatus::InTransit => Some(GeofenceEventType::ArrivedDelivery),
        _ => None,
    }
}

/// Classifies one sample. Samples whose accuracy radius is unknown or worse than the configured bound
/// never count as an arrival.
pub fn evaluate_arrival(
    status: LoadStatus,
    pickup_recorded: bool,
    distance_meters: f64,
    accuracy_meters: f64,
    settings: &GeofenceSettings,
) -> Option<GeofenceEventType> {
    if !accuracy_meters.is_finite() || accuracy_meters > settings.max_accuracy_meters {
        return None;
    }
    let watched = watched_geofence(status, pickup_recorded)?;
    (distance_meters <= settings.arrival_threshold_meters).then_some(watched)
}

/// Turns GPS pings into arrival events and load transitions.
pub struct GeofenceMonitor {
    store: Arc<DispatchStore>,
    status_machine: Arc<LoadStatusMachine>,
    settings: Arc<GeofenceSettings>,
}

impl GeofenceMonitor {
    pub fn new(store: Arc<DispatchStore>, status_machine: Arc<LoadStatusMachine>, settings: Arc<GeofenceSettings>) -> Self {
        Self { store, status_machine, settings }
    }

    /// Evaluates a sample against its driver's active load.
    ///
    /// Returns the event when this sample produced a new arrival. Only the first qualifying sample per
    /// (load, event type) emits; later ones return `None`.
    pub fn process_location(&self, location: &DriverLocation, now: DateTime<Utc>) -> DispatchResult<Option<GeofenceEvent>> {
        let Some(load_id) = location.active_load_id else {
            return Ok(None);
        };
        let load = self.store.get_load(load_id)?;
        if load.driver_id != Some(location.driver_id) {
            debug!("Driver {} is not the driver of {}, ignoring ping", location.driver_id, load);
            return Ok(None);
        }

        let pickup_recorded = self.store.has_geofence_event(load.id, GeofenceEventType::ArrivedPickup);
        let Some(watched) = watched_geofence(load.status, pickup_recorded) else {
            return Ok(None);
        };
        let distance_meters = location.position.distance_meters(&self.target_of(&load, watched));

        let Some(event_type) = evaluate_arrival(
            load.status,
            pickup_recorded,
            distance_meters,
            location.accuracy_meters,
            &self.settings,
        ) else {
            if location.accuracy_meters > self.settings.max_accuracy_meters {
                debug!(
                    "Ignoring ping from driver {} with accuracy {:.0}m",
                    location.driver_id, location.accuracy_meters
                );
            }
            return Ok(None);
        };

        let event = GeofenceEvent {
            id: Uuid::new_v4(),
            load_id: load.id,
            driver_id: location.driver_id,
            event_type,
            position: location.position,
            distance_meters,
            accuracy_meters: location.accuracy_meters,
            triggered_at: now,
        };
        if !self.store.record_geofence_event(event.clone()) {
            return Ok(None);
        }
        info!(
            "Geofence {} for {} by driver {} at {:.0}m",
            event_type, load, location.driver_id, distance_meters
        );

        let ctx = TransitionContext::new(GEOFENCE_ACTOR)
            .reason(format!("{} within {:.0}m", event_type, distance_meters))
            .location(Some(location.position));
        match self.status_machine.transition(load.id, event_type.target_status(), ctx) {
            Ok(TransitionOutcome::Applied(_)) | Ok(TransitionOutcome::Unchanged(_)) => {}
            Ok(TransitionOutcome::Skipped(status)) => {
                debug!("Load {} moved to {} before the geofence transition", load.id, status);
            }
            Err(DispatchError::InvalidTransition { from, to }) => {
                warn!("Geofence arrival for load {} could not move it {} -> {}", load.id, from, to);
            }
            Err(e) => return Err(e),
        }
        Ok(Some(event))
    }

    fn target_of(&self, load: &Load, event_type: GeofenceEventType) -> GeoPoint {
        match event_type {
            GeofenceEventType::ArrivedPickup => load.pickup,
            GeofenceEventType::ArrivedDelivery => load.delivery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> GeofenceSettings {
        GeofenceSettings { arrival_threshold_meters: 150.0, max_accuracy_meters: 50.0 }
    }

    #[test]
    fn pickup_is_watched_until_recorded() {
        assert_eq!(watched_geofence(LoadStatus::Assigned, false), Some(GeofenceEventType::ArrivedPickup));
        assert_eq!(watched_geofence(LoadStatus::InProgress, false), Some(GeofenceEventType::ArrivedPickup));
        assert_eq!(watched_geofence(LoadStatus::Assigned, true), None);
        assert_eq!(watched_geofence(LoadStatus::InTransit, true), Some(GeofenceEventType::ArrivedDelivery));
        assert_eq!(watched_geofence(LoadStatus::Blasted, false), None);
        assert_eq!(watched_geofence(LoadStatus::Delivered, true), None);
    }

    #[test]
    fn low_accuracy_samples_never_arrive() {
        let s = settings();
        assert_eq!(evaluate_arrival(LoadStatus::Assigned, false, 10.0, 400.0, &s), None);
        assert_eq!(evaluate_arrival(LoadStatus::Assigned, false, 10.0, f64::NAN, &s), None);
        assert_eq!(
            evaluate_arrival(LoadStatus::Assigned, false, 10.0, 20.0, &s),
            Some(GeofenceEventType::ArrivedPickup)
        );
    }

    #[test]
    fn threshold_is_inclusive() {
        let s = settings();
        assert_eq!(
            evaluate_arrival(LoadStatus::InTransit, true, 150.0, 5.0, &s),
            Some(GeofenceEventType::ArrivedDelivery)
        );
        assert_eq!(evaluate_arrival(LoadStatus::InTransit, true, 150.1, 5.0, &s), None);
    }
}
