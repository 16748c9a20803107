//! # Dispatch Event Definitions

//! Append-only audit records produced by the engine: status changes of a load and geofence
//! detections from driver GPS. Neither is ever mutated after it is written.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::geo::GeoPoint;
use crate::models::LoadStatus;

/// One row of a load's status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadStatusEvent {
    pub id: Uuid,
    pub load_id: Uuid,
    pub previous_status: LoadStatus,
    pub new_status: LoadStatus,
    /// Who asked for the change: a dispatcher, a driver id, `geofence` or `system`.
    pub changed_by: String,
    pub reason: Option<String>,
    pub location: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
}

/// The kind of arrival a geofence detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceEventType {
    #[display("arrived_pickup")]
    ArrivedPickup,
    #[display("arrived_delivery")]
    ArrivedDelivery,
}

impl GeofenceEventType {
    /// The load status the arrival drives the load into.
    pub fn target_status(&self) -> LoadStatus {
        match self {
            GeofenceEventType::ArrivedPickup => LoadStatus::ArrivedPickup,
            GeofenceEventType::ArrivedDelivery => LoadStatus::ArrivedDelivery,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceEvent {
    pub id: Uuid,
    pub load_id: Uuid,
    pub driver_id: Uuid,
    pub event_type: GeofenceEventType,
    pub position: GeoPoint,
    /// Distance to the geofence center when the arrival fired.
    pub distance_meters: f64,
    pub accuracy_meters: f64,
    pub triggered_at: DateTime<Utc>,
}
