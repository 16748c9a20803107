//! # Driver Representation

//! Drivers are owned by fleet administration and consumed read-only here, except for the GPS samples
//! their devices push through `update_driver_location`.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::geo::GeoPoint;

/// Availability of a driver as reported by fleet management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    #[display("active")]
    Active,
    #[display("inactive")]
    Inactive,
    #[display("on_break")]
    OnBreak,
    #[display("suspended")]
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub hub: String,
    pub status: DriverStatus,
    pub vehicle_type: Option<String>,
    /// Identity used by the push transport.
    pub push_recipient: String,
    /// When the current shift began; earlier means idle longer.
    pub shift_started_at: Option<DateTime<Utc>>,
}

impl Driver {
    /// Whether the driver can haul a load that requires `required` vehicle class.
    pub fn can_haul(&self, required: Option<&str>) -> bool {
        match required {
            None => true,
            Some(required) => self
                .vehicle_type
                .as_deref()
                .map(|vehicle| vehicle.eq_ignore_ascii_case(required))
                .unwrap_or(false),
        }
    }
}

/// One GPS sample from a driver's device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverLocation {
    pub driver_id: Uuid,
    pub position: GeoPoint,
    /// Horizontal accuracy radius in meters.
    pub accuracy_meters: f64,
    pub speed_mph: Option<f64>,
    pub heading_degrees: Option<f64>,
    /// The load the driver is working when the sample was taken.
    pub active_load_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
}

impl DriverLocation {
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.recorded_at).num_seconds()
    }
}
