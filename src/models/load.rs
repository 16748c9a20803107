//! # Load Representation

//! A load is one shipment job. Dispatchers create it, the blast engine offers it to drivers, and the
//! `LoadStatusMachine` owns its `status`/`driver_id` pair from then on.

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::geo::GeoPoint;

/// Delivery lifecycle status of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    /// Created and waiting for a driver.
    #[display("pending")]
    Pending,
    /// Offered to drivers through an active blast.
    #[display("blasted")]
    Blasted,
    /// A driver owns the load.
    #[display("assigned")]
    Assigned,
    /// The driver started working the load.
    #[display("in_progress")]
    InProgress,
    /// The driver reached the pickup geofence.
    #[display("arrived_pickup")]
    ArrivedPickup,
    /// Freight is on board and heading to delivery.
    #[display("in_transit")]
    InTransit,
    /// The driver reached the delivery geofence.
    #[display("arrived_delivery")]
    ArrivedDelivery,
    /// Freight handed over.
    #[display("delivered")]
    Delivered,
    /// Paperwork closed.
    #[display("completed")]
    Completed,
    #[display("cancelled")]
    Cancelled,
    #[display("failed")]
    Failed,
}

impl LoadStatus {
    pub const ALL: [LoadStatus; 11] = [
        LoadStatus::Pending,
        LoadStatus::Blasted,
        LoadStatus::Assigned,
        LoadStatus::InProgress,
        LoadStatus::ArrivedPickup,
        LoadStatus::InTransit,
        LoadStatus::ArrivedDelivery,
        LoadStatus::Delivered,
        LoadStatus::Completed,
        LoadStatus::Cancelled,
        LoadStatus::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadStatus::Completed | LoadStatus::Cancelled | LoadStatus::Failed)
    }

    /// Statuses in which the load must carry a `driver_id`.
    pub fn requires_driver(&self) -> bool {
        matches!(
            self,
            LoadStatus::Assigned
                | LoadStatus::InProgress
                | LoadStatus::ArrivedPickup
                | LoadStatus::InTransit
                | LoadStatus::ArrivedDelivery
                | LoadStatus::Delivered
                | LoadStatus::Completed
        )
    }

    /// The driver is physically working this load and cannot take another.
    pub fn is_en_route(&self) -> bool {
        matches!(
            self,
            LoadStatus::Assigned
                | LoadStatus::InProgress
                | LoadStatus::ArrivedPickup
                | LoadStatus::InTransit
                | LoadStatus::ArrivedDelivery
        )
    }

    /// Only pending loads (including ones reopened from cancelled/failed) can be offered.
    pub fn is_blastable(&self) -> bool {
        matches!(self, LoadStatus::Pending)
    }

    /// Edges that belong to the blast lifecycle. A `blasted` load always has exactly one open blast, so
    /// only sending, expiring or cancelling that blast may enter or leave `blasted` through `pending`.
    pub fn is_blast_edge(&self, next: LoadStatus) -> bool {
        matches!((self, next), (LoadStatus::Pending, LoadStatus::Blasted) | (LoadStatus::Blasted, LoadStatus::Pending))
    }

    /// The legal forward edges of the status machine.
    ///
    /// `cancelled` and `failed` are reachable from every non-terminal status and both reopen to `pending`.
    pub fn can_transition_to(&self, next: LoadStatus) -> bool {
        use LoadStatus::*;

        if !self.is_terminal() && matches!(next, Cancelled | Failed) {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Blasted)
                | (Pending, Assigned)
                | (Blasted, Assigned)
                | (Blasted, Pending)
                | (Assigned, InProgress)
                | (Assigned, ArrivedPickup)
                | (InProgress, ArrivedPickup)
                | (ArrivedPickup, InTransit)
                | (InTransit, ArrivedDelivery)
                | (ArrivedDelivery, Delivered)
                | (Delivered, Completed)
                | (Cancelled, Pending)
                | (Failed, Pending)
        )
    }
}

impl FromStr for LoadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LoadStatus::ALL
            .iter()
            .copied()
            .find(|status| status.to_string() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("Unknown load status: {}", s))
    }
}

/// A shipment job tracked by the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Load {
    pub id: Uuid,
    /// Human facing reference, e.g. the broker's load number.
    pub reference: String,
    /// The dispatch hub that owns the load.
    pub hub: String,
    pub status: LoadStatus,
    /// The owning driver, set by assignment and cleared on reopen.
    pub driver_id: Option<Uuid>,
    pub pickup: GeoPoint,
    pub delivery: GeoPoint,
    /// Vehicle class the load needs, if any.
    pub required_vehicle_type: Option<String>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Load {
    pub fn from_new(new_load: NewLoad, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference: new_load.reference,
            hub: new_load.hub,
            status: LoadStatus::Pending,
            driver_id: None,
            pickup: new_load.pickup,
            delivery: new_load.delivery,
            required_vehicle_type: new_load.required_vehicle_type,
            sla_deadline: new_load.sla_deadline,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `now` is past the SLA deadline. Reported only, never enforced.
    pub fn is_past_sla(&self, now: DateTime<Utc>) -> bool {
        self.sla_deadline.map(|deadline| now > deadline).unwrap_or(false)
    }
}

impl fmt::Display for Load {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Load {} ({}) [{}]", self.reference, self.id, self.status)
    }
}

/// The fields a dispatcher supplies when creating a load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLoad {
    pub reference: String,
    pub hub: String,
    pub pickup: GeoPoint,
    pub delivery: GeoPoint,
    pub required_vehicle_type: Option<String>,
    pub sla_deadline: Option<DateTime<Utc>>,
}
