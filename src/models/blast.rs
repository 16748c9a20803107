//! # Dispatch Blast Records
//!
//! A `DispatchBlast` is one time-bounded offer cycle for a single load, and a `BlastResponse` is the
//! per-driver row created for every driver the blast notified.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Offer cycle status. Every status except `draft` and `sent` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum BlastStatus {
    #[display("draft")]
    Draft,
    #[display("sent")]
    Sent,
    #[display("accepted")]
    Accepted,
    #[display("expired")]
    Expired,
    #[display("cancelled")]
    Cancelled,
}

impl BlastStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BlastStatus::Accepted | BlastStatus::Expired | BlastStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchBlast {
    pub id: Uuid,
    pub load_id: Uuid,
    pub radius_miles: f64,
    pub expires_at: DateTime<Utc>,
    pub status: BlastStatus,
    /// Optional note from the dispatcher shown with the offer.
    pub message: Option<String>,
    pub created_by: String,
    pub drivers_notified: u32,
    pub drivers_viewed: u32,
    pub drivers_declined: u32,
    pub accepted_by: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    /// When the blast reached a terminal status.
    pub closed_at: Option<DateTime<Utc>>,
}

impl DispatchBlast {
    pub fn draft(
        load_id: Uuid,
        radius_miles: f64,
        expires_at: DateTime<Utc>,
        message: Option<String>,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            load_id,
            radius_miles,
            expires_at,
            status: BlastStatus::Draft,
            message,
            created_by: created_by.to_string(),
            drivers_notified: 0,
            drivers_viewed: 0,
            drivers_declined: 0,
            accepted_by: None,
            accepted_at: None,
            cancel_reason: None,
            created_at: now,
            sent_at: None,
            closed_at: None,
        }
    }

    /// Still open for responses at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == BlastStatus::Sent && self.accepted_by.is_none() && self.expires_at > now
    }
}

/// A driver's standing on one blast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    #[display("notified")]
    Notified,
    #[display("viewed")]
    Viewed,
    #[display("accepted")]
    Accepted,
    #[display("declined")]
    Declined,
    /// Another driver won the blast while this response was still open.
    #[display("expired_lost")]
    ExpiredLost,
}

impl ResponseStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ResponseStatus::Notified | ResponseStatus::Viewed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastResponse {
    pub blast_id: Uuid,
    pub driver_id: Uuid,
    pub status: ResponseStatus,
    /// Distance to pickup when the driver was notified.
    pub distance_miles: f64,
    pub notified_at: DateTime<Utc>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub response_time_ms: Option<i64>,
    pub decline_reason: Option<String>,
}

impl BlastResponse {
    pub fn notified(blast_id: Uuid, driver_id: Uuid, distance_miles: f64, now: DateTime<Utc>) -> Self {
        Self {
            blast_id,
            driver_id,
            status: ResponseStatus::Notified,
            distance_miles,
            notified_at: now,
            viewed_at: None,
            responded_at: None,
            response_time_ms: None,
            decline_reason: None,
        }
    }

    /// Records the final answer and how long the driver took to give it.
    pub fn close(&mut self, status: ResponseStatus, now: DateTime<Utc>) {
        self.status = status;
        self.responded_at = Some(now);
        self.response_time_ms = Some(now.signed_duration_since(self.notified_at).num_milliseconds());
    }
}
