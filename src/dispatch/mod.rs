pub mod eligibility;
pub mod blast_lifecycle;
pub mod response_ledger;
pub mod assignment_arbiter;

pub use eligibility::{Candidate, DriverSuggestion, EligibilityCriteria, RosterEntry};
pub use blast_lifecycle::{BlastLifecycle, CancelOutcome, SendReport};
pub use response_ledger::ResponseLedger;
pub use assignment_arbiter::{AssignmentArbiter, ReconcileOutcome};

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::models::BlastStatus;

/// What a driver does with an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum DriverAction {
    View,
    Decline { reason: Option<String> },
    Accept,
}

/// The result of a driver response.
///
/// Losing a race is a normal outcome, not an error: drivers who get `AlreadyAssigned`, `BlastExpired` or
/// `BlastCancelled` are shown "no longer available".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ResponseOutcome {
    Viewed,
    Declined,
    Assigned { load_id: Uuid, driver_id: Uuid },
    AlreadyAssigned,
    BlastExpired,
    BlastCancelled,
    /// Repeated or late action that changed nothing.
    Unchanged,
}

impl ResponseOutcome {
    /// Maps a closed blast status to what a late responder is told.
    pub(crate) fn for_closed_blast(status: BlastStatus) -> Option<Self> {
        match status {
            BlastStatus::Accepted => Some(ResponseOutcome::AlreadyAssigned),
            BlastStatus::Expired => Some(ResponseOutcome::BlastExpired),
            BlastStatus::Cancelled => Some(ResponseOutcome::BlastCancelled),
            BlastStatus::Draft | BlastStatus::Sent => None,
        }
    }

    pub fn is_no_longer_available(&self) -> bool {
        matches!(
            self,
            ResponseOutcome::AlreadyAssigned | ResponseOutcome::BlastExpired | ResponseOutcome::BlastCancelled
        )
    }
}
