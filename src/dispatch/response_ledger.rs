use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;
use crate::dispatch::ResponseOutcome;
use crate::errors::{DispatchError, DispatchResult};
use crate::models::{DispatchBlast, ResponseStatus};
use crate::repositories::DispatchStore;

/// Per-driver bookkeeping of a blast: views and declines.
///
/// Each operation touches one driver's response row plus a counter on the blast, so drivers never
/// contend with each other here. Acceptance lives in `AssignmentArbiter`.
pub struct ResponseLedger {
    store: Arc<DispatchStore>,
}

impl ResponseLedger {
    pub fn new(store: Arc<DispatchStore>) -> Self {
        Self { store }
    }

    /// `notified -> viewed`. Idempotent, and a no-op once the blast is closed.
    pub fn mark_viewed(&self, blast_id: Uuid, driver_id: Uuid, now: DateTime<Utc>) -> DispatchResult<ResponseOutcome> {
        let blast = self.store.get_blast(blast_id)?;
        if blast.status.is_terminal() {
            self.store.get_response(blast_id, driver_id)?;
            return Ok(ResponseOutcome::Unchanged);
        }

        let first_view = self.store.update_response_with(blast_id, driver_id, |r| {
            if r.status == ResponseStatus::Notified {
                r.status = ResponseStatus::Viewed;
                r.viewed_at = Some(now);
                true
            } else {
                false
            }
        })?;

        if !first_view {
            return Ok(ResponseOutcome::Unchanged);
        }
        self.bump_counter(blast_id, |b| b.drivers_viewed += 1)?;
        debug!("Driver {} viewed blast {}", driver_id, blast_id);
        Ok(ResponseOutcome::Viewed)
    }

    /// `notified|viewed -> declined`. Leaves every other driver's response untouched.
    pub fn decline(
        &self,
        blast_id: Uuid,
        driver_id: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> DispatchResult<ResponseOutcome> {
        let blast = self.store.get_blast(blast_id)?;
        let current = self.store.get_response(blast_id, driver_id)?;
        if current.status == ResponseStatus::Declined {
            return Ok(ResponseOutcome::Unchanged);
        }
        if let Some(closed) = ResponseOutcome::for_closed_blast(blast.status) {
            return Ok(closed);
        }

        let declined = self.store.update_response_with(blast_id, driver_id, |r| {
            if r.status.is_open() {
                r.close(ResponseStatus::Declined, now);
                r.decline_reason = reason.clone();
                Ok(true)
            } else if r.status == ResponseStatus::Declined {
                Ok(false)
            } else {
                Err(r.status)
            }
        })?;

        match declined {
            Ok(true) => {
                self.bump_counter(blast_id, |b| b.drivers_declined += 1)?;
                info!(
                    "Driver {} declined blast {} ({})",
                    driver_id, blast_id, reason.as_deref().unwrap_or("no reason")
                );
                Ok(ResponseOutcome::Declined)
            }
            Ok(false) => Ok(ResponseOutcome::Unchanged),
            Err(status) => Err(DispatchError::ResponseClosed { blast_id, driver_id, status }),
        }
    }

    /// Counters only move while the blast is open; a terminal blast keeps what it had.
    fn bump_counter(&self, blast_id: Uuid, bump: impl FnOnce(&mut DispatchBlast)) -> DispatchResult<()> {
        self.store.update_blast_with(blast_id, |b| {
            if !b.status.is_terminal() {
                bump(b);
            }
        })
    }
}
