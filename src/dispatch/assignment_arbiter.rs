//! # Assignment Arbiter
//!
//! Awards a blast to exactly one driver.
//!
//! The award is a single conditional write on the blast row: `status = accepted, accepted_by = driver`
//! only while `status = sent` and `accepted_by` is empty. Whoever commits that write wins; every other
//! accept, and any sweep or cancel that arrives later, finds the predicate false and backs off. The load
//! handoff that follows is gated by its own "still unassigned" predicate and can be re-run at any time
//! through `reconcile`.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::alerting::{Notification, NotificationDispatcher};
use crate::config::NotificationSettings;
use crate::dispatch::ResponseOutcome;
use crate::errors::{DispatchError, DispatchResult};
use crate::models::{BlastStatus, DispatchBlast, LoadStatus, ResponseStatus};
use crate::repositories::DispatchStore;
use crate::state_management::{LoadStatusMachine, TransitionContext, TransitionOutcome};

/// What `reconcile` found.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Load already belongs to the winner.
    Consistent,
    /// The handoff was missing and has now been applied.
    Repaired,
    /// The load is no longer waiting for this winner (closed, or reopened after the handoff); nothing to do.
    LoadClosed,
}

enum Award {
    Won(DispatchBlast),
    Lost(BlastStatus),
}

pub struct AssignmentArbiter {
    store: Arc<DispatchStore>,
    status_machine: Arc<LoadStatusMachine>,
    notifier: NotificationDispatcher,
    settings: Arc<NotificationSettings>,
}

impl AssignmentArbiter {
    pub fn new(
        store: Arc<DispatchStore>,
        status_machine: Arc<LoadStatusMachine>,
        notifier: NotificationDispatcher,
        settings: Arc<NotificationSettings>,
    ) -> Self {
        Self { store, status_machine, notifier, settings }
    }

    /// A driver's accept. Returns `Assigned` for the single winner and a "no longer available" outcome
    /// for everyone else.
    pub fn accept(&self, blast_id: Uuid, driver_id: Uuid, now: DateTime<Utc>) -> DispatchResult<ResponseOutcome> {
        let response = self.store.get_response(blast_id, driver_id)?;
        match response.status {
            ResponseStatus::Declined => {
                return Err(DispatchError::ResponseClosed { blast_id, driver_id, status: response.status });
            }
            ResponseStatus::ExpiredLost => {
                let status = self.store.get_blast(blast_id)?.status;
                return Ok(ResponseOutcome::for_closed_blast(status).unwrap_or(ResponseOutcome::AlreadyAssigned));
            }
            ResponseStatus::Accepted => {
                let blast = self.store.get_blast(blast_id)?;
                self.reconcile(blast_id)?;
                return Ok(ResponseOutcome::Assigned { load_id: blast.load_id, driver_id });
            }
            ResponseStatus::Notified | ResponseStatus::Viewed => {}
        }

        let award = self.store.update_blast_with(blast_id, |b| {
            if b.status == BlastStatus::Sent && b.accepted_by.is_none() {
                b.status = BlastStatus::Accepted;
                b.accepted_by = Some(driver_id);
                b.accepted_at = Some(now);
                b.closed_at = Some(now);
                Award::Won(b.clone())
            } else {
                Award::Lost(b.status)
            }
        })?;

        let blast = match award {
            Award::Won(blast) => blast,
            Award::Lost(status) => {
                debug!("Driver {} lost blast {} ({})", driver_id, blast_id, status);
                return match ResponseOutcome::for_closed_blast(status) {
                    Some(outcome) => Ok(outcome),
                    None => Err(DispatchError::InvalidBlastState { blast_id, status }),
                };
            }
        };

        info!("Driver {} won blast {} for load {}", driver_id, blast_id, blast.load_id);
        self.store.release_active_blast(blast.load_id, blast_id);
        let losers = self.settle_responses(&blast, driver_id, now)?;

        match self.hand_off(&blast, driver_id) {
            Ok(_) => {}
            Err(DispatchError::InvalidTransition { from, .. }) if from.is_terminal() => {
                self.void_award(&blast, driver_id, &format!("load {} before handoff", from), now)?;
                return Ok(ResponseOutcome::BlastCancelled);
            }
            Err(DispatchError::LoadAlreadyAssigned { driver_id: owner, .. }) => {
                self.void_award(&blast, driver_id, &format!("load taken by driver {}", owner), now)?;
                return Ok(ResponseOutcome::AlreadyAssigned);
            }
            Err(e) => {
                error!(
                    "Blast {} awarded to {} but load {} handoff failed: {}. It will be reconciled.",
                    blast_id, driver_id, blast.load_id, e
                );
            }
        }

        self.notify_outcome(&blast, driver_id, &losers);
        Ok(ResponseOutcome::Assigned { load_id: blast.load_id, driver_id })
    }

    /// Re-runs the post-award steps for an accepted blast. Safe to call any number of times.
    pub fn reconcile(&self, blast_id: Uuid) -> DispatchResult<ReconcileOutcome> {
        let blast = self.store.get_blast(blast_id)?;
        let winner = match (blast.status, blast.accepted_by) {
            (BlastStatus::Accepted, Some(winner)) => winner,
            (status, _) => return Err(DispatchError::InvalidBlastState { blast_id, status }),
        };

        self.store.release_active_blast(blast.load_id, blast_id);
        self.settle_responses(&blast, winner, Utc::now())?;

        let load = self.store.get_load(blast.load_id)?;
        if load.driver_id == Some(winner) && load.status.requires_driver() {
            return Ok(ReconcileOutcome::Consistent);
        }
        if !Self::awaiting_handoff(load.status, load.driver_id) {
            warn!("Blast {} was won by {} but {} has moved on", blast_id, winner, load);
            return Ok(ReconcileOutcome::LoadClosed);
        }

        match self.hand_off(&blast, winner)? {
            TransitionOutcome::Applied(_) => {
                info!("Reconciled blast {}: load {} assigned to {}", blast_id, blast.load_id, winner);
                Ok(ReconcileOutcome::Repaired)
            }
            _ => Ok(ReconcileOutcome::Consistent),
        }
    }

    /// Whether the blast's load still needs the post-award handoff.
    pub fn needs_reconcile(&self, blast: &DispatchBlast) -> bool {
        match (blast.status, blast.accepted_by) {
            (BlastStatus::Accepted, Some(_)) => self
                .store
                .get_load(blast.load_id)
                .map(|load| Self::awaiting_handoff(load.status, load.driver_id))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// A won blast leaves its load `blasted` and driverless until the handoff lands. Any other state means
    /// the handoff happened or the load was closed, and a later reopen must not revive the award.
    fn awaiting_handoff(status: LoadStatus, driver_id: Option<Uuid>) -> bool {
        status == LoadStatus::Blasted && driver_id.is_none()
    }

    /// Takes back an award whose load could not be handed over, so the blast no longer names a driver
    /// the load contradicts. The winner's response closes as lost like everyone else's.
    fn void_award(&self, blast: &DispatchBlast, winner: Uuid, reason: &str, now: DateTime<Utc>) -> DispatchResult<()> {
        self.store.update_blast_with(blast.id, |b| {
            if b.status == BlastStatus::Accepted && b.accepted_by == Some(winner) {
                b.status = BlastStatus::Cancelled;
                b.accepted_by = None;
                b.accepted_at = None;
                b.cancel_reason = Some(reason.to_string());
            }
        })?;
        self.store.update_response_with(blast.id, winner, |r| {
            if r.status.is_open() || r.status == ResponseStatus::Accepted {
                r.close(ResponseStatus::ExpiredLost, now);
            }
        })?;
        warn!("Award of blast {} to driver {} voided: {}", blast.id, winner, reason);
        Ok(())
    }

    fn hand_off(&self, blast: &DispatchBlast, winner: Uuid) -> DispatchResult<TransitionOutcome> {
        let ctx = TransitionContext::new(winner.to_string()).reason(format!("accepted blast {}", blast.id));
        self.status_machine.assign_driver(blast.load_id, winner, ctx)
    }

    /// Marks the winner's response accepted and every still-open response `expired_lost`.
    ///
    /// Returns the drivers whose responses were closed by this call.
    fn settle_responses(&self, blast: &DispatchBlast, winner: Uuid, now: DateTime<Utc>) -> DispatchResult<Vec<Uuid>> {
        self.store.update_response_with(blast.id, winner, |r| {
            if r.status != ResponseStatus::Accepted {
                r.close(ResponseStatus::Accepted, now);
            }
        })?;

        let mut losers = Vec::new();
        for response in self.store.responses_for_blast(blast.id) {
            if response.driver_id == winner || !response.status.is_open() {
                continue;
            }
            let closed = self.store.update_response_with(blast.id, response.driver_id, |r| {
                if r.status.is_open() {
                    r.close(ResponseStatus::ExpiredLost, now);
                    true
                } else {
                    false
                }
            })?;
            if closed {
                losers.push(response.driver_id);
            }
        }
        Ok(losers)
    }

    fn notify_outcome(&self, blast: &DispatchBlast, winner: Uuid, losers: &[Uuid]) {
        let reference = self
            .store
            .get_load(blast.load_id)
            .map(|load| load.reference)
            .unwrap_or_else(|_| blast.load_id.to_string());

        if let Some(recipient) = self.store.push_recipient(winner) {
            self.notifier.notify(
                Notification::new(vec![recipient], "Load confirmed", format!("{} is yours", reference))
                    .with_meta("blast_id", blast.id)
                    .with_meta("load_id", blast.load_id),
            );
        }

        self.notifier.notify(
            Notification::new(
                self.settings.dispatcher_recipients.clone(),
                "Load accepted",
                format!("{} accepted from blast", reference),
            )
            .with_meta("blast_id", blast.id)
            .with_meta("load_id", blast.load_id)
            .with_meta("driver_id", winner),
        );

        if self.settings.notify_losers && !losers.is_empty() {
            let recipients: Vec<String> = losers.iter().filter_map(|id| self.store.push_recipient(*id)).collect();
            self.notifier.notify(
                Notification::new(recipients, "Load no longer available", format!("{} was taken by another driver", reference))
                    .with_meta("blast_id", blast.id)
                    .with_meta("load_id", blast.load_id),
            );
        }
    }
}
