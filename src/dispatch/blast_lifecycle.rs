//! # Blast Lifecycle
//!
//! Owns a `DispatchBlast` from draft to its terminal status: creation checks, fan-out to eligible
//! drivers on send, and dispatcher cancellation.

use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;
use crate::alerting::{Notification, NotificationDispatcher};
use crate::config::Settings;
use crate::dispatch::eligibility::{eligible_candidates, Candidate, EligibilityCriteria, RosterEntry};
use crate::errors::{DispatchError, DispatchResult};
use crate::geo::GeoPoint;
use crate::models::{BlastResponse, BlastStatus, DispatchBlast, Load, LoadStatus};
use crate::repositories::DispatchStore;
use crate::state_management::{LoadStatusMachine, TransitionContext, TransitionOutcome};

/// What `send` did.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub blast: DispatchBlast,
    pub notified: Vec<Candidate>,
}

/// Result of a cancel request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled(DispatchBlast),
    /// The blast had already closed, e.g. an accept won first.
    AlreadyClosed(BlastStatus),
}

pub struct BlastLifecycle {
    store: Arc<DispatchStore>,
    status_machine: Arc<LoadStatusMachine>,
    notifier: NotificationDispatcher,
    settings: Arc<Settings>,
}

impl BlastLifecycle {
    pub fn new(
        store: Arc<DispatchStore>,
        status_machine: Arc<LoadStatusMachine>,
        notifier: NotificationDispatcher,
        settings: Arc<Settings>,
    ) -> Self {
        Self { store, status_machine, notifier, settings }
    }

    /// Creates a draft blast for a pending load and claims the load's single active-blast slot.
    pub fn create(
        &self,
        load_id: Uuid,
        radius_miles: f64,
        expires_at: DateTime<Utc>,
        message: Option<String>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<DispatchBlast> {
        if !radius_miles.is_finite() || radius_miles <= 0.0 {
            return Err(DispatchError::InvalidRadius(radius_miles));
        }
        if expires_at <= now {
            return Err(DispatchError::InvalidExpiry(format!("{} is not in the future", expires_at)));
        }

        let load = self.store.get_load(load_id)?;
        if let Some(blast_id) = self.store.active_blast_for_load(load_id) {
            let open = self.store.get_blast(blast_id).map(|b| !b.status.is_terminal()).unwrap_or(false);
            if open {
                return Err(DispatchError::LoadAlreadyBlasted { load_id, blast_id });
            }
        }
        if !load.status.is_blastable() {
            return Err(DispatchError::LoadNotBlastable { load_id, status: load.status });
        }

        let blast = DispatchBlast::draft(load_id, radius_miles, expires_at, message, actor, now);
        self.store
            .claim_active_blast(blast.clone())
            .map_err(|blast_id| DispatchError::LoadAlreadyBlasted { load_id, blast_id })?;

        info!("Created blast {} for {} ({} mi, expires {})", blast.id, load, radius_miles, expires_at);
        Ok(blast)
    }

    /// Moves a draft to `sent` and offers the load to every eligible driver.
    ///
    /// Push delivery is fire-and-forget: a driver whose push fails keeps a `notified` response and can
    /// still find and accept the offer by polling.
    pub fn send(&self, blast_id: Uuid, now: DateTime<Utc>) -> DispatchResult<SendReport> {
        let blast = self.store.get_blast(blast_id)?;
        if blast.status != BlastStatus::Draft {
            return Err(DispatchError::InvalidBlastState { blast_id, status: blast.status });
        }
        let load = self.store.get_load(blast.load_id)?;

        let ctx = TransitionContext::new(blast.created_by.clone()).reason(format!("blast {} sent", blast_id));
        match self.status_machine.transition_from(load.id, LoadStatus::Pending, LoadStatus::Blasted, ctx)? {
            TransitionOutcome::Applied(_) => {}
            TransitionOutcome::Unchanged(status) | TransitionOutcome::Skipped(status) => {
                self.discard_draft(&blast, format!("load became {} before send", status), now)?;
                return Err(DispatchError::LoadNotBlastable { load_id: load.id, status });
            }
        }

        // Responses exist before the blast goes live, so an early accept settles every one of them.
        let candidates = self.candidates_for(&load, load.pickup, blast.radius_miles, now);
        let mut notified = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let response = BlastResponse::notified(blast_id, candidate.driver_id, candidate.distance_miles, now);
            if self.store.insert_response_if_absent(response) {
                notified.push(candidate);
            }
        }

        let notified_count = notified.len() as u32;
        let sent = self.store.update_blast_with(blast_id, |b| {
            if b.status == BlastStatus::Draft {
                b.status = BlastStatus::Sent;
                b.sent_at = Some(now);
                b.drivers_notified = notified_count;
                true
            } else {
                false
            }
        })?;
        if !sent {
            let ctx = TransitionContext::new("system").reason(format!("blast {} closed before send", blast_id));
            self.status_machine.transition_from(load.id, LoadStatus::Blasted, LoadStatus::Pending, ctx)?;
            let status = self.store.get_blast(blast_id)?.status;
            return Err(DispatchError::InvalidBlastState { blast_id, status });
        }

        for (pushed, candidate) in notified.iter().enumerate() {
            let still_open = self.store.get_blast(blast_id).map(|b| b.status == BlastStatus::Sent).unwrap_or(false);
            if !still_open {
                info!("Blast {} closed after {} of {} pushes; skipping the rest", blast_id, pushed, notified.len());
                break;
            }
            self.notifier.notify(
                Notification::new(
                    vec![candidate.push_recipient.clone()],
                    "New load available",
                    format!("{} - pickup {:.1} mi away", load.reference, candidate.distance_miles),
                )
                .with_meta("blast_id", blast_id)
                .with_meta("load_id", load.id)
                .with_meta("expires_at", blast.expires_at.to_rfc3339())
                .with_meta("message", blast.message.as_deref().unwrap_or("")),
            );
        }

        if notified.is_empty() {
            warn!("Blast {} for {} reached no eligible drivers; it will expire at {}", blast_id, load, blast.expires_at);
        } else {
            info!("Blast {} for {} sent to {} drivers", blast_id, load, notified.len());
        }

        Ok(SendReport { blast: self.store.get_blast(blast_id)?, notified })
    }

    /// `create` followed by `send`.
    pub fn create_and_send(
        &self,
        load_id: Uuid,
        radius_miles: f64,
        expires_at: DateTime<Utc>,
        message: Option<String>,
        actor: &str,
    ) -> DispatchResult<SendReport> {
        let now = Utc::now();
        let blast = self.create(load_id, radius_miles, expires_at, message, actor, now)?;
        self.send(blast.id, now)
    }

    /// Cancels a sent blast and returns its load to `pending`. Loses cleanly to an accept or expiry that
    /// committed first.
    pub fn cancel(&self, blast_id: Uuid, actor: &str, reason: &str, now: DateTime<Utc>) -> DispatchResult<CancelOutcome> {
        let outcome = self.withdraw(blast_id, actor, reason, now, false)?;
        if let CancelOutcome::Cancelled(blast) = &outcome {
            let ctx = TransitionContext::new(actor).reason(format!("blast cancelled: {}", reason));
            self.status_machine.transition_from(blast.load_id, LoadStatus::Blasted, LoadStatus::Pending, ctx)?;
        }
        Ok(outcome)
    }

    /// Cancels a draft or sent blast without touching its load.
    ///
    /// Used when the load itself is being closed: the blast has to be out of the way first, so that an
    /// accept racing the close either wins before it or finds the blast cancelled. A draft cancelled here
    /// makes the pending `send` fail instead of going live.
    pub fn close(&self, blast_id: Uuid, actor: &str, reason: &str, now: DateTime<Utc>) -> DispatchResult<CancelOutcome> {
        self.withdraw(blast_id, actor, reason, now, true)
    }

    fn withdraw(
        &self,
        blast_id: Uuid,
        actor: &str,
        reason: &str,
        now: DateTime<Utc>,
        include_draft: bool,
    ) -> DispatchResult<CancelOutcome> {
        let result = self.store.update_blast_with(blast_id, |b| match b.status {
            BlastStatus::Sent | BlastStatus::Draft
                if b.accepted_by.is_none() && (include_draft || b.status == BlastStatus::Sent) =>
            {
                b.status = BlastStatus::Cancelled;
                b.cancel_reason = Some(reason.to_string());
                b.closed_at = Some(now);
                Ok(Some(b.clone()))
            }
            BlastStatus::Draft => Err(b.status),
            _ => Ok(None),
        })?;

        let blast = match result {
            Ok(Some(blast)) => blast,
            Ok(None) => {
                let status = self.store.get_blast(blast_id)?.status;
                info!("Cancel of blast {} by {} lost: blast already {}", blast_id, actor, status);
                return Ok(CancelOutcome::AlreadyClosed(status));
            }
            Err(status) => return Err(DispatchError::InvalidBlastState { blast_id, status }),
        };

        self.store.release_active_blast(blast.load_id, blast_id);
        if self.settings.notifications.notify_losers && blast.sent_at.is_some() {
            self.notify_open_responders(&blast, "Load no longer available", "The dispatcher withdrew this offer");
        }
        info!("Blast {} cancelled by {}: {}", blast_id, actor, reason);
        Ok(CancelOutcome::Cancelled(blast))
    }

    /// Tells every driver still holding an open response that the offer is gone.
    pub(crate) fn notify_open_responders(&self, blast: &DispatchBlast, title: &str, body: &str) {
        let recipients: Vec<String> = self
            .store
            .responses_for_blast(blast.id)
            .into_iter()
            .filter(|r| r.status.is_open())
            .filter_map(|r| self.store.push_recipient(r.driver_id))
            .collect();
        if !recipients.is_empty() {
            self.notifier.notify(
                Notification::new(recipients, title, body)
                    .with_meta("blast_id", blast.id)
                    .with_meta("load_id", blast.load_id),
            );
        }
    }

    /// Eligible drivers for `load` around `pickup`, closest first.
    pub(crate) fn candidates_for(&self, load: &Load, pickup: GeoPoint, radius_miles: f64, now: DateTime<Utc>) -> Vec<Candidate> {
        let dispatch = &self.settings.dispatch;
        let criteria = EligibilityCriteria {
            pickup,
            hub: load.hub.clone(),
            required_vehicle_type: load.required_vehicle_type.clone(),
            radius_miles,
            hub_agnostic: dispatch.hub_agnostic,
            max_location_age: Duration::seconds(dispatch.location_staleness_secs as i64),
            now,
        };
        let roster: Vec<RosterEntry> = self
            .store
            .roster()
            .into_iter()
            .map(|(driver, location)| RosterEntry { driver, location })
            .collect();
        eligible_candidates(&criteria, &roster, &self.store.busy_driver_ids())
    }

    fn discard_draft(&self, blast: &DispatchBlast, reason: String, now: DateTime<Utc>) -> DispatchResult<()> {
        self.store.update_blast_with(blast.id, |b| {
            if b.status == BlastStatus::Draft {
                b.status = BlastStatus::Cancelled;
                b.cancel_reason = Some(reason.clone());
                b.closed_at = Some(now);
            }
        })?;
        self.store.release_active_blast(blast.load_id, blast.id);
        warn!("Discarded draft blast {}: {}", blast.id, reason);
        Ok(())
    }
}
