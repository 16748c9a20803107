use std::sync::Arc;
use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::alerting::{Notification, NotificationDispatcher};
use crate::config::Settings;
use crate::dispatch::{AssignmentArbiter, BlastLifecycle, ReconcileOutcome};
use crate::errors::DispatchResult;
use crate::models::{BlastStatus, DispatchBlast, LoadStatus};
use crate::repositories::DispatchStore;
use crate::state_management::{Lifecycle, LoadStatusMachine, TransitionContext};
use crate::utils::format_duration;

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    /// Blasts this sweep moved to `expired`.
    pub expired: Vec<Uuid>,
    /// Accepted blasts whose load handoff was repaired.
    pub reconciled: Vec<Uuid>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.reconciled.is_empty()
    }
}

/// Background worker that closes blasts past `expires_at` and repairs half-finished awards.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<DispatchStore>,
    status_machine: Arc<LoadStatusMachine>,
    blasts: Arc<BlastLifecycle>,
    arbiter: Arc<AssignmentArbiter>,
    notifier: NotificationDispatcher,
    settings: Arc<Settings>,
    lifecycle: Lifecycle,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<DispatchStore>,
        status_machine: Arc<LoadStatusMachine>,
        blasts: Arc<BlastLifecycle>,
        arbiter: Arc<AssignmentArbiter>,
        notifier: NotificationDispatcher,
        settings: Arc<Settings>,
        lifecycle: Lifecycle,
    ) -> Self {
        Self { store, status_machine, blasts, arbiter, notifier, settings, lifecycle }
    }

    /// Sweeps every `sweeper.interval_secs` until shutdown is triggered.
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(self.settings.sweeper.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Expiry sweeper started, interval {}s", self.settings.sweeper.interval_secs);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.lifecycle.is_shutdown_triggered() {
                        break;
                    }
                    let report = self.sweep_at(Utc::now());
                    if !report.is_empty() {
                        info!(
                            "Sweep expired {} blasts and reconciled {}",
                            report.expired.len(), report.reconciled.len()
                        );
                    }
                }
                _ = self.lifecycle.wait_for_shutdown() => break,
            }
        }
        info!("Expiry sweeper stopped");
    }

    /// One pass at `now`. Running it again with the same `now` changes nothing.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let due = self.store.blasts_matching(|b| b.status == BlastStatus::Sent && b.expires_at < now);
        for blast in due {
            match self.expire_blast(blast.id, now) {
                Ok(Some(expired)) => report.expired.push(expired.id),
                Ok(None) => debug!("Blast {} closed before the sweep reached it", blast.id),
                Err(e) => error!("Failed to expire blast {}: {}", blast.id, e),
            }
        }

        let accepted = self.store.blasts_matching(|b| b.status == BlastStatus::Accepted);
        for blast in accepted.into_iter().filter(|b| self.arbiter.needs_reconcile(b)) {
            match self.arbiter.reconcile(blast.id) {
                Ok(ReconcileOutcome::Repaired) => report.reconciled.push(blast.id),
                Ok(_) => {}
                Err(e) => warn!("Reconcile of blast {} failed: {}", blast.id, e),
            }
        }

        report
    }

    /// Expires one blast if it is still sent, unaccepted and past its deadline.
    ///
    /// Returns `None` when an accept or cancel committed first.
    pub fn expire_blast(&self, blast_id: Uuid, now: DateTime<Utc>) -> DispatchResult<Option<DispatchBlast>> {
        let expired = self.store.update_blast_with(blast_id, |b| {
            if b.status == BlastStatus::Sent && b.accepted_by.is_none() && b.expires_at < now {
                b.status = BlastStatus::Expired;
                b.closed_at = Some(now);
                Some(b.clone())
            } else {
                None
            }
        })?;
        let Some(blast) = expired else {
            return Ok(None);
        };

        self.store.release_active_blast(blast.load_id, blast.id);
        let ctx = TransitionContext::new("system").reason(format!("blast {} expired", blast.id));
        self.status_machine
            .transition_from(blast.load_id, LoadStatus::Blasted, LoadStatus::Pending, ctx)?;

        let offered_for = blast.sent_at.map(|sent| format_duration(&(now - sent))).unwrap_or_default();
        info!(
            "Blast {} for load {} expired after {} ({} notified, {} declined)",
            blast.id, blast.load_id, offered_for, blast.drivers_notified, blast.drivers_declined
        );
        self.notify_expired(&blast);
        Ok(Some(blast))
    }

    fn notify_expired(&self, blast: &DispatchBlast) {
        let reference = self
            .store
            .get_load(blast.load_id)
            .map(|load| load.reference)
            .unwrap_or_else(|_| blast.load_id.to_string());

        self.notifier.notify(
            Notification::new(
                self.settings.notifications.dispatcher_recipients.clone(),
                "Blast expired",
                format!("No driver accepted {}; it is pending again", reference),
            )
            .with_meta("blast_id", blast.id)
            .with_meta("load_id", blast.load_id)
            .with_meta("drivers_notified", blast.drivers_notified),
        );

        if self.settings.notifications.notify_losers {
            self.blasts.notify_open_responders(blast, "Load no longer available", "This offer has expired");
        }
    }
}
