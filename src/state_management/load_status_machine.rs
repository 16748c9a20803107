use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::alerting::{Notification, NotificationDispatcher};
use crate::config::NotificationSettings;
use crate::errors::{DispatchError, DispatchResult};
use crate::geo::GeoPoint;
use crate::models::{Load, LoadStatus, LoadStatusEvent};
use crate::repositories::DispatchStore;

/// Result of a transition request.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The load moved and this event was appended to its history.
    Applied(LoadStatusEvent),
    /// The load was already in the requested status; nothing was written.
    Unchanged(LoadStatus),
    /// A guarded transition found the load in another status and left it alone.
    Skipped(LoadStatus),
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Who is asking and why, carried into the audit event.
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub actor: String,
    pub reason: Option<String>,
    pub location: Option<GeoPoint>,
}

impl TransitionContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self { actor: actor.into(), reason: None, location: None }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn location(mut self, location: Option<GeoPoint>) -> Self {
        self.location = location;
        self
    }
}

/// The canonical delivery lifecycle of a load.
///
/// Every change to `Load.status` and `Load.driver_id` goes through here. The edge check, the row update and
/// the audit append happen under the load's row guard, so concurrent callers see a single linear history.
pub struct LoadStatusMachine {
    store: Arc<DispatchStore>,
    notifier: NotificationDispatcher,
    settings: Arc<NotificationSettings>,
}

impl LoadStatusMachine {
    pub fn new(store: Arc<DispatchStore>, notifier: NotificationDispatcher, settings: Arc<NotificationSettings>) -> Self {
        Self { store, notifier, settings }
    }

    /// Moves a load to `new_status` if the edge is legal from its current status.
    ///
    /// Requesting the current status is a no-op that writes no event. The `pending`/`blasted` edges are
    /// refused here: they are driven by the blast that owns the load.
    pub fn transition(&self, load_id: Uuid, new_status: LoadStatus, ctx: TransitionContext) -> DispatchResult<TransitionOutcome> {
        self.apply(load_id, None, new_status, ctx, Utc::now())
    }

    /// Like `transition`, but only if the load is still in `expected`; otherwise returns `Skipped`.
    ///
    /// This is the path the blast lifecycle uses, so it may take the `pending`/`blasted` edges.
    pub(crate) fn transition_from(
        &self,
        load_id: Uuid,
        expected: LoadStatus,
        new_status: LoadStatus,
        ctx: TransitionContext,
    ) -> DispatchResult<TransitionOutcome> {
        self.apply(load_id, Some(expected), new_status, ctx, Utc::now())
    }

    /// Gives the load to `driver_id` and moves it to `assigned`.
    ///
    /// The write only happens while the load is `pending`/`blasted` and has no driver. Repeating the call for
    /// the driver that already owns the load is a no-op.
    pub fn assign_driver(&self, load_id: Uuid, driver_id: Uuid, ctx: TransitionContext) -> DispatchResult<TransitionOutcome> {
        let now = Utc::now();
        let store = &self.store;

        let (outcome, load) = self.store.update_load_with(load_id, |load| {
            if let Some(owner) = load.driver_id {
                if owner == driver_id && load.status.requires_driver() {
                    return Ok((TransitionOutcome::Unchanged(load.status), load.clone()));
                }
                return Err(DispatchError::LoadAlreadyAssigned { load_id, driver_id: owner });
            }
            if !matches!(load.status, LoadStatus::Pending | LoadStatus::Blasted) {
                return Err(DispatchError::InvalidTransition { from: load.status, to: LoadStatus::Assigned });
            }

            let event = Self::write(load, LoadStatus::Assigned, &ctx, now);
            load.driver_id = Some(driver_id);
            store.append_status_event(event.clone());
            Ok((TransitionOutcome::Applied(event), load.clone()))
        })??;

        if let TransitionOutcome::Applied(event) = &outcome {
            info!("{} assigned to driver {} by {}", load, driver_id, event.changed_by);
        }
        Ok(outcome)
    }

    fn apply(
        &self,
        load_id: Uuid,
        expected: Option<LoadStatus>,
        new_status: LoadStatus,
        ctx: TransitionContext,
        now: DateTime<Utc>,
    ) -> DispatchResult<TransitionOutcome> {
        let store = &self.store;

        let (outcome, load) = self.store.update_load_with(load_id, |load| {
            if let Some(expected) = expected {
                if load.status != expected {
                    return Ok((TransitionOutcome::Skipped(load.status), load.clone()));
                }
            }
            if load.status == new_status {
                return Ok((TransitionOutcome::Unchanged(load.status), load.clone()));
            }
            let blast_driven = expected.is_some();
            if !blast_driven && load.status.is_blast_edge(new_status) {
                return Err(DispatchError::InvalidTransition { from: load.status, to: new_status });
            }
            if !load.status.can_transition_to(new_status) {
                return Err(DispatchError::InvalidTransition { from: load.status, to: new_status });
            }
            if new_status.requires_driver() && load.driver_id.is_none() {
                return Err(DispatchError::MissingDriver(load.id));
            }

            let event = Self::write(load, new_status, &ctx, now);
            if new_status == LoadStatus::Pending {
                load.driver_id = None;
            }
            store.append_status_event(event.clone());
            Ok((TransitionOutcome::Applied(event), load.clone()))
        })??;

        match &outcome {
            TransitionOutcome::Applied(event) => {
                info!(
                    "Load {} transitioned {} -> {} by {} ({})",
                    load.id, event.previous_status, event.new_status, event.changed_by,
                    event.reason.as_deref().unwrap_or("no reason")
                );
                if event.previous_status.is_terminal() && event.new_status == LoadStatus::Pending {
                    self.store.clear_geofence_index(load.id);
                }
                self.after_transition(&load, event, now);
            }
            TransitionOutcome::Unchanged(status) => debug!("Load {} already {}", load_id, status),
            TransitionOutcome::Skipped(status) => {
                debug!("Load {} is {}, skipping guarded move to {}", load_id, status, new_status)
            }
        }
        Ok(outcome)
    }

    fn write(load: &mut Load, new_status: LoadStatus, ctx: &TransitionContext, now: DateTime<Utc>) -> LoadStatusEvent {
        let event = LoadStatusEvent {
            id: Uuid::new_v4(),
            load_id: load.id,
            previous_status: load.status,
            new_status,
            changed_by: ctx.actor.clone(),
            reason: ctx.reason.clone(),
            location: ctx.location,
            created_at: now,
        };
        load.status = new_status;
        load.updated_at = now;
        event
    }

    /// Dispatcher and driver notifications for the statuses people care about.
    fn after_transition(&self, load: &Load, event: &LoadStatusEvent, now: DateTime<Utc>) {
        let late = load.is_past_sla(now);
        if late && matches!(event.new_status, LoadStatus::ArrivedDelivery | LoadStatus::Delivered) {
            warn!("{} reached {} after its SLA deadline", load, event.new_status);
        }

        let title = match event.new_status {
            LoadStatus::ArrivedPickup => "Driver arrived at pickup",
            LoadStatus::ArrivedDelivery => "Driver arrived at delivery",
            LoadStatus::Delivered => "Load delivered",
            LoadStatus::Failed => "Load failed",
            LoadStatus::Cancelled => "Load cancelled",
            _ => return,
        };

        let mut notification = Notification::new(
            self.settings.dispatcher_recipients.clone(),
            title,
            format!("{} is now {}", load.reference, event.new_status),
        )
        .with_meta("load_id", load.id)
        .with_meta("status", event.new_status)
        .with_meta("changed_by", &event.changed_by)
        .with_meta("sla_breached", late);
        if let Some(driver_id) = load.driver_id {
            notification = notification.with_meta("driver_id", driver_id);
        }
        self.notifier.notify(notification);

        let is_arrival = matches!(event.new_status, LoadStatus::ArrivedPickup | LoadStatus::ArrivedDelivery);
        if is_arrival && self.settings.notify_driver_on_arrival {
            if let Some(recipient) = load.driver_id.and_then(|id| self.store.push_recipient(id)) {
                self.notifier.notify(
                    Notification::new(vec![recipient], "Arrival confirmed", format!("Checked in for {}", load.reference))
                        .with_meta("load_id", load.id)
                        .with_meta("status", event.new_status),
                );
            }
        }
    }
}
