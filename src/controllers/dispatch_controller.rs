use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;
use crate::alerting::NotificationDispatcher;
use crate::config::Settings;
use crate::dispatch::eligibility::rank_suggestions;
use crate::dispatch::{
    AssignmentArbiter, BlastLifecycle, CancelOutcome, DriverAction, DriverSuggestion, ReconcileOutcome,
    ResponseLedger, ResponseOutcome, SendReport,
};
use crate::errors::{DispatchError, DispatchResult};
use crate::geo::GeoPoint;
use crate::models::{
    BlastResponse, BlastStatus, DispatchBlast, Driver, DriverLocation, DriverStatus, GeofenceEvent, Load,
    LoadStatus, LoadStatusEvent, NewLoad,
};
use crate::monitoring::ExpirySweeper;
use crate::repositories::DispatchStore;
use crate::state_management::{Lifecycle, LoadStatusMachine, TransitionContext, TransitionOutcome};
use crate::tracking::GeofenceMonitor;

/// The surface the dispatcher UI, the driver app and fleet management call into
pub struct DispatchController {
    /// The application settings
    pub settings: Arc<Settings>,
    /// The shared record store
    pub store: Arc<DispatchStore>,
    /// Canonical load lifecycle
    pub status_machine: Arc<LoadStatusMachine>,
    /// Blast creation, fan-out and cancellation
    pub blasts: Arc<BlastLifecycle>,
    /// Views and declines
    pub ledger: Arc<ResponseLedger>,
    /// Race-free acceptance
    pub arbiter: Arc<AssignmentArbiter>,
    /// GPS arrival detection
    pub geofence: Arc<GeofenceMonitor>,
    notifier: NotificationDispatcher,
}

impl DispatchController {
    /// Creates a new `DispatchController` and the components it drives
    ///
    /// # Arguments
    ///
    /// * `settings`: The application settings
    /// * `store`: The record store shared with the background workers
    /// * `notifier`: Front of the notification queue
    pub fn new(settings: Arc<Settings>, store: Arc<DispatchStore>, notifier: NotificationDispatcher) -> Self {
        info!("Initializing Dispatch Controller");
        let notification_settings = Arc::new(settings.notifications.clone());
        let status_machine = Arc::new(LoadStatusMachine::new(
            Arc::clone(&store),
            notifier.clone(),
            Arc::clone(&notification_settings),
        ));
        let blasts = Arc::new(BlastLifecycle::new(
            Arc::clone(&store),
            Arc::clone(&status_machine),
            notifier.clone(),
            Arc::clone(&settings),
        ));
        let ledger = Arc::new(ResponseLedger::new(Arc::clone(&store)));
        let arbiter = Arc::new(AssignmentArbiter::new(
            Arc::clone(&store),
            Arc::clone(&status_machine),
            notifier.clone(),
            notification_settings,
        ));
        let geofence = Arc::new(GeofenceMonitor::new(
            Arc::clone(&store),
            Arc::clone(&status_machine),
            Arc::new(settings.geofence.clone()),
        ));

        Self { settings, store, status_machine, blasts, ledger, arbiter, geofence, notifier }
    }

    /// Builds the expiry sweeper over the same components as this controller
    pub fn expiry_sweeper(&self, lifecycle: Lifecycle) -> ExpirySweeper {
        ExpirySweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.status_machine),
            Arc::clone(&self.blasts),
            Arc::clone(&self.arbiter),
            self.notifier.clone(),
            Arc::clone(&self.settings),
            lifecycle,
        )
    }

    // ---- collaborator inputs ----

    /// Registers a new load in `pending`
    pub fn create_load(&self, new_load: NewLoad) -> DispatchResult<Load> {
        GeoPoint::validated(new_load.pickup.lat, new_load.pickup.lng)?;
        GeoPoint::validated(new_load.delivery.lat, new_load.delivery.lng)?;

        let load = Load::from_new(new_load, Utc::now());
        info!("Created {} in hub {}", load, load.hub);
        self.store.insert_load(load.clone());
        Ok(load)
    }

    /// Adds or replaces a driver from the fleet roster
    pub fn register_driver(&self, driver: Driver) {
        info!("Registered driver {} ({}) in hub {} as {}", driver.name, driver.id, driver.hub, driver.status);
        self.store.upsert_driver(driver);
    }

    // ---- blasts ----

    /// Creates a blast for a pending load and sends it to every eligible driver
    ///
    /// # Returns
    ///
    /// The blast id, or `LoadAlreadyBlasted`, `InvalidRadius`, `InvalidExpiry` or `LoadNotBlastable`
    pub fn create_blast(
        &self,
        load_id: Uuid,
        radius_miles: f64,
        expires_at: DateTime<Utc>,
        message: Option<String>,
        actor: &str,
    ) -> DispatchResult<Uuid> {
        self.send_blast(load_id, radius_miles, expires_at, message, actor)
            .map(|report| report.blast.id)
    }

    /// Like `create_blast`, returning the full send report
    pub fn send_blast(
        &self,
        load_id: Uuid,
        radius_miles: f64,
        expires_at: DateTime<Utc>,
        message: Option<String>,
        actor: &str,
    ) -> DispatchResult<SendReport> {
        self.blasts.create_and_send(load_id, radius_miles, expires_at, message, actor)
    }

    /// `create_blast` with the configured default radius and offer lifetime
    pub fn create_blast_with_defaults(&self, load_id: Uuid, message: Option<String>, actor: &str) -> DispatchResult<Uuid> {
        let dispatch = &self.settings.dispatch;
        let expires_at = i64::try_from(dispatch.default_blast_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| {
                DispatchError::InvalidExpiry(format!("default ttl of {}s is out of range", dispatch.default_blast_ttl_secs))
            })?;
        self.create_blast(load_id, dispatch.default_radius_miles, expires_at, message, actor)
    }

    pub fn cancel_blast(&self, blast_id: Uuid, actor: &str, reason: &str) -> DispatchResult<CancelOutcome> {
        self.blasts.cancel(blast_id, actor, reason, Utc::now())
    }

    /// Offers the driver can still act on: sent, undecided, within `expires_at`, and not yet declined
    pub fn list_active_blasts_for_driver(&self, driver_id: Uuid) -> DispatchResult<Vec<DispatchBlast>> {
        self.store.get_driver(driver_id)?;
        let now = Utc::now();

        let mut blasts: Vec<DispatchBlast> = self
            .store
            .responses_for_driver(driver_id)
            .into_iter()
            .filter(|r| r.status.is_open())
            .filter_map(|r| self.store.get_blast(r.blast_id).ok())
            .filter(|b| b.is_open_at(now))
            .collect();
        blasts.sort_by_key(|b| b.expires_at);
        Ok(blasts)
    }

    /// A driver's answer to an offer
    ///
    /// Losing a race is an `Ok` outcome (`AlreadyAssigned`, `BlastExpired`, `BlastCancelled`).
    pub fn respond(&self, blast_id: Uuid, driver_id: Uuid, action: DriverAction) -> DispatchResult<ResponseOutcome> {
        let now = Utc::now();
        match action {
            DriverAction::View => self.ledger.mark_viewed(blast_id, driver_id, now),
            DriverAction::Decline { reason } => self.ledger.decline(blast_id, driver_id, reason, now),
            DriverAction::Accept => self.arbiter.accept(blast_id, driver_id, now),
        }
    }

    /// Re-runs the handoff of an accepted blast
    pub fn reconcile_blast(&self, blast_id: Uuid) -> DispatchResult<ReconcileOutcome> {
        self.arbiter.reconcile(blast_id)
    }

    // ---- tracking ----

    /// Records a GPS sample and runs arrival detection for the driver's active load
    ///
    /// # Returns
    ///
    /// The geofence event, when this sample produced one
    pub fn update_driver_location(
        &self,
        driver_id: Uuid,
        lat: f64,
        lng: f64,
        accuracy_meters: f64,
        speed_mph: Option<f64>,
        heading_degrees: Option<f64>,
    ) -> DispatchResult<Option<GeofenceEvent>> {
        let position = GeoPoint::validated(lat, lng)?;
        if !accuracy_meters.is_finite() || accuracy_meters < 0.0 {
            return Err(DispatchError::InvalidCoordinates(format!("accuracy {} is not a valid radius", accuracy_meters)));
        }
        self.store.get_driver(driver_id)?;

        let now = Utc::now();
        let location = DriverLocation {
            driver_id,
            position,
            accuracy_meters,
            speed_mph,
            heading_degrees,
            active_load_id: self.store.active_load_for_driver(driver_id),
            recorded_at: now,
        };
        self.store.record_location(location.clone());
        self.geofence.process_location(&location, now)
    }

    // ---- load lifecycle ----

    /// Manual dispatcher/driver transition through the load status machine
    ///
    /// Coordinates are optional but must be given together. Cancelling or failing a load first cancels
    /// its open blast; if a driver accepted that blast before the cancel committed, the request fails with
    /// `LoadAlreadyAssigned` and the load is left with that driver. The `pending`/`blasted` edges belong to
    /// blasts and are refused here.
    pub fn update_load_status(
        &self,
        load_id: Uuid,
        new_status: LoadStatus,
        actor: &str,
        reason: Option<String>,
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> DispatchResult<TransitionOutcome> {
        let location = match (lat, lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::validated(lat, lng)?),
            (None, None) => None,
            _ => {
                return Err(DispatchError::InvalidCoordinates("latitude and longitude must be given together".into()))
            }
        };

        let mut ctx = TransitionContext::new(actor).location(location);
        if let Some(reason) = reason {
            ctx = ctx.reason(reason);
        }
        if matches!(new_status, LoadStatus::Cancelled | LoadStatus::Failed) {
            self.close_active_blast(load_id, actor, &format!("load {}", new_status))?;
        }
        self.status_machine.transition(load_id, new_status, ctx)
    }

    /// Assigns a load to a driver chosen by the dispatcher
    ///
    /// An open blast on the load is cancelled first. If a driver accepted that blast before the cancel
    /// committed, the dispatcher gets `AlreadyAssigned`.
    ///
    /// The driver must be active and not already working another load.
    pub fn assign_load_manually(&self, load_id: Uuid, driver_id: Uuid, actor: &str) -> DispatchResult<ResponseOutcome> {
        let driver = self.store.get_driver(driver_id)?;
        self.store.get_load(load_id)?;

        if driver.status != DriverStatus::Active {
            return Err(DispatchError::DriverUnavailable {
                driver_id,
                reason: format!("driver is {}", driver.status),
            });
        }
        if self.store.busy_driver_ids().contains(&driver_id) {
            if let Some(other) = self.store.active_load_for_driver(driver_id).filter(|id| *id != load_id) {
                return Err(DispatchError::DriverUnavailable {
                    driver_id,
                    reason: format!("driver is working load {}", other),
                });
            }
        }

        if let Some(blast_id) = self.store.active_blast_for_load(load_id) {
            match self.blasts.cancel(blast_id, actor, "manually assigned", Utc::now())? {
                CancelOutcome::Cancelled(_) => {}
                CancelOutcome::AlreadyClosed(BlastStatus::Accepted) => return Ok(ResponseOutcome::AlreadyAssigned),
                CancelOutcome::AlreadyClosed(_) => {}
            }
        }

        let ctx = TransitionContext::new(actor).reason("manual assignment");
        match self.status_machine.assign_driver(load_id, driver_id, ctx) {
            Ok(_) => Ok(ResponseOutcome::Assigned { load_id, driver_id }),
            Err(DispatchError::LoadAlreadyAssigned { driver_id: owner, .. }) => {
                warn!("Manual assignment of load {} to {} lost to driver {}", load_id, driver_id, owner);
                Ok(ResponseOutcome::AlreadyAssigned)
            }
            Err(e) => Err(e),
        }
    }

    /// Ranked drivers for manual assignment around a pickup point
    ///
    /// Uses the load's hub and vehicle requirement with the suggestion radius; ETA is straight-line
    /// distance at the configured average speed.
    pub fn get_driver_suggestion(
        &self,
        load_id: Uuid,
        pickup_lat: f64,
        pickup_lng: f64,
        cutoff: Option<DateTime<Utc>>,
    ) -> DispatchResult<Vec<DriverSuggestion>> {
        let pickup = GeoPoint::validated(pickup_lat, pickup_lng)?;
        let load = self.store.get_load(load_id)?;
        let now = Utc::now();

        let dispatch = &self.settings.dispatch;
        let candidates = self.blasts.candidates_for(&load, pickup, dispatch.suggestion_radius_miles, now);
        Ok(rank_suggestions(candidates, dispatch.average_speed_mph, now, cutoff))
    }

    // ---- reads ----

    pub fn get_load(&self, load_id: Uuid) -> DispatchResult<Load> {
        self.store.get_load(load_id)
    }

    pub fn get_blast(&self, blast_id: Uuid) -> DispatchResult<DispatchBlast> {
        self.store.get_blast(blast_id)
    }

    /// Every response of a blast, closest driver first
    pub fn blast_responses(&self, blast_id: Uuid) -> DispatchResult<Vec<BlastResponse>> {
        self.store.get_blast(blast_id)?;
        Ok(self.store.responses_for_blast(blast_id))
    }

    /// The status history of a load, oldest first
    pub fn load_history(&self, load_id: Uuid) -> DispatchResult<Vec<LoadStatusEvent>> {
        self.store.get_load(load_id)?;
        Ok(self.store.status_events_for_load(load_id))
    }

    pub fn geofence_events(&self, load_id: Uuid) -> DispatchResult<Vec<GeofenceEvent>> {
        self.store.get_load(load_id)?;
        Ok(self.store.geofence_events_for_load(load_id))
    }

    pub fn driver_location_history(&self, driver_id: Uuid) -> DispatchResult<Vec<DriverLocation>> {
        self.store.get_driver(driver_id)?;
        Ok(self.store.location_history(driver_id))
    }

    fn close_active_blast(&self, load_id: Uuid, actor: &str, reason: &str) -> DispatchResult<()> {
        let Some(blast_id) = self.store.active_blast_for_load(load_id) else {
            return Ok(());
        };
        match self.blasts.close(blast_id, actor, reason, Utc::now()) {
            Ok(CancelOutcome::AlreadyClosed(BlastStatus::Accepted)) => {
                match self.store.get_blast(blast_id)?.accepted_by {
                    Some(winner) => {
                        warn!("Closing load {} lost to driver {} accepting blast {}", load_id, winner, blast_id);
                        Err(DispatchError::LoadAlreadyAssigned { load_id, driver_id: winner })
                    }
                    None => Ok(()),
                }
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
