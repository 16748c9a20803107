#![allow(dead_code)]

use std::sync::Arc;
use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;
use load_dispatch::alerting::{Notification, NotificationDispatcher};
use load_dispatch::config::{
    DispatchSettings, GeofenceSettings, LoggingSettings, NotificationSettings, Settings, SweeperSettings,
};
use load_dispatch::controllers::DispatchController;
use load_dispatch::geo::{GeoPoint, EARTH_RADIUS_MILES};
use load_dispatch::models::{Driver, DriverStatus, Load, NewLoad};

pub const HUB: &str = "PHX";

pub fn pickup() -> GeoPoint {
    GeoPoint::new(33.45, -112.07)
}

pub fn delivery() -> GeoPoint {
    GeoPoint::new(33.60, -111.90)
}

pub fn create_mock_settings() -> Settings {
    Settings {
        logging: LoggingSettings {
            level: "info".to_string(),
            path: None,
        },
        dispatch: DispatchSettings {
            default_radius_miles: 10.0,
            default_blast_ttl_secs: 300,
            hub_agnostic: false,
            location_staleness_secs: 600,
            suggestion_radius_miles: 50.0,
            average_speed_mph: 30.0,
            location_history_limit: 50,
        },
        geofence: GeofenceSettings {
            arrival_threshold_meters: 150.0,
            max_accuracy_meters: 50.0,
        },
        sweeper: SweeperSettings {
            interval_secs: 30,
        },
        notifications: NotificationSettings {
            enabled: true,
            webhook_url: None,
            auth_token: None,
            dispatcher_recipients: vec!["dispatch-desk".to_string()],
            notify_losers: true,
            notify_driver_on_arrival: true,
            channel_capacity: 4096,
        },
    }
}

pub fn build_controller(settings: Settings) -> (Arc<DispatchController>, mpsc::Receiver<Notification>) {
    let settings = Arc::new(settings);
    let (notifier, receiver) = NotificationDispatcher::channel(
        settings.notifications.channel_capacity,
        settings.notifications.enabled,
    );
    let store = Arc::new(load_dispatch::repositories::DispatchStore::new(
        settings.dispatch.location_history_limit,
    ));
    (Arc::new(DispatchController::new(settings, store, notifier)), receiver)
}

pub fn mock_controller() -> (Arc<DispatchController>, mpsc::Receiver<Notification>) {
    build_controller(create_mock_settings())
}

/// A point `miles` due north of `origin`.
pub fn offset_north(origin: GeoPoint, miles: f64) -> GeoPoint {
    GeoPoint::new(origin.lat + (miles / EARTH_RADIUS_MILES).to_degrees(), origin.lng)
}

pub fn active_driver(name: &str) -> Driver {
    Driver {
        id: Uuid::new_v4(),
        name: name.to_string(),
        hub: HUB.to_string(),
        status: DriverStatus::Active,
        vehicle_type: Some("box_truck".to_string()),
        push_recipient: format!("device:{}", name),
        shift_started_at: Some(Utc::now() - Duration::hours(2)),
    }
}

/// Registers a driver and reports a precise fix `miles` north of the pickup.
pub fn driver_at(controller: &DispatchController, name: &str, miles: f64) -> Driver {
    let driver = active_driver(name);
    controller.register_driver(driver.clone());
    let position = offset_north(pickup(), miles);
    controller
        .update_driver_location(driver.id, position.lat, position.lng, 5.0, None, None)
        .expect("location update");
    driver
}

pub fn pending_load(controller: &DispatchController, reference: &str) -> Load {
    controller
        .create_load(NewLoad {
            reference: reference.to_string(),
            hub: HUB.to_string(),
            pickup: pickup(),
            delivery: delivery(),
            required_vehicle_type: None,
            sla_deadline: Some(Utc::now() + Duration::hours(4)),
        })
        .expect("create load")
}

/// Everything queued on the notification channel so far.
pub fn drain(receiver: &mut mpsc::Receiver<Notification>) -> Vec<Notification> {
    let mut notifications = Vec::new();
    while let Ok(n) = receiver.try_recv() {
        notifications.push(n);
    }
    notifications
}
