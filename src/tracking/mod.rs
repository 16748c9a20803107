pub mod geofence_monitor;

pub use geofence_monitor::{evaluate_arrival, watched_geofence, GeofenceMonitor, GEOFENCE_ACTOR};
