//! # Configuration Management

//! This module handles the configuration loading and management for the load dispatch engine.
//! It leverages the `config` crate to provide a structured way to define and access configuration settings from:

//! * YAML configuration files (default.yaml, then development.yaml or production.yaml)
//! * Environment variables

//! The core of this module is the `Settings` struct, which encapsulates all the configuration settings required by the application.

use serde::{Deserialize, Serialize};
use config::{Config, Environment, File};
use std::{env, fmt};
use std::path::PathBuf;
use secrecy::Secret;
use log::debug;
use url::Url;
use crate::errors::DispatchError;

/// Longest offer lifetime a blast may be given by default (one week).
pub const MAX_BLAST_TTL_SECS: u64 = 7 * 24 * 3600;
pub const MIN_AVERAGE_SPEED_MPH: f64 = 1.0;
pub const MAX_AVERAGE_SPEED_MPH: f64 = 120.0;

/// Represents the complete set of configuration settings for the dispatch engine.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Settings for application logging
    pub logging: LoggingSettings,
    /// Blast and eligibility tuning
    pub dispatch: DispatchSettings,
    /// Arrival detection thresholds
    pub geofence: GeofenceSettings,
    /// Background expiry sweep
    pub sweeper: SweeperSettings,
    /// Push delivery collaborator
    pub notifications: NotificationSettings,
}

/// Holds the configuration settings for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    /// The logging level (e.g., "info", "debug", "error")
    pub level: String,
    /// The directory path where log files will be stored (optional)
    pub path: Option<PathBuf>,
}

/// Tuning for blasts, eligibility and driver suggestions
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatchSettings {
    /// Radius used when a dispatcher does not pick one
    pub default_radius_miles: f64,
    /// Offer lifetime used when a dispatcher does not pick an expiry
    pub default_blast_ttl_secs: u64,
    /// Ignore the hub of drivers when selecting candidates
    pub hub_agnostic: bool,
    /// Locations older than this are not trusted for eligibility
    pub location_staleness_secs: u64,
    /// Search radius for manual-assign suggestions
    pub suggestion_radius_miles: f64,
    /// Speed used for ETA estimates
    pub average_speed_mph: f64,
    /// Samples kept per driver in the location history
    pub location_history_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeofenceSettings {
    pub arrival_threshold_meters: f64,
    /// Samples with a worse accuracy radius are ignored
    pub max_accuracy_meters: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SweeperSettings {
    pub interval_secs: u64,  // in seconds
}

/// Holds the settings of the push/notification collaborator
#[derive(Debug, Deserialize, Clone)]
pub struct NotificationSettings {
    /// Master switch; when off, notifications are dropped after logging
    pub enabled: bool,
    /// Webhook that receives notifications as JSON (optional, logs only when absent)
    pub webhook_url: Option<String>,
    /// Bearer token for the webhook
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub auth_token: Option<Secret<String>>,
    /// Recipient identities of the dispatch desk
    pub dispatcher_recipients: Vec<String>,
    /// Tell the drivers who lost a blast that the load is gone
    pub notify_losers: bool,
    /// Confirm geofence arrivals back to the driver
    pub notify_driver_on_arrival: bool,
    /// Bound of the in-process delivery queue
    pub channel_capacity: usize,
}

impl NotificationSettings {
    /// Parses the configured webhook, if any.
    pub fn webhook(&self) -> Result<Option<Url>, DispatchError> {
        self.webhook_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| DispatchError::ConfigError(format!("Invalid webhook url {}: {}", raw, e)))
            })
            .transpose()
    }
}

/// # Settings Initialization
///
/// The `Settings` implementation provides a `new` function to load and construct the configuration settings.
impl Settings {
    /// Loads and constructs the application settings from various configuration sources.
    ///
    /// This function reads configuration settings from the following sources, in order of precedence:
    ///
    /// 1. `default.yaml`: Contains default settings for the application
    /// 2. Environment-specific YAML file (e.g., `development.yaml` or `production.yaml`) based on the `RUN_MODE` environment variable
    /// 3. Environment variables prefixed with `APP` (e.g., `APP__GEOFENCE__ARRIVAL_THRESHOLD_METERS`)
    ///
    /// The `CONFIG_DIR` environment variable can be used to specify the directory where the YAML configuration files are located (defaults to "src/config").
    pub fn new() -> Result<Self, DispatchError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| "src/config".into());
        debug!("Run Mode: {:?}, Config Dir: {:?}", run_mode, config_dir);

        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/default", config_dir)))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mut s: Self = s.try_deserialize::<Settings>()
            .map_err(DispatchError::from)?;

        if let Some(ref mut path) = s.logging.path {
            *path = env::current_dir()?.join(path.clone());
        }

        s.validate()?;
        debug!("{}", s.dispatch);

        Ok(s)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if !(self.dispatch.default_radius_miles > 0.0) {
            return Err(DispatchError::ConfigError("dispatch.default_radius_miles must be positive".into()));
        }
        if self.dispatch.default_blast_ttl_secs == 0 || self.dispatch.default_blast_ttl_secs > MAX_BLAST_TTL_SECS {
            return Err(DispatchError::ConfigError(format!(
                "dispatch.default_blast_ttl_secs must be between 1 and {}",
                MAX_BLAST_TTL_SECS
            )));
        }
        if !(MIN_AVERAGE_SPEED_MPH..=MAX_AVERAGE_SPEED_MPH).contains(&self.dispatch.average_speed_mph) {
            return Err(DispatchError::ConfigError(format!(
                "dispatch.average_speed_mph must be between {} and {}",
                MIN_AVERAGE_SPEED_MPH, MAX_AVERAGE_SPEED_MPH
            )));
        }
        if self.dispatch.location_staleness_secs > MAX_BLAST_TTL_SECS {
            return Err(DispatchError::ConfigError(format!(
                "dispatch.location_staleness_secs must be at most {}",
                MAX_BLAST_TTL_SECS
            )));
        }
        if !(self.geofence.arrival_threshold_meters > 0.0) {
            return Err(DispatchError::ConfigError("geofence.arrival_threshold_meters must be positive".into()));
        }
        if self.sweeper.interval_secs == 0 {
            return Err(DispatchError::ConfigError("sweeper.interval_secs must be at least 1".into()));
        }
        if self.notifications.channel_capacity == 0 {
            return Err(DispatchError::ConfigError("notifications.channel_capacity must be at least 1".into()));
        }
        self.notifications.webhook()?;
        Ok(())
    }
}

/// Deserializes a secret string from configuration into a `Secret<String>`
fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<Secret<String>>, D::Error>
    where
        D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.map(Secret::new))
}

impl fmt::Display for DispatchSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DispatchSettings {{ default_radius_miles: {}, default_blast_ttl_secs: {}, hub_agnostic: {}, location_staleness_secs: {}, suggestion_radius_miles: {}, average_speed_mph: {} }}",
            self.default_radius_miles, self.default_blast_ttl_secs, self.hub_agnostic,
            self.location_staleness_secs, self.suggestion_radius_miles, self.average_speed_mph
        )
    }
}
