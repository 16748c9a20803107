/// # Dispatch Errors
/// This module defines the `DispatchError` enum, which encapsulates the failures that can occur within the load dispatch engine.
/// Race outcomes such as losing an acceptance to another driver are not errors; they are returned as
/// `ResponseOutcome` values by the dispatch layer. What remains here is rejected input, missing records,
/// illegal state changes and infrastructure failures.


use std::io;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use uuid::Uuid;
use crate::models::{BlastStatus, LoadStatus, ResponseStatus};

#[derive(Error, Debug)]
pub enum DispatchError {
    /// A blast radius that is zero, negative or not a number.
    #[error("Invalid blast radius: {0} miles")]
    InvalidRadius(f64),

    /// A blast expiry that is not in the future.
    #[error("Invalid blast expiry: {0}")]
    InvalidExpiry(String),

    /// Latitude/longitude outside the valid range or a negative accuracy.
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    /// A transition into a driver-owned status was requested for a load with no driver.
    #[error("Load {0} has no driver; use an assignment to set one")]
    MissingDriver(Uuid),

    #[error("Load not found: {0}")]
    LoadNotFound(Uuid),

    #[error("Driver not found: {0}")]
    DriverNotFound(Uuid),

    #[error("Blast not found: {0}")]
    BlastNotFound(Uuid),

    /// The driver was never offered this blast.
    #[error("Driver {driver_id} was not notified of blast {blast_id}")]
    DriverNotNotified { blast_id: Uuid, driver_id: Uuid },

    /// The load already has a non-terminal blast.
    #[error("Load {load_id} already has active blast {blast_id}")]
    LoadAlreadyBlasted { load_id: Uuid, blast_id: Uuid },

    /// The load is not in a status that can be offered to drivers.
    #[error("Load {load_id} cannot be blasted while {status}")]
    LoadNotBlastable { load_id: Uuid, status: LoadStatus },

    /// The requested edge does not exist in the load status machine.
    #[error("Invalid load transition: {from} -> {to}")]
    InvalidTransition { from: LoadStatus, to: LoadStatus },

    /// The blast is not in the status the operation requires.
    #[error("Blast {blast_id} is {status}")]
    InvalidBlastState { blast_id: Uuid, status: BlastStatus },

    /// The driver's response is already final and cannot take the requested action.
    #[error("Response of driver {driver_id} to blast {blast_id} is already {status}")]
    ResponseClosed { blast_id: Uuid, driver_id: Uuid, status: ResponseStatus },

    /// The load's driver slot was taken by someone else.
    #[error("Load {load_id} is already assigned to driver {driver_id}")]
    LoadAlreadyAssigned { load_id: Uuid, driver_id: Uuid },

    /// The driver cannot take a load right now.
    #[error("Driver {driver_id} is unavailable: {reason}")]
    DriverUnavailable { driver_id: Uuid, reason: String },

    /// Represents errors arising from misconfigurations or invalid settings.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Represents standard input/output errors.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Represents errors raised while delivering a notification.
    #[error("Notification error: {0}")]
    NotificationError(String),

    /// Represents errors when sending data over a channel.
    #[error("Channel send error: {0}")]
    ChannelSendError(String),

    /// Represents errors during the initialization of the logging system.
    #[error("Logging initialization error: {0}")]
    LoggingError(String),

    /// Represents errors that occur during serialization or deserialization of data.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl DispatchError {
    /// Malformed input, rejected synchronously and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DispatchError::InvalidRadius(_)
                | DispatchError::InvalidExpiry(_)
                | DispatchError::InvalidCoordinates(_)
                | DispatchError::MissingDriver(_)
        )
    }

    /// Expected results of concurrent operation that callers should surface, not retry.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            DispatchError::LoadAlreadyBlasted { .. }
                | DispatchError::LoadNotBlastable { .. }
                | DispatchError::InvalidTransition { .. }
                | DispatchError::InvalidBlastState { .. }
                | DispatchError::ResponseClosed { .. }
                | DispatchError::LoadAlreadyAssigned { .. }
                | DispatchError::DriverUnavailable { .. }
        )
    }
}

impl<T> From<SendError<T>> for DispatchError {
    fn from(err: SendError<T>) -> Self {
        DispatchError::ChannelSendError(err.to_string())
    }
}

impl From<config::ConfigError> for DispatchError {
    fn from(err: config::ConfigError) -> Self {
        DispatchError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        DispatchError::NotificationError(err.to_string())
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
