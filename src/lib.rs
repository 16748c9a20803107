pub mod alerting;
pub mod config;
pub mod controllers;
pub mod dispatch;
pub mod errors;
pub mod geo;
pub mod init;
pub mod models;
pub mod monitoring;
pub mod repositories;
pub mod state_management;
pub mod tracking;
pub mod utils;
