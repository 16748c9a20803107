mod common;

use load_dispatch::config::{MAX_AVERAGE_SPEED_MPH, MAX_BLAST_TTL_SECS};
use load_dispatch::errors::DispatchError;
use load_dispatch::models::LoadStatus;
use common::*;

#[test]
fn test_mock_settings_are_valid() {
    assert!(create_mock_settings().validate().is_ok());
}

#[test]
fn test_default_blast_ttl_must_be_bounded() {
    let mut settings = create_mock_settings();

    settings.dispatch.default_blast_ttl_secs = 0;
    assert!(matches!(settings.validate(), Err(DispatchError::ConfigError(_))));

    settings.dispatch.default_blast_ttl_secs = u64::MAX;
    assert!(settings.validate().is_err());

    settings.dispatch.default_blast_ttl_secs = MAX_BLAST_TTL_SECS;
    assert!(settings.validate().is_ok());
}

#[test]
fn test_average_speed_must_be_realistic() {
    let mut settings = create_mock_settings();

    for speed in [0.0, 1e-9, f64::NAN, MAX_AVERAGE_SPEED_MPH + 1.0] {
        settings.dispatch.average_speed_mph = speed;
        assert!(settings.validate().is_err(), "speed {}", speed);
    }

    settings.dispatch.average_speed_mph = 30.0;
    assert!(settings.validate().is_ok());
}

#[test]
fn test_out_of_range_default_ttl_fails_cleanly() {
    let mut settings = create_mock_settings();
    settings.dispatch.default_blast_ttl_secs = u64::MAX;
    let (controller, _receiver) = build_controller(settings);
    let load = pending_load(&controller, "L-1300");

    let err = controller.create_blast_with_defaults(load.id, None, "dispatcher").unwrap_err();
    assert!(matches!(err, DispatchError::InvalidExpiry(_)));
    assert_eq!(controller.get_load(load.id).unwrap().status, LoadStatus::Pending);
    assert!(controller.store.active_blast_for_load(load.id).is_none());
}
