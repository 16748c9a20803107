//! # Geo Index
//!
//! Great-circle distance and radius classification used by driver eligibility and geofencing.
//! Everything here is a pure function of its arguments.

use std::fmt;
use serde::{Deserialize, Serialize};
use crate::errors::{DispatchError, DispatchResult};

/// Mean Earth radius in statute miles.
pub const EARTH_RADIUS_MILES: f64 = 3958.8;
pub const METERS_PER_MILE: f64 = 1609.344;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Builds a point, rejecting values outside the valid latitude/longitude range.
    pub fn validated(lat: f64, lng: f64) -> DispatchResult<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(DispatchError::InvalidCoordinates(format!("latitude {} out of range", lat)));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(DispatchError::InvalidCoordinates(format!("longitude {} out of range", lng)));
        }
        Ok(Self { lat, lng })
    }

    pub fn distance_miles(&self, other: &GeoPoint) -> f64 {
        distance_miles(*self, *other)
    }

    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        distance_miles(*self, *other) * METERS_PER_MILE
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lat, self.lng)
    }
}

/// Calculate the great-circle distance between two positions using the haversine formula.
///
/// # Returns
///
/// Distance in statute miles.
pub fn distance_miles(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lng = (to.lng - from.lng).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_MILES * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_degree_of_latitude_is_about_69_miles() {
        let d = distance_miles(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        assert!((d - 69.09).abs() < 0.1, "got {}", d);
    }

    #[test]
    fn phoenix_to_tucson() {
        let phoenix = GeoPoint::new(33.4484, -112.0740);
        let tucson = GeoPoint::new(32.2226, -110.9747);
        let d = phoenix.distance_miles(&tucson);
        assert!((d - 106.0).abs() < 3.0, "got {}", d);
    }

    #[test]
    fn identical_points_are_zero_apart() {
        let p = GeoPoint::new(33.45, -112.07);
        assert_eq!(distance_miles(p, p), 0.0);
        assert_eq!(p.distance_meters(&p), 0.0);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(GeoPoint::validated(91.0, 0.0).is_err());
        assert!(GeoPoint::validated(0.0, -180.5).is_err());
        assert!(GeoPoint::validated(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::validated(33.45, -112.07).is_ok());
    }
}
