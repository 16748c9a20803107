//! # Eligibility Filter
//!
//! Selects and orders the drivers a load can be offered to. Pure query over a roster snapshot: no
//! record is read or written here.

use std::cmp::Ordering;
use std::collections::HashSet;
use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::geo::{self, GeoPoint};
use crate::models::{Driver, DriverLocation, DriverStatus};

/// What a driver must satisfy to be offered a load.
#[derive(Debug, Clone)]
pub struct EligibilityCriteria {
    pub pickup: GeoPoint,
    pub hub: String,
    pub required_vehicle_type: Option<String>,
    pub radius_miles: f64,
    /// Accept drivers from any hub.
    pub hub_agnostic: bool,
    /// Maximum age of the driver's last known location.
    pub max_location_age: Duration,
    pub now: DateTime<Utc>,
}

/// One entry of the roster snapshot.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub driver: Driver,
    pub location: Option<DriverLocation>,
}

/// An eligible driver with the distance snapshot taken at selection time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub driver_id: Uuid,
    pub push_recipient: String,
    pub distance_miles: f64,
    pub shift_started_at: Option<DateTime<Utc>>,
}

/// A ranked manual-assignment suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSuggestion {
    pub driver_id: Uuid,
    pub distance_miles: f64,
    pub eta_minutes: f64,
    /// `None` when no cutoff was given.
    pub can_meet_cutoff: Option<bool>,
    pub shift_started_at: Option<DateTime<Utc>>,
}

/// Returns the drivers eligible for a blast, closest first.
///
/// A driver qualifies when active, in the load's hub (unless hub agnostic), able to haul the required
/// vehicle class, not already working a load, reporting a fresh location, and within the radius.
/// Equal distances go to the driver whose shift started earliest.
pub fn eligible_candidates(
    criteria: &EligibilityCriteria,
    roster: &[RosterEntry],
    busy_drivers: &HashSet<Uuid>,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = roster
        .par_iter()
        .filter(|entry| entry.driver.status == DriverStatus::Active)
        .filter(|entry| criteria.hub_agnostic || entry.driver.hub.eq_ignore_ascii_case(&criteria.hub))
        .filter(|entry| entry.driver.can_haul(criteria.required_vehicle_type.as_deref()))
        .filter(|entry| !busy_drivers.contains(&entry.driver.id))
        .filter_map(|entry| {
            let location = entry.location.as_ref()?;
            if location.age_secs(criteria.now) > criteria.max_location_age.num_seconds() {
                return None;
            }
            let distance_miles = geo::distance_miles(criteria.pickup, location.position);
            if distance_miles > criteria.radius_miles {
                return None;
            }
            Some(Candidate {
                driver_id: entry.driver.id,
                push_recipient: entry.driver.push_recipient.clone(),
                distance_miles,
                shift_started_at: entry.driver.shift_started_at,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_miles
            .total_cmp(&b.distance_miles)
            .then_with(|| earliest_shift_first(a.shift_started_at, b.shift_started_at))
    });
    candidates
}

/// Turns candidates into suggestions with an ETA at `average_speed_mph`.
///
/// Drivers who can make the cutoff come first, then lower ETA.
pub fn rank_suggestions(
    candidates: Vec<Candidate>,
    average_speed_mph: f64,
    now: DateTime<Utc>,
    cutoff: Option<DateTime<Utc>>,
) -> Vec<DriverSuggestion> {
    let mut suggestions: Vec<DriverSuggestion> = candidates
        .into_iter()
        .map(|candidate| {
            let eta_minutes = candidate.distance_miles / average_speed_mph * 60.0;
            // An ETA too large to represent cannot make any cutoff.
            let can_meet_cutoff = cutoff.map(|cutoff| {
                Duration::try_milliseconds((eta_minutes * 60_000.0).round() as i64)
                    .and_then(|eta| now.checked_add_signed(eta))
                    .is_some_and(|arrival| arrival <= cutoff)
            });
            DriverSuggestion {
                driver_id: candidate.driver_id,
                distance_miles: candidate.distance_miles,
                eta_minutes,
                can_meet_cutoff,
                shift_started_at: candidate.shift_started_at,
            }
        })
        .collect();

    suggestions.sort_by(|a, b| {
        let a_late = a.can_meet_cutoff == Some(false);
        let b_late = b.can_meet_cutoff == Some(false);
        a_late
            .cmp(&b_late)
            .then_with(|| a.eta_minutes.total_cmp(&b.eta_minutes))
            .then_with(|| earliest_shift_first(a.shift_started_at, b.shift_started_at))
    });
    suggestions
}

fn earliest_shift_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(name: &str, hub: &str, shift_hours_ago: Option<i64>, now: DateTime<Utc>) -> Driver {
        Driver {
            id: Uuid::new_v4(),
            name: name.to_string(),
            hub: hub.to_string(),
            status: DriverStatus::Active,
            vehicle_type: Some("box_truck".to_string()),
            push_recipient: format!("push:{}", name),
            shift_started_at: shift_hours_ago.map(|h| now - Duration::hours(h)),
        }
    }

    fn at(driver: &Driver, position: GeoPoint, now: DateTime<Utc>) -> RosterEntry {
        RosterEntry {
            driver: driver.clone(),
            location: Some(DriverLocation {
                driver_id: driver.id,
                position,
                accuracy_meters: 10.0,
                speed_mph: None,
                heading_degrees: None,
                active_load_id: None,
                recorded_at: now,
            }),
        }
    }

    fn criteria(now: DateTime<Utc>) -> EligibilityCriteria {
        EligibilityCriteria {
            pickup: GeoPoint::new(33.45, -112.07),
            hub: "PHX".to_string(),
            required_vehicle_type: None,
            radius_miles: 10.0,
            hub_agnostic: false,
            max_location_age: Duration::minutes(10),
            now,
        }
    }

    #[test]
    fn equal_distance_prefers_longest_idle() {
        let now = Utc::now();
        let fresh = driver("fresh", "PHX", Some(1), now);
        let idle = driver("idle", "PHX", Some(6), now);
        let spot = GeoPoint::new(33.46, -112.07);
        let roster = vec![at(&fresh, spot, now), at(&idle, spot, now)];

        let candidates = eligible_candidates(&criteria(now), &roster, &HashSet::new());
        let order: Vec<Uuid> = candidates.iter().map(|c| c.driver_id).collect();
        assert_eq!(order, vec![idle.id, fresh.id]);
    }

    #[test]
    fn excludes_other_hubs_stale_fixes_and_busy_drivers() {
        let now = Utc::now();
        let spot = GeoPoint::new(33.46, -112.07);
        let other_hub = driver("tucson", "TUS", None, now);
        let stale = driver("stale", "PHX", None, now);
        let busy = driver("busy", "PHX", None, now);
        let ok = driver("ok", "phx", None, now);

        let mut stale_entry = at(&stale, spot, now);
        if let Some(location) = stale_entry.location.as_mut() {
            location.recorded_at = now - Duration::hours(1);
        }
        let roster = vec![at(&other_hub, spot, now), stale_entry, at(&busy, spot, now), at(&ok, spot, now)];
        let busy_set: HashSet<Uuid> = [busy.id].into_iter().collect();

        let candidates = eligible_candidates(&criteria(now), &roster, &busy_set);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].driver_id, ok.id);

        let mut any_hub = criteria(now);
        any_hub.hub_agnostic = true;
        let candidates = eligible_candidates(&any_hub, &roster, &busy_set);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn vehicle_requirement_filters_drivers() {
        let now = Utc::now();
        let spot = GeoPoint::new(33.46, -112.07);
        let truck = driver("truck", "PHX", None, now);
        let mut van = driver("van", "PHX", None, now);
        van.vehicle_type = Some("cargo_van".to_string());

        let mut needs_truck = criteria(now);
        needs_truck.required_vehicle_type = Some("BOX_TRUCK".to_string());
        let candidates = eligible_candidates(&needs_truck, &[at(&truck, spot, now), at(&van, spot, now)], &HashSet::new());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].driver_id, truck.id);
    }

    #[test]
    fn suggestions_put_drivers_who_miss_the_cutoff_last() {
        let now = Utc::now();
        let near = Candidate { driver_id: Uuid::new_v4(), push_recipient: "a".into(), distance_miles: 5.0, shift_started_at: None };
        let far = Candidate { driver_id: Uuid::new_v4(), push_recipient: "b".into(), distance_miles: 60.0, shift_started_at: None };

        let ranked = rank_suggestions(vec![far.clone(), near.clone()], 30.0, now, Some(now + Duration::minutes(30)));
        assert_eq!(ranked[0].driver_id, near.driver_id);
        assert_eq!(ranked[0].can_meet_cutoff, Some(true));
        assert_eq!(ranked[1].can_meet_cutoff, Some(false));
        assert!((ranked[1].eta_minutes - 120.0).abs() < 1e-9);

        let unbounded = rank_suggestions(vec![far, near], 30.0, now, None);
        assert!(unbounded.iter().all(|s| s.can_meet_cutoff.is_none()));
    }

    #[test]
    fn crawling_speed_misses_the_cutoff_without_overflow() {
        let now = Utc::now();
        let far = Candidate { driver_id: Uuid::new_v4(), push_recipient: "a".into(), distance_miles: 40.0, shift_started_at: None };

        let ranked = rank_suggestions(vec![far], 1e-300, now, Some(now + Duration::hours(1)));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].can_meet_cutoff, Some(false));
        assert!(ranked[0].eta_minutes.is_infinite() || ranked[0].eta_minutes > 1e12);
    }
}
