mod common;

use std::sync::Arc;
use chrono::{Duration, Utc};
use load_dispatch::dispatch::{DriverAction, ResponseOutcome};
use load_dispatch::models::{BlastStatus, LoadStatus};
use load_dispatch::state_management::Lifecycle;
use common::*;

#[tokio::test]
async fn test_blast_with_no_responses_expires_back_to_pending() {
    let (controller, mut receiver) = mock_controller();
    let sweeper = controller.expiry_sweeper(Lifecycle::new());
    let load = pending_load(&controller, "L-800");
    let expires_at = Utc::now() + Duration::seconds(30);
    let blast_id = controller.create_blast(load.id, 10.0, expires_at, None, "dispatcher").unwrap();
    assert_eq!(controller.get_blast(blast_id).unwrap().drivers_notified, 0);

    assert!(sweeper.sweep_at(expires_at - Duration::seconds(1)).is_empty());

    let report = sweeper.sweep_at(expires_at + Duration::seconds(1));
    assert_eq!(report.expired, vec![blast_id]);

    let blast = controller.get_blast(blast_id).unwrap();
    assert_eq!(blast.status, BlastStatus::Expired);
    assert_eq!(blast.accepted_by, None);
    let load = controller.get_load(load.id).unwrap();
    assert_eq!(load.status, LoadStatus::Pending);
    assert_eq!(load.driver_id, None);

    let expired_notice = drain(&mut receiver).into_iter().find(|n| n.title == "Blast expired");
    assert!(expired_notice.is_some());

    assert!(controller
        .create_blast(load.id, 10.0, Utc::now() + Duration::minutes(5), None, "dispatcher")
        .is_ok());
}

#[tokio::test]
async fn test_expiry_is_idempotent() {
    let (controller, _receiver) = mock_controller();
    let sweeper = controller.expiry_sweeper(Lifecycle::new());
    let load = pending_load(&controller, "L-810");
    driver_at(&controller, "a", 2.0);
    let expires_at = Utc::now() + Duration::seconds(30);
    let blast_id = controller.create_blast(load.id, 10.0, expires_at, None, "dispatcher").unwrap();

    let sweep_time = expires_at + Duration::seconds(5);
    assert_eq!(sweeper.sweep_at(sweep_time).expired.len(), 1);
    let history = controller.load_history(load.id).unwrap();
    let closed_at = controller.get_blast(blast_id).unwrap().closed_at;

    assert!(sweeper.sweep_at(sweep_time).is_empty());
    assert!(sweeper.expire_blast(blast_id, sweep_time).unwrap().is_none());
    assert_eq!(controller.load_history(load.id).unwrap().len(), history.len());
    assert_eq!(controller.get_blast(blast_id).unwrap().closed_at, closed_at);
}

#[tokio::test]
async fn test_accept_then_sweep_keeps_the_award() {
    let (controller, _receiver) = mock_controller();
    let sweeper = controller.expiry_sweeper(Lifecycle::new());
    let load = pending_load(&controller, "L-820");
    let a = driver_at(&controller, "a", 2.0);
    let expires_at = Utc::now() + Duration::seconds(30);
    let blast_id = controller.create_blast(load.id, 10.0, expires_at, None, "dispatcher").unwrap();

    let outcome = controller.respond(blast_id, a.id, DriverAction::Accept).unwrap();
    assert_eq!(outcome, ResponseOutcome::Assigned { load_id: load.id, driver_id: a.id });

    assert!(sweeper.sweep_at(expires_at + Duration::seconds(1)).is_empty());
    let blast = controller.get_blast(blast_id).unwrap();
    assert_eq!(blast.status, BlastStatus::Accepted);
    assert_eq!(blast.accepted_by, Some(a.id));
    assert_eq!(controller.get_load(load.id).unwrap().status, LoadStatus::Assigned);
}

#[tokio::test]
async fn test_sweep_then_accept_reports_expired() {
    let (controller, _receiver) = mock_controller();
    let sweeper = controller.expiry_sweeper(Lifecycle::new());
    let load = pending_load(&controller, "L-830");
    let a = driver_at(&controller, "a", 2.0);
    let expires_at = Utc::now() + Duration::seconds(30);
    let blast_id = controller.create_blast(load.id, 10.0, expires_at, None, "dispatcher").unwrap();

    assert_eq!(sweeper.sweep_at(expires_at + Duration::seconds(1)).expired, vec![blast_id]);
    let outcome = controller.respond(blast_id, a.id, DriverAction::Accept).unwrap();
    assert_eq!(outcome, ResponseOutcome::BlastExpired);
    assert!(outcome.is_no_longer_available());

    let blast = controller.get_blast(blast_id).unwrap();
    assert_eq!(blast.status, BlastStatus::Expired);
    assert_eq!(blast.accepted_by, None);
    let load = controller.get_load(load.id).unwrap();
    assert_eq!(load.status, LoadStatus::Pending);
    assert_eq!(load.driver_id, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_accept_racing_sweep_never_yields_both() {
    for round in 0..20 {
        let (controller, _receiver) = mock_controller();
        let sweeper = Arc::new(controller.expiry_sweeper(Lifecycle::new()));
        let load = pending_load(&controller, &format!("L-9{:02}", round));
        let a = driver_at(&controller, "a", 2.0);
        let expires_at = Utc::now() + Duration::seconds(30);
        let blast_id = controller.create_blast(load.id, 10.0, expires_at, None, "dispatcher").unwrap();

        let driver_id = a.id;
        let accepting = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.respond(blast_id, driver_id, DriverAction::Accept) })
        };
        let sweeping = {
            let sweeper = Arc::clone(&sweeper);
            tokio::spawn(async move { sweeper.sweep_at(expires_at + Duration::milliseconds(1)) })
        };
        let outcome = accepting.await.unwrap().unwrap();
        let report = sweeping.await.unwrap();

        let blast = controller.get_blast(blast_id).unwrap();
        let load = controller.get_load(load.id).unwrap();
        match blast.status {
            BlastStatus::Accepted => {
                assert!(report.expired.is_empty());
                assert_eq!(outcome, ResponseOutcome::Assigned { load_id: load.id, driver_id: a.id });
                assert_eq!(load.driver_id, Some(a.id));
                assert_eq!(load.status, LoadStatus::Assigned);
            }
            BlastStatus::Expired => {
                assert_eq!(report.expired, vec![blast_id]);
                assert_eq!(outcome, ResponseOutcome::BlastExpired);
                assert_eq!(blast.accepted_by, None);
                assert_eq!(load.status, LoadStatus::Pending);
            }
            other => panic!("unexpected blast status {}", other),
        }
    }
}

#[tokio::test]
async fn test_sweeper_repairs_unfinished_handoff() {
    let (controller, _receiver) = mock_controller();
    let sweeper = controller.expiry_sweeper(Lifecycle::new());
    let load = pending_load(&controller, "L-840");
    let a = driver_at(&controller, "a", 2.0);
    let blast_id = controller
        .create_blast(load.id, 10.0, Utc::now() + Duration::minutes(5), None, "dispatcher")
        .unwrap();

    // Award the blast without the load handoff, as if the process died between the two writes.
    controller
        .store
        .update_blast_with(blast_id, |b| {
            b.status = BlastStatus::Accepted;
            b.accepted_by = Some(a.id);
            b.accepted_at = Some(Utc::now());
        })
        .unwrap();
    assert_eq!(controller.get_load(load.id).unwrap().driver_id, None);

    let report = sweeper.sweep_at(Utc::now());
    assert_eq!(report.reconciled, vec![blast_id]);
    let load = controller.get_load(load.id).unwrap();
    assert_eq!(load.status, LoadStatus::Assigned);
    assert_eq!(load.driver_id, Some(a.id));

    assert!(sweeper.sweep_at(Utc::now()).is_empty());
    assert_eq!(
        controller.reconcile_blast(blast_id).unwrap(),
        load_dispatch::dispatch::ReconcileOutcome::Consistent
    );
}

#[tokio::test]
async fn test_reopened_load_is_not_handed_back_to_old_winner() {
    let (controller, _receiver) = mock_controller();
    let sweeper = controller.expiry_sweeper(Lifecycle::new());
    let load = pending_load(&controller, "L-850");
    let a = driver_at(&controller, "a", 2.0);
    let blast_id = controller
        .create_blast(load.id, 10.0, Utc::now() + Duration::minutes(5), None, "dispatcher")
        .unwrap();
    controller.respond(blast_id, a.id, DriverAction::Accept).unwrap();

    controller
        .update_load_status(load.id, LoadStatus::Failed, "dispatcher", Some("truck broke down".into()), None, None)
        .unwrap();
    controller
        .update_load_status(load.id, LoadStatus::Pending, "dispatcher", Some("reopen".into()), None, None)
        .unwrap();

    assert!(sweeper.sweep_at(Utc::now()).is_empty());
    let load = controller.get_load(load.id).unwrap();
    assert_eq!(load.status, LoadStatus::Pending);
    assert_eq!(load.driver_id, None);
    assert_eq!(
        controller.reconcile_blast(blast_id).unwrap(),
        load_dispatch::dispatch::ReconcileOutcome::LoadClosed
    );
}

#[tokio::test]
async fn test_sweeper_loop_stops_on_shutdown() {
    let (controller, _receiver) = mock_controller();
    let lifecycle = Lifecycle::new();
    let sweeper = controller.expiry_sweeper(lifecycle.clone());

    let handle = tokio::spawn(async move { sweeper.run().await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    lifecycle.trigger_shutdown();

    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("sweeper did not stop")
        .expect("sweeper task panicked");
}
