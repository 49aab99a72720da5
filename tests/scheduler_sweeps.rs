//! Sweep loop behavior: ceremony timeouts and the scheduler lifecycle

mod common;

use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::sync::watch;

use common::harness;
use marriage_service::config::SchedulerConfig;
use marriage_service::domain::CeremonyStatus;
use marriage_service::retry::RetryConfig;
use marriage_service::scheduler;

const ALICE: u32 = 100;
const BOB: u32 = 200;

fn couple() -> common::Harness {
    harness(&[(ALICE, 30), (BOB, 42)])
}

async fn active_ceremony(h: &common::Harness) -> u32 {
    let p = h.processor();
    let proposal = p.propose(ALICE, BOB).await.unwrap();
    let marriage = p.accept(BOB, proposal.id).await.unwrap();
    let ceremony = p
        .schedule_ceremony(ALICE, marriage.id, h.now() + Duration::hours(1), vec![])
        .await
        .unwrap();
    h.clock.advance(Duration::hours(1));
    p.start_ceremony(ALICE, ceremony.id).await.unwrap();
    ceremony.id
}

#[tokio::test]
async fn overdue_active_ceremony_is_postponed_with_timeout_reason() {
    let h = couple();
    let ceremony_id = active_ceremony(&h).await;
    let p = h.processor();

    // not yet past the postpone threshold
    h.clock.advance(Duration::minutes(59));
    assert_eq!(p.process_ceremony_timeouts().await.unwrap(), 0);

    h.clock.advance(Duration::minutes(2));
    h.publisher.clear();
    assert_eq!(p.process_ceremony_timeouts().await.unwrap(), 1);
    assert_eq!(
        p.get_ceremony(ceremony_id).await.unwrap().status,
        CeremonyStatus::Postponed
    );
    match &h.publisher.events()[0].1 {
        marriage_service::Event::CeremonyPostponed { reason, .. } => {
            assert_eq!(reason.as_deref(), Some("CEREMONY_TIMEOUT"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn long_overdue_active_ceremony_is_cancelled() {
    let h = couple();
    let ceremony_id = active_ceremony(&h).await;
    let p = h.processor();

    // past the cancel threshold (6h by default)
    h.clock.advance(Duration::hours(7));
    h.publisher.clear();
    assert_eq!(p.process_ceremony_timeouts().await.unwrap(), 1);
    assert_eq!(
        p.get_ceremony(ceremony_id).await.unwrap().status,
        CeremonyStatus::Cancelled
    );
    match &h.publisher.events()[0].1 {
        marriage_service::Event::CeremonyCancelled { reason, .. } => {
            assert_eq!(reason.as_deref(), Some("CEREMONY_TIMEOUT"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn proposal_expiry_sweeper_runs_immediately_and_stops_cleanly() {
    let h = couple();
    let p = h.processor();
    p.propose(ALICE, BOB).await.unwrap();
    h.clock.advance(Duration::hours(25));
    h.publisher.clear();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = SchedulerConfig {
        proposal_expiry_interval_secs: 3600,
        ceremony_timeout_interval_secs: 3600,
    };
    let sweeper = scheduler::spawn_proposal_expiry(
        h.service.clone(),
        &config,
        RetryConfig::default(),
        shutdown_rx,
    );

    // the first tick fires immediately, no initial delay
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    assert_eq!(
        h.publisher.names(),
        vec!["PROPOSAL_EXPIRED", "PROPOSAL_EXPIRED"]
    );

    // local stop waits for the worker to acknowledge
    sweeper.stop().await;
    drop(shutdown_tx);
}

#[tokio::test]
async fn sweepers_observe_the_global_shutdown_signal() {
    let h = couple();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = SchedulerConfig {
        proposal_expiry_interval_secs: 3600,
        ceremony_timeout_interval_secs: 3600,
    };
    let sweeper = scheduler::spawn_ceremony_timeouts(
        h.service.clone(),
        &config,
        RetryConfig::default(),
        shutdown_rx,
    );

    shutdown_tx.send(true).unwrap();
    // the worker exits on its own; stop() then returns promptly
    tokio::time::timeout(StdDuration::from_secs(1), sweeper.stop())
        .await
        .unwrap();
}
