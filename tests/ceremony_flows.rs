//! Ceremony command flows and boundary behaviors

mod common;

use chrono::Duration;

use common::harness;
use marriage_service::domain::{CeremonyStatus, Marriage, MarriageStatus};
use marriage_service::MarriageError;

const ALICE: u32 = 100;
const BOB: u32 = 200;

async fn engaged(h: &common::Harness) -> Marriage {
    let p = h.processor();
    let proposal = p.propose(ALICE, BOB).await.unwrap();
    p.accept(BOB, proposal.id).await.unwrap()
}

fn couple() -> common::Harness {
    harness(&[(ALICE, 30), (BOB, 42)])
}

#[tokio::test]
async fn ceremony_at_exactly_now_is_rejected() {
    let h = couple();
    let marriage = engaged(&h).await;
    let p = h.processor();

    let err = p
        .schedule_ceremony(ALICE, marriage.id, h.now(), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, MarriageError::ScheduledInPast { .. }));
}

#[tokio::test]
async fn only_one_open_ceremony_per_marriage() {
    let h = couple();
    let marriage = engaged(&h).await;
    let p = h.processor();

    p.schedule_ceremony(ALICE, marriage.id, h.now() + Duration::hours(1), vec![])
        .await
        .unwrap();
    let err = p
        .schedule_ceremony(BOB, marriage.id, h.now() + Duration::hours(2), vec![])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MarriageError::CeremonyAlreadyScheduled { marriage_id } if marriage_id == marriage.id
    ));
}

#[tokio::test]
async fn sixteenth_invitee_is_rejected_and_state_is_unchanged() {
    let h = couple();
    let marriage = engaged(&h).await;
    let p = h.processor();

    let full_list: Vec<u32> = (1000..1015).collect();
    let ceremony = p
        .schedule_ceremony(ALICE, marriage.id, h.now() + Duration::hours(1), full_list)
        .await
        .unwrap();
    assert_eq!(ceremony.invitees.len(), 15);

    h.publisher.clear();
    let err = p.add_invitee(ALICE, ceremony.id, 2000).await.unwrap_err();
    assert!(matches!(err, MarriageError::InviteeLimitExceeded { .. }));
    assert_eq!(p.get_ceremony(ceremony.id).await.unwrap().invitees.len(), 15);
    assert!(h.publisher.is_empty());
}

#[tokio::test]
async fn invitees_can_be_added_and_removed_while_open() {
    let h = couple();
    let marriage = engaged(&h).await;
    let p = h.processor();

    let ceremony = p
        .schedule_ceremony(ALICE, marriage.id, h.now() + Duration::hours(1), vec![300])
        .await
        .unwrap();

    let updated = p.add_invitee(BOB, ceremony.id, 301).await.unwrap();
    assert_eq!(updated.invitees, vec![300, 301]);

    let err = p.add_invitee(BOB, ceremony.id, 300).await.unwrap_err();
    assert!(matches!(err, MarriageError::InviteeAlreadyInvited { character_id: 300 }));

    let updated = p.remove_invitee(ALICE, ceremony.id, 300).await.unwrap();
    assert_eq!(updated.invitees, vec![301]);

    let names = h.publisher.names();
    assert!(names.contains(&"INVITEE_ADDED"));
    assert!(names.contains(&"INVITEE_REMOVED"));
}

#[tokio::test]
async fn active_ceremony_cannot_be_cancelled_by_command() {
    let h = couple();
    let marriage = engaged(&h).await;
    let p = h.processor();

    let ceremony = p
        .schedule_ceremony(ALICE, marriage.id, h.now() + Duration::hours(1), vec![])
        .await
        .unwrap();
    p.start_ceremony(ALICE, ceremony.id).await.unwrap();

    let err = p.cancel_ceremony(ALICE, ceremony.id).await.unwrap_err();
    assert!(matches!(
        err,
        MarriageError::InvalidStateTransition {
            entity: "ceremony",
            from: "active",
            to: "cancelled",
        }
    ));
    assert_eq!(
        p.get_ceremony(ceremony.id).await.unwrap().status,
        CeremonyStatus::Active
    );
}

#[tokio::test]
async fn postponed_ceremony_can_be_rescheduled_and_completed() {
    let h = couple();
    let marriage = engaged(&h).await;
    let p = h.processor();

    let ceremony = p
        .schedule_ceremony(ALICE, marriage.id, h.now() + Duration::hours(1), vec![])
        .await
        .unwrap();
    p.start_ceremony(ALICE, ceremony.id).await.unwrap();
    p.postpone_ceremony(BOB, ceremony.id).await.unwrap();

    let new_time = h.now() + Duration::days(1);
    let rescheduled = p
        .reschedule_ceremony(ALICE, ceremony.id, new_time)
        .await
        .unwrap();
    assert_eq!(rescheduled.status, CeremonyStatus::Scheduled);
    assert_eq!(rescheduled.scheduled_at, new_time);

    p.start_ceremony(ALICE, ceremony.id).await.unwrap();
    let married = p.complete_ceremony(ALICE, ceremony.id).await.unwrap();
    assert_eq!(married.status, MarriageStatus::Married);
}

#[tokio::test]
async fn advance_ceremony_state_routes_to_the_matching_command() {
    let h = couple();
    let marriage = engaged(&h).await;
    let p = h.processor();

    let ceremony = p
        .schedule_ceremony(ALICE, marriage.id, h.now() + Duration::hours(1), vec![])
        .await
        .unwrap();

    p.advance_ceremony_state(ALICE, ceremony.id, CeremonyStatus::Active)
        .await
        .unwrap();
    assert_eq!(
        p.get_ceremony(ceremony.id).await.unwrap().status,
        CeremonyStatus::Active
    );

    p.advance_ceremony_state(BOB, ceremony.id, CeremonyStatus::Completed)
        .await
        .unwrap();
    assert_eq!(
        p.get_marriage(marriage.id).await.unwrap().status,
        MarriageStatus::Married
    );

    let err = p
        .advance_ceremony_state(ALICE, ceremony.id, CeremonyStatus::Scheduled)
        .await
        .unwrap_err();
    assert!(matches!(err, MarriageError::Envelope(_)));
}

#[tokio::test]
async fn failed_commands_publish_no_domain_events() {
    let h = couple();
    let marriage = engaged(&h).await;
    let p = h.processor();

    h.publisher.clear();
    assert!(p
        .schedule_ceremony(ALICE, marriage.id, h.now() - Duration::hours(1), vec![])
        .await
        .is_err());
    assert!(p.start_ceremony(ALICE, 999).await.is_err());
    assert!(p.divorce(999, marriage.id).await.is_err());
    assert!(h.publisher.is_empty());
}

#[tokio::test]
async fn breaking_off_an_engagement_divorces_it() {
    let h = couple();
    let marriage = engaged(&h).await;
    let p = h.processor();

    let divorced = p.divorce(BOB, marriage.id).await.unwrap();
    assert_eq!(divorced.status, MarriageStatus::Divorced);

    // both characters are free to court again after the global window
    h.clock.advance(Duration::hours(5));
    p.propose(ALICE, BOB).await.unwrap();
}
