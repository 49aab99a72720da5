//! End-to-end command scenarios over the in-memory store

mod common;

use chrono::Duration;

use common::harness;
use marriage_service::domain::{CeremonyStatus, MarriageStatus, ProposalStatus};
use marriage_service::MarriageError;

const ALICE: u32 = 100;
const BOB: u32 = 200;

fn couple() -> common::Harness {
    harness(&[(ALICE, 30), (BOB, 42), (300, 12), (301, 15)])
}

#[tokio::test]
async fn happy_path_from_proposal_to_married() {
    let h = couple();
    let p = h.processor();

    let proposal = p.propose(ALICE, BOB).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Pending);
    assert_eq!(proposal.expires_at, proposal.proposed_at + Duration::hours(24));

    let marriage = p.accept(BOB, proposal.id).await.unwrap();
    assert_eq!(marriage.status, MarriageStatus::Engaged);
    assert_eq!(marriage.character_id_1, ALICE);
    assert_eq!(marriage.character_id_2, BOB);

    let scheduled_at = h.now() + Duration::hours(1);
    let ceremony = p
        .schedule_ceremony(ALICE, marriage.id, scheduled_at, vec![300, 301])
        .await
        .unwrap();
    assert_eq!(ceremony.status, CeremonyStatus::Scheduled);
    assert_eq!(ceremony.invitees, vec![300, 301]);

    p.start_ceremony(ALICE, ceremony.id).await.unwrap();
    let married = p.complete_ceremony(BOB, ceremony.id).await.unwrap();
    assert_eq!(married.status, MarriageStatus::Married);

    // final state through the query surface
    assert_eq!(
        p.get_marriage(marriage.id).await.unwrap().status,
        MarriageStatus::Married
    );
    assert_eq!(
        p.get_ceremony(ceremony.id).await.unwrap().status,
        CeremonyStatus::Completed
    );

    // each domain event is delivered once per partner, in staging order
    assert_eq!(
        h.publisher.names(),
        vec![
            "PROPOSAL_CREATED",
            "PROPOSAL_CREATED",
            "PROPOSAL_ACCEPTED",
            "PROPOSAL_ACCEPTED",
            "CEREMONY_SCHEDULED",
            "CEREMONY_SCHEDULED",
            "CEREMONY_STARTED",
            "CEREMONY_STARTED",
            "CEREMONY_COMPLETED",
            "CEREMONY_COMPLETED",
            "MARRIAGE_CREATED",
            "MARRIAGE_CREATED",
        ]
    );
    let recipients: Vec<u32> = h.publisher.events().iter().map(|(c, _)| *c).collect();
    assert_eq!(&recipients[..2], &[ALICE, BOB]);
}

#[tokio::test]
async fn rejection_escalates_the_target_cooldown() {
    let h = couple();
    let p = h.processor();

    let proposal = p.propose(ALICE, BOB).await.unwrap();
    let declined = p.decline(BOB, proposal.id).await.unwrap();
    assert_eq!(declined.status, ProposalStatus::Rejected);
    assert_eq!(declined.rejection_count, 1);
    assert_eq!(declined.cooldown_until, Some(h.now() + Duration::hours(24)));

    // 23h59m later the per-target cooldown still holds
    h.clock.advance(Duration::hours(23) + Duration::minutes(59));
    let err = p.propose(ALICE, BOB).await.unwrap_err();
    assert!(matches!(err, MarriageError::TargetCooldown { .. }));

    // 24h01m after the decline it clears, and the history carries over
    h.clock.advance(Duration::minutes(2));
    let second = p.propose(ALICE, BOB).await.unwrap();
    assert_eq!(second.rejection_count, 1);

    let declined_again = p.decline(BOB, second.id).await.unwrap();
    assert_eq!(declined_again.rejection_count, 2);
    assert_eq!(
        declined_again.cooldown_until,
        Some(h.now() + Duration::hours(48))
    );
}

#[tokio::test]
async fn self_proposal_leaves_no_trace() {
    let h = couple();
    let p = h.processor();

    let err = p.propose(ALICE, ALICE).await.unwrap_err();
    assert!(matches!(err, MarriageError::SelfProposal { character_id } if character_id == ALICE));

    assert!(p.proposals_involving(ALICE).await.unwrap().is_empty());
    assert!(h.publisher.is_empty());
}

#[tokio::test]
async fn global_cooldown_limits_proposal_rate() {
    let h = harness(&[(ALICE, 30), (BOB, 42), (500, 25)]);
    let p = h.processor();

    let first = p.propose(ALICE, BOB).await.unwrap();
    p.cancel(ALICE, first.id).await.unwrap();

    let err = p.propose(ALICE, 500).await.unwrap_err();
    assert!(matches!(err, MarriageError::GlobalCooldown { .. }));

    h.clock.advance(Duration::hours(4) + Duration::minutes(1));
    p.propose(ALICE, 500).await.unwrap();
}

#[tokio::test]
async fn eligibility_is_checked_for_both_characters() {
    let h = harness(&[(ALICE, 30), (999, 5)]);
    let p = h.processor();

    // below the level floor
    let err = p.propose(ALICE, 999).await.unwrap_err();
    assert!(matches!(
        err,
        MarriageError::InsufficientLevel {
            character_id: 999,
            level: 5,
            required: 10
        }
    ));

    // unknown in this tenant
    let err = p.propose(ALICE, 12345).await.unwrap_err();
    assert!(matches!(
        err,
        MarriageError::TenantMismatch { character_id: 12345, .. }
    ));
    assert!(h.publisher.is_empty());
}

#[tokio::test]
async fn expiry_sweep_is_idempotent() {
    let h = couple();
    let p = h.processor();

    let proposal = p.propose(ALICE, BOB).await.unwrap();
    h.publisher.clear();

    h.clock.advance(Duration::hours(25));
    assert_eq!(p.process_expired_proposals().await.unwrap(), 1);
    assert_eq!(
        p.get_proposal(proposal.id).await.unwrap().status,
        ProposalStatus::Expired
    );
    assert_eq!(h.publisher.names(), vec!["PROPOSAL_EXPIRED", "PROPOSAL_EXPIRED"]);

    // replaying the sweep changes nothing and emits nothing
    h.publisher.clear();
    assert_eq!(p.process_expired_proposals().await.unwrap(), 0);
    assert!(h.publisher.is_empty());
}

#[tokio::test]
async fn expired_proposal_cannot_be_accepted() {
    let h = couple();
    let p = h.processor();

    let proposal = p.propose(ALICE, BOB).await.unwrap();
    h.clock.advance(Duration::hours(24));
    let err = p.accept(BOB, proposal.id).await.unwrap_err();
    assert!(matches!(err, MarriageError::ProposalExpired { .. }));
}

#[tokio::test]
async fn second_accept_fails_and_only_one_marriage_exists() {
    let h = couple();
    let p = h.processor();

    let proposal = p.propose(ALICE, BOB).await.unwrap();
    let marriage = p.accept(BOB, proposal.id).await.unwrap();

    let err = p.accept(BOB, proposal.id).await.unwrap_err();
    assert!(matches!(
        err,
        MarriageError::InvalidStateTransition {
            entity: "proposal",
            from: "accepted",
            ..
        }
    ));

    let current = p.marriage_of(ALICE).await.unwrap().unwrap();
    assert_eq!(current.id, marriage.id);
}

#[tokio::test]
async fn engaged_characters_cannot_be_proposed_to() {
    let h = harness(&[(ALICE, 30), (BOB, 42), (500, 25)]);
    let p = h.processor();

    let proposal = p.propose(ALICE, BOB).await.unwrap();
    p.accept(BOB, proposal.id).await.unwrap();

    h.clock.advance(Duration::hours(5));
    let err = p.propose(500, BOB).await.unwrap_err();
    assert!(matches!(
        err,
        MarriageError::AlreadyEngaged { character_id } if character_id == BOB
    ));
}

#[tokio::test]
async fn character_deletion_cascades_to_marriage_and_ceremony() {
    let h = couple();
    let p = h.processor();

    let proposal = p.propose(ALICE, BOB).await.unwrap();
    let marriage = p.accept(BOB, proposal.id).await.unwrap();
    let ceremony = p
        .schedule_ceremony(ALICE, marriage.id, h.now() + Duration::hours(1), vec![])
        .await
        .unwrap();
    p.start_ceremony(ALICE, ceremony.id).await.unwrap();
    p.complete_ceremony(ALICE, ceremony.id).await.unwrap();

    // a married couple cannot schedule another ceremony
    let second = p
        .schedule_ceremony(ALICE, marriage.id, h.now() + Duration::hours(2), vec![300])
        .await
        .unwrap_err();
    assert!(matches!(second, MarriageError::InvalidStateTransition { .. }));

    h.publisher.clear();
    p.on_character_deleted(ALICE).await.unwrap();

    assert_eq!(
        p.get_marriage(marriage.id).await.unwrap().status,
        MarriageStatus::Expired
    );
    assert_eq!(h.publisher.names(), vec!["MARRIAGE_DELETED", "MARRIAGE_DELETED"]);

    // applying the deletion again is a no-op
    h.publisher.clear();
    p.on_character_deleted(ALICE).await.unwrap();
    assert!(h.publisher.is_empty());
}

#[tokio::test]
async fn character_deletion_cancels_active_ceremony_and_pending_proposals() {
    let h = harness(&[(ALICE, 30), (BOB, 42), (500, 25), (600, 25)]);
    let p = h.processor();

    // a stale courtship of the soon-deleted character, created before the
    // engagement, plus one between bystanders
    let stale = p.propose(500, ALICE).await.unwrap();
    let side_proposal = p.propose(600, 500).await.unwrap();

    let proposal = p.propose(ALICE, BOB).await.unwrap();
    let marriage = p.accept(BOB, proposal.id).await.unwrap();
    let ceremony = p
        .schedule_ceremony(ALICE, marriage.id, h.now() + Duration::hours(1), vec![])
        .await
        .unwrap();
    p.start_ceremony(ALICE, ceremony.id).await.unwrap();

    h.publisher.clear();
    p.on_character_deleted(ALICE).await.unwrap();

    assert_eq!(
        p.get_proposal(stale.id).await.unwrap().status,
        ProposalStatus::Cancelled
    );
    assert_eq!(
        p.get_marriage(marriage.id).await.unwrap().status,
        MarriageStatus::Expired
    );
    assert_eq!(
        p.get_ceremony(ceremony.id).await.unwrap().status,
        CeremonyStatus::Cancelled
    );
    assert_eq!(
        h.publisher.names(),
        vec![
            "PROPOSAL_CANCELLED",
            "PROPOSAL_CANCELLED",
            "MARRIAGE_DELETED",
            "MARRIAGE_DELETED",
            "CEREMONY_CANCELLED",
            "CEREMONY_CANCELLED",
        ]
    );

    // the bystanders' proposal is untouched
    assert_eq!(
        p.get_proposal(side_proposal.id).await.unwrap().status,
        ProposalStatus::Pending
    );
}

#[tokio::test]
async fn divorce_cancels_the_open_ceremony_transactionally() {
    let h = couple();
    let p = h.processor();

    let proposal = p.propose(ALICE, BOB).await.unwrap();
    let marriage = p.accept(BOB, proposal.id).await.unwrap();
    let ceremony = p
        .schedule_ceremony(BOB, marriage.id, h.now() + Duration::hours(1), vec![300])
        .await
        .unwrap();

    h.publisher.clear();
    let divorced = p.divorce(ALICE, marriage.id).await.unwrap();
    assert_eq!(divorced.status, MarriageStatus::Divorced);
    assert_eq!(
        p.get_ceremony(ceremony.id).await.unwrap().status,
        CeremonyStatus::Cancelled
    );
    assert_eq!(
        h.publisher.names(),
        vec![
            "MARRIAGE_DIVORCED",
            "MARRIAGE_DIVORCED",
            "CEREMONY_CANCELLED",
            "CEREMONY_CANCELLED",
        ]
    );
}

#[tokio::test]
async fn only_participants_may_act() {
    let h = harness(&[(ALICE, 30), (BOB, 42), (500, 25)]);
    let p = h.processor();

    let proposal = p.propose(ALICE, BOB).await.unwrap();
    let err = p.accept(500, proposal.id).await.unwrap_err();
    assert!(matches!(err, MarriageError::NotParticipant { character_id: 500 }));

    let err = p.cancel(BOB, proposal.id).await.unwrap_err();
    assert!(matches!(err, MarriageError::NotParticipant { character_id } if character_id == BOB));

    let marriage = p.accept(BOB, proposal.id).await.unwrap();
    let err = p.divorce(500, marriage.id).await.unwrap_err();
    assert!(matches!(err, MarriageError::NotParticipant { character_id: 500 }));
}
