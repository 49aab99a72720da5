//! Proposal entity and its state machine
//!
//! A proposal is a time-bounded request from one character to another to
//! marry. Rows are immortal: rejected proposals keep the per-target
//! rejection history that drives the escalating cooldown.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MarriageError, MarriageResult};

/// Pending proposals expire this long after creation
pub const PROPOSAL_TTL_HOURS: i64 = 24;
/// Base of the per-target rejection cooldown
const REJECTION_COOLDOWN_BASE_HOURS: i64 = 24;
/// Per-target cooldown never exceeds this many days
const REJECTION_COOLDOWN_CAP_DAYS: i64 = 30;

/// Proposal lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Cancelled,
}

impl ProposalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProposalStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Expired => "expired",
            ProposalStatus::Cancelled => "cancelled",
        }
    }

    /// Storage encoding (small integer column)
    pub fn as_i16(self) -> i16 {
        match self {
            ProposalStatus::Pending => 0,
            ProposalStatus::Accepted => 1,
            ProposalStatus::Rejected => 2,
            ProposalStatus::Expired => 3,
            ProposalStatus::Cancelled => 4,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(ProposalStatus::Pending),
            1 => Some(ProposalStatus::Accepted),
            2 => Some(ProposalStatus::Rejected),
            3 => Some(ProposalStatus::Expired),
            4 => Some(ProposalStatus::Cancelled),
            _ => None,
        }
    }
}

/// Cooldown before a proposer may re-target a character that rejected
/// them: `24h × 2^rejection_count`, capped at 30 days.
pub fn rejection_cooldown(rejection_count: u32) -> Duration {
    let doublings = rejection_count.min(16);
    let hours = REJECTION_COOLDOWN_BASE_HOURS.saturating_mul(1i64 << doublings);
    Duration::hours(hours).min(Duration::days(REJECTION_COOLDOWN_CAP_DAYS))
}

/// A marriage proposal between two characters of one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u32,
    pub proposer_id: u32,
    pub target_id: u32,
    pub status: ProposalStatus,
    pub proposed_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    /// How many times this target has rejected this proposer, historically
    pub rejection_count: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    /// Build a fresh pending proposal. The id is assigned by the store on
    /// insert; `rejection_count` carries over the pair's rejection history.
    pub fn new(
        tenant_id: Uuid,
        proposer_id: u32,
        target_id: u32,
        rejection_count: u32,
        now: DateTime<Utc>,
    ) -> MarriageResult<Self> {
        if proposer_id == target_id {
            return Err(MarriageError::SelfProposal {
                character_id: proposer_id,
            });
        }
        Ok(Self {
            id: 0,
            proposer_id,
            target_id,
            status: ProposalStatus::Pending,
            proposed_at: now,
            responded_at: None,
            expires_at: now + Duration::hours(PROPOSAL_TTL_HOURS),
            rejection_count,
            cooldown_until: None,
            tenant_id,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether the target may still answer this proposal at `now`
    pub fn can_accept(&self, now: DateTime<Utc>) -> bool {
        self.status == ProposalStatus::Pending && now < self.expires_at
    }

    /// Whether the expiry sweep should pick this proposal up at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ProposalStatus::Pending && now >= self.expires_at
    }

    pub fn accept(&self, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure_pending(ProposalStatus::Accepted)?;
        if now >= self.expires_at {
            return Err(MarriageError::ProposalExpired {
                proposal_id: self.id,
            });
        }
        Ok(Self {
            status: ProposalStatus::Accepted,
            responded_at: Some(now),
            updated_at: now,
            ..self.clone()
        })
    }

    /// Reject the proposal, bump the pair's rejection counter and start
    /// the escalating per-target cooldown.
    pub fn decline(&self, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure_pending(ProposalStatus::Rejected)?;
        let cooldown = rejection_cooldown(self.rejection_count);
        Ok(Self {
            status: ProposalStatus::Rejected,
            responded_at: Some(now),
            rejection_count: self.rejection_count + 1,
            cooldown_until: Some(now + cooldown),
            updated_at: now,
            ..self.clone()
        })
    }

    pub fn cancel(&self, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure_pending(ProposalStatus::Cancelled)?;
        Ok(Self {
            status: ProposalStatus::Cancelled,
            responded_at: Some(now),
            updated_at: now,
            ..self.clone()
        })
    }

    /// Expiry sets only the status; `responded_at` stays empty because
    /// nobody answered.
    pub fn expire(&self, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure_pending(ProposalStatus::Expired)?;
        Ok(Self {
            status: ProposalStatus::Expired,
            updated_at: now,
            ..self.clone()
        })
    }

    fn ensure_pending(&self, to: ProposalStatus) -> MarriageResult<()> {
        if self.status != ProposalStatus::Pending {
            return Err(MarriageError::InvalidStateTransition {
                entity: "proposal",
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn proposal(now: DateTime<Utc>) -> Proposal {
        Proposal::new(Uuid::new_v4(), 100, 200, 0, now).unwrap()
    }

    #[test]
    fn new_proposal_expires_after_24h() {
        let now = Utc::now();
        let p = proposal(now);
        assert_eq!(p.status, ProposalStatus::Pending);
        assert_eq!(p.expires_at, now + Duration::hours(24));
        assert!(p.responded_at.is_none());
    }

    #[test]
    fn self_proposal_is_rejected() {
        let err = Proposal::new(Uuid::new_v4(), 7, 7, 0, Utc::now()).unwrap_err();
        assert!(matches!(err, MarriageError::SelfProposal { character_id: 7 }));
    }

    #[test]
    fn accept_is_still_possible_just_before_expiry() {
        let now = Utc::now();
        let p = proposal(now);
        let just_before = p.expires_at - Duration::seconds(1);
        assert!(p.can_accept(just_before));
        assert!(p.accept(just_before).is_ok());
    }

    #[test]
    fn accept_fails_exactly_at_expiry() {
        let now = Utc::now();
        let p = proposal(now);
        let err = p.accept(p.expires_at).unwrap_err();
        assert!(matches!(err, MarriageError::ProposalExpired { .. }));
        assert!(p.is_expired_at(p.expires_at));
    }

    #[test]
    fn decline_bumps_count_and_sets_cooldown() {
        let now = Utc::now();
        let declined = proposal(now).decline(now).unwrap();
        assert_eq!(declined.status, ProposalStatus::Rejected);
        assert_eq!(declined.rejection_count, 1);
        assert_eq!(declined.cooldown_until, Some(now + Duration::hours(24)));
        assert_eq!(declined.responded_at, Some(now));
    }

    #[test]
    fn terminal_proposals_reject_further_transitions() {
        let now = Utc::now();
        let accepted = proposal(now).accept(now).unwrap();
        let err = accepted.decline(now).unwrap_err();
        assert!(matches!(
            err,
            MarriageError::InvalidStateTransition {
                entity: "proposal",
                from: "accepted",
                to: "rejected",
            }
        ));
    }

    #[test]
    fn expire_leaves_responded_at_empty() {
        let now = Utc::now();
        let expired = proposal(now).expire(now + Duration::hours(25)).unwrap();
        assert_eq!(expired.status, ProposalStatus::Expired);
        assert!(expired.responded_at.is_none());
    }

    #[test]
    fn cooldown_doubles_until_the_cap() {
        assert_eq!(rejection_cooldown(0), Duration::hours(24));
        for r in 0..4 {
            assert_eq!(rejection_cooldown(r + 1), rejection_cooldown(r) * 2);
        }
        // 24h * 2^5 = 32 days, past the 30-day ceiling
        assert_eq!(rejection_cooldown(5), Duration::days(30));
        assert_eq!(rejection_cooldown(60), Duration::days(30));
    }

    #[test]
    fn status_storage_encoding_round_trips() {
        for status in [
            ProposalStatus::Pending,
            ProposalStatus::Accepted,
            ProposalStatus::Rejected,
            ProposalStatus::Expired,
            ProposalStatus::Cancelled,
        ] {
            assert_eq!(ProposalStatus::from_i16(status.as_i16()), Some(status));
        }
        assert_eq!(ProposalStatus::from_i16(9), None);
    }
}
