//! Ceremony entity and its state machine
//!
//! A ceremony is the scheduled event that turns an engagement into a
//! marriage. The guest list is an ordered set: insertion order is kept,
//! duplicates are rejected, and it never exceeds [`MAX_INVITEES`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MarriageError, MarriageResult};

/// Guest list capacity
pub const MAX_INVITEES: usize = 15;

/// Ceremony lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CeremonyStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
    Postponed,
}

impl CeremonyStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CeremonyStatus::Completed | CeremonyStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CeremonyStatus::Scheduled => "scheduled",
            CeremonyStatus::Active => "active",
            CeremonyStatus::Completed => "completed",
            CeremonyStatus::Cancelled => "cancelled",
            CeremonyStatus::Postponed => "postponed",
        }
    }

    /// Storage encoding (small integer column)
    pub fn as_i16(self) -> i16 {
        match self {
            CeremonyStatus::Scheduled => 0,
            CeremonyStatus::Active => 1,
            CeremonyStatus::Completed => 2,
            CeremonyStatus::Cancelled => 3,
            CeremonyStatus::Postponed => 4,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(CeremonyStatus::Scheduled),
            1 => Some(CeremonyStatus::Active),
            2 => Some(CeremonyStatus::Completed),
            3 => Some(CeremonyStatus::Cancelled),
            4 => Some(CeremonyStatus::Postponed),
            _ => None,
        }
    }
}

/// A scheduled wedding for one marriage of one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ceremony {
    pub id: u32,
    pub marriage_id: u32,
    pub scheduled_at: DateTime<Utc>,
    pub status: CeremonyStatus,
    /// Ordered, duplicate-free, at most [`MAX_INVITEES`] entries
    pub invitees: Vec<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub postponed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ceremony {
    /// Build a fresh scheduled ceremony. `scheduled_at` must lie strictly
    /// in the future; the invitee list is de-duplicated preserving
    /// insertion order before the capacity check.
    pub fn schedule(
        tenant_id: Uuid,
        marriage_id: u32,
        scheduled_at: DateTime<Utc>,
        invitees: Vec<u32>,
        now: DateTime<Utc>,
    ) -> MarriageResult<Self> {
        if scheduled_at <= now {
            return Err(MarriageError::ScheduledInPast { scheduled_at });
        }
        let mut guest_list = Vec::with_capacity(invitees.len().min(MAX_INVITEES));
        for invitee in invitees {
            if !guest_list.contains(&invitee) {
                guest_list.push(invitee);
            }
        }
        if guest_list.len() > MAX_INVITEES {
            return Err(MarriageError::InviteeLimitExceeded { ceremony_id: 0 });
        }
        Ok(Self {
            id: 0,
            marriage_id,
            scheduled_at,
            status: CeremonyStatus::Scheduled,
            invitees: guest_list,
            started_at: None,
            completed_at: None,
            postponed_at: None,
            cancelled_at: None,
            tenant_id,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn start(&self, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure(self.status == CeremonyStatus::Scheduled, CeremonyStatus::Active)?;
        Ok(Self {
            status: CeremonyStatus::Active,
            started_at: Some(now),
            updated_at: now,
            ..self.clone()
        })
    }

    pub fn complete(&self, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure(self.status == CeremonyStatus::Active, CeremonyStatus::Completed)?;
        Ok(Self {
            status: CeremonyStatus::Completed,
            completed_at: Some(now),
            updated_at: now,
            ..self.clone()
        })
    }

    pub fn postpone(&self, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure(self.status == CeremonyStatus::Active, CeremonyStatus::Postponed)?;
        Ok(Self {
            status: CeremonyStatus::Postponed,
            postponed_at: Some(now),
            updated_at: now,
            ..self.clone()
        })
    }

    /// Cancel any non-terminal ceremony. The user-facing command only
    /// permits `scheduled` and `postponed`; dissolution cascades (divorce,
    /// character deletion) and the timeout sweep also cancel `active`
    /// ceremonies through this transition.
    pub fn cancel(&self, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure(!self.status.is_terminal(), CeremonyStatus::Cancelled)?;
        Ok(Self {
            status: CeremonyStatus::Cancelled,
            cancelled_at: Some(now),
            updated_at: now,
            ..self.clone()
        })
    }

    /// Move a scheduled or postponed ceremony to a new future time
    pub fn reschedule(
        &self,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MarriageResult<Self> {
        self.ensure(
            matches!(
                self.status,
                CeremonyStatus::Scheduled | CeremonyStatus::Postponed
            ),
            CeremonyStatus::Scheduled,
        )?;
        if scheduled_at <= now {
            return Err(MarriageError::ScheduledInPast { scheduled_at });
        }
        Ok(Self {
            status: CeremonyStatus::Scheduled,
            scheduled_at,
            updated_at: now,
            ..self.clone()
        })
    }

    pub fn add_invitee(&self, character_id: u32, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure_guest_list_open()?;
        if self.invitees.contains(&character_id) {
            return Err(MarriageError::InviteeAlreadyInvited { character_id });
        }
        if self.invitees.len() >= MAX_INVITEES {
            return Err(MarriageError::InviteeLimitExceeded {
                ceremony_id: self.id,
            });
        }
        let mut invitees = self.invitees.clone();
        invitees.push(character_id);
        Ok(Self {
            invitees,
            updated_at: now,
            ..self.clone()
        })
    }

    pub fn remove_invitee(&self, character_id: u32, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure_guest_list_open()?;
        if !self.invitees.contains(&character_id) {
            return Err(MarriageError::InviteeNotFound { character_id });
        }
        let invitees = self
            .invitees
            .iter()
            .copied()
            .filter(|&c| c != character_id)
            .collect();
        Ok(Self {
            invitees,
            updated_at: now,
            ..self.clone()
        })
    }

    /// Guest list edits are allowed only while scheduled or active
    fn ensure_guest_list_open(&self) -> MarriageResult<()> {
        if !matches!(
            self.status,
            CeremonyStatus::Scheduled | CeremonyStatus::Active
        ) {
            return Err(MarriageError::InvalidStateTransition {
                entity: "ceremony",
                from: self.status.as_str(),
                to: self.status.as_str(),
            });
        }
        Ok(())
    }

    fn ensure(&self, precondition: bool, to: CeremonyStatus) -> MarriageResult<()> {
        if !precondition {
            return Err(MarriageError::InvalidStateTransition {
                entity: "ceremony",
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
    use chrono::Duration;

    fn scheduled(now: DateTime<Utc>, invitees: Vec<u32>) -> Ceremony {
        Ceremony::schedule(Uuid::new_v4(), 1, now + Duration::hours(1), invitees, now).unwrap()
    }

    #[test]
    fn schedule_requires_future_time() {
        let now = Utc::now();
        let err = Ceremony::schedule(Uuid::new_v4(), 1, now, vec![], now).unwrap_err();
        assert!(matches!(err, MarriageError::ScheduledInPast { .. }));
    }

    #[test]
    fn schedule_dedupes_preserving_order() {
        let c = scheduled(Utc::now(), vec![300, 301, 300, 302, 301]);
        assert_eq!(c.invitees, vec![300, 301, 302]);
    }

    #[test]
    fn full_lifecycle_to_completed() {
        let now = Utc::now();
        let active = scheduled(now, vec![300]).start(now).unwrap();
        assert_eq!(active.status, CeremonyStatus::Active);
        assert_eq!(active.started_at, Some(now));

        let completed = active.complete(now).unwrap();
        assert_eq!(completed.status, CeremonyStatus::Completed);
        assert!(completed.complete(now).is_err());
    }

    #[test]
    fn postponed_can_be_rescheduled_or_cancelled() {
        let now = Utc::now();
        let postponed = scheduled(now, vec![]).start(now).unwrap().postpone(now).unwrap();
        assert_eq!(postponed.status, CeremonyStatus::Postponed);

        let rescheduled = postponed.reschedule(now + Duration::hours(2), now).unwrap();
        assert_eq!(rescheduled.status, CeremonyStatus::Scheduled);
        assert_eq!(rescheduled.scheduled_at, now + Duration::hours(2));

        assert_eq!(
            postponed.cancel(now).unwrap().status,
            CeremonyStatus::Cancelled
        );
    }

    #[test]
    fn cancelled_is_terminal() {
        let now = Utc::now();
        let cancelled = scheduled(now, vec![]).cancel(now).unwrap();
        assert!(cancelled.start(now).is_err());
        assert!(cancelled.cancel(now).is_err());
    }

    #[test]
    fn sixteenth_invitee_is_rejected_without_mutation() {
        let now = Utc::now();
        let full = scheduled(now, (1..=15).collect());
        assert_eq!(full.invitees.len(), MAX_INVITEES);

        let err = full.add_invitee(99, now).unwrap_err();
        assert!(matches!(err, MarriageError::InviteeLimitExceeded { .. }));
        assert_eq!(full.invitees.len(), MAX_INVITEES);
    }

    #[test]
    fn duplicate_invitee_is_rejected() {
        let now = Utc::now();
        let c = scheduled(now, vec![300]);
        let err = c.add_invitee(300, now).unwrap_err();
        assert!(matches!(
            err,
            MarriageError::InviteeAlreadyInvited { character_id: 300 }
        ));
    }

    #[test]
    fn remove_unknown_invitee_fails() {
        let now = Utc::now();
        let c = scheduled(now, vec![300]);
        let err = c.remove_invitee(999, now).unwrap_err();
        assert!(matches!(err, MarriageError::InviteeNotFound { .. }));
        assert_eq!(c.remove_invitee(300, now).unwrap().invitees, Vec::<u32>::new());
    }

    #[test]
    fn guest_list_closed_after_terminal_state() {
        let now = Utc::now();
        let cancelled = scheduled(now, vec![300]).cancel(now).unwrap();
        assert!(cancelled.add_invitee(301, now).is_err());
        assert!(cancelled.remove_invitee(300, now).is_err());
    }
}
