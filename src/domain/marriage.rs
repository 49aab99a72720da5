//! Marriage entity and its state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MarriageError, MarriageResult};

/// Marriage lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarriageStatus {
    Proposed,
    Engaged,
    Married,
    Divorced,
    Expired,
}

impl MarriageStatus {
    /// Engaged and married rows hold the one-partner-per-character slot
    pub fn is_active(self) -> bool {
        matches!(self, MarriageStatus::Engaged | MarriageStatus::Married)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MarriageStatus::Proposed => "proposed",
            MarriageStatus::Engaged => "engaged",
            MarriageStatus::Married => "married",
            MarriageStatus::Divorced => "divorced",
            MarriageStatus::Expired => "expired",
        }
    }

    /// Storage encoding (small integer column)
    pub fn as_i16(self) -> i16 {
        match self {
            MarriageStatus::Proposed => 0,
            MarriageStatus::Engaged => 1,
            MarriageStatus::Married => 2,
            MarriageStatus::Divorced => 3,
            MarriageStatus::Expired => 4,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(MarriageStatus::Proposed),
            1 => Some(MarriageStatus::Engaged),
            2 => Some(MarriageStatus::Married),
            3 => Some(MarriageStatus::Divorced),
            4 => Some(MarriageStatus::Expired),
            _ => None,
        }
    }
}

/// The durable relationship between two characters of one tenant.
/// `character_id_1` is the proposer, `character_id_2` the accepter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marriage {
    pub id: u32,
    pub character_id_1: u32,
    pub character_id_2: u32,
    pub status: MarriageStatus,
    pub proposed_at: DateTime<Utc>,
    pub engaged_at: Option<DateTime<Utc>>,
    pub married_at: Option<DateTime<Utc>>,
    pub divorced_at: Option<DateTime<Utc>>,
    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Marriage {
    /// Initial state of the machine; never persisted on its own. The
    /// accept path engages it within the same transaction.
    pub fn propose(
        tenant_id: Uuid,
        proposer_id: u32,
        accepter_id: u32,
        now: DateTime<Utc>,
    ) -> MarriageResult<Self> {
        if proposer_id == accepter_id {
            return Err(MarriageError::SelfProposal {
                character_id: proposer_id,
            });
        }
        Ok(Self {
            id: 0,
            character_id_1: proposer_id,
            character_id_2: accepter_id,
            status: MarriageStatus::Proposed,
            proposed_at: now,
            engaged_at: None,
            married_at: None,
            divorced_at: None,
            tenant_id,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_partner(&self, character_id: u32) -> bool {
        self.character_id_1 == character_id || self.character_id_2 == character_id
    }

    pub fn partner_of(&self, character_id: u32) -> Option<u32> {
        if self.character_id_1 == character_id {
            Some(self.character_id_2)
        } else if self.character_id_2 == character_id {
            Some(self.character_id_1)
        } else {
            None
        }
    }

    pub fn partners(&self) -> [u32; 2] {
        [self.character_id_1, self.character_id_2]
    }

    /// Whether a completed ceremony may turn this marriage into `married`
    pub fn can_marry(&self) -> bool {
        self.status == MarriageStatus::Engaged
    }

    pub fn can_divorce(&self) -> bool {
        self.status.is_active()
    }

    pub fn engage(&self, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure(self.status == MarriageStatus::Proposed, MarriageStatus::Engaged)?;
        Ok(Self {
            status: MarriageStatus::Engaged,
            engaged_at: Some(now),
            updated_at: now,
            ..self.clone()
        })
    }

    /// Ceremony completion: engagement becomes a marriage
    pub fn complete(&self, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure(self.can_marry(), MarriageStatus::Married)?;
        Ok(Self {
            status: MarriageStatus::Married,
            married_at: Some(now),
            updated_at: now,
            ..self.clone()
        })
    }

    /// Dissolve the relationship. An engagement may be broken off the same
    /// way a marriage is divorced.
    pub fn divorce(&self, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure(self.can_divorce(), MarriageStatus::Divorced)?;
        Ok(Self {
            status: MarriageStatus::Divorced,
            divorced_at: Some(now),
            updated_at: now,
            ..self.clone()
        })
    }

    /// Deletion terminal state, reached when a partner's character is
    /// deleted.
    pub fn expire(&self, now: DateTime<Utc>) -> MarriageResult<Self> {
        self.ensure(self.status.is_active(), MarriageStatus::Expired)?;
        Ok(Self {
            status: MarriageStatus::Expired,
            updated_at: now,
            ..self.clone()
        })
    }

    fn ensure(&self, precondition: bool, to: MarriageStatus) -> MarriageResult<()> {
        if !precondition {
            return Err(MarriageError::InvalidStateTransition {
                entity: "marriage",
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        Ok(())
    }
}
