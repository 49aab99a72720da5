//! JSON resource documents for the HTTP surface

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Ceremony, CeremonyStatus, Marriage, MarriageStatus, Proposal, ProposalStatus};

#[derive(Debug, Serialize)]
pub struct ResourceDocument<T> {
    pub data: Resource<T>,
}

#[derive(Debug, Serialize)]
pub struct ResourceListDocument<T> {
    pub data: Vec<Resource<T>>,
}

#[derive(Debug, Serialize)]
pub struct Resource<T> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub attributes: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalAttributes {
    pub proposer_id: u32,
    pub target_id: u32,
    pub status: ProposalStatus,
    pub proposed_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub rejection_count: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl From<&Proposal> for Resource<ProposalAttributes> {
    fn from(proposal: &Proposal) -> Self {
        Resource {
            kind: "proposals",
            id: proposal.id.to_string(),
            attributes: ProposalAttributes {
                proposer_id: proposal.proposer_id,
                target_id: proposal.target_id,
                status: proposal.status,
                proposed_at: proposal.proposed_at,
                responded_at: proposal.responded_at,
                expires_at: proposal.expires_at,
                rejection_count: proposal.rejection_count,
                cooldown_until: proposal.cooldown_until,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarriageAttributes {
    pub character_id_1: u32,
    pub character_id_2: u32,
    pub status: MarriageStatus,
    pub proposed_at: DateTime<Utc>,
    pub engaged_at: Option<DateTime<Utc>>,
    pub married_at: Option<DateTime<Utc>>,
    pub divorced_at: Option<DateTime<Utc>>,
}

impl From<&Marriage> for Resource<MarriageAttributes> {
    fn from(marriage: &Marriage) -> Self {
        Resource {
            kind: "marriages",
            id: marriage.id.to_string(),
            attributes: MarriageAttributes {
                character_id_1: marriage.character_id_1,
                character_id_2: marriage.character_id_2,
                status: marriage.status,
                proposed_at: marriage.proposed_at,
                engaged_at: marriage.engaged_at,
                married_at: marriage.married_at,
                divorced_at: marriage.divorced_at,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CeremonyAttributes {
    pub marriage_id: u32,
    pub status: CeremonyStatus,
    pub scheduled_at: DateTime<Utc>,
    pub invitees: Vec<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub postponed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<&Ceremony> for Resource<CeremonyAttributes> {
    fn from(ceremony: &Ceremony) -> Self {
        Resource {
            kind: "ceremonies",
            id: ceremony.id.to_string(),
            attributes: CeremonyAttributes {
                marriage_id: ceremony.marriage_id,
                status: ceremony.status,
                scheduled_at: ceremony.scheduled_at,
                invitees: ceremony.invitees.clone(),
                started_at: ceremony.started_at,
                completed_at: ceremony.completed_at,
                postponed_at: ceremony.postponed_at,
                cancelled_at: ceremony.cancelled_at,
            },
        }
    }
}
