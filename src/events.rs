//! Event topic envelope, typed event bodies, and the publisher seam
//!
//! Events mirror the command envelope shape. Every event is keyed by a
//! character id; two-character events are staged once per partner so each
//! downstream partition receives its copy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarriageError, MarriageResult};
use crate::tenant::Tenant;

/// Typed event bodies, tagged by the envelope `type` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "body",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Event {
    ProposalCreated {
        proposal_id: u32,
        proposer_id: u32,
        target_id: u32,
        proposed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    ProposalAccepted {
        proposal_id: u32,
        proposer_id: u32,
        target_id: u32,
        marriage_id: u32,
        responded_at: DateTime<Utc>,
    },
    ProposalDeclined {
        proposal_id: u32,
        proposer_id: u32,
        target_id: u32,
        rejection_count: u32,
        cooldown_until: Option<DateTime<Utc>>,
        responded_at: DateTime<Utc>,
    },
    ProposalExpired {
        proposal_id: u32,
        proposer_id: u32,
        target_id: u32,
        expired_at: DateTime<Utc>,
    },
    ProposalCancelled {
        proposal_id: u32,
        proposer_id: u32,
        target_id: u32,
        cancelled_at: DateTime<Utc>,
    },
    MarriageCreated {
        marriage_id: u32,
        character_id_1: u32,
        character_id_2: u32,
        married_at: DateTime<Utc>,
    },
    MarriageDivorced {
        marriage_id: u32,
        character_id_1: u32,
        character_id_2: u32,
        divorced_at: DateTime<Utc>,
    },
    MarriageDeleted {
        marriage_id: u32,
        character_id_1: u32,
        character_id_2: u32,
        deleted_at: DateTime<Utc>,
    },
    CeremonyScheduled {
        ceremony_id: u32,
        marriage_id: u32,
        scheduled_at: DateTime<Utc>,
        invitees: Vec<u32>,
    },
    CeremonyStarted {
        ceremony_id: u32,
        marriage_id: u32,
        started_at: DateTime<Utc>,
    },
    CeremonyCompleted {
        ceremony_id: u32,
        marriage_id: u32,
        completed_at: DateTime<Utc>,
    },
    CeremonyPostponed {
        ceremony_id: u32,
        marriage_id: u32,
        postponed_at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    CeremonyCancelled {
        ceremony_id: u32,
        marriage_id: u32,
        cancelled_at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    CeremonyRescheduled {
        ceremony_id: u32,
        marriage_id: u32,
        scheduled_at: DateTime<Utc>,
    },
    InviteeAdded {
        ceremony_id: u32,
        character_id: u32,
    },
    InviteeRemoved {
        ceremony_id: u32,
        character_id: u32,
    },
    MarriageError {
        error_type: String,
        error_code: String,
        message: String,
        character_id: u32,
        context: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Wire tag, for logs
    pub fn name(&self) -> &'static str {
        match self {
            Event::ProposalCreated { .. } => "PROPOSAL_CREATED",
            Event::ProposalAccepted { .. } => "PROPOSAL_ACCEPTED",
            Event::ProposalDeclined { .. } => "PROPOSAL_DECLINED",
            Event::ProposalExpired { .. } => "PROPOSAL_EXPIRED",
            Event::ProposalCancelled { .. } => "PROPOSAL_CANCELLED",
            Event::MarriageCreated { .. } => "MARRIAGE_CREATED",
            Event::MarriageDivorced { .. } => "MARRIAGE_DIVORCED",
            Event::MarriageDeleted { .. } => "MARRIAGE_DELETED",
            Event::CeremonyScheduled { .. } => "CEREMONY_SCHEDULED",
            Event::CeremonyStarted { .. } => "CEREMONY_STARTED",
            Event::CeremonyCompleted { .. } => "CEREMONY_COMPLETED",
            Event::CeremonyPostponed { .. } => "CEREMONY_POSTPONED",
            Event::CeremonyCancelled { .. } => "CEREMONY_CANCELLED",
            Event::CeremonyRescheduled { .. } => "CEREMONY_RESCHEDULED",
            Event::InviteeAdded { .. } => "INVITEE_ADDED",
            Event::InviteeRemoved { .. } => "INVITEE_REMOVED",
            Event::MarriageError { .. } => "MARRIAGE_ERROR",
        }
    }

    /// Build a `MARRIAGE_ERROR` event for a failed command
    pub fn error(
        error: &MarriageError,
        character_id: u32,
        context: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Event::MarriageError {
            error_type: error.kind().as_str().to_string(),
            error_code: error
                .code()
                .map(|c| c.as_str().to_string())
                .unwrap_or_else(|| error.kind().as_str().to_string()),
            message: error.to_string(),
            character_id,
            context,
            timestamp: now,
        }
    }
}

/// One message on the event topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "characterId")]
    pub character_id: u32,
    #[serde(flatten)]
    pub event: Event,
}

impl EventEnvelope {
    pub fn encode(&self) -> MarriageResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| MarriageError::Envelope(e.to_string()))
    }
}

/// Egress seam: implementations deliver one envelope per character id,
/// keyed by that id, with tenant headers mirrored from the command side.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        tenant: &Tenant,
        character_id: u32,
        event: &Event,
    ) -> MarriageResult<()>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_shape_matches_the_wire_contract() {
        let envelope = EventEnvelope {
            character_id: 100,
            event: Event::ProposalCreated {
                proposal_id: 1,
                proposer_id: 100,
                target_id: 200,
                proposed_at: Utc::now(),
                expires_at: Utc::now(),
            },
        };
        let value: serde_json::Value =
            serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["characterId"], json!(100));
        assert_eq!(value["type"], json!("PROPOSAL_CREATED"));
        assert_eq!(value["body"]["proposalId"], json!(1));
        assert_eq!(value["body"]["targetId"], json!(200));
    }

    #[test]
    fn decline_event_carries_cooldown_fields() {
        let now = Utc::now();
        let event = Event::ProposalDeclined {
            proposal_id: 3,
            proposer_id: 100,
            target_id: 200,
            rejection_count: 2,
            cooldown_until: Some(now),
            responded_at: now,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["body"]["rejectionCount"], json!(2));
        assert!(value["body"]["cooldownUntil"].is_string());
    }

    #[test]
    fn error_event_falls_back_to_kind_when_no_code_applies() {
        let now = Utc::now();
        let event = Event::error(
            &MarriageError::CharacterService("connection refused".into()),
            100,
            json!({ "proposalId": 1 }),
            now,
        );
        match event {
            Event::MarriageError {
                error_type,
                error_code,
                ..
            } => {
                assert_eq!(error_type, "TRANSIENT");
                assert_eq!(error_code, "TRANSIENT");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn event_body_encoding_is_the_identity() {
        let envelope = EventEnvelope {
            character_id: 200,
            event: Event::CeremonyPostponed {
                ceremony_id: 1,
                marriage_id: 1,
                postponed_at: Utc::now(),
                reason: Some("CEREMONY_TIMEOUT".into()),
            },
        };
        let decoded: EventEnvelope =
            serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }
}
