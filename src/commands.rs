//! Command topic envelope and typed command bodies
//!
//! Wire shape: `{ "characterId": u32, "type": "...", "body": { ... } }`.
//! The tenant travels in bus headers, never in the payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::CeremonyStatus;
use crate::error::{MarriageError, MarriageResult};

/// Typed command bodies, tagged by the envelope `type` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "body",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    Propose { target_character_id: u32 },
    Accept { proposal_id: u32 },
    Decline { proposal_id: u32 },
    Cancel { proposal_id: u32 },
    Divorce { marriage_id: u32 },
    ScheduleCeremony {
        marriage_id: u32,
        scheduled_at: DateTime<Utc>,
        invitees: Vec<u32>,
    },
    StartCeremony { ceremony_id: u32 },
    CompleteCeremony { ceremony_id: u32 },
    CancelCeremony { ceremony_id: u32 },
    PostponeCeremony { ceremony_id: u32 },
    RescheduleCeremony {
        ceremony_id: u32,
        scheduled_at: DateTime<Utc>,
    },
    AddInvitee { ceremony_id: u32, character_id: u32 },
    RemoveInvitee { ceremony_id: u32, character_id: u32 },
    AdvanceCeremonyState {
        ceremony_id: u32,
        next_state: CeremonyStatus,
    },
}

impl Command {
    /// Wire tag, for logs and error events
    pub fn name(&self) -> &'static str {
        match self {
            Command::Propose { .. } => "PROPOSE",
            Command::Accept { .. } => "ACCEPT",
            Command::Decline { .. } => "DECLINE",
            Command::Cancel { .. } => "CANCEL",
            Command::Divorce { .. } => "DIVORCE",
            Command::ScheduleCeremony { .. } => "SCHEDULE_CEREMONY",
            Command::StartCeremony { .. } => "START_CEREMONY",
            Command::CompleteCeremony { .. } => "COMPLETE_CEREMONY",
            Command::CancelCeremony { .. } => "CANCEL_CEREMONY",
            Command::PostponeCeremony { .. } => "POSTPONE_CEREMONY",
            Command::RescheduleCeremony { .. } => "RESCHEDULE_CEREMONY",
            Command::AddInvitee { .. } => "ADD_INVITEE",
            Command::RemoveInvitee { .. } => "REMOVE_INVITEE",
            Command::AdvanceCeremonyState { .. } => "ADVANCE_CEREMONY_STATE",
        }
    }

    /// The ids this command acts on, carried in error-event context
    pub fn context(&self) -> serde_json::Value {
        match *self {
            Command::Propose {
                target_character_id,
            } => json!({ "targetCharacterId": target_character_id }),
            Command::Accept { proposal_id }
            | Command::Decline { proposal_id }
            | Command::Cancel { proposal_id } => json!({ "proposalId": proposal_id }),
            Command::Divorce { marriage_id } => json!({ "marriageId": marriage_id }),
            Command::ScheduleCeremony { marriage_id, .. } => {
                json!({ "marriageId": marriage_id })
            }
            Command::StartCeremony { ceremony_id }
            | Command::CompleteCeremony { ceremony_id }
            | Command::CancelCeremony { ceremony_id }
            | Command::PostponeCeremony { ceremony_id }
            | Command::RescheduleCeremony { ceremony_id, .. }
            | Command::AdvanceCeremonyState { ceremony_id, .. } => {
                json!({ "ceremonyId": ceremony_id })
            }
            Command::AddInvitee {
                ceremony_id,
                character_id,
            }
            | Command::RemoveInvitee {
                ceremony_id,
                character_id,
            } => json!({ "ceremonyId": ceremony_id, "characterId": character_id }),
        }
    }
}

/// One message from the command topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "characterId")]
    pub character_id: u32,
    #[serde(flatten)]
    pub command: Command,
}

impl CommandEnvelope {
    pub fn decode(payload: &[u8]) -> MarriageResult<Self> {
        serde_json::from_slice(payload).map_err(|e| MarriageError::Envelope(e.to_string()))
    }
}
