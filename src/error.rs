//! Error types for the marriage service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type for marriage operations
pub type MarriageResult<T> = Result<T, MarriageError>;

/// Comprehensive error types for the marriage domain
#[derive(Error, Debug)]
pub enum MarriageError {
    /// Proposer and target are the same character
    #[error("character {character_id} cannot propose to themselves")]
    SelfProposal { character_id: u32 },

    /// Character does not exist in the caller's tenant
    #[error("character {character_id} does not exist in tenant {tenant_id}")]
    TenantMismatch { tenant_id: Uuid, character_id: u32 },

    /// Character is below the minimum level for proposals
    #[error("character {character_id} is level {level}, minimum is {required}")]
    InsufficientLevel {
        character_id: u32,
        level: u16,
        required: u16,
    },

    /// Character already has a marriage in the married state
    #[error("character {character_id} is already married")]
    AlreadyMarried { character_id: u32 },

    /// Character already has a marriage in the engaged state
    #[error("character {character_id} is already engaged")]
    AlreadyEngaged { character_id: u32 },

    /// Proposer must wait before sending any new proposal
    #[error("proposer is in global cooldown until {until}")]
    GlobalCooldown { until: DateTime<Utc> },

    /// Proposer must wait before re-proposing to this target
    #[error("proposer is in cooldown for this target until {until}")]
    TargetCooldown { until: DateTime<Utc> },

    /// A pending proposal between the pair already exists
    #[error("a pending proposal between {proposer_id} and {target_id} already exists")]
    ConcurrentProposal { proposer_id: u32, target_id: u32 },

    /// Proposal passed its expiry time before being answered
    #[error("proposal {proposal_id} has expired")]
    ProposalExpired { proposal_id: u32 },

    /// No proposal with this id in the tenant
    #[error("proposal {proposal_id} not found")]
    ProposalNotFound { proposal_id: u32 },

    /// No marriage with this id in the tenant
    #[error("marriage {marriage_id} not found")]
    MarriageNotFound { marriage_id: u32 },

    /// No ceremony with this id in the tenant
    #[error("ceremony {ceremony_id} not found")]
    CeremonyNotFound { ceremony_id: u32 },

    /// Entity is not in a state that permits the requested transition
    #[error("invalid {entity} transition from {from} to {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },

    /// Caller is not a participant of the entity it is acting on
    #[error("character {character_id} is not a participant")]
    NotParticipant { character_id: u32 },

    /// Ceremony must be scheduled strictly in the future
    #[error("ceremony cannot be scheduled at {scheduled_at}, which is not in the future")]
    ScheduledInPast { scheduled_at: DateTime<Utc> },

    /// A non-terminal ceremony already exists for the marriage
    #[error("marriage {marriage_id} already has an open ceremony")]
    CeremonyAlreadyScheduled { marriage_id: u32 },

    /// Guest list is at capacity
    #[error("ceremony {ceremony_id} guest list is full")]
    InviteeLimitExceeded { ceremony_id: u32 },

    /// Character is already on the guest list
    #[error("character {character_id} is already invited")]
    InviteeAlreadyInvited { character_id: u32 },

    /// Character is not on the guest list
    #[error("character {character_id} is not on the guest list")]
    InviteeNotFound { character_id: u32 },

    /// Malformed envelope, header, or payload
    #[error("malformed message: {0}")]
    Envelope(String),

    /// Operation aborted by shutdown
    #[error("operation cancelled by shutdown")]
    Cancelled,

    /// Database failure
    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),

    /// Bus publish or consume failure
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Character service lookup failure
    #[error("character service error: {0}")]
    CharacterService(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error taxonomy, mirrored into the `errorType` field of error events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Eligibility,
    Cooldown,
    NotFound,
    AlreadyExists,
    StateTransition,
    InviteeLimit,
    Transient,
    TenantMismatch,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Eligibility => "ELIGIBILITY",
            ErrorKind::Cooldown => "COOLDOWN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::StateTransition => "STATE_TRANSITION",
            ErrorKind::InviteeLimit => "INVITEE_LIMIT",
            ErrorKind::Transient => "TRANSIENT",
            ErrorKind::TenantMismatch => "TENANT_MISMATCH",
        }
    }
}

/// Wire codes surfaced in `MARRIAGE_ERROR` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AlreadyMarried,
    AlreadyEngaged,
    InsufficientLevel,
    SelfProposal,
    GlobalCooldown,
    TargetCooldown,
    ProposalExpired,
    ProposalNotFound,
    MarriageNotFound,
    CeremonyNotFound,
    InvalidState,
    InviteeLimitExceeded,
    InviteeAlreadyInvited,
    InviteeNotFound,
    PartnerDisconnected,
    CeremonyTimeout,
    ConcurrentProposal,
    TenantMismatch,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AlreadyMarried => "ALREADY_MARRIED",
            ErrorCode::AlreadyEngaged => "ALREADY_ENGAGED",
            ErrorCode::InsufficientLevel => "INSUFFICIENT_LEVEL",
            ErrorCode::SelfProposal => "SELF_PROPOSAL",
            ErrorCode::GlobalCooldown => "GLOBAL_COOLDOWN",
            ErrorCode::TargetCooldown => "TARGET_COOLDOWN",
            ErrorCode::ProposalExpired => "PROPOSAL_EXPIRED",
            ErrorCode::ProposalNotFound => "PROPOSAL_NOT_FOUND",
            ErrorCode::MarriageNotFound => "MARRIAGE_NOT_FOUND",
            ErrorCode::CeremonyNotFound => "CEREMONY_NOT_FOUND",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::InviteeLimitExceeded => "INVITEE_LIMIT_EXCEEDED",
            ErrorCode::InviteeAlreadyInvited => "INVITEE_ALREADY_INVITED",
            ErrorCode::InviteeNotFound => "INVITEE_NOT_FOUND",
            ErrorCode::PartnerDisconnected => "PARTNER_DISCONNECTED",
            ErrorCode::CeremonyTimeout => "CEREMONY_TIMEOUT",
            ErrorCode::ConcurrentProposal => "CONCURRENT_PROPOSAL",
            ErrorCode::TenantMismatch => "TENANT_MISMATCH",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MarriageError {
    /// Taxonomy bucket for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            MarriageError::SelfProposal { .. }
            | MarriageError::NotParticipant { .. }
            | MarriageError::ScheduledInPast { .. }
            | MarriageError::Envelope(_)
            | MarriageError::Config(_) => ErrorKind::Validation,
            MarriageError::InsufficientLevel { .. }
            | MarriageError::AlreadyMarried { .. }
            | MarriageError::AlreadyEngaged { .. } => ErrorKind::Eligibility,
            MarriageError::GlobalCooldown { .. } | MarriageError::TargetCooldown { .. } => {
                ErrorKind::Cooldown
            }
            MarriageError::ProposalNotFound { .. }
            | MarriageError::MarriageNotFound { .. }
            | MarriageError::CeremonyNotFound { .. }
            | MarriageError::InviteeNotFound { .. } => ErrorKind::NotFound,
            MarriageError::ConcurrentProposal { .. }
            | MarriageError::CeremonyAlreadyScheduled { .. } => ErrorKind::AlreadyExists,
            MarriageError::ProposalExpired { .. }
            | MarriageError::InvalidStateTransition { .. } => ErrorKind::StateTransition,
            MarriageError::InviteeLimitExceeded { .. }
            | MarriageError::InviteeAlreadyInvited { .. } => ErrorKind::InviteeLimit,
            MarriageError::TenantMismatch { .. } => ErrorKind::TenantMismatch,
            MarriageError::Cancelled
            | MarriageError::Store(_)
            | MarriageError::Kafka(_)
            | MarriageError::CharacterService(_)
            | MarriageError::Internal(_) => ErrorKind::Transient,
        }
    }

    /// Wire code for error events, when the error maps to one
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            MarriageError::SelfProposal { .. } => Some(ErrorCode::SelfProposal),
            MarriageError::TenantMismatch { .. } => Some(ErrorCode::TenantMismatch),
            MarriageError::InsufficientLevel { .. } => Some(ErrorCode::InsufficientLevel),
            MarriageError::AlreadyMarried { .. } => Some(ErrorCode::AlreadyMarried),
            MarriageError::AlreadyEngaged { .. } => Some(ErrorCode::AlreadyEngaged),
            MarriageError::GlobalCooldown { .. } => Some(ErrorCode::GlobalCooldown),
            MarriageError::TargetCooldown { .. } => Some(ErrorCode::TargetCooldown),
            MarriageError::ConcurrentProposal { .. } => Some(ErrorCode::ConcurrentProposal),
            MarriageError::ProposalExpired { .. } => Some(ErrorCode::ProposalExpired),
            MarriageError::ProposalNotFound { .. } => Some(ErrorCode::ProposalNotFound),
            MarriageError::MarriageNotFound { .. } => Some(ErrorCode::MarriageNotFound),
            MarriageError::CeremonyNotFound { .. } => Some(ErrorCode::CeremonyNotFound),
            MarriageError::InvalidStateTransition { .. }
            | MarriageError::NotParticipant { .. }
            | MarriageError::ScheduledInPast { .. }
            | MarriageError::CeremonyAlreadyScheduled { .. } => Some(ErrorCode::InvalidState),
            MarriageError::InviteeLimitExceeded { .. } => Some(ErrorCode::InviteeLimitExceeded),
            MarriageError::InviteeAlreadyInvited { .. } => Some(ErrorCode::InviteeAlreadyInvited),
            MarriageError::InviteeNotFound { .. } => Some(ErrorCode::InviteeNotFound),
            MarriageError::Envelope(_)
            | MarriageError::Cancelled
            | MarriageError::Store(_)
            | MarriageError::Kafka(_)
            | MarriageError::CharacterService(_)
            | MarriageError::Config(_)
            | MarriageError::Internal(_) => None,
        }
    }

    /// Whether the retry policy may re-attempt the failed operation
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MarriageError::Store(_)
                | MarriageError::Kafka(_)
                | MarriageError::CharacterService(_)
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_covers_io_only() {
        assert!(MarriageError::CharacterService("timeout".into()).is_transient());
        assert!(!MarriageError::SelfProposal { character_id: 1 }.is_transient());
        assert!(!MarriageError::Cancelled.is_transient());
        assert!(!MarriageError::InvalidStateTransition {
            entity: "proposal",
            from: "accepted",
            to: "rejected",
        }
        .is_transient());
    }

    #[test]
    fn codes_match_wire_enumeration() {
        let err = MarriageError::GlobalCooldown { until: Utc::now() };
        assert_eq!(err.code(), Some(ErrorCode::GlobalCooldown));
        assert_eq!(err.kind(), ErrorKind::Cooldown);
        assert_eq!(ErrorCode::InviteeLimitExceeded.as_str(), "INVITEE_LIMIT_EXCEEDED");
        assert_eq!(ErrorKind::TenantMismatch.as_str(), "TENANT_MISMATCH");
    }
}
