//! Domain model: immutable entities with pure transition functions
//!
//! Transitions never touch I/O. Each one validates its precondition,
//! then builds a new value with the status, the status timestamp, and
//! `updated_at` overridden. Persisting the result is the processor's job.

pub mod ceremony;
pub mod marriage;
pub mod proposal;

pub use ceremony::{Ceremony, CeremonyStatus, MAX_INVITEES};
pub use marriage::{Marriage, MarriageStatus};
pub use proposal::{rejection_cooldown, Proposal, ProposalStatus, PROPOSAL_TTL_HOURS};
