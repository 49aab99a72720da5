//! Persistence seam
//!
//! The processor owns no storage detail: it opens a tenant-scoped unit of
//! work, reads and writes whole entity values through it, and commits.
//! Dropping an uncommitted transaction rolls it back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Ceremony, Marriage, Proposal};
use crate::error::MarriageResult;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store handle shared by every worker; hands out tenant-scoped
/// transactions and answers the cross-tenant sweep queries.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction scoped to one tenant
    async fn begin(&self, tenant_id: Uuid) -> MarriageResult<Box<dyn StoreTx>>;

    /// Distinct tenants holding pending proposals past their expiry
    async fn tenants_with_expired_proposals(
        &self,
        now: DateTime<Utc>,
    ) -> MarriageResult<Vec<Uuid>>;

    /// Distinct tenants holding active ceremonies started before the cutoff
    async fn tenants_with_overdue_ceremonies(
        &self,
        started_before: DateTime<Utc>,
    ) -> MarriageResult<Vec<Uuid>>;
}

/// One tenant-scoped transaction. Every read filters by the tenant the
/// transaction was opened for; inserts stamp it onto the new row.
#[async_trait]
pub trait StoreTx: Send {
    /// Serialize marriage-state changes for one character: a later
    /// transaction locking the same character blocks until this one
    /// commits or rolls back. Guard reads run under this lock so racing
    /// commands observe each other's outcome instead of both passing.
    async fn lock_character(&mut self, character_id: u32) -> MarriageResult<()>;

    async fn find_proposal(&mut self, id: u32) -> MarriageResult<Option<Proposal>>;
    async fn find_marriage(&mut self, id: u32) -> MarriageResult<Option<Marriage>>;
    async fn find_ceremony(&mut self, id: u32) -> MarriageResult<Option<Ceremony>>;

    /// The at-most-one marriage in `engaged` or `married` involving the character
    async fn active_marriage_of(&mut self, character_id: u32)
        -> MarriageResult<Option<Marriage>>;

    /// The at-most-one pending proposal from `proposer_id` to `target_id`
    async fn pending_proposal_between(
        &mut self,
        proposer_id: u32,
        target_id: u32,
    ) -> MarriageResult<Option<Proposal>>;

    /// The proposer's most recent proposal, any status (global cooldown window)
    async fn last_proposal_from(&mut self, proposer_id: u32)
        -> MarriageResult<Option<Proposal>>;

    /// The most recent rejected proposal for the pair (per-target cooldown
    /// and rejection-count inheritance)
    async fn last_rejection_between(
        &mut self,
        proposer_id: u32,
        target_id: u32,
    ) -> MarriageResult<Option<Proposal>>;

    /// Pending proposals where the character is proposer or target
    async fn pending_proposals_involving(
        &mut self,
        character_id: u32,
    ) -> MarriageResult<Vec<Proposal>>;

    /// Pending proposals whose expiry lies at or before `now`
    async fn pending_proposals_past(
        &mut self,
        now: DateTime<Utc>,
    ) -> MarriageResult<Vec<Proposal>>;

    /// The at-most-one non-terminal ceremony for the marriage
    async fn open_ceremony_for(&mut self, marriage_id: u32)
        -> MarriageResult<Option<Ceremony>>;

    /// Active ceremonies started at or before the cutoff
    async fn active_ceremonies_past(
        &mut self,
        started_before: DateTime<Utc>,
    ) -> MarriageResult<Vec<Ceremony>>;

    /// Insert a new proposal; returns the entity with its assigned id
    async fn insert_proposal(&mut self, proposal: Proposal) -> MarriageResult<Proposal>;
    async fn update_proposal(&mut self, proposal: &Proposal) -> MarriageResult<()>;

    async fn insert_marriage(&mut self, marriage: Marriage) -> MarriageResult<Marriage>;
    async fn update_marriage(&mut self, marriage: &Marriage) -> MarriageResult<()>;

    async fn insert_ceremony(&mut self, ceremony: Ceremony) -> MarriageResult<Ceremony>;
    async fn update_ceremony(&mut self, ceremony: &Ceremony) -> MarriageResult<()>;

    /// Make every staged write durable
    async fn commit(self: Box<Self>) -> MarriageResult<()>;
}
