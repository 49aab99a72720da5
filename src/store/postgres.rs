//! PostgreSQL store
//!
//! Status enums are persisted as small integers, optional timestamps as
//! nullable columns, and the guest list as an ordered child table
//! (`ceremony_invitees(ceremony_id, position, character_id)`). Partial
//! unique indexes on the marriages table back the one-active-marriage
//! invariant. [`StoreTx::lock_character`] takes a transaction-scoped
//! advisory lock per character, so commands racing on the same characters
//! serialize at the guard reads; if a competing transaction still commits
//! first, the unique violation on insert is mapped to the typed conflict
//! error rather than a transient store failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::domain::{
    Ceremony, CeremonyStatus, Marriage, MarriageStatus, Proposal, ProposalStatus,
};
use crate::error::{MarriageError, MarriageResult};
use crate::store::{Store, StoreTx};

/// Shared Postgres handle; the pool manages connections internally
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> MarriageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    /// Run the embedded migrations
    pub async fn migrate(&self) -> MarriageResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| MarriageError::Store(e.into()))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self, tenant_id: Uuid) -> MarriageResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx, tenant_id }))
    }

    async fn tenants_with_expired_proposals(
        &self,
        now: DateTime<Utc>,
    ) -> MarriageResult<Vec<Uuid>> {
        let tenants = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT tenant_id FROM proposals WHERE status = $1 AND expires_at <= $2",
        )
        .bind(ProposalStatus::Pending.as_i16())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(tenants)
    }

    async fn tenants_with_overdue_ceremonies(
        &self,
        started_before: DateTime<Utc>,
    ) -> MarriageResult<Vec<Uuid>> {
        let tenants = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT tenant_id FROM ceremonies WHERE status = $1 AND started_at <= $2",
        )
        .bind(CeremonyStatus::Active.as_i16())
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(tenants)
    }
}

struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
    tenant_id: Uuid,
}

/// Advisory lock key for one character of one tenant. Folding the tenant
/// UUID into the key keeps tenants from contending on shared character
/// ids; a cross-tenant collision only serializes two unrelated commands.
fn character_lock_key(tenant_id: Uuid, character_id: u32) -> i64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&tenant_id.as_bytes()[..8]);
    i64::from_be_bytes(word) ^ i64::from(character_id)
}

/// The partial unique indexes on active marriages surface a concurrent
/// winner as SQLSTATE 23505; the loser gets the typed conflict error.
fn map_active_marriage_conflict(error: sqlx::Error, marriage: &Marriage) -> MarriageError {
    if let sqlx::Error::Database(db) = &error {
        if db.code().as_deref() == Some("23505") {
            let character_id = if db.constraint() == Some("marriages_active_partner_2_idx") {
                marriage.character_id_2
            } else {
                marriage.character_id_1
            };
            return MarriageError::AlreadyEngaged { character_id };
        }
    }
    MarriageError::Store(error)
}

#[derive(sqlx::FromRow)]
struct ProposalRow {
    id: i32,
    proposer_id: i64,
    target_id: i64,
    status: i16,
    proposed_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    rejection_count: i32,
    cooldown_until: Option<DateTime<Utc>>,
    tenant_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProposalRow {
    fn into_domain(self) -> MarriageResult<Proposal> {
        let status = ProposalStatus::from_i16(self.status).ok_or_else(|| {
            MarriageError::Internal(format!("unknown proposal status {}", self.status))
        })?;
        Ok(Proposal {
            id: self.id as u32,
            proposer_id: self.proposer_id as u32,
            target_id: self.target_id as u32,
            status,
            proposed_at: self.proposed_at,
            responded_at: self.responded_at,
            expires_at: self.expires_at,
            rejection_count: self.rejection_count as u32,
            cooldown_until: self.cooldown_until,
            tenant_id: self.tenant_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MarriageRow {
    id: i32,
    character_id_1: i64,
    character_id_2: i64,
    status: i16,
    proposed_at: DateTime<Utc>,
    engaged_at: Option<DateTime<Utc>>,
    married_at: Option<DateTime<Utc>>,
    divorced_at: Option<DateTime<Utc>>,
    tenant_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MarriageRow {
    fn into_domain(self) -> MarriageResult<Marriage> {
        let status = MarriageStatus::from_i16(self.status).ok_or_else(|| {
            MarriageError::Internal(format!("unknown marriage status {}", self.status))
        })?;
        Ok(Marriage {
            id: self.id as u32,
            character_id_1: self.character_id_1 as u32,
            character_id_2: self.character_id_2 as u32,
            status,
            proposed_at: self.proposed_at,
            engaged_at: self.engaged_at,
            married_at: self.married_at,
            divorced_at: self.divorced_at,
            tenant_id: self.tenant_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CeremonyRow {
    id: i32,
    marriage_id: i32,
    scheduled_at: DateTime<Utc>,
    status: i16,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    postponed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    tenant_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CeremonyRow {
    fn into_domain(self, invitees: Vec<u32>) -> MarriageResult<Ceremony> {
        let status = CeremonyStatus::from_i16(self.status).ok_or_else(|| {
            MarriageError::Internal(format!("unknown ceremony status {}", self.status))
        })?;
        Ok(Ceremony {
            id: self.id as u32,
            marriage_id: self.marriage_id as u32,
            scheduled_at: self.scheduled_at,
            status,
            invitees,
            started_at: self.started_at,
            completed_at: self.completed_at,
            postponed_at: self.postponed_at,
            cancelled_at: self.cancelled_at,
            tenant_id: self.tenant_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const PROPOSAL_COLUMNS: &str = "id, proposer_id, target_id, status, proposed_at, responded_at, \
     expires_at, rejection_count, cooldown_until, tenant_id, created_at, updated_at";
const MARRIAGE_COLUMNS: &str = "id, character_id_1, character_id_2, status, proposed_at, \
     engaged_at, married_at, divorced_at, tenant_id, created_at, updated_at";
const CEREMONY_COLUMNS: &str = "id, marriage_id, scheduled_at, status, started_at, completed_at, \
     postponed_at, cancelled_at, tenant_id, created_at, updated_at";

impl PgStoreTx {
    async fn load_invitees(&mut self, ceremony_id: i32) -> MarriageResult<Vec<u32>> {
        let invitees = sqlx::query_scalar::<_, i64>(
            "SELECT character_id FROM ceremony_invitees WHERE ceremony_id = $1 ORDER BY position",
        )
        .bind(ceremony_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(invitees.into_iter().map(|c| c as u32).collect())
    }

    async fn store_invitees(&mut self, ceremony_id: i32, invitees: &[u32]) -> MarriageResult<()> {
        sqlx::query("DELETE FROM ceremony_invitees WHERE ceremony_id = $1")
            .bind(ceremony_id)
            .execute(&mut *self.tx)
            .await?;
        for (position, character_id) in invitees.iter().enumerate() {
            sqlx::query(
                "INSERT INTO ceremony_invitees (ceremony_id, position, character_id) \
                 VALUES ($1, $2, $3)",
            )
            .bind(ceremony_id)
            .bind(position as i32)
            .bind(*character_id as i64)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn hydrate_ceremony(&mut self, row: CeremonyRow) -> MarriageResult<Ceremony> {
        let invitees = self.load_invitees(row.id).await?;
        row.into_domain(invitees)
    }
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn lock_character(&mut self, character_id: u32) -> MarriageResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(character_lock_key(self.tenant_id, character_id))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_proposal(&mut self, id: u32) -> MarriageResult<Option<Proposal>> {
        let row = sqlx::query_as::<_, ProposalRow>(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE tenant_id = $1 AND id = $2",
        ))
        .bind(self.tenant_id)
        .bind(id as i32)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ProposalRow::into_domain).transpose()
    }

    async fn find_marriage(&mut self, id: u32) -> MarriageResult<Option<Marriage>> {
        let row = sqlx::query_as::<_, MarriageRow>(&format!(
            "SELECT {MARRIAGE_COLUMNS} FROM marriages WHERE tenant_id = $1 AND id = $2",
        ))
        .bind(self.tenant_id)
        .bind(id as i32)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(MarriageRow::into_domain).transpose()
    }

    async fn find_ceremony(&mut self, id: u32) -> MarriageResult<Option<Ceremony>> {
        let row = sqlx::query_as::<_, CeremonyRow>(&format!(
            "SELECT {CEREMONY_COLUMNS} FROM ceremonies WHERE tenant_id = $1 AND id = $2",
        ))
        .bind(self.tenant_id)
        .bind(id as i32)
        .fetch_optional(&mut *self.tx)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate_ceremony(row).await?)),
            None => Ok(None),
        }
    }

    async fn active_marriage_of(
        &mut self,
        character_id: u32,
    ) -> MarriageResult<Option<Marriage>> {
        let row = sqlx::query_as::<_, MarriageRow>(&format!(
            "SELECT {MARRIAGE_COLUMNS} FROM marriages \
             WHERE tenant_id = $1 AND status IN ($2, $3) \
             AND (character_id_1 = $4 OR character_id_2 = $4) LIMIT 1",
        ))
        .bind(self.tenant_id)
        .bind(MarriageStatus::Engaged.as_i16())
        .bind(MarriageStatus::Married.as_i16())
        .bind(character_id as i64)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(MarriageRow::into_domain).transpose()
    }

    async fn pending_proposal_between(
        &mut self,
        proposer_id: u32,
        target_id: u32,
    ) -> MarriageResult<Option<Proposal>> {
        let row = sqlx::query_as::<_, ProposalRow>(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM proposals \
             WHERE tenant_id = $1 AND status = $2 AND proposer_id = $3 AND target_id = $4 \
             LIMIT 1",
        ))
        .bind(self.tenant_id)
        .bind(ProposalStatus::Pending.as_i16())
        .bind(proposer_id as i64)
        .bind(target_id as i64)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ProposalRow::into_domain).transpose()
    }

    async fn last_proposal_from(
        &mut self,
        proposer_id: u32,
    ) -> MarriageResult<Option<Proposal>> {
        let row = sqlx::query_as::<_, ProposalRow>(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM proposals \
             WHERE tenant_id = $1 AND proposer_id = $2 \
             ORDER BY proposed_at DESC LIMIT 1",
        ))
        .bind(self.tenant_id)
        .bind(proposer_id as i64)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ProposalRow::into_domain).transpose()
    }

    async fn last_rejection_between(
        &mut self,
        proposer_id: u32,
        target_id: u32,
    ) -> MarriageResult<Option<Proposal>> {
        let row = sqlx::query_as::<_, ProposalRow>(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM proposals \
             WHERE tenant_id = $1 AND status = $2 AND proposer_id = $3 AND target_id = $4 \
             ORDER BY responded_at DESC LIMIT 1",
        ))
        .bind(self.tenant_id)
        .bind(ProposalStatus::Rejected.as_i16())
        .bind(proposer_id as i64)
        .bind(target_id as i64)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ProposalRow::into_domain).transpose()
    }

    async fn pending_proposals_involving(
        &mut self,
        character_id: u32,
    ) -> MarriageResult<Vec<Proposal>> {
        let rows = sqlx::query_as::<_, ProposalRow>(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM proposals \
             WHERE tenant_id = $1 AND status = $2 \
             AND (proposer_id = $3 OR target_id = $3) ORDER BY id",
        ))
        .bind(self.tenant_id)
        .bind(ProposalStatus::Pending.as_i16())
        .bind(character_id as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(ProposalRow::into_domain).collect()
    }

    async fn pending_proposals_past(
        &mut self,
        now: DateTime<Utc>,
    ) -> MarriageResult<Vec<Proposal>> {
        let rows = sqlx::query_as::<_, ProposalRow>(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM proposals \
             WHERE tenant_id = $1 AND status = $2 AND expires_at <= $3 ORDER BY id",
        ))
        .bind(self.tenant_id)
        .bind(ProposalStatus::Pending.as_i16())
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(ProposalRow::into_domain).collect()
    }

    async fn open_ceremony_for(
        &mut self,
        marriage_id: u32,
    ) -> MarriageResult<Option<Ceremony>> {
        let row = sqlx::query_as::<_, CeremonyRow>(&format!(
            "SELECT {CEREMONY_COLUMNS} FROM ceremonies \
             WHERE tenant_id = $1 AND marriage_id = $2 AND status IN ($3, $4, $5) LIMIT 1",
        ))
        .bind(self.tenant_id)
        .bind(marriage_id as i32)
        .bind(CeremonyStatus::Scheduled.as_i16())
        .bind(CeremonyStatus::Active.as_i16())
        .bind(CeremonyStatus::Postponed.as_i16())
        .fetch_optional(&mut *self.tx)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate_ceremony(row).await?)),
            None => Ok(None),
        }
    }

    async fn active_ceremonies_past(
        &mut self,
        started_before: DateTime<Utc>,
    ) -> MarriageResult<Vec<Ceremony>> {
        let rows = sqlx::query_as::<_, CeremonyRow>(&format!(
            "SELECT {CEREMONY_COLUMNS} FROM ceremonies \
             WHERE tenant_id = $1 AND status = $2 AND started_at <= $3 ORDER BY id",
        ))
        .bind(self.tenant_id)
        .bind(CeremonyStatus::Active.as_i16())
        .bind(started_before)
        .fetch_all(&mut *self.tx)
        .await?;
        let mut ceremonies = Vec::with_capacity(rows.len());
        for row in rows {
            ceremonies.push(self.hydrate_ceremony(row).await?);
        }
        Ok(ceremonies)
    }

    async fn insert_proposal(&mut self, proposal: Proposal) -> MarriageResult<Proposal> {
        let id = sqlx::query_scalar::<_, i32>(
            "INSERT INTO proposals (proposer_id, target_id, status, proposed_at, responded_at, \
             expires_at, rejection_count, cooldown_until, tenant_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id",
        )
        .bind(proposal.proposer_id as i64)
        .bind(proposal.target_id as i64)
        .bind(proposal.status.as_i16())
        .bind(proposal.proposed_at)
        .bind(proposal.responded_at)
        .bind(proposal.expires_at)
        .bind(proposal.rejection_count as i32)
        .bind(proposal.cooldown_until)
        .bind(self.tenant_id)
        .bind(proposal.created_at)
        .bind(proposal.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(Proposal {
            id: id as u32,
            tenant_id: self.tenant_id,
            ..proposal
        })
    }

    async fn update_proposal(&mut self, proposal: &Proposal) -> MarriageResult<()> {
        sqlx::query(
            "UPDATE proposals SET status = $3, responded_at = $4, rejection_count = $5, \
             cooldown_until = $6, updated_at = $7 WHERE tenant_id = $1 AND id = $2",
        )
        .bind(self.tenant_id)
        .bind(proposal.id as i32)
        .bind(proposal.status.as_i16())
        .bind(proposal.responded_at)
        .bind(proposal.rejection_count as i32)
        .bind(proposal.cooldown_until)
        .bind(proposal.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_marriage(&mut self, marriage: Marriage) -> MarriageResult<Marriage> {
        let id = sqlx::query_scalar::<_, i32>(
            "INSERT INTO marriages (character_id_1, character_id_2, status, proposed_at, \
             engaged_at, married_at, divorced_at, tenant_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING id",
        )
        .bind(marriage.character_id_1 as i64)
        .bind(marriage.character_id_2 as i64)
        .bind(marriage.status.as_i16())
        .bind(marriage.proposed_at)
        .bind(marriage.engaged_at)
        .bind(marriage.married_at)
        .bind(marriage.divorced_at)
        .bind(self.tenant_id)
        .bind(marriage.created_at)
        .bind(marriage.updated_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_active_marriage_conflict(e, &marriage))?;
        Ok(Marriage {
            id: id as u32,
            tenant_id: self.tenant_id,
            ..marriage
        })
    }

    async fn update_marriage(&mut self, marriage: &Marriage) -> MarriageResult<()> {
        sqlx::query(
            "UPDATE marriages SET status = $3, engaged_at = $4, married_at = $5, \
             divorced_at = $6, updated_at = $7 WHERE tenant_id = $1 AND id = $2",
        )
        .bind(self.tenant_id)
        .bind(marriage.id as i32)
        .bind(marriage.status.as_i16())
        .bind(marriage.engaged_at)
        .bind(marriage.married_at)
        .bind(marriage.divorced_at)
        .bind(marriage.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_ceremony(&mut self, ceremony: Ceremony) -> MarriageResult<Ceremony> {
        let id = sqlx::query_scalar::<_, i32>(
            "INSERT INTO ceremonies (marriage_id, scheduled_at, status, started_at, \
             completed_at, postponed_at, cancelled_at, tenant_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING id",
        )
        .bind(ceremony.marriage_id as i32)
        .bind(ceremony.scheduled_at)
        .bind(ceremony.status.as_i16())
        .bind(ceremony.started_at)
        .bind(ceremony.completed_at)
        .bind(ceremony.postponed_at)
        .bind(ceremony.cancelled_at)
        .bind(self.tenant_id)
        .bind(ceremony.created_at)
        .bind(ceremony.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;
        self.store_invitees(id, &ceremony.invitees).await?;
        Ok(Ceremony {
            id: id as u32,
            tenant_id: self.tenant_id,
            ..ceremony
        })
    }

    async fn update_ceremony(&mut self, ceremony: &Ceremony) -> MarriageResult<()> {
        sqlx::query(
            "UPDATE ceremonies SET scheduled_at = $3, status = $4, started_at = $5, \
             completed_at = $6, postponed_at = $7, cancelled_at = $8, updated_at = $9 \
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(self.tenant_id)
        .bind(ceremony.id as i32)
        .bind(ceremony.scheduled_at)
        .bind(ceremony.status.as_i16())
        .bind(ceremony.started_at)
        .bind(ceremony.completed_at)
        .bind(ceremony.postponed_at)
        .bind(ceremony.cancelled_at)
        .bind(ceremony.updated_at)
        .execute(&mut *self.tx)
        .await?;
        self.store_invitees(ceremony.id as i32, &ceremony.invitees)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> MarriageResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_are_stable_and_distinct_per_character() {
        let tenant = Uuid::new_v4();
        assert_eq!(
            character_lock_key(tenant, 100),
            character_lock_key(tenant, 100)
        );
        assert_ne!(
            character_lock_key(tenant, 100),
            character_lock_key(tenant, 200)
        );
        assert_ne!(
            character_lock_key(tenant, 100),
            character_lock_key(Uuid::new_v4(), 100)
        );
    }
}
