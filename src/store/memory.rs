//! In-memory store
//!
//! Transactions clone the tenant's state on begin, mutate the clone, and
//! swap it back on commit; an aborted transaction is simply dropped. Ids
//! are allocated from shared monotonic counters, so aborted transactions
//! leave gaps the way a database sequence would.
//!
//! Backs the integration tests and local runs without Postgres.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Ceremony, Marriage, Proposal};
use crate::error::MarriageResult;
use crate::store::{Store, StoreTx};

#[derive(Debug, Default, Clone)]
struct TenantState {
    proposals: Vec<Proposal>,
    marriages: Vec<Marriage>,
    ceremonies: Vec<Ceremony>,
}

#[derive(Debug, Default)]
struct Shared {
    tenants: HashMap<Uuid, TenantState>,
    next_proposal_id: u32,
    next_marriage_id: u32,
    next_ceremony_id: u32,
}

/// Transactional in-memory store
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, tenant_id: Uuid) -> MarriageResult<Box<dyn StoreTx>> {
        let shared = self.inner.lock().await;
        let state = shared.tenants.get(&tenant_id).cloned().unwrap_or_default();
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.inner),
            tenant_id,
            state,
        }))
    }

    async fn tenants_with_expired_proposals(
        &self,
        now: DateTime<Utc>,
    ) -> MarriageResult<Vec<Uuid>> {
        let shared = self.inner.lock().await;
        Ok(shared
            .tenants
            .iter()
            .filter(|(_, state)| state.proposals.iter().any(|p| p.is_expired_at(now)))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn tenants_with_overdue_ceremonies(
        &self,
        started_before: DateTime<Utc>,
    ) -> MarriageResult<Vec<Uuid>> {
        let shared = self.inner.lock().await;
        Ok(shared
            .tenants
            .iter()
            .filter(|(_, state)| {
                state.ceremonies.iter().any(|c| {
                    c.status == crate::domain::CeremonyStatus::Active
                        && c.started_at.is_some_and(|t| t <= started_before)
                })
            })
            .map(|(id, _)| *id)
            .collect())
    }
}

struct MemoryTx {
    shared: Arc<Mutex<Shared>>,
    tenant_id: Uuid,
    state: TenantState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    /// No-op: transactions clone and swap whole tenant states, so
    /// writers never interleave.
    async fn lock_character(&mut self, _character_id: u32) -> MarriageResult<()> {
        Ok(())
    }

    async fn find_proposal(&mut self, id: u32) -> MarriageResult<Option<Proposal>> {
        Ok(self.state.proposals.iter().find(|p| p.id == id).cloned())
    }

    async fn find_marriage(&mut self, id: u32) -> MarriageResult<Option<Marriage>> {
        Ok(self.state.marriages.iter().find(|m| m.id == id).cloned())
    }

    async fn find_ceremony(&mut self, id: u32) -> MarriageResult<Option<Ceremony>> {
        Ok(self.state.ceremonies.iter().find(|c| c.id == id).cloned())
    }

    async fn active_marriage_of(
        &mut self,
        character_id: u32,
    ) -> MarriageResult<Option<Marriage>> {
        Ok(self
            .state
            .marriages
            .iter()
            .find(|m| m.status.is_active() && m.is_partner(character_id))
            .cloned())
    }

    async fn pending_proposal_between(
        &mut self,
        proposer_id: u32,
        target_id: u32,
    ) -> MarriageResult<Option<Proposal>> {
        Ok(self
            .state
            .proposals
            .iter()
            .find(|p| {
                p.status == crate::domain::ProposalStatus::Pending
                    && p.proposer_id == proposer_id
                    && p.target_id == target_id
            })
            .cloned())
    }

    async fn last_proposal_from(
        &mut self,
        proposer_id: u32,
    ) -> MarriageResult<Option<Proposal>> {
        Ok(self
            .state
            .proposals
            .iter()
            .filter(|p| p.proposer_id == proposer_id)
            .max_by_key(|p| p.proposed_at)
            .cloned())
    }

    async fn last_rejection_between(
        &mut self,
        proposer_id: u32,
        target_id: u32,
    ) -> MarriageResult<Option<Proposal>> {
        Ok(self
            .state
            .proposals
            .iter()
            .filter(|p| {
                p.status == crate::domain::ProposalStatus::Rejected
                    && p.proposer_id == proposer_id
                    && p.target_id == target_id
            })
            .max_by_key(|p| p.responded_at)
            .cloned())
    }

    async fn pending_proposals_involving(
        &mut self,
        character_id: u32,
    ) -> MarriageResult<Vec<Proposal>> {
        Ok(self
            .state
            .proposals
            .iter()
            .filter(|p| {
                p.status == crate::domain::ProposalStatus::Pending
                    && (p.proposer_id == character_id || p.target_id == character_id)
            })
            .cloned()
            .collect())
    }

    async fn pending_proposals_past(
        &mut self,
        now: DateTime<Utc>,
    ) -> MarriageResult<Vec<Proposal>> {
        Ok(self
            .state
            .proposals
            .iter()
            .filter(|p| p.is_expired_at(now))
            .cloned()
            .collect())
    }

    async fn open_ceremony_for(
        &mut self,
        marriage_id: u32,
    ) -> MarriageResult<Option<Ceremony>> {
        Ok(self
            .state
            .ceremonies
            .iter()
            .find(|c| c.marriage_id == marriage_id && !c.status.is_terminal())
            .cloned())
    }

    async fn active_ceremonies_past(
        &mut self,
        started_before: DateTime<Utc>,
    ) -> MarriageResult<Vec<Ceremony>> {
        Ok(self
            .state
            .ceremonies
            .iter()
            .filter(|c| {
                c.status == crate::domain::CeremonyStatus::Active
                    && c.started_at.is_some_and(|t| t <= started_before)
            })
            .cloned()
            .collect())
    }

    async fn insert_proposal(&mut self, proposal: Proposal) -> MarriageResult<Proposal> {
        let id = {
            let mut shared = self.shared.lock().await;
            shared.next_proposal_id += 1;
            shared.next_proposal_id
        };
        let proposal = Proposal {
            id,
            tenant_id: self.tenant_id,
            ..proposal
        };
        self.state.proposals.push(proposal.clone());
        Ok(proposal)
    }

    async fn update_proposal(&mut self, proposal: &Proposal) -> MarriageResult<()> {
        if let Some(slot) = self.state.proposals.iter_mut().find(|p| p.id == proposal.id) {
            *slot = proposal.clone();
        }
        Ok(())
    }

    async fn insert_marriage(&mut self, marriage: Marriage) -> MarriageResult<Marriage> {
        let id = {
            let mut shared = self.shared.lock().await;
            shared.next_marriage_id += 1;
            shared.next_marriage_id
        };
        let marriage = Marriage {
            id,
            tenant_id: self.tenant_id,
            ..marriage
        };
        self.state.marriages.push(marriage.clone());
        Ok(marriage)
    }

    async fn update_marriage(&mut self, marriage: &Marriage) -> MarriageResult<()> {
        if let Some(slot) = self.state.marriages.iter_mut().find(|m| m.id == marriage.id) {
            *slot = marriage.clone();
        }
        Ok(())
    }

    async fn insert_ceremony(&mut self, ceremony: Ceremony) -> MarriageResult<Ceremony> {
        let id = {
            let mut shared = self.shared.lock().await;
            shared.next_ceremony_id += 1;
            shared.next_ceremony_id
        };
        let ceremony = Ceremony {
            id,
            tenant_id: self.tenant_id,
            ..ceremony
        };
        self.state.ceremonies.push(ceremony.clone());
        Ok(ceremony)
    }

    async fn update_ceremony(&mut self, ceremony: &Ceremony) -> MarriageResult<()> {
        if let Some(slot) = self
            .state
            .ceremonies
            .iter_mut()
            .find(|c| c.id == ceremony.id)
        {
            *slot = ceremony.clone();
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> MarriageResult<()> {
        let mut shared = self.shared.lock().await;
        shared.tenants.insert(self.tenant_id, self.state);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::ProposalStatus;

    #[tokio::test]
    async fn committed_writes_are_visible_to_later_transactions() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = store.begin(tenant).await.unwrap();
        let inserted = tx
            .insert_proposal(Proposal::new(tenant, 100, 200, 0, now).unwrap())
            .await
            .unwrap();
        assert_eq!(inserted.id, 1);
        tx.commit().await.unwrap();

        let mut tx = store.begin(tenant).await.unwrap();
        let found = tx.find_proposal(1).await.unwrap().unwrap();
        assert_eq!(found.status, ProposalStatus::Pending);
    }

    #[tokio::test]
    async fn dropped_transactions_roll_back() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let now = Utc::now();

        {
            let mut tx = store.begin(tenant).await.unwrap();
            tx.insert_proposal(Proposal::new(tenant, 100, 200, 0, now).unwrap())
                .await
                .unwrap();
            // no commit
        }

        let mut tx = store.begin(tenant).await.unwrap();
        assert!(tx.find_proposal(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let store = MemoryStore::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = store.begin(tenant_a).await.unwrap();
        tx.insert_proposal(Proposal::new(tenant_a, 100, 200, 0, now).unwrap())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(tenant_b).await.unwrap();
        assert!(tx.find_proposal(1).await.unwrap().is_none());
        assert!(tx.last_proposal_from(100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_queries_see_expired_tenants() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = store.begin(tenant).await.unwrap();
        tx.insert_proposal(Proposal::new(tenant, 100, 200, 0, now).unwrap())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(store
            .tenants_with_expired_proposals(now)
            .await
            .unwrap()
            .is_empty());
        let past_expiry = now + chrono::Duration::hours(25);
        assert_eq!(
            store.tenants_with_expired_proposals(past_expiry).await.unwrap(),
            vec![tenant]
        );
    }
}
