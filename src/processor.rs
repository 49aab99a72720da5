//! Domain processor
//!
//! One [`Processor`] instance is scoped to a single tenant and executes
//! one command at a time under the transactional protocol: load the
//! entities, validate the command's preconditions, transition through the
//! pure domain functions, persist the new values, stage the outgoing
//! events, commit, and only then publish. An aborted command publishes
//! nothing.
//!
//! Events for two-character entities are staged once per partner so both
//! downstream partitions receive a copy.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::character::{Character, CharacterDirectory};
use crate::clock::{Clock, SystemClock};
use crate::config::PolicyConfig;
use crate::domain::{Ceremony, CeremonyStatus, Marriage, MarriageStatus, Proposal};
use crate::error::{ErrorCode, MarriageError, MarriageResult};
use crate::events::{Event, EventPublisher};
use crate::store::{Store, StoreTx};
use crate::tenant::Tenant;

/// Shared dependencies from which tenant-scoped processors are built
pub struct MarriageService {
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
    characters: Arc<dyn CharacterDirectory>,
    policy: PolicyConfig,
    clock: Arc<dyn Clock>,
}

impl MarriageService {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn EventPublisher>,
        characters: Arc<dyn CharacterDirectory>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            characters,
            policy,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock; tests drive expiry and cooldown windows
    /// through this.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build a processor scoped to one tenant
    pub fn processor(&self, tenant: Tenant) -> Processor {
        Processor {
            tenant,
            store: Arc::clone(&self.store),
            publisher: Arc::clone(&self.publisher),
            characters: Arc::clone(&self.characters),
            policy: self.policy.clone(),
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Tenant-scoped command processor
pub struct Processor {
    tenant: Tenant,
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
    characters: Arc<dyn CharacterDirectory>,
    policy: PolicyConfig,
    clock: Arc<dyn Clock>,
}

impl Processor {
    /// Create a pending proposal from `proposer_id` to `target_id`
    pub async fn propose(&self, proposer_id: u32, target_id: u32) -> MarriageResult<Proposal> {
        let now = self.clock.now();
        if proposer_id == target_id {
            return Err(MarriageError::SelfProposal {
                character_id: proposer_id,
            });
        }
        self.require_eligible(proposer_id).await?;
        self.require_eligible(target_id).await?;

        let mut tx = self.store.begin(self.tenant.id).await?;
        // ascending lock order so concurrent pairs cannot deadlock
        for character_id in Self::ordered_pair(proposer_id, target_id) {
            tx.lock_character(character_id).await?;
        }
        if let Some(marriage) = tx.active_marriage_of(proposer_id).await? {
            return Err(Self::active_marriage_error(&marriage, proposer_id));
        }
        // a married target is not proposable either
        if tx.active_marriage_of(target_id).await?.is_some() {
            return Err(MarriageError::AlreadyEngaged {
                character_id: target_id,
            });
        }
        if tx
            .pending_proposal_between(proposer_id, target_id)
            .await?
            .is_some()
        {
            return Err(MarriageError::ConcurrentProposal {
                proposer_id,
                target_id,
            });
        }
        if let Some(last) = tx.last_proposal_from(proposer_id).await? {
            let until =
                last.proposed_at + Duration::seconds(self.policy.global_cooldown_secs as i64);
            if until > now {
                return Err(MarriageError::GlobalCooldown { until });
            }
        }
        let mut rejection_count = 0;
        if let Some(rejected) = tx.last_rejection_between(proposer_id, target_id).await? {
            if let Some(until) = rejected.cooldown_until {
                if until > now {
                    return Err(MarriageError::TargetCooldown { until });
                }
            }
            rejection_count = rejected.rejection_count;
        }

        let proposal = tx
            .insert_proposal(Proposal::new(
                self.tenant.id,
                proposer_id,
                target_id,
                rejection_count,
                now,
            )?)
            .await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            [proposer_id, target_id],
            Event::ProposalCreated {
                proposal_id: proposal.id,
                proposer_id,
                target_id,
                proposed_at: proposal.proposed_at,
                expires_at: proposal.expires_at,
            },
        );
        tx.commit().await?;
        self.publish_staged(staged).await;
        tracing::info!(
            tenant = %self.tenant.id,
            proposer_id,
            target_id,
            proposal_id = proposal.id,
            "proposal created"
        );
        Ok(proposal)
    }

    /// Accept a pending proposal; creates the engagement
    pub async fn accept(&self, character_id: u32, proposal_id: u32) -> MarriageResult<Marriage> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let proposal = tx
            .find_proposal(proposal_id)
            .await?
            .ok_or(MarriageError::ProposalNotFound { proposal_id })?;
        if proposal.target_id != character_id {
            return Err(MarriageError::NotParticipant { character_id });
        }
        let accepted = proposal.accept(now)?;
        // uniqueness guard inside the same transaction: the character locks
        // serialize racing commands, so the loser observes the winner's
        // marriage here instead of tripping the partial index
        for involved in Self::ordered_pair(proposal.proposer_id, proposal.target_id) {
            tx.lock_character(involved).await?;
        }
        if let Some(marriage) = tx.active_marriage_of(proposal.proposer_id).await? {
            return Err(Self::active_marriage_error(&marriage, proposal.proposer_id));
        }
        if let Some(marriage) = tx.active_marriage_of(proposal.target_id).await? {
            return Err(Self::active_marriage_error(&marriage, proposal.target_id));
        }
        tx.update_proposal(&accepted).await?;
        let marriage = Marriage::propose(
            self.tenant.id,
            proposal.proposer_id,
            proposal.target_id,
            now,
        )?
        .engage(now)?;
        let marriage = tx.insert_marriage(marriage).await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            marriage.partners(),
            Event::ProposalAccepted {
                proposal_id,
                proposer_id: proposal.proposer_id,
                target_id: proposal.target_id,
                marriage_id: marriage.id,
                responded_at: now,
            },
        );
        tx.commit().await?;
        self.publish_staged(staged).await;
        tracing::info!(
            tenant = %self.tenant.id,
            proposal_id,
            marriage_id = marriage.id,
            "proposal accepted, marriage engaged"
        );
        Ok(marriage)
    }

    /// Decline a pending proposal; starts the per-target cooldown
    pub async fn decline(&self, character_id: u32, proposal_id: u32) -> MarriageResult<Proposal> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let proposal = tx
            .find_proposal(proposal_id)
            .await?
            .ok_or(MarriageError::ProposalNotFound { proposal_id })?;
        if proposal.target_id != character_id {
            return Err(MarriageError::NotParticipant { character_id });
        }
        let declined = proposal.decline(now)?;
        tx.update_proposal(&declined).await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            [declined.proposer_id, declined.target_id],
            Event::ProposalDeclined {
                proposal_id,
                proposer_id: declined.proposer_id,
                target_id: declined.target_id,
                rejection_count: declined.rejection_count,
                cooldown_until: declined.cooldown_until,
                responded_at: now,
            },
        );
        tx.commit().await?;
        self.publish_staged(staged).await;
        Ok(declined)
    }

    /// Withdraw one's own pending proposal
    pub async fn cancel(&self, character_id: u32, proposal_id: u32) -> MarriageResult<Proposal> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let proposal = tx
            .find_proposal(proposal_id)
            .await?
            .ok_or(MarriageError::ProposalNotFound { proposal_id })?;
        if proposal.proposer_id != character_id {
            return Err(MarriageError::NotParticipant { character_id });
        }
        let cancelled = proposal.cancel(now)?;
        tx.update_proposal(&cancelled).await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            [cancelled.proposer_id, cancelled.target_id],
            Event::ProposalCancelled {
                proposal_id,
                proposer_id: cancelled.proposer_id,
                target_id: cancelled.target_id,
                cancelled_at: now,
            },
        );
        tx.commit().await?;
        self.publish_staged(staged).await;
        Ok(cancelled)
    }

    /// Dissolve an engagement or marriage; cancels any open ceremony in
    /// the same transaction
    pub async fn divorce(&self, character_id: u32, marriage_id: u32) -> MarriageResult<Marriage> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let marriage = tx
            .find_marriage(marriage_id)
            .await?
            .ok_or(MarriageError::MarriageNotFound { marriage_id })?;
        if !marriage.is_partner(character_id) {
            return Err(MarriageError::NotParticipant { character_id });
        }
        let divorced = marriage.divorce(now)?;
        tx.update_marriage(&divorced).await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            divorced.partners(),
            Event::MarriageDivorced {
                marriage_id,
                character_id_1: divorced.character_id_1,
                character_id_2: divorced.character_id_2,
                divorced_at: now,
            },
        );
        if let Some(ceremony) = tx.open_ceremony_for(marriage_id).await? {
            let cancelled = ceremony.cancel(now)?;
            tx.update_ceremony(&cancelled).await?;
            Self::stage_pair(
                &mut staged,
                divorced.partners(),
                Event::CeremonyCancelled {
                    ceremony_id: cancelled.id,
                    marriage_id,
                    cancelled_at: now,
                    reason: None,
                },
            );
        }
        tx.commit().await?;
        self.publish_staged(staged).await;
        tracing::info!(tenant = %self.tenant.id, marriage_id, "marriage dissolved");
        Ok(divorced)
    }

    /// Schedule the wedding for an engaged marriage
    pub async fn schedule_ceremony(
        &self,
        character_id: u32,
        marriage_id: u32,
        scheduled_at: DateTime<Utc>,
        invitees: Vec<u32>,
    ) -> MarriageResult<Ceremony> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let marriage = tx
            .find_marriage(marriage_id)
            .await?
            .ok_or(MarriageError::MarriageNotFound { marriage_id })?;
        if !marriage.is_partner(character_id) {
            return Err(MarriageError::NotParticipant { character_id });
        }
        if !marriage.can_marry() {
            return Err(MarriageError::InvalidStateTransition {
                entity: "marriage",
                from: marriage.status.as_str(),
                to: MarriageStatus::Married.as_str(),
            });
        }
        if tx.open_ceremony_for(marriage_id).await?.is_some() {
            return Err(MarriageError::CeremonyAlreadyScheduled { marriage_id });
        }
        let ceremony = tx
            .insert_ceremony(Ceremony::schedule(
                self.tenant.id,
                marriage_id,
                scheduled_at,
                invitees,
                now,
            )?)
            .await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            marriage.partners(),
            Event::CeremonyScheduled {
                ceremony_id: ceremony.id,
                marriage_id,
                scheduled_at: ceremony.scheduled_at,
                invitees: ceremony.invitees.clone(),
            },
        );
        tx.commit().await?;
        self.publish_staged(staged).await;
        Ok(ceremony)
    }

    /// Open the ceremony for its participants
    pub async fn start_ceremony(
        &self,
        character_id: u32,
        ceremony_id: u32,
    ) -> MarriageResult<Ceremony> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let (ceremony, marriage) = Self::load_ceremony(&mut *tx, ceremony_id).await?;
        if !marriage.is_partner(character_id) {
            return Err(MarriageError::NotParticipant { character_id });
        }
        let started = ceremony.start(now)?;
        tx.update_ceremony(&started).await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            marriage.partners(),
            Event::CeremonyStarted {
                ceremony_id,
                marriage_id: marriage.id,
                started_at: now,
            },
        );
        tx.commit().await?;
        self.publish_staged(staged).await;
        Ok(started)
    }

    /// Complete an active ceremony; the engagement becomes a marriage
    pub async fn complete_ceremony(
        &self,
        character_id: u32,
        ceremony_id: u32,
    ) -> MarriageResult<Marriage> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let (ceremony, marriage) = Self::load_ceremony(&mut *tx, ceremony_id).await?;
        if !marriage.is_partner(character_id) {
            return Err(MarriageError::NotParticipant { character_id });
        }
        let completed = ceremony.complete(now)?;
        let married = marriage.complete(now)?;
        tx.update_ceremony(&completed).await?;
        tx.update_marriage(&married).await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            married.partners(),
            Event::CeremonyCompleted {
                ceremony_id,
                marriage_id: married.id,
                completed_at: now,
            },
        );
        Self::stage_pair(
            &mut staged,
            married.partners(),
            Event::MarriageCreated {
                marriage_id: married.id,
                character_id_1: married.character_id_1,
                character_id_2: married.character_id_2,
                married_at: now,
            },
        );
        tx.commit().await?;
        self.publish_staged(staged).await;
        tracing::info!(
            tenant = %self.tenant.id,
            ceremony_id,
            marriage_id = married.id,
            "ceremony completed, marriage created"
        );
        Ok(married)
    }

    /// Postpone an active ceremony
    pub async fn postpone_ceremony(
        &self,
        character_id: u32,
        ceremony_id: u32,
    ) -> MarriageResult<Ceremony> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let (ceremony, marriage) = Self::load_ceremony(&mut *tx, ceremony_id).await?;
        if !marriage.is_partner(character_id) {
            return Err(MarriageError::NotParticipant { character_id });
        }
        let postponed = ceremony.postpone(now)?;
        tx.update_ceremony(&postponed).await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            marriage.partners(),
            Event::CeremonyPostponed {
                ceremony_id,
                marriage_id: marriage.id,
                postponed_at: now,
                reason: None,
            },
        );
        tx.commit().await?;
        self.publish_staged(staged).await;
        Ok(postponed)
    }

    /// Cancel a scheduled or postponed ceremony. Active ceremonies cannot
    /// be cancelled by command; they complete, postpone, or time out.
    pub async fn cancel_ceremony(
        &self,
        character_id: u32,
        ceremony_id: u32,
    ) -> MarriageResult<Ceremony> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let (ceremony, marriage) = Self::load_ceremony(&mut *tx, ceremony_id).await?;
        if !marriage.is_partner(character_id) {
            return Err(MarriageError::NotParticipant { character_id });
        }
        if ceremony.status == CeremonyStatus::Active {
            return Err(MarriageError::InvalidStateTransition {
                entity: "ceremony",
                from: CeremonyStatus::Active.as_str(),
                to: CeremonyStatus::Cancelled.as_str(),
            });
        }
        let cancelled = ceremony.cancel(now)?;
        tx.update_ceremony(&cancelled).await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            marriage.partners(),
            Event::CeremonyCancelled {
                ceremony_id,
                marriage_id: marriage.id,
                cancelled_at: now,
                reason: None,
            },
        );
        tx.commit().await?;
        self.publish_staged(staged).await;
        Ok(cancelled)
    }

    /// Move a scheduled or postponed ceremony to a new future time
    pub async fn reschedule_ceremony(
        &self,
        character_id: u32,
        ceremony_id: u32,
        scheduled_at: DateTime<Utc>,
    ) -> MarriageResult<Ceremony> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let (ceremony, marriage) = Self::load_ceremony(&mut *tx, ceremony_id).await?;
        if !marriage.is_partner(character_id) {
            return Err(MarriageError::NotParticipant { character_id });
        }
        let rescheduled = ceremony.reschedule(scheduled_at, now)?;
        tx.update_ceremony(&rescheduled).await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            marriage.partners(),
            Event::CeremonyRescheduled {
                ceremony_id,
                marriage_id: marriage.id,
                scheduled_at,
            },
        );
        tx.commit().await?;
        self.publish_staged(staged).await;
        Ok(rescheduled)
    }

    /// Add a guest to the ceremony
    pub async fn add_invitee(
        &self,
        character_id: u32,
        ceremony_id: u32,
        invitee_id: u32,
    ) -> MarriageResult<Ceremony> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let (ceremony, marriage) = Self::load_ceremony(&mut *tx, ceremony_id).await?;
        if !marriage.is_partner(character_id) {
            return Err(MarriageError::NotParticipant { character_id });
        }
        let updated = ceremony.add_invitee(invitee_id, now)?;
        tx.update_ceremony(&updated).await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            marriage.partners(),
            Event::InviteeAdded {
                ceremony_id,
                character_id: invitee_id,
            },
        );
        tx.commit().await?;
        self.publish_staged(staged).await;
        Ok(updated)
    }

    /// Remove a guest from the ceremony
    pub async fn remove_invitee(
        &self,
        character_id: u32,
        ceremony_id: u32,
        invitee_id: u32,
    ) -> MarriageResult<Ceremony> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let (ceremony, marriage) = Self::load_ceremony(&mut *tx, ceremony_id).await?;
        if !marriage.is_partner(character_id) {
            return Err(MarriageError::NotParticipant { character_id });
        }
        let updated = ceremony.remove_invitee(invitee_id, now)?;
        tx.update_ceremony(&updated).await?;
        let mut staged = Vec::new();
        Self::stage_pair(
            &mut staged,
            marriage.partners(),
            Event::InviteeRemoved {
                ceremony_id,
                character_id: invitee_id,
            },
        );
        tx.commit().await?;
        self.publish_staged(staged).await;
        Ok(updated)
    }

    /// Generic ceremony advancement used by the `ADVANCE_CEREMONY_STATE`
    /// command
    pub async fn advance_ceremony_state(
        &self,
        character_id: u32,
        ceremony_id: u32,
        next_state: CeremonyStatus,
    ) -> MarriageResult<()> {
        match next_state {
            CeremonyStatus::Active => self
                .start_ceremony(character_id, ceremony_id)
                .await
                .map(drop),
            CeremonyStatus::Completed => self
                .complete_ceremony(character_id, ceremony_id)
                .await
                .map(drop),
            CeremonyStatus::Postponed => self
                .postpone_ceremony(character_id, ceremony_id)
                .await
                .map(drop),
            CeremonyStatus::Cancelled => self
                .cancel_ceremony(character_id, ceremony_id)
                .await
                .map(drop),
            CeremonyStatus::Scheduled => Err(MarriageError::Envelope(
                "ADVANCE_CEREMONY_STATE cannot target SCHEDULED; use RESCHEDULE_CEREMONY"
                    .to_string(),
            )),
        }
    }

    /// Expiry sweep: flip every overdue pending proposal to `expired`.
    /// Idempotent; already-expired rows are not scanned.
    pub async fn process_expired_proposals(&self) -> MarriageResult<usize> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        let overdue = tx.pending_proposals_past(now).await?;
        let mut staged = Vec::new();
        for proposal in &overdue {
            let expired = proposal.expire(now)?;
            tx.update_proposal(&expired).await?;
            Self::stage_pair(
                &mut staged,
                [proposal.proposer_id, proposal.target_id],
                Event::ProposalExpired {
                    proposal_id: proposal.id,
                    proposer_id: proposal.proposer_id,
                    target_id: proposal.target_id,
                    expired_at: now,
                },
            );
        }
        let count = overdue.len();
        tx.commit().await?;
        self.publish_staged(staged).await;
        if count > 0 {
            tracing::info!(tenant = %self.tenant.id, count, "expired pending proposals");
        }
        Ok(count)
    }

    /// Timeout sweep: postpone active ceremonies past the policy
    /// threshold, cancel those past the second one.
    pub async fn process_ceremony_timeouts(&self) -> MarriageResult<usize> {
        let now = self.clock.now();
        let postpone_cutoff =
            now - Duration::seconds(self.policy.ceremony_postpone_after_secs as i64);
        let cancel_cutoff =
            now - Duration::seconds(self.policy.ceremony_cancel_after_secs as i64);

        let mut tx = self.store.begin(self.tenant.id).await?;
        let overdue = tx.active_ceremonies_past(postpone_cutoff).await?;
        let mut staged = Vec::new();
        for ceremony in &overdue {
            // status = active guarantees started_at
            let Some(started_at) = ceremony.started_at else {
                continue;
            };
            let marriage = tx.find_marriage(ceremony.marriage_id).await?.ok_or(
                MarriageError::MarriageNotFound {
                    marriage_id: ceremony.marriage_id,
                },
            )?;
            let reason = Some(ErrorCode::CeremonyTimeout.as_str().to_string());
            if started_at <= cancel_cutoff {
                let cancelled = ceremony.cancel(now)?;
                tx.update_ceremony(&cancelled).await?;
                Self::stage_pair(
                    &mut staged,
                    marriage.partners(),
                    Event::CeremonyCancelled {
                        ceremony_id: ceremony.id,
                        marriage_id: marriage.id,
                        cancelled_at: now,
                        reason,
                    },
                );
            } else {
                let postponed = ceremony.postpone(now)?;
                tx.update_ceremony(&postponed).await?;
                Self::stage_pair(
                    &mut staged,
                    marriage.partners(),
                    Event::CeremonyPostponed {
                        ceremony_id: ceremony.id,
                        marriage_id: marriage.id,
                        postponed_at: now,
                        reason,
                    },
                );
            }
        }
        let count = overdue.len();
        tx.commit().await?;
        self.publish_staged(staged).await;
        if count > 0 {
            tracing::info!(tenant = %self.tenant.id, count, "timed out active ceremonies");
        }
        Ok(count)
    }

    /// Reactive cleanup when a character is deleted: cancel their pending
    /// proposals, expire their active marriage, cancel its open ceremony.
    /// Applying this twice is a no-op after the first run.
    pub async fn on_character_deleted(&self, character_id: u32) -> MarriageResult<()> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.tenant.id).await?;
        tx.lock_character(character_id).await?;
        let mut staged = Vec::new();

        for proposal in tx.pending_proposals_involving(character_id).await? {
            let cancelled = proposal.cancel(now)?;
            tx.update_proposal(&cancelled).await?;
            Self::stage_pair(
                &mut staged,
                [cancelled.proposer_id, cancelled.target_id],
                Event::ProposalCancelled {
                    proposal_id: cancelled.id,
                    proposer_id: cancelled.proposer_id,
                    target_id: cancelled.target_id,
                    cancelled_at: now,
                },
            );
        }

        if let Some(marriage) = tx.active_marriage_of(character_id).await? {
            let expired = marriage.expire(now)?;
            tx.update_marriage(&expired).await?;
            Self::stage_pair(
                &mut staged,
                expired.partners(),
                Event::MarriageDeleted {
                    marriage_id: expired.id,
                    character_id_1: expired.character_id_1,
                    character_id_2: expired.character_id_2,
                    deleted_at: now,
                },
            );
            if let Some(ceremony) = tx.open_ceremony_for(expired.id).await? {
                let cancelled = ceremony.cancel(now)?;
                tx.update_ceremony(&cancelled).await?;
                Self::stage_pair(
                    &mut staged,
                    expired.partners(),
                    Event::CeremonyCancelled {
                        ceremony_id: cancelled.id,
                        marriage_id: expired.id,
                        cancelled_at: now,
                        reason: None,
                    },
                );
            }
        }

        tx.commit().await?;
        if !staged.is_empty() {
            tracing::info!(tenant = %self.tenant.id, character_id, "dissolved state for deleted character");
        }
        self.publish_staged(staged).await;
        Ok(())
    }

    // ----- read queries for the HTTP surface -----

    pub async fn get_proposal(&self, proposal_id: u32) -> MarriageResult<Proposal> {
        let mut tx = self.store.begin(self.tenant.id).await?;
        let proposal = tx
            .find_proposal(proposal_id)
            .await?
            .ok_or(MarriageError::ProposalNotFound { proposal_id })?;
        tx.commit().await?;
        Ok(proposal)
    }

    pub async fn get_marriage(&self, marriage_id: u32) -> MarriageResult<Marriage> {
        let mut tx = self.store.begin(self.tenant.id).await?;
        let marriage = tx
            .find_marriage(marriage_id)
            .await?
            .ok_or(MarriageError::MarriageNotFound { marriage_id })?;
        tx.commit().await?;
        Ok(marriage)
    }

    pub async fn get_ceremony(&self, ceremony_id: u32) -> MarriageResult<Ceremony> {
        let mut tx = self.store.begin(self.tenant.id).await?;
        let ceremony = tx
            .find_ceremony(ceremony_id)
            .await?
            .ok_or(MarriageError::CeremonyNotFound { ceremony_id })?;
        tx.commit().await?;
        Ok(ceremony)
    }

    /// The character's engaged or married marriage, if any
    pub async fn marriage_of(&self, character_id: u32) -> MarriageResult<Option<Marriage>> {
        let mut tx = self.store.begin(self.tenant.id).await?;
        let marriage = tx.active_marriage_of(character_id).await?;
        tx.commit().await?;
        Ok(marriage)
    }

    /// Pending proposals the character sent or received
    pub async fn proposals_involving(&self, character_id: u32) -> MarriageResult<Vec<Proposal>> {
        let mut tx = self.store.begin(self.tenant.id).await?;
        let proposals = tx.pending_proposals_involving(character_id).await?;
        tx.commit().await?;
        Ok(proposals)
    }

    /// The open ceremony of the character's active marriage, if any
    pub async fn ceremony_of(&self, character_id: u32) -> MarriageResult<Option<Ceremony>> {
        let mut tx = self.store.begin(self.tenant.id).await?;
        let ceremony = match tx.active_marriage_of(character_id).await? {
            Some(marriage) => tx.open_ceremony_for(marriage.id).await?,
            None => None,
        };
        tx.commit().await?;
        Ok(ceremony)
    }

    // ----- internals -----

    async fn require_eligible(&self, character_id: u32) -> MarriageResult<Character> {
        let character = self
            .characters
            .find(&self.tenant, character_id)
            .await?
            .ok_or(MarriageError::TenantMismatch {
                tenant_id: self.tenant.id,
                character_id,
            })?;
        if character.level < self.policy.min_level {
            return Err(MarriageError::InsufficientLevel {
                character_id,
                level: character.level,
                required: self.policy.min_level,
            });
        }
        Ok(character)
    }

    fn ordered_pair(a: u32, b: u32) -> [u32; 2] {
        if a <= b {
            [a, b]
        } else {
            [b, a]
        }
    }

    fn active_marriage_error(marriage: &Marriage, character_id: u32) -> MarriageError {
        if marriage.status == MarriageStatus::Married {
            MarriageError::AlreadyMarried { character_id }
        } else {
            MarriageError::AlreadyEngaged { character_id }
        }
    }

    async fn load_ceremony(
        tx: &mut dyn StoreTx,
        ceremony_id: u32,
    ) -> MarriageResult<(Ceremony, Marriage)> {
        let ceremony = tx
            .find_ceremony(ceremony_id)
            .await?
            .ok_or(MarriageError::CeremonyNotFound { ceremony_id })?;
        let marriage = tx.find_marriage(ceremony.marriage_id).await?.ok_or(
            MarriageError::MarriageNotFound {
                marriage_id: ceremony.marriage_id,
            },
        )?;
        Ok((ceremony, marriage))
    }

    /// Stage one copy of the event per partner, in staging order
    fn stage_pair(staged: &mut Vec<(u32, Event)>, recipients: [u32; 2], event: Event) {
        if recipients[0] == recipients[1] {
            staged.push((recipients[0], event));
        } else {
            staged.push((recipients[0], event.clone()));
            staged.push((recipients[1], event));
        }
    }

    /// Post-commit, at-least-once publish of the staged events in staging
    /// order. Failures are logged; the committed state is already durable.
    async fn publish_staged(&self, staged: Vec<(u32, Event)>) {
        for (character_id, event) in staged {
            if let Err(e) = self
                .publisher
                .publish(&self.tenant, character_id, &event)
                .await
            {
                tracing::error!(
                    tenant = %self.tenant.id,
                    character_id,
                    event = event.name(),
                    error = %e,
                    "failed to publish event"
                );
            }
        }
    }
}
