//! Bus ingress
//!
//! [`CommandConsumer`] drains the command topic and drives the domain
//! processor; [`CharacterStatusConsumer`] watches the character-status
//! topic for deletions. Offsets are committed manually, only once a
//! message has been fully handled: success, or a non-retryable rejection
//! that produced a `MARRIAGE_ERROR` event. Transient failures leave the
//! offset alone so the message is redelivered.

use std::sync::Arc;

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::{ClientConfig, Message};
use serde::Deserialize;
use tokio::sync::watch;

use crate::commands::{Command, CommandEnvelope};
use crate::config::KafkaConfig;
use crate::error::{MarriageError, MarriageResult};
use crate::events::{Event, EventPublisher};
use crate::kafka::headers::tenant_from_headers;
use crate::processor::MarriageService;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::tenant::Tenant;

fn stream_consumer(config: &KafkaConfig, group_id: &str, topic: &str) -> MarriageResult<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("group.id", group_id)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;
    consumer.subscribe(&[topic])?;
    Ok(consumer)
}

/// Long-lived consumer on the command topic
pub struct CommandConsumer {
    consumer: StreamConsumer,
    service: Arc<MarriageService>,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryConfig,
}

impl CommandConsumer {
    pub fn new(
        config: &KafkaConfig,
        service: Arc<MarriageService>,
        publisher: Arc<dyn EventPublisher>,
        retry: RetryConfig,
    ) -> MarriageResult<Self> {
        let consumer = stream_consumer(config, &config.group_id, &config.command_topic)?;
        Ok(Self {
            consumer,
            service,
            publisher,
            retry,
        })
    }

    /// Consume until shutdown. The in-flight message is finished and its
    /// offset committed before the loop exits; no further messages are
    /// fetched.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("command consumer started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.consumer.recv() => match received {
                    Ok(message) => {
                        if self.handle_message(&message, &mut shutdown).await {
                            if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                                tracing::error!(error = %e, "failed to commit offset");
                            }
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "command consumer receive failed"),
                }
            }
        }
        tracing::info!("command consumer stopped");
    }

    /// Returns whether the offset may advance
    async fn handle_message(
        &self,
        message: &BorrowedMessage<'_>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let tenant = match tenant_from_headers(message.headers()) {
            Ok(tenant) => tenant,
            Err(e) => {
                tracing::warn!(error = %e, "skipping command without tenant headers");
                return true;
            }
        };
        let envelope = match message.payload().map(CommandEnvelope::decode) {
            Some(Ok(envelope)) => envelope,
            Some(Err(e)) => {
                tracing::warn!(tenant = %tenant.id, error = %e, "skipping malformed command");
                return true;
            }
            None => {
                tracing::warn!(tenant = %tenant.id, "skipping command without payload");
                return true;
            }
        };

        let outcome = retry_with_backoff(&self.retry, shutdown, || {
            self.dispatch(&tenant, &envelope)
        })
        .await;

        match outcome {
            Ok(()) => true,
            Err(MarriageError::Cancelled) => false,
            Err(e) if e.is_transient() => {
                tracing::error!(
                    tenant = %tenant.id,
                    command = envelope.command.name(),
                    error = %e,
                    "transient failure after retries, leaving message for redelivery"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    tenant = %tenant.id,
                    command = envelope.command.name(),
                    character_id = envelope.character_id,
                    error = %e,
                    "command rejected"
                );
                let event = Event::error(
                    &e,
                    envelope.character_id,
                    envelope.command.context(),
                    self.service.now(),
                );
                if let Err(publish_err) = self
                    .publisher
                    .publish(&tenant, envelope.character_id, &event)
                    .await
                {
                    tracing::error!(error = %publish_err, "failed to publish error event");
                }
                true
            }
        }
    }

    async fn dispatch(&self, tenant: &Tenant, envelope: &CommandEnvelope) -> MarriageResult<()> {
        let processor = self.service.processor(tenant.clone());
        let character_id = envelope.character_id;
        match envelope.command.clone() {
            Command::Propose {
                target_character_id,
            } => processor
                .propose(character_id, target_character_id)
                .await
                .map(drop),
            Command::Accept { proposal_id } => {
                processor.accept(character_id, proposal_id).await.map(drop)
            }
            Command::Decline { proposal_id } => {
                processor.decline(character_id, proposal_id).await.map(drop)
            }
            Command::Cancel { proposal_id } => {
                processor.cancel(character_id, proposal_id).await.map(drop)
            }
            Command::Divorce { marriage_id } => {
                processor.divorce(character_id, marriage_id).await.map(drop)
            }
            Command::ScheduleCeremony {
                marriage_id,
                scheduled_at,
                invitees,
            } => processor
                .schedule_ceremony(character_id, marriage_id, scheduled_at, invitees)
                .await
                .map(drop),
            Command::StartCeremony { ceremony_id } => processor
                .start_ceremony(character_id, ceremony_id)
                .await
                .map(drop),
            Command::CompleteCeremony { ceremony_id } => processor
                .complete_ceremony(character_id, ceremony_id)
                .await
                .map(drop),
            Command::CancelCeremony { ceremony_id } => processor
                .cancel_ceremony(character_id, ceremony_id)
                .await
                .map(drop),
            Command::PostponeCeremony { ceremony_id } => processor
                .postpone_ceremony(character_id, ceremony_id)
                .await
                .map(drop),
            Command::RescheduleCeremony {
                ceremony_id,
                scheduled_at,
            } => processor
                .reschedule_ceremony(character_id, ceremony_id, scheduled_at)
                .await
                .map(drop),
            Command::AddInvitee {
                ceremony_id,
                character_id: invitee_id,
            } => processor
                .add_invitee(character_id, ceremony_id, invitee_id)
                .await
                .map(drop),
            Command::RemoveInvitee {
                ceremony_id,
                character_id: invitee_id,
            } => processor
                .remove_invitee(character_id, ceremony_id, invitee_id)
                .await
                .map(drop),
            Command::AdvanceCeremonyState {
                ceremony_id,
                next_state,
            } => {
                processor
                    .advance_ceremony_state(character_id, ceremony_id, next_state)
                    .await
            }
        }
    }
}

/// Character-status event shape; only the type tag matters here
#[derive(Debug, Deserialize)]
struct CharacterStatusEnvelope {
    #[serde(rename = "characterId")]
    character_id: u32,
    #[serde(rename = "type")]
    status_type: String,
}

const CHARACTER_DELETED: &str = "DELETED";

/// Consumer on the character-status topic, reacting to deletions
pub struct CharacterStatusConsumer {
    consumer: StreamConsumer,
    service: Arc<MarriageService>,
    retry: RetryConfig,
}

impl CharacterStatusConsumer {
    pub fn new(
        config: &KafkaConfig,
        service: Arc<MarriageService>,
        retry: RetryConfig,
    ) -> MarriageResult<Self> {
        let group_id = format!("{}-characters", config.group_id);
        let consumer = stream_consumer(config, &group_id, &config.character_topic)?;
        Ok(Self {
            consumer,
            service,
            retry,
        })
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("character-status consumer started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.consumer.recv() => match received {
                    Ok(message) => {
                        if self.handle_message(&message, &mut shutdown).await {
                            if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                                tracing::error!(error = %e, "failed to commit offset");
                            }
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "character-status consumer receive failed"),
                }
            }
        }
        tracing::info!("character-status consumer stopped");
    }

    async fn handle_message(
        &self,
        message: &BorrowedMessage<'_>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let tenant = match tenant_from_headers(message.headers()) {
            Ok(tenant) => tenant,
            Err(e) => {
                tracing::warn!(error = %e, "skipping character event without tenant headers");
                return true;
            }
        };
        let envelope: CharacterStatusEnvelope = match message
            .payload()
            .map(serde_json::from_slice)
        {
            Some(Ok(envelope)) => envelope,
            Some(Err(e)) => {
                tracing::warn!(tenant = %tenant.id, error = %e, "skipping malformed character event");
                return true;
            }
            None => return true,
        };
        if envelope.status_type != CHARACTER_DELETED {
            return true;
        }

        let character_id = envelope.character_id;
        let outcome = retry_with_backoff(&self.retry, shutdown, || {
            let processor = self.service.processor(tenant.clone());
            async move { processor.on_character_deleted(character_id).await }
        })
        .await;

        match outcome {
            Ok(()) => true,
            Err(MarriageError::Cancelled) => false,
            Err(e) if e.is_transient() => {
                tracing::error!(
                    tenant = %tenant.id,
                    character_id,
                    error = %e,
                    "transient failure after retries, leaving character event for redelivery"
                );
                false
            }
            Err(e) => {
                tracing::error!(tenant = %tenant.id, character_id, error = %e, "character deletion cleanup failed");
                true
            }
        }
    }
}
