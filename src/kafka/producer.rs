//! Event egress
//!
//! Publishes typed events keyed by character id so downstream consumers
//! keyed the same way receive them in order. Headers mirror the command
//! headers to preserve tenant context.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;

use crate::config::KafkaConfig;
use crate::error::{MarriageError, MarriageResult};
use crate::events::{Event, EventEnvelope, EventPublisher};
use crate::kafka::headers::tenant_headers;
use crate::tenant::Tenant;

pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaEventPublisher {
    pub fn new(config: &KafkaConfig) -> MarriageResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(Self {
            producer,
            topic: config.event_topic.clone(),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(
        &self,
        tenant: &Tenant,
        character_id: u32,
        event: &Event,
    ) -> MarriageResult<()> {
        let payload = EventEnvelope {
            character_id,
            event: event.clone(),
        }
        .encode()?;
        let key = character_id.to_string();
        let record = FutureRecord::to(&self.topic)
            .key(&key)
            .payload(&payload)
            .headers(tenant_headers(tenant));

        self.producer
            .send(record, Timeout::After(Duration::from_secs(5)))
            .await
            .map_err(|(e, _)| MarriageError::Kafka(e))?;
        tracing::debug!(
            tenant = %tenant.id,
            character_id,
            event = event.name(),
            "event published"
        );
        Ok(())
    }
}
