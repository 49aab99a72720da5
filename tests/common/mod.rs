//! Shared fixtures: an in-memory harness with a manual clock, a static
//! character directory, and a publisher that captures events in order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use marriage_service::character::{Character, CharacterDirectory};
use marriage_service::clock::Clock;
use marriage_service::config::PolicyConfig;
use marriage_service::events::{Event, EventPublisher};
use marriage_service::processor::{MarriageService, Processor};
use marriage_service::store::MemoryStore;
use marriage_service::{MarriageResult, Tenant};

/// Clock the tests can move forward
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Character directory backed by a fixed map
pub struct StaticCharacters {
    characters: HashMap<u32, Character>,
}

impl StaticCharacters {
    pub fn new(entries: &[(u32, u16)]) -> Self {
        Self {
            characters: entries
                .iter()
                .map(|&(id, level)| (id, Character { id, level }))
                .collect(),
        }
    }
}

#[async_trait]
impl CharacterDirectory for StaticCharacters {
    async fn find(
        &self,
        _tenant: &Tenant,
        character_id: u32,
    ) -> MarriageResult<Option<Character>> {
        Ok(self.characters.get(&character_id).copied())
    }
}

/// Publisher that records `(recipient, event)` pairs in emission order
#[derive(Default)]
pub struct CapturingPublisher {
    events: Mutex<Vec<(u32, Event)>>,
}

impl CapturingPublisher {
    pub fn events(&self) -> Vec<(u32, Event)> {
        self.events.lock().unwrap().clone()
    }

    /// Event names in emission order
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.name())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl EventPublisher for CapturingPublisher {
    async fn publish(
        &self,
        _tenant: &Tenant,
        character_id: u32,
        event: &Event,
    ) -> MarriageResult<()> {
        self.events.lock().unwrap().push((character_id, event.clone()));
        Ok(())
    }
}

/// Everything a scenario needs, wired over the in-memory store
pub struct Harness {
    pub service: Arc<MarriageService>,
    pub publisher: Arc<CapturingPublisher>,
    pub clock: Arc<ManualClock>,
    pub tenant: Tenant,
}

impl Harness {
    pub fn processor(&self) -> Processor {
        self.service.processor(self.tenant.clone())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.service.now()
    }
}

/// Build a harness whose directory knows the given `(id, level)` characters
pub fn harness(characters: &[(u32, u16)]) -> Harness {
    let publisher = Arc::new(CapturingPublisher::default());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
    let service = MarriageService::new(
        Arc::new(MemoryStore::new()),
        publisher.clone(),
        Arc::new(StaticCharacters::new(characters)),
        PolicyConfig::default(),
    )
    .with_clock(clock.clone());
    Harness {
        service: Arc::new(service),
        publisher,
        clock,
        tenant: Tenant::new(Uuid::new_v4(), "GMS", 83, 1),
    }
}
