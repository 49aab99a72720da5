//! Configuration management
//!
//! All configuration comes from the environment; every knob has a default
//! suitable for local development. `validate()` rejects configurations
//! the service could not run with.

use std::str::FromStr;

use crate::error::{MarriageError, MarriageResult};
use crate::retry::RetryConfig;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> MarriageResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| MarriageError::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub kafka: KafkaConfig,
    pub database: DatabaseConfig,
    pub rest: RestConfig,
    pub character: CharacterServiceConfig,
    pub schedulers: SchedulerConfig,
    pub policy: PolicyConfig,
    pub retry: RetryConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load_from_env() -> MarriageResult<Self> {
        let config = Self {
            kafka: KafkaConfig {
                bootstrap_servers: env_string("BOOTSTRAP_SERVERS", "localhost:9092"),
                command_topic: env_string("COMMAND_TOPIC_MARRIAGE", "command-marriage"),
                event_topic: env_string("EVENT_TOPIC_MARRIAGE_STATUS", "marriage-status"),
                character_topic: env_string("EVENT_TOPIC_CHARACTER_STATUS", "character-status"),
                group_id: env_string("KAFKA_GROUP_ID", "marriage-service"),
            },
            database: DatabaseConfig {
                url: env_string("DATABASE_URL", "postgres://localhost/marriage"),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            rest: RestConfig {
                port: env_parse("REST_PORT", 8080)?,
            },
            character: CharacterServiceConfig {
                base_url: env_string("CHARACTER_SERVICE_URL", "http://localhost:8081"),
            },
            schedulers: SchedulerConfig {
                proposal_expiry_interval_secs: env_parse("PROPOSAL_EXPIRY_INTERVAL_SECS", 300)?,
                ceremony_timeout_interval_secs: env_parse("CEREMONY_TIMEOUT_INTERVAL_SECS", 60)?,
            },
            policy: PolicyConfig {
                min_level: env_parse("MIN_PROPOSAL_LEVEL", 10)?,
                global_cooldown_secs: env_parse("GLOBAL_PROPOSAL_COOLDOWN_SECS", 4 * 3600)?,
                ceremony_postpone_after_secs: env_parse("CEREMONY_POSTPONE_AFTER_SECS", 3600)?,
                ceremony_cancel_after_secs: env_parse("CEREMONY_CANCEL_AFTER_SECS", 6 * 3600)?,
            },
            retry: RetryConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MarriageResult<()> {
        self.kafka.validate()?;
        self.database.validate()?;
        self.schedulers.validate()?;
        self.policy.validate()?;
        Ok(())
    }
}

/// Bus connection and topic names
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub command_topic: String,
    pub event_topic: String,
    pub character_topic: String,
    pub group_id: String,
}

impl KafkaConfig {
    fn validate(&self) -> MarriageResult<()> {
        if self.bootstrap_servers.is_empty() {
            return Err(MarriageError::Config(
                "BOOTSTRAP_SERVERS cannot be empty".to_string(),
            ));
        }
        for (name, topic) in [
            ("COMMAND_TOPIC_MARRIAGE", &self.command_topic),
            ("EVENT_TOPIC_MARRIAGE_STATUS", &self.event_topic),
            ("EVENT_TOPIC_CHARACTER_STATUS", &self.character_topic),
        ] {
            if topic.is_empty() {
                return Err(MarriageError::Config(format!("{name} cannot be empty")));
            }
        }
        Ok(())
    }
}

/// Relational store connection settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    fn validate(&self) -> MarriageResult<()> {
        if self.url.is_empty() {
            return Err(MarriageError::Config("DATABASE_URL cannot be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(MarriageError::Config(
                "DATABASE_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP surface settings
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub port: u16,
}

/// Character service endpoint
#[derive(Debug, Clone)]
pub struct CharacterServiceConfig {
    pub base_url: String,
}

/// Sweep loop cadences
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub proposal_expiry_interval_secs: u64,
    pub ceremony_timeout_interval_secs: u64,
}

impl SchedulerConfig {
    fn validate(&self) -> MarriageResult<()> {
        if self.proposal_expiry_interval_secs == 0 || self.ceremony_timeout_interval_secs == 0 {
            return Err(MarriageError::Config(
                "scheduler intervals must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Domain policy knobs
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Minimum character level to propose or be proposed to
    pub min_level: u16,
    /// Wait between any two proposals from the same proposer
    pub global_cooldown_secs: u64,
    /// Active ceremonies older than this are postponed by the sweep
    pub ceremony_postpone_after_secs: u64,
    /// Active ceremonies older than this are cancelled by the sweep
    pub ceremony_cancel_after_secs: u64,
}

impl PolicyConfig {
    fn validate(&self) -> MarriageResult<()> {
        if self.min_level == 0 {
            return Err(MarriageError::Config(
                "MIN_PROPOSAL_LEVEL must be at least 1".to_string(),
            ));
        }
        if self.ceremony_cancel_after_secs <= self.ceremony_postpone_after_secs {
            return Err(MarriageError::Config(
                "CEREMONY_CANCEL_AFTER_SECS must exceed CEREMONY_POSTPONE_AFTER_SECS".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_level: 10,
            global_cooldown_secs: 4 * 3600,
            ceremony_postpone_after_secs: 3600,
            ceremony_cancel_after_secs: 6 * 3600,
        }
    }
}
