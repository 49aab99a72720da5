//! Service entry point: wire the store, bus, schedulers, and HTTP surface
//! together and run until a shutdown signal arrives.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use marriage_service::api;
use marriage_service::character::HttpCharacterDirectory;
use marriage_service::config::AppConfig;
use marriage_service::kafka::{CharacterStatusConsumer, CommandConsumer, KafkaEventPublisher};
use marriage_service::processor::MarriageService;
use marriage_service::scheduler;
use marriage_service::store::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load_from_env()?;
    info!("starting marriage service");
    info!("bootstrap servers: {}", config.kafka.bootstrap_servers);
    info!("command topic: {}", config.kafka.command_topic);
    info!("event topic: {}", config.kafka.event_topic);
    info!("rest port: {}", config.rest.port);

    let store = PgStore::connect(&config.database).await?;
    store.migrate().await?;

    let publisher = Arc::new(KafkaEventPublisher::new(&config.kafka)?);
    let characters = Arc::new(HttpCharacterDirectory::new(&config.character)?);
    let service = Arc::new(MarriageService::new(
        Arc::new(store),
        publisher.clone(),
        characters,
        config.policy.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let command_consumer = CommandConsumer::new(
        &config.kafka,
        service.clone(),
        publisher.clone(),
        config.retry.clone(),
    )?;
    let character_consumer =
        CharacterStatusConsumer::new(&config.kafka, service.clone(), config.retry.clone())?;

    let command_worker = tokio::spawn(command_consumer.run(shutdown_rx.clone()));
    let character_worker = tokio::spawn(character_consumer.run(shutdown_rx.clone()));
    let proposal_sweeper = scheduler::spawn_proposal_expiry(
        service.clone(),
        &config.schedulers,
        config.retry.clone(),
        shutdown_rx.clone(),
    );
    let ceremony_sweeper = scheduler::spawn_ceremony_timeouts(
        service.clone(),
        &config.schedulers,
        config.retry.clone(),
        shutdown_rx.clone(),
    );
    let rest_worker = tokio::spawn(api::serve(
        api::router(service.clone()),
        config.rest.port,
        shutdown_rx.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining workers");
    let _ = shutdown_tx.send(true);

    if let Err(e) = command_worker.await {
        error!(error = %e, "command consumer worker failed");
    }
    if let Err(e) = character_worker.await {
        error!(error = %e, "character consumer worker failed");
    }
    proposal_sweeper.stop().await;
    ceremony_sweeper.stop().await;
    match rest_worker.await {
        Ok(Err(e)) => error!(error = %e, "rest server failed"),
        Err(e) => error!(error = %e, "rest worker failed"),
        Ok(Ok(())) => {}
    }

    info!("marriage service stopped");
    Ok(())
}
