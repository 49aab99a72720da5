//! Timeout schedulers
//!
//! Two independent periodic loops sweep all tenants: proposal expiry and
//! ceremony timeouts. Each loop ticks immediately at startup, then on its
//! configured interval, and observes both the global shutdown signal and
//! a local stop channel. `stop()` closes the local channel and waits for
//! the worker to acknowledge by finishing. A per-tenant failure is logged
//! and never halts the loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;
use crate::processor::MarriageService;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::tenant::Tenant;

/// Handle to a running sweep loop
pub struct SweeperHandle {
    name: &'static str,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the worker to stop and wait until it has finished its
    /// in-flight iteration.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(sweeper = self.name, error = %e, "sweeper task failed");
        }
    }
}

fn spawn_sweeper<F, Fut>(
    name: &'static str,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut sweep: F,
) -> SweeperHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        tracing::info!(sweeper = name, interval_secs = every.as_secs(), "sweeper started");
        // first tick fires immediately
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => sweep().await,
            }
        }
        tracing::info!(sweeper = name, "sweeper stopped");
    });
    SweeperHandle {
        name,
        stop: stop_tx,
        handle,
    }
}

/// Spawn the proposal-expiry loop (default tick: 5 minutes)
pub fn spawn_proposal_expiry(
    service: Arc<MarriageService>,
    config: &SchedulerConfig,
    retry: RetryConfig,
    shutdown: watch::Receiver<bool>,
) -> SweeperHandle {
    let interval = Duration::from_secs(config.proposal_expiry_interval_secs);
    let tick_shutdown = shutdown.clone();
    spawn_sweeper("proposal-expiry", interval, shutdown, move || {
        let service = Arc::clone(&service);
        let retry = retry.clone();
        let shutdown = tick_shutdown.clone();
        async move {
            let now = service.now();
            let tenants = match service.store().tenants_with_expired_proposals(now).await {
                Ok(tenants) => tenants,
                Err(e) => {
                    tracing::warn!(error = %e, "expiry sweep could not list tenants");
                    return;
                }
            };
            for tenant_id in tenants {
                let mut shutdown = shutdown.clone();
                if *shutdown.borrow() {
                    break;
                }
                let processor = service.processor(Tenant::from_id(tenant_id));
                let swept = retry_with_backoff(&retry, &mut shutdown, || {
                    processor.process_expired_proposals()
                })
                .await;
                if let Err(e) = swept {
                    tracing::warn!(tenant = %tenant_id, error = %e, "expiry sweep failed for tenant");
                }
            }
        }
    })
}

/// Spawn the ceremony-timeout loop (default tick: 1 minute)
pub fn spawn_ceremony_timeouts(
    service: Arc<MarriageService>,
    config: &SchedulerConfig,
    retry: RetryConfig,
    shutdown: watch::Receiver<bool>,
) -> SweeperHandle {
    let interval = Duration::from_secs(config.ceremony_timeout_interval_secs);
    let tick_shutdown = shutdown.clone();
    spawn_sweeper("ceremony-timeout", interval, shutdown, move || {
        let service = Arc::clone(&service);
        let retry = retry.clone();
        let shutdown = tick_shutdown.clone();
        async move {
            let cutoff = service.now()
                - chrono::Duration::seconds(service.policy().ceremony_postpone_after_secs as i64);
            let tenants = match service.store().tenants_with_overdue_ceremonies(cutoff).await {
                Ok(tenants) => tenants,
                Err(e) => {
                    tracing::warn!(error = %e, "timeout sweep could not list tenants");
                    return;
                }
            };
            for tenant_id in tenants {
                let mut shutdown = shutdown.clone();
                if *shutdown.borrow() {
                    break;
                }
                let processor = service.processor(Tenant::from_id(tenant_id));
                let swept = retry_with_backoff(&retry, &mut shutdown, || {
                    processor.process_ceremony_timeouts()
                })
                .await;
                if let Err(e) = swept {
                    tracing::warn!(tenant = %tenant_id, error = %e, "timeout sweep failed for tenant");
                }
            }
        }
    })
}
