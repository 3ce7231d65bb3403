//! Headless Hamlet client.
//!
//! Runs one player's [`SyncEngine`] against the authority over HTTP and
//! logs what a UI would show: ledger changes, training countdowns, offline
//! claims and session renewals.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load settings from `HAMLET_*` variables and the sync configuration
//! 3. Open the file-backed local store and the HTTP gateway
//! 4. Resolve the player and credential
//! 5. Start the engine and run the offline check, retrying a failed claim
//!    on the resource poll period
//! 6. Run until Ctrl-C, then shut the engine down

mod error;
mod identity;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hamlet_gateway::{FailureClass, Gateway, GatewayConfig, HttpGateway};
use hamlet_sync::{FileStore, LocalStore, OfflineCheck, SessionEvent, SyncConfig, SyncEngine};
use hamlet_types::SystemClock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ClientError;
use crate::identity::ClientSettings;

/// Application entry point for the client.
///
/// # Errors
///
/// Returns an error if startup fails. Failures after startup are logged
/// and never end the process.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("hamlet-client starting");
    run().await?;
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // 2. Settings and sync configuration.
    let settings = ClientSettings::from_env()?;
    let config = load_config(&settings).context("loading sync configuration")?;
    info!(
        resource_poll_secs = config.timers.resource_poll_secs,
        training_tick_ms = config.timers.training_tick_ms,
        offline_min_minutes = config.offline.min_elapsed_minutes,
        state_file = %settings.state_file.display(),
        "Configuration loaded"
    );

    // 3. Store and gateway.
    let store: Arc<dyn LocalStore> = Arc::new(FileStore::new(settings.state_file.clone()));
    let gateway_config = GatewayConfig::from_env().map_err(ClientError::from)?;
    let gateway = HttpGateway::new(&gateway_config).map_err(ClientError::from)?;
    info!(api_url = gateway.api_url(), "Gateway ready");

    // 4. Identity.
    let (user, credential) = identity::resolve(&settings, store.as_ref(), &gateway)
        .await
        .context("resolving player credential")?;

    // 5. Engine.
    let claim_retry = config.timers.resource_poll();
    let engine = SyncEngine::new(config, user, credential, gateway, store, Arc::new(SystemClock));
    let _ledger_log = engine.bus().subscribe(user, |payload| match payload {
        Some(ledger) => info!(
            wood = ledger.resources.wood,
            stone = ledger.resources.stone,
            food = ledger.resources.food,
            iron = ledger.resources.iron,
            population = ledger.population,
            max_population = ledger.max_population,
            "ledger"
        ),
        None => info!("ledger stale, re-pulling"),
    });
    let mut session_events = engine.session_events();
    tokio::spawn(async move {
        loop {
            match session_events.recv().await {
                Ok(SessionEvent::Renewed { expires_at }) => {
                    info!(%expires_at, "session renewed");
                }
                Ok(SessionEvent::RenewalFailed { attempt, error }) => {
                    warn!(attempt, error, "session renewal attempt failed");
                }
                Ok(SessionEvent::GaveUp { error }) => {
                    warn!(error, "session renewal gave up; will retry on next check");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session events lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    engine.start();
    offline_check(&engine).await;
    let _claim_retry = engine
        .pending_offline()
        .is_some()
        .then(|| retry_offline_claim(engine.clone(), claim_retry));

    // 6. Run until interrupted.
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("interrupt received, shutting down");
    engine.shutdown();
    Ok(())
}

/// Sync configuration from `HAMLET_CONFIG` if set, defaults otherwise;
/// environment overrides apply either way.
fn load_config(settings: &ClientSettings) -> Result<SyncConfig, ClientError> {
    let config = match &settings.config_path {
        Some(path) => SyncConfig::from_file(path)?,
        None => {
            let mut config = SyncConfig::default();
            config.apply_env_overrides()?;
            config
        }
    };
    Ok(config)
}

/// Run the visibility check and claim anything earned while away.
async fn offline_check(engine: &SyncEngine<HttpGateway>) {
    match engine.on_visible().await {
        Ok(OfflineCheck::Claimable(claim)) => {
            info!(
                elapsed_minutes = claim.elapsed_minutes,
                wood = claim.preview.wood,
                stone = claim.preview.stone,
                food = claim.preview.food,
                iron = claim.preview.iron,
                "offline production available, claiming"
            );
            if let Err(err) = engine.claim_offline().await {
                warn!(error = %err, "offline claim failed; retrying on the resource poll");
            }
        }
        Ok(OfflineCheck::TooShort { elapsed_minutes }) => {
            info!(elapsed_minutes, "welcome back");
        }
        Ok(OfflineCheck::FirstRun) => info!("first session for this player"),
        Err(err) => warn!(error = %err, "offline check failed"),
    }
}

/// Retry the pending offline claim every `period` until it lands or the
/// authority rejects it.
fn retry_offline_claim<G: Gateway>(engine: SyncEngine<G>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        while engine.pending_offline().is_some() {
            interval.tick().await;
            match engine.claim_offline().await {
                Ok(ledger) => info!(wood = ledger.resources.wood, "offline claim retried"),
                Err(err) if err.class() == Some(FailureClass::Validation) => {
                    warn!(error = %err, "offline claim rejected, not retrying");
                    break;
                }
                Err(err) => warn!(error = %err, "offline claim retry failed"),
            }
        }
    })
}
