//! Lock bridge binary.
//!
//! # Usage
//!
//! ```bash
//! lockbridge --config /etc/lockbridge/config.json
//! RUST_LOG=lockbridge_network=debug lockbridge --config config.json
//! ```
//!
//! The config file is JSON:
//!
//! ```json
//! {
//!   "credentials": {
//!     "clientId": "...",
//!     "clientSecret": "...",
//!     "username": "user@example.com",
//!     "password": "..."
//!   },
//!   "pollingIntervalSecs": 60,
//!   "discoveryIntervalSecs": 3600,
//!   "offlineIntervalSecs": 604800
//! }
//! ```

use anyhow::Context;
use clap::Parser;
use lockbridge_core::BridgeConfig;
use lockbridge_device::{BridgeEvent, LockPlatform, PlatformConfig};
use lockbridge_network::{
    HttpTransport, LockCloudGateway, RequestQueue, RetryExecutor, SessionClient, SessionState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Smart lock cloud bridge
#[derive(Parser, Debug)]
#[command(name = "lockbridge")]
#[command(about = "Bridges cloud-connected smart locks to a home automation hub")]
#[command(version)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = BridgeConfig::from_path(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    tracing::info!(version = lockbridge_core::VERSION, api = %config.api_base_url, "Lock bridge starting");

    let transport = HttpTransport::new(&config.api_base_url, config.request_timeout())
        .context("building HTTP transport")?;
    let credentials = &config.credentials;
    let session = Arc::new(SessionClient::new(
        transport.clone(),
        &credentials.client_id,
        &credentials.client_secret,
    ));
    session
        .authenticate(&credentials.username, &credentials.password)
        .await
        .context("authenticating with the lock cloud")?;
    tokio::spawn(watch_session(session.subscribe()));

    let queue = RequestQueue::start(RetryExecutor::new(Arc::clone(&session), transport));
    let gateway = LockCloudGateway::new(queue);
    let (platform, events) = LockPlatform::new(gateway, PlatformConfig::from(&config));
    let platform = Arc::new(platform);

    let logger = tokio::spawn(log_events(events));
    let runner = {
        let platform = Arc::clone(&platform);
        tokio::spawn(async move { platform.run().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    platform.shutdown().await;
    runner.await.context("discovery task")?;
    drop(platform);
    logger.await.context("event logger task")?;
    Ok(())
}

/// Report session changes. Losing the session is terminal until restart.
async fn watch_session(mut state: watch::Receiver<SessionState>) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        if current == SessionState::Unauthenticated {
            tracing::error!("Cloud session lost, restart the bridge to sign in again");
        } else {
            tracing::debug!(state = ?current, "Session state changed");
        }
    }
}

/// Stand-in for an accessory adapter: log every notification.
async fn log_events(mut events: mpsc::Receiver<BridgeEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            BridgeEvent::Added { lock_id, name } => {
                tracing::info!(%lock_id, %name, "Accessory added");
            }
            BridgeEvent::Removed { lock_id } => {
                tracing::info!(%lock_id, "Accessory removed");
            }
            BridgeEvent::Changed { lock_id, attribute } => {
                tracing::debug!(%lock_id, %attribute, "Accessory updated");
            }
            _ => {}
        }
    }
}
