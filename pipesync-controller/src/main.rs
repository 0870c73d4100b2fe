//! Pipesync Controller
//!
//! Long-running process that keeps Jenkins in sync with the control plane.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Services: reconciliation state shared by every reconciler
//! - Scheduler: periodic resync feeding a deduplicating work queue, drained by
//!   a pool of reconcile workers

mod config;
mod scheduler;

use anyhow::{Context, Result};
use pipesync_client::{ControlPlaneClient, JenkinsClient};
use pipesync_core::memory::InMemoryEngine;
use pipesync_core::{ControlPlane, ExecutionEngine};
use pipesync_reconciler::{SyncOptions, SyncServices, SystemPrivilege, XmlJobTranslator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::scheduler::{ResyncPoller, WorkQueue, WorkerPool};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipesync_controller=info,pipesync_reconciler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Pipesync Controller");

    let config = load_config()?;
    info!(
        "Loaded configuration: controller_id={}, control_plane_url={}, jenkins_service={}",
        config.controller_id, config.control_plane_url, config.jenkins_service
    );

    let control_plane: Arc<dyn ControlPlane> = {
        let client = ControlPlaneClient::new(config.control_plane_url.clone());
        match &config.control_plane_token {
            Some(token) => Arc::new(client.with_token(token.clone())),
            None => Arc::new(client),
        }
    };

    let engine: Arc<dyn ExecutionEngine> = match &config.jenkins_url {
        Some(url) => {
            let client = JenkinsClient::new(url.clone());
            let client = match (&config.jenkins_user, &config.jenkins_token) {
                (Some(user), Some(token)) => client.with_credentials(user.clone(), token.clone()),
                _ => client,
            };
            info!("Jenkins client initialized for {}", url);
            Arc::new(client)
        }
        None => {
            warn!("JENKINS_URL not set, reconciling against an in-memory engine");
            Arc::new(InMemoryEngine::new())
        }
    };

    let services = SyncServices::new(
        control_plane.clone(),
        engine,
        Arc::new(SystemPrivilege::new()),
        Arc::new(XmlJobTranslator::new()),
        SyncOptions {
            jenkins_service: config.jenkins_service.clone(),
            kill_grace_period: config.kill_grace_period,
            requeue_delay: config.requeue_delay,
        },
    );

    info!("Services initialized");

    let token = CancellationToken::new();
    let queue = Arc::new(WorkQueue::new());

    let workers = WorkerPool::new(queue.clone(), services.reconcilers(), config.requeue_delay)
        .spawn(config.worker_count, token.clone());
    info!("Started {} reconcile worker(s)", workers.len());

    let poller = ResyncPoller::new(control_plane, queue.clone(), config.resync_interval);
    let poller_handle = {
        let token = token.clone();
        tokio::spawn(async move { poller.run(token).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    token.cancel();
    queue.shutdown();

    if let Err(e) = poller_handle.await {
        warn!("Resync poller panicked: {}", e);
    }
    for handle in workers {
        if let Err(e) = handle.await {
            warn!("Worker panicked: {}", e);
        }
    }

    info!("Controller stopped");
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
