// ABOUTME: Library root for scripthost-telegram.
// ABOUTME: Exports the bridge, config, commands, and error modules plus the boot sequence in run().

pub mod bridge;
pub mod commands;
pub mod config;
pub mod error;
pub mod telegram;

pub use bridge::{Bridge, HostState};
pub use config::Config;
pub use error::{BridgeError, Result};
pub use telegram::ScriptHostBot;

use anyhow::Context;
use scripthost_core::{AdmissionControl, ApprovalStore, Reconciler, Registry, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Load config, reconcile recorded scripts, and serve Telegram until Ctrl-C.
pub async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("Failed to load configuration")?;

    let registry = Registry::open(config.host.registry_path(), config.host.hosting_dir_expanded())
        .context("Failed to open script registry")?;
    let approvals = ApprovalStore::load(config.host.approvals_path(), config.host.owner_id);

    let telegram = ScriptHostBot::new(&config.telegram).await?;

    let mut supervisor = Supervisor::new(
        registry,
        &config.host,
        config.supervisor.clone(),
        Arc::new(telegram.clone()),
    );
    let plan = Reconciler::plan(supervisor.registry_mut());

    let state = Arc::new(Mutex::new(HostState {
        supervisor,
        admission: AdmissionControl::new(approvals),
    }));

    let reconciler = Reconciler::new(config.supervisor.settle_delay());
    let boot_state = state.clone();
    tokio::spawn(async move {
        let report = reconciler.execute(plan, &boot_state).await;
        info!(
            normalized = report.normalized,
            restarted = report.restarted,
            failed = report.failed,
            "Boot reconciliation complete"
        );
    });

    info!(owner_id = config.host.owner_id, "Starting Long Polling");
    let bridge = Arc::new(Bridge::new(telegram.clone(), state.clone()));
    teloxide::repl(telegram.inner().clone(), move |msg: Message| {
        let bridge = bridge.clone();
        async move {
            if let Err(e) = bridge.handle_message(&msg).await {
                error!(error = %e, chat_id = msg.chat.id.0, "Failed to handle message");
            }
            respond(())
        }
    })
    .await;

    info!("Shutting down");
    state.lock().await.supervisor.shutdown().await;
    Ok(())
}
