use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::info;

mod app;
mod commands;
mod forms;
mod handler;
mod interactions;
mod model_tool;
mod offline;
mod panel;
#[cfg(test)]
mod pipeline_tests;
mod sinks;
#[cfg(test)]
mod testutil;
mod turn;

use weft_core::config::WeftConfig;
use weft_recorder::Recorder;
use weft_scheduler::SessionSweeper;
use weft_slack::limiter::Limited;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weft_bot=info".into()),
        )
        .init();

    // Config: explicit path via WEFT_CONFIG, else ./weft.toml, else defaults.
    let config_path = std::env::var("WEFT_CONFIG").ok();
    let config = WeftConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        WeftConfig::default()
    });

    if config.slack.bot_token.is_empty() {
        info!("no Slack token configured — running with offline transports");
    }

    // All Slack traffic funnels through the shared token-bucket limiter.
    let slack = Arc::new(Limited::new(offline::OfflineSlack::default(), &config.limiter));
    let agent = Arc::new(offline::OfflineAgent);
    let recorder = Recorder::with_summarizer(
        config.data.conversations_dir(),
        agent.clone(),
        &config.agent.classifier_model,
    )?;

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<app::InboundMessage>(64);
    let state = app::AppState::new(
        config.clone(),
        slack,
        agent,
        recorder,
        inbound_tx.clone(),
    );

    // Lifecycle sweep with shutdown-notice broadcast.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = SessionSweeper::new(
        Arc::clone(&state.store),
        Arc::clone(&state.coordinator),
        Arc::clone(&state.slack),
        config.scheduler.clone(),
    );
    let sweeper_task = tokio::spawn(Arc::clone(&sweeper).run(shutdown_rx));

    // Dev loop: drive the pipeline from stdin when offline.
    tokio::spawn(offline::stdin_driver(inbound_tx));

    if let Ok(identity) = state.slack.auth_test().await {
        info!(bot = %identity.user_id, team = %identity.team_id, "Slack identity resolved");
    }
    info!(
        viewer = format!("{}:{}", config.viewer.host, config.viewer.port),
        "weft-bot started"
    );

    // Main message loop: fresh messages and form/renew re-entries alike.
    loop {
        tokio::select! {
            Some(msg) = inbound_rx.recv() => {
                let state = Arc::clone(&state);
                tokio::spawn(handler::handle_message(state, msg));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    // Teardown: sweeper broadcasts the shutdown notice (5s cap), then every
    // in-flight request is cancelled.
    let _ = shutdown_tx.send(true);
    let _ = sweeper_task.await;
    for session in state.store.get_all() {
        state.coordinator.cancel(&session.key).await;
    }
    info!("weft-bot stopped");
    Ok(())
}
