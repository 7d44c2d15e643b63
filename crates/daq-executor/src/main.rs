mod config;
mod stdio;

use std::sync::Arc;

use daq_core::Router;
use daq_model::InboundEvent;
use daq_observe::logger_init;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{config::ExecutorConfig, stdio::StdioTransport};

const INBOUND_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ExecutorConfig::from_env().map_err(anyhow::Error::msg)?;
    config.validate().map_err(anyhow::Error::msg)?;

    logger_init(&config.logger()?)?;
    info!(
        target: "daq.executor",
        agent_id = %config.agent_id,
        executor_id = %config.executor_id,
        "executor starting"
    );

    let transport = Arc::new(StdioTransport::new(tokio::io::stdout()));
    let router = Router::new(transport, config.router());

    let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
    tokio::spawn(stdio::read_inbound(tokio::io::stdin(), tx.clone()));
    tokio::spawn(forward_signals(tx));

    router.run(rx).await?;
    info!(target: "daq.executor", "executor stopped");
    Ok(())
}

/// Turn Ctrl-C and SIGTERM into SHUTDOWN.
async fn forward_signals(tx: mpsc::Sender<InboundEvent>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(target: "daq.executor", error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = tokio::signal::ctrl_c().await;

    info!(target: "daq.executor", "signal received; shutting down");
    let _ = tx.send(InboundEvent::Shutdown).await;
}
