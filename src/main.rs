// Use mimalloc as the global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use idle_timeout_tester::client::{IdleTestController, LogObserver, Outcome, WsConnector};
use idle_timeout_tester::config::{
    CliArgs, Command, ProbeArgs, ProbeSettings, ServeArgs, ServerSettings,
};
use idle_timeout_tester::logger::{self, log};
use idle_timeout_tester::server;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse_args();
    logger::init_logger(cli.log_mode);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    match cli.command {
        Command::Serve(args) => serve(&args, shutdown).await,
        Command::Probe(args) => probe(&args, shutdown).await,
    }
}

async fn serve(args: &ServeArgs, shutdown: CancellationToken) -> Result<()> {
    args.validate()?;
    let settings = Arc::new(ServerSettings::from_cli(args));
    server::run_server(settings, shutdown).await
}

async fn probe(args: &ProbeArgs, cancel: CancellationToken) -> Result<()> {
    args.validate()?;
    let duration = args
        .idle_duration()
        .ok_or_else(|| anyhow!("An idle duration is required"))?;
    let settings = ProbeSettings::from_cli(args);

    log::info!(url = %settings.url, duration = ?duration, "Testing idle timeout");

    let connector = WsConnector::new(settings.url.clone(), settings.connect_timeout)
        .with_config(settings.ws_config());
    let controller = IdleTestController::new(connector, Arc::new(LogObserver), settings);

    let report = controller.run(duration, &cancel).await?;
    match report.outcome {
        Outcome::Succeeded => Ok(()),
        Outcome::Failed(detail) => Err(anyhow!("Idling connection was timed out: {}", detail)),
        Outcome::Cancelled => Err(anyhow!("Test cancelled")),
        Outcome::Pending => Err(anyhow!("Test ended without an outcome")),
    }
}

/// Cancel `token` on SIGINT/SIGTERM
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (Ok(mut sigint), Ok(mut sigterm)) = (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
            ) else {
                log::warn!("Failed to install signal handlers");
                return;
            };

            tokio::select! {
                _ = sigint.recv() => {
                    log::info!("SIGINT received, shutting down...");
                }
                _ = sigterm.recv() => {
                    log::info!("SIGTERM received, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
            log::info!("Shutdown signal received...");
        }

        token.cancel();
    });
}
