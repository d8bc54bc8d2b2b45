//! wardend - warden host monitoring daemon.

use std::io::Write;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use wardend::{Cli, Command, commands, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;

    let mut stdout = std::io::stdout();

    match cli.command {
        Command::Run { config } => {
            let stats = commands::run(&config, shutdown_signal()).await?;
            info!(
                cycles = stats.cycles_run,
                alerts = stats.alerts_sent,
                suppressed = stats.alerts_suppressed,
                "wardend exited"
            );
        }

        Command::DryRun { config, cycles } => {
            let alerts = commands::dry_run(&config, cycles, &mut stdout).await?;
            info!(alerts, "dry run complete; nothing was sent");
        }

        Command::CheckConfig { config } => {
            commands::check_config(&config, &mut stdout)?;
        }

        Command::InitConfig { output, force } => {
            commands::init_config(&output, force, &mut stdout)?;
        }
    }

    stdout.flush()?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
