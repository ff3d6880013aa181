use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dualease::{DhcpServer, Result, ServerConfig};

#[derive(Parser)]
#[command(name = "dualease")]
#[command(author, version, about = "A dual-stack DHCPv4/DHCPv6 server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default).
    Run,
    /// Print the effective configuration and exit.
    ShowConfig,
    /// Validate the configuration file and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = ServerConfig::load_or_create(&cli.config).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting dual-stack DHCP server with config: {:?}", cli.config);
            let server = DhcpServer::new(config).await?;
            run_until_shutdown(server).await
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::CheckConfig => {
            config.validate()?;
            println!("Configuration OK");
            Ok(())
        }
    }
}

/// Runs the server until ctrl-c. On Unix, SIGHUP clears the declined address
/// sets (the administrative reset for DECLINEd addresses).
async fn run_until_shutdown(server: DhcpServer) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut hangup = signal(SignalKind::hangup())?;

        let run = server.run();
        tokio::pin!(run);

        loop {
            tokio::select! {
                result = &mut run => return result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server...");
                    server.log_lease_summary().await;
                    return Ok(());
                }
                _ = hangup.recv() => {
                    let (v4_cleared, v6_cleared) = server.clear_declined().await;
                    info!(
                        "SIGHUP: cleared {} declined v4 and {} declined v6 addresses",
                        v4_cleared, v6_cleared
                    );
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = server.run() => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, stopping server...");
                server.log_lease_summary().await;
                Ok(())
            }
        }
    }
}
