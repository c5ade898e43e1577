//! Command-line client running ChipGateway sessions

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chipgateway_client::{
    CancellationToken, GatewayConfig, HttpTransport, LogInterface, ProtocolEngine, Session,
    SessionToken, TcpConnector,
};
use clap::{Parser, Subcommand};
use eyre::WrapErr;
use tracing::{info, warn};

mod fixture;

use fixture::FixtureCard;

#[derive(Parser)]
#[command(version, about = "ChipGateway client")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (defaults to chipgateway.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one session described by an activation token
    Run {
        /// JSON file holding the activation token
        #[arg(short, long)]
        token: PathBuf,

        /// JSON card fixture (defaults to the bundled one)
        #[arg(long)]
        card: Option<PathBuf>,
    },

    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = GatewayConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { token, card } => run_session(config, &token, card.as_deref()).await,
        Commands::ShowConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(level))
        .with_ansi(true)
        .init();
}

/// `RUST_LOG` directives on top of `level`
fn log_filter(level: tracing::Level) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

async fn run_session(config: GatewayConfig, token: &Path, card: Option<&Path>) -> eyre::Result<()> {
    let token = std::fs::read_to_string(token)
        .wrap_err_with(|| format!("failed to read token {}", token.display()))?;
    let token: SessionToken = serde_json::from_str(&token).wrap_err("malformed token")?;
    let session = Session::from_token(&token)?;

    let connector = TcpConnector::from_url(session.server_address())?;
    let transport = HttpTransport::new(connector);
    let card = Arc::new(FixtureCard::load(card)?);

    info!(session = session.id(), server = %session.server_address(), "Starting ChipGateway session");
    let engine = ProtocolEngine::new(session, transport, card, Arc::new(LogInterface), config);
    spawn_interrupt_handler(engine.cancellation_token());

    match engine.run().await {
        Ok(terminate) => {
            println!("Session terminated: {}", terminate.result);
            Ok(())
        }
        Err(e) => {
            if let Some(redirect) = e.redirect() {
                warn!(%redirect, "Send the browser to the communication error address");
                println!("Error address: {redirect}");
            }
            Err(e.into())
        }
    }
}

/// Cancel the session on Ctrl-C
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Interrupted, stopping the session");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            },
        }
    });
}
