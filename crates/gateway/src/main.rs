use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sy_domain::config::ConfigStore;
use sy_gateway::api::router;
use sy_gateway::bootstrap;

#[derive(Parser)]
#[command(name = "switchyard", about = "Local agent orchestration server")]
struct Cli {
    /// Path to the config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server (default).
    Serve {
        /// Bind host override.
        #[arg(long)]
        host: Option<String>,
        /// Bind port override.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Set the approval PIN.
    SetPin { pin: String },
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        None | Some(Command::Serve { .. }) => {
            init_tracing();
            let (host, port) = match &cli.command {
                Some(Command::Serve { host, port }) => (host.clone(), *port),
                _ => (None, None),
            };
            serve(config_path, host, port).await
        }
        Some(Command::SetPin { pin }) => {
            let store = ConfigStore::open(config_path)?;
            let data_dir = store.get().server.data_dir;
            sy_gateway::pin::PinStore::new(&data_dir).set(&pin)?;
            println!("PIN updated");
            Ok(())
        }
        Some(Command::Version) => {
            println!("switchyard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn serve(config_path: PathBuf, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let config_store = Arc::new(ConfigStore::open(config_path).context("loading config")?);
    let state = bootstrap::build_default(config_store.clone())?;

    let server = config_store.get().server;
    let host = host.unwrap_or(server.host);
    let port = port.unwrap_or(server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "switchyard listening");

    let app = router::build(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    bootstrap::shutdown(&state);
    Ok(())
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("switchyard")
        .join("config.toml")
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sy_gateway=debug")),
        )
        .init();
}
