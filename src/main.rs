use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use unimarket::config::Config;
use unimarket::db::{AppState, create_pool};
use unimarket::payments::{StripeClient, StripeConfig};
use unimarket::session::SessionKeys;

#[derive(Parser)]
#[command(name = "unimarket", version, about = "Student marketplace checkout service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Override HOST
    #[arg(long, global = true)]
    host: Option<String>,

    /// Override PORT
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create the database schema and exit
    InitDb,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("unimarket=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::InitDb => {
            create_pool(&config.database_path, 1)
                .with_context(|| format!("failed to initialize {}", config.database_path))?;
            tracing::info!("Database schema ready at {}", config.database_path);
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = create_pool(&config.database_path, config.db_pool_size)
        .with_context(|| format!("failed to open {}", config.database_path))?;

    let state = AppState {
        db: pool,
        base_url: config.base_url.clone(),
        stripe: StripeClient::new(&StripeConfig {
            secret_key: config.stripe_secret_key.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
            api_base: config.stripe_api_base.clone(),
        }),
        sessions: SessionKeys::new(&config.session_secret),
        dev_mode: config.dev_mode,
    };

    if config.dev_mode {
        tracing::warn!("Running in dev mode, do not expose this instance publicly");
    }

    let addr = config.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Unimarket listening on {}", addr);

    axum::serve(listener, unimarket::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
