use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use issuemill::api::{self, AppState};
use issuemill::db::Database;

#[derive(Parser)]
#[command(name = "issuemill")]
#[command(about = "A project-scoped issue tracker served as a JSON API")]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "ISSUEMILL_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Path to the SQLite database file
    #[arg(long, env = "ISSUEMILL_DB", default_value = "issues.db")]
    db: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("issuemill=info,tower_http=warn")),
        )
        .init();

    let cli = Cli::parse();

    let db = Database::open(&cli.db)
        .with_context(|| format!("Failed to open database at {}", cli.db.display()))?;
    let app = api::router(AppState::new(db));

    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    tracing::info!(bind = %cli.bind, db = %cli.db.display(), "issuemill listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutting down");
    }
}
