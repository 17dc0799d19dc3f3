//! Natours API server and data tools.
//!
//! Usage:
//!   natours [serve]
//!   natours import --tours dev-data/data/tours.json --users dev-data/data/users.json
//!   natours delete-data

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use natours::import::{self, ImportFiles};
use natours::{AppState, Config, build_router, db};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve,

    /// Load development data from JSON files.
    Import {
        /// Tours file.
        #[arg(long)]
        tours: PathBuf,

        /// Users file.
        #[arg(long)]
        users: Option<PathBuf>,

        /// Reviews file.
        #[arg(long)]
        reviews: Option<PathBuf>,
    },

    /// Delete all reviews, tours and users.
    DeleteData,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    install_panic_hook();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Import {
            tours,
            users,
            reviews,
        } => {
            let pool = connect(&config).await?;
            let files = ImportFiles {
                tours,
                users,
                reviews,
            };
            let summary = import::import(&pool, &files).await?;
            info!(?summary, "import finished");
            Ok(())
        }
        Command::DeleteData => {
            let pool = connect(&config).await?;
            import::delete_all(&pool).await?;
            info!("data deleted");
            Ok(())
        }
    }
}

async fn connect(config: &Config) -> Result<sqlx::PgPool> {
    let pool = db::create_pool(config)
        .await
        .context("failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;
    Ok(pool)
}

async fn serve(config: Config) -> Result<()> {
    info!(
        port = config.port,
        environment = ?config.environment,
        "starting Natours API"
    );

    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;
    info!("database connection established");

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
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
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("SIGINT received, shutting down"),
        () = terminate => info!("SIGTERM received, shutting down"),
    }
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic| {
        let location = panic
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        error!(%location, panic = %panic, "panic");
    }));
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
