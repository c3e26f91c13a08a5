//! weighin service - webhook receiver, backfill and REST API.
//!
//! Run with: `cargo run -p weighin-service`

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use weighin_core::{OAuthToken, SqliteBackend};
use weighin_service::{AppState, Config, api};
use weighin_types::parse_date;

/// weighin service - Fitbit weight and health-metrics energy sync.
#[derive(Parser, Debug)]
#[command(name = "weighin-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "WEIGHIN_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides config and PORT).
    #[arg(short, long, global = true, env = "WEIGHIN_BIND")]
    bind: Option<String>,

    /// Listen on all interfaces at this port (overrides config).
    #[arg(long, global = true, env = "PORT")]
    port: Option<u16>,

    /// Database path (overrides config).
    #[arg(short, long, global = true, env = "WEIGHIN_DATABASE")]
    database: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service in the foreground (default behavior).
    Run,

    /// Manage the stored OAuth token.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Backfill a date range without starting the server.
    Backfill {
        /// First day, YYYY-MM-DD.
        #[arg(long)]
        start: String,
        /// Last day, YYYY-MM-DD.
        #[arg(long)]
        end: String,
    },
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    /// Store a token JSON file as the first credential version.
    Import {
        /// Token JSON with at least access_token and refresh_token.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command {
        Some(Command::Token {
            action: TokenAction::Import { file },
        }) => import_token(config, &file).await,
        Some(Command::Backfill { start, end }) => backfill(config, &start, &end).await,
        Some(Command::Run) | None => run_server(config).await,
    }
}

fn init_logging() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("weighin_service=info".parse()?)
                .add_directive("weighin_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    // CLI and environment overrides
    if let Some(port) = args.port {
        config.server.bind = format!("0.0.0.0:{}", port);
    }
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }

    config.validate()?;
    Ok(config)
}

fn open_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    info!("Opening database at {:?}", config.storage.path);
    let backend = Arc::new(SqliteBackend::open(&config.storage.path)?);
    Ok(AppState::new(config, backend)?)
}

async fn import_token(config: Config, file: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read token file {}", file.display()))?;
    let token = OAuthToken::from_bytes(&bytes)?;

    let state = open_state(config)?;
    let version = state.vault.provision(&token).await?;
    println!(
        "Stored token as version {} of '{}'",
        version,
        state.vault.name()
    );
    Ok(())
}

async fn backfill(config: Config, start: &str, end: &str) -> anyhow::Result<()> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;

    let state = open_state(config)?;
    let sync = state.weight_sync().await?;
    let applied = sync.sync_range(start, end).await?;
    println!("{} weights loaded", applied);
    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config.server.bind.parse()?;
    let state = open_state(config)?;

    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
