use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, WrapErr};
use payguard::application::{Backends, Services};
use payguard::config::WorkflowConfig;
use payguard::interfaces::http::{AppState, create_router};
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Workflow configuration file (JSON). Defaults apply when omitted.
    #[arg(long, env = "PAYGUARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "PAYGUARD_DB_PATH", global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the verification and workflow HTTP endpoints
    Serve {
        #[arg(long, env = "PAYGUARD_BIND", default_value = "127.0.0.1:8080")]
        bind: String,
    },
    /// Validate the configuration and storage, then print the effective configuration
    Config,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("payguard=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<WorkflowConfig> {
    let config = match path {
        Some(path) => WorkflowConfig::from_file(path).into_diagnostic()?,
        None => WorkflowConfig::default(),
    };
    config.validate().into_diagnostic()?;
    Ok(config)
}

fn open_backends(config: &WorkflowConfig, db_path: Option<&Path>) -> Result<(Backends, &'static str)> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let backends = Backends::rocksdb(config, path)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to open database at {}", path.display()))?;
            Ok((backends, "rocksdb"))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok((Backends::in_memory(config), "in-memory"))
        }
        None => Ok((Backends::in_memory(config), "in-memory")),
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config.as_deref())?;
    let (backends, storage) = open_backends(&config, cli.db_path.as_deref())?;

    match cli.command {
        Command::Config => {
            let summary = serde_json::json!({
                "storage": storage,
                "config": config,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).into_diagnostic()?
            );
        }
        Command::Serve { bind } => {
            let services = Services::assemble(&config, backends).into_diagnostic()?;
            let app = create_router(AppState::new(services));

            let listener = TcpListener::bind(&bind)
                .await
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to bind to {bind}"))?;
            info!(%bind, storage, "payguard listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .into_diagnostic()?;
        }
    }

    Ok(())
}
