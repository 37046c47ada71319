//! roastsync-server - Roast synchronisation service
//!
//! Receives roasts from the desktop roasting client, keeps green-coffee
//! stock in step with them and serves roasts, reference profiles and QC
//! results to the web client.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use clap::Parser;
use roastsync_common::config::{resolve_root_folder, TomlConfig};
use roastsync_common::db::init_database;
use roastsync_common::events::NotificationHub;
use roastsync_common::time::SystemClock;
use roastsync_server::scheduler::TaskScheduler;
use roastsync_server::{build_router, AppState};
use rust_decimal::Decimal;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Notifications buffered per subscriber before it starts lagging
const HUB_CAPACITY: usize = 256;

/// Command-line arguments for roastsync-server
#[derive(Parser, Debug)]
#[command(name = "roastsync-server")]
#[command(about = "Roast synchronisation server")]
#[command(version)]
struct Args {
    /// Root folder holding the database and legacy profiles
    #[arg(short, long, env = "ROASTSYNC_ROOT")]
    root_folder: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, env = "ROASTSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "ROASTSYNC_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides the config file)
    #[arg(short, long, env = "ROASTSYNC_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tower_http=info", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting roastsync-server v{}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Cannot create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let db_path = config.database_path(&root_folder);
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;
    info!("✓ Database ready");

    let placeholder_stock = Decimal::try_from(config.placeholder_stock_kg).unwrap_or_else(|_| {
        warn!(
            "placeholder_stock_kg {} is not a valid quantity; using 1000",
            config.placeholder_stock_kg
        );
        Decimal::from(1000)
    });
    let hub = NotificationHub::new(HUB_CAPACITY);
    let state = AppState::new(
        pool.clone(),
        hub.clone(),
        config.default_user(),
        placeholder_stock,
        config.profiles_dir(&root_folder),
    );

    if config.scheduler.enabled {
        match FixedOffset::east_opt(config.scheduler.utc_offset_minutes * 60) {
            Some(offset) => {
                let scheduler = TaskScheduler::new(pool, hub, Arc::new(SystemClock), offset);
                tokio::spawn(scheduler.run());
            }
            None => warn!(
                "Scheduler disabled: utc_offset_minutes {} is out of range",
                config.scheduler.utc_offset_minutes
            ),
        }
    } else {
        info!("Production task scheduler disabled by configuration");
    }

    let app = build_router(state);

    let bind = args.bind.unwrap_or(config.bind_address);
    let port = args.port.unwrap_or(config.port);
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("roastsync-server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
