//! SQL Server tools entry point.
//!
//! Serves the tool table over MCP stdio transport. Connects to the configured
//! default database at startup when `DB_SERVER` and `DB_NAME` are set.

use anyhow::Result;
use mssql_tools_server::database::TdsConnector;
use mssql_tools_server::shutdown::{install_signal_handlers, new_shutdown_controller};
use mssql_tools_server::{Config, DatabaseService, DatabaseToolServer};
use rmcp::ServiceExt;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    // stdout is reserved for JSON-RPC
    init_logging();

    let version = env!("CARGO_PKG_VERSION");
    info!("SQL Server tools v{} starting (transport: stdio)", version);

    std::panic::set_hook(Box::new(|info| {
        eprintln!("[PANIC] {}", info);
    }));

    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config.database);

    let shutdown_controller = new_shutdown_controller();
    install_signal_handlers(shutdown_controller.clone()).await;

    let service = Arc::new(DatabaseService::new(config, Arc::new(TdsConnector::new())));

    match service.auto_connect().await {
        Ok(Some(message)) => info!("{}", message),
        Ok(None) => info!("No default database configured; waiting for connect_database"),
        Err(e) => warn!("Auto-connect failed, continuing disconnected: {}", e),
    }

    let server = DatabaseToolServer::new(service.clone());
    let running = server.serve(rmcp::transport::stdio()).await?;
    info!("Server initialized. Ready to accept requests...");

    let mut shutdown_signal = shutdown_controller.signal();

    tokio::select! {
        quit_reason = running.waiting() => {
            match quit_reason {
                Ok(reason) => info!("Service stopped: {:?}", reason),
                Err(e) => warn!("Service error: {}", e),
            }
        }
        _ = shutdown_signal.recv() => {
            info!("Shutdown signal received");
        }
    }

    shutdown_controller.graceful_shutdown(&service).await;

    Ok(())
}

/// Initialize tracing subscriber with stderr output.
fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn,mssql_tools_server=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
