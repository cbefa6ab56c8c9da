//! cursordyn server binary.
//!
//! Loads a table configuration, seeds the in-memory reference store, and serves
//! the table over a Unix domain socket.

use std::path::{Path, PathBuf};

use clap::Parser;
use cursordyn_core::api::TableAccess;
use cursordyn_core::config::ServiceConfig;
use cursordyn_core::store::MemoryStore;
use cursordyn_server::AccessServer;
use serde_json::Value;
use tracing::info;

/// Serve cursor-paginated queries and batch lookups for one table.
#[derive(Parser, Debug)]
#[command(name = "cursordyn-server", version)]
struct Cli {
    /// Service configuration (JSON). The cursor secret may instead come from
    /// CURSORDYN_CURSOR_SECRET.
    #[arg(short, long)]
    config: PathBuf,

    /// JSON array of items to load into the store at startup.
    #[arg(short, long)]
    items: Option<PathBuf>,

    /// Unix socket path (default: ~/.local/share/cursordyn/server.sock).
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Attribute holding an epoch-seconds expiry; expired items are hidden.
    #[arg(long)]
    ttl_attribute: Option<String>,
}

fn default_socket_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cursordyn")
        .join("server.sock")
}

fn load_items(path: &Path) -> Result<Vec<Value>, Box<dyn std::error::Error>> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::load(&cli.config)?;
    let socket_path = cli.socket.unwrap_or_else(default_socket_path);
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut store = MemoryStore::new(&config.table, &config.access.default_index)?;
    if let Some(attr) = &cli.ttl_attribute {
        store = store.with_ttl_attribute(attr);
    }
    if let Some(path) = &cli.items {
        let loaded = store.extend(load_items(path)?)?;
        info!(items = loaded, path = %path.display(), "store seeded");
    }

    info!(
        config = %cli.config.display(),
        socket = %socket_path.display(),
        table = %config.table.table_name,
        "starting"
    );

    let access = TableAccess::with_access_config(store, config.table, config.access);
    let server = AccessServer::new(access, socket_path);
    server.run().await?;

    Ok(())
}
