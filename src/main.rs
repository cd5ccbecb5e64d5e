#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use ops_terminal::terminal::bridge::BridgeOptions;
use ops_terminal::terminal::client::SshConnector;
use ops_terminal::terminal::config::TerminalConfig;
use ops_terminal::terminal::http::{AppState, routes};
use ops_terminal::terminal::inventory::Inventory;
use ops_terminal::terminal::storage::{MemoryAuditStore, TerminalRegistry};
use poem::{EndpointExt, Server, listener::TcpListener, middleware::Tracing};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Initialize logging with proper tracing default
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = TerminalConfig::from_env();
    info!(?config, "Configuration resolved");

    let inventory = Arc::new(Inventory::load(&config.inventory_path)?);
    let audit = Arc::new(MemoryAuditStore::new());
    let connector = Arc::new(SshConnector::new(config.connect_timeout, config.compression));

    let registry = Arc::new(TerminalRegistry::new(
        inventory.clone(),
        inventory.clone(),
        connector,
        audit.clone(),
        config.recording_dir.clone(),
    ));

    let state = Arc::new(AppState {
        registry,
        audit,
        policy: inventory,
        bridge: BridgeOptions {
            idle_timeout: config.idle_timeout,
            output_queue: config.output_queue,
            ..BridgeOptions::default()
        },
    });

    let app = routes(state).with(Tracing);

    let addr = format!("0.0.0.0:{}", config.listen_port);
    info!("Starting terminal server on {}", addr);
    info!("Recording sessions to {}", config.recording_dir.display());

    Server::new(TcpListener::bind(addr))
        .name("Ops Terminal")
        .run(app)
        .await?;

    Ok(())
}
