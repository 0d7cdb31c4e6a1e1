pub mod cli;
pub mod error;
pub mod knowledge;
pub mod models;
pub mod provider;
pub mod server;
pub mod service;
pub mod session;
pub mod store;

use cli::Args;
use log::info;
use server::Server;
use service::CallService;
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("HTTP API Port: {}", args.http_port.map(|p| p.to_string()).unwrap_or_else(|| "disabled".into()));
    info!("Signed Connections: {}", args.server_secret.as_deref().map_or(false, |s| !s.is_empty()));
    info!("Connection Rate Limit: {}/s", args.connection_rate_limit);
    info!("Store Type: {}", args.store_type);
    info!("Store Host: {}", args.store_host);
    info!("Provider Base URL: {}", args.provider_base_url.as_deref().unwrap_or("default"));
    info!("Call Start Timeout: {}s", args.call_start_timeout_secs);
    info!("Transcript Polling: {} x {}ms", args.poll_attempts, args.poll_interval_ms);
    info!("Knowledge Base Type: {}", args.knowledge_type);
    if let Some(url) = &args.knowledge_url {
        info!("Knowledge Base URL: {}", url);
    }
    info!("-------------------------");

    let service = CallService::new(&args)?;
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, service, args);
    server.run().await?;

    Ok(())
}
