//! WebSocket relay of order books aggregated from multiple exchanges.

use clap::Parser;
use log::info;
use simple_logger::SimpleLogger;
use std::sync::Arc;
use tokio::net::TcpListener;

use orderbook_relay::cli::ServerArgs;
use orderbook_relay::config::Settings;
use orderbook_relay::exchange::ExchangeCatalog;
use orderbook_relay::service::Relay;


#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ServerArgs::parse();
    SimpleLogger::new().with_level(args.log_level).init()?;
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(listen) = args.listen {
        settings.listen = listen;
    }
    info!("Tracking {} tokens on {} exchanges", settings.tokens.len(), settings.exchanges.len());
    let listener = TcpListener::bind(&settings.listen).await?;
    let catalog = Arc::new(ExchangeCatalog::new(settings.feeds.clone()));
    let relay = Relay::start(&settings, catalog);
    tokio::select! {
        result = relay.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    relay.shutdown().await;
    Ok(())
}
