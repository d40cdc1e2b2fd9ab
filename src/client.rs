use clap::Parser;
use futures::prelude::*;
use log::{info, warn};
use simple_logger::SimpleLogger;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use orderbook_relay::cli::ClientArgs;
use orderbook_relay::protocol::{ServerMessage, ViewerCommand};


#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();
    SimpleLogger::new().with_level(args.log_level).init()?;
    info!("Connecting to {}", &args.url);
    let (ws, _) = connect_async(args.url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();
    for command in &args.commands {
        if let Err(rejected) = ViewerCommand::parse(command) {
            warn!("Sending anyway: {}", rejected);
        }
        sink.send(Message::Text(command.clone())).await?;
    }
    info!("Streaming orderbooks for {} messages", args.messages);
    let mut received = 0;
    while received < args.messages {
        let Some(message) = stream.next().await else { break };
        match message? {
            Message::Text(text) => {
                received += 1;
                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(frame) => info!("Received: {:?}", frame),
                    Err(_) => info!("Received: {}", text),
                }
            },
            Message::Close(_) => break,
            _ => (),
        }
    }
    let _ = sink.close().await;
    Ok(())
}
