//! Relay service: wires the store, the feed registry and the hub together,
//! and serves viewers over WebSocket.

use futures::prelude::*;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

use crate::config::Settings;
use crate::error::CommandRejected;
use crate::exchange::ConnectorFactory;
use crate::hub::BroadcastHub;
use crate::registry::FeedRegistry;
use crate::store::OrderbookStore;
use crate::supervisor::{EventTransitionSink, FeedContext, FeedEvent, TokioSleeper};


/// A running relay. Cloning gives another handle to the same relay.
#[derive(Clone)]
pub struct Relay {
    hub: Arc<BroadcastHub>,
}

impl Relay {
    /// Start a feed for every configured (exchange, token) pair.
    ///
    /// # Arguments
    ///
    /// * `settings` - Validated [Settings].
    /// * `factory` - Builds the connectors, usually an
    /// [ExchangeCatalog](crate::exchange::ExchangeCatalog).
    pub fn start(settings: &Settings, factory: Arc<dyn ConnectorFactory>) -> Self {
        let store = Arc::new(OrderbookStore::new());
        let (events, receiver) = mpsc::unbounded_channel();
        let context = FeedContext {
            store: store.clone(),
            events: events.clone(),
            policy: settings.backoff.clone(),
            sleeper: Arc::new(TokioSleeper),
            transitions: Arc::new(EventTransitionSink::new(events)),
        };
        let mut registry = FeedRegistry::new(factory, context, settings.feeds.max_connectors);
        registry.configure(&settings.tokens, &settings.exchanges);
        let hub = Arc::new(BroadcastHub::new(store, registry, settings.sessions.clone()));
        tokio::spawn(forward_events(Arc::downgrade(&hub), receiver));
        Self { hub }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Accept viewers until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!("Serving viewers on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            tokio::spawn(serve_viewer(self.hub.clone(), stream, peer));
        }
    }

    /// Stop every feed and disconnect every viewer.
    pub async fn shutdown(&self) {
        self.hub.shutdown().await;
    }
}

/// Hand supervisor events to the hub for as long as it exists.
async fn forward_events(hub: Weak<BroadcastHub>, mut events: mpsc::UnboundedReceiver<FeedEvent>) {
    while let Some(event) = events.recv().await {
        match hub.upgrade() {
            Some(hub) => hub.publish(event),
            None => break,
        }
    }
    debug!("Event forwarding finished");
}

async fn serve_viewer(hub: Arc<BroadcastHub>, stream: TcpStream, peer: SocketAddr) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            warn!("WebSocket handshake with {} failed: {}", peer, error);
            return;
        },
    };
    let (mut sink, mut source) = ws.split();
    let session = hub.connect().await;
    info!("Viewer {} connected from {}", session.id(), peer);

    let writer_session = session.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = writer_session.next_frame().await {
            if let Err(error) = sink.send(Message::Text(frame.to_string())).await {
                debug!("Could not write to viewer {}: {}", writer_session.id(), error);
                writer_session.close();
                break;
            }
        }
        let _ = sink.close().await;
    });

    // The writer finishes once the session is closed, whatever the peer does.
    let writer_done = loop {
        tokio::select! {
            _ = &mut writer => break true,
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => hub.handle_text(&session, &text).await,
                Some(Ok(Message::Binary(_))) => hub.reject(&session, CommandRejected::Malformed("expected a text frame".to_string())),
                Some(Ok(Message::Close(_))) | None => break false,
                Some(Ok(_)) => (),
                Some(Err(error)) => {
                    debug!("Viewer {} read failed: {}", session.id(), error);
                    break false;
                },
            },
        }
    };
    hub.disconnect(session.id());
    if !writer_done {
        let _ = writer.await;
    }
}
