//! Viewer sessions, command handling and fan-out of store changes.
//!
//! Every frame is serialized once and queued to each session; a session's
//! writer task drains its queue. A full queue drops its oldest frame, and a
//! session whose writer stops draining for too long is terminated.

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::config::SessionSettings;
use crate::core::{normalize_token, ExchangeConfig};
use crate::error::CommandRejected;
use crate::protocol::{BookView, ServerMessage, ViewerCommand};
use crate::registry::{Added, FeedRegistry};
use crate::store::OrderbookStore;
use crate::supervisor::FeedEvent;


/// Which `orderbook_update` frames a viewer receives. Empty lists mean all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub tokens: Vec<String>,
    pub exchanges: Vec<String>,
}

impl Scope {
    pub fn includes(&self, token: &str, exchange: &str) -> bool {
        (self.tokens.is_empty() || self.tokens.iter().any(|scoped| scoped == token))
            && (self.exchanges.is_empty() || self.exchanges.iter().any(|scoped| scoped == exchange))
    }
}

#[derive(Debug, Default)]
struct SessionQueue {
    frames: VecDeque<Arc<str>>,
    /// Frames dropped since the writer last took one.
    overflows: usize,
    closed: bool,
}

/// One connected viewer.
pub struct ViewerSession {
    id: u64,
    queue: Mutex<SessionQueue>,
    ready: Notify,
    scope: Mutex<Scope>,
    capacity: usize,
    max_overflows: usize,
}

impl ViewerSession {
    pub fn new(id: u64, settings: &SessionSettings) -> Self {
        Self {
            id,
            queue: Mutex::new(SessionQueue::default()),
            ready: Notify::new(),
            scope: Mutex::new(Scope::default()),
            capacity: settings.queue_capacity.max(1),
            max_overflows: settings.max_overflows,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a frame without waiting.
    ///
    /// # Returns
    ///
    /// `false` when the session is closed, either already or because this
    /// push overflowed it one time too many.
    pub fn push(&self, frame: Arc<str>) -> bool {
        let mut queue = self.queue.lock();
        if queue.closed {
            return false;
        }
        if queue.frames.len() >= self.capacity {
            queue.frames.pop_front();
            queue.overflows += 1;
            if queue.overflows > self.max_overflows {
                warn!("Viewer {} is not keeping up, disconnecting", self.id);
                queue.closed = true;
                queue.frames.clear();
                drop(queue);
                self.ready.notify_one();
                return false;
            }
        }
        queue.frames.push_back(frame);
        drop(queue);
        self.ready.notify_one();
        true
    }

    /// Next frame to write, `None` once the session is closed.
    pub async fn next_frame(&self) -> Option<Arc<str>> {
        loop {
            {
                let mut queue = self.queue.lock();
                if queue.closed {
                    return None;
                }
                if let Some(frame) = queue.frames.pop_front() {
                    queue.overflows = 0;
                    return Some(frame);
                }
            }
            self.ready.notified().await;
        }
    }

    pub fn close(&self) {
        self.queue.lock().closed = true;
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().frames.len()
    }

    pub fn scope(&self) -> Scope {
        self.scope.lock().clone()
    }

    fn set_scope(&self, scope: Scope) {
        *self.scope.lock() = scope;
    }

    fn includes(&self, token: &str, exchange: &str) -> bool {
        self.scope.lock().includes(token, exchange)
    }
}

/// Owns the viewer sessions and the [FeedRegistry].
///
/// Lock order is registry, then sessions. Lifecycle frames are queued under
/// the sessions write lock after the store has been updated, and book deltas
/// under the read lock after checking the store, so a delta for a removed
/// pair can never follow its removal notice.
pub struct BroadcastHub {
    store: Arc<OrderbookStore>,
    registry: tokio::sync::Mutex<FeedRegistry>,
    sessions: RwLock<HashMap<u64, Arc<ViewerSession>>>,
    next_session: AtomicU64,
    settings: SessionSettings,
}

impl BroadcastHub {
    pub fn new(store: Arc<OrderbookStore>, registry: FeedRegistry, settings: SessionSettings) -> Self {
        Self {
            store,
            registry: tokio::sync::Mutex::new(registry),
            sessions: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<OrderbookStore> {
        &self.store
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn encode(message: &ServerMessage) -> Option<Arc<str>> {
        match message.to_frame() {
            Ok(frame) => Some(frame),
            Err(error) => {
                error!("Could not serialize {:?}: {}", message, error);
                None
            },
        }
    }

    fn initial_data(&self, registry: &FeedRegistry) -> ServerMessage {
        let snapshot = self.store.snapshot();
        let mut orderbooks = BTreeMap::new();
        for token in registry.tokens() {
            let books = snapshot.get(token);
            let views: BTreeMap<String, BookView> = registry.exchanges().iter()
                .map(|exchange| {
                    let view = books
                        .and_then(|books| books.get(&exchange.name))
                        .map_or_else(BookView::no_data, BookView::from);
                    (exchange.name.clone(), view)
                })
                .collect();
            orderbooks.insert(token.clone(), views);
        }
        ServerMessage::InitialData {
            tokens: registry.tokens().to_vec(),
            exchanges: registry.exchanges().iter().map(Into::into).collect(),
            orderbooks,
        }
    }

    /// Register a viewer. Its queue starts with the full current state.
    pub async fn connect(&self) -> Arc<ViewerSession> {
        let registry = self.registry.lock().await;
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(ViewerSession::new(id, &self.settings));
        {
            let mut sessions = self.sessions.write();
            if let Some(frame) = Self::encode(&self.initial_data(&registry)) {
                session.push(frame);
            }
            sessions.insert(id, session.clone());
        }
        drop(registry);
        debug!("Viewer {} registered", id);
        session
    }

    pub fn disconnect(&self, id: u64) {
        if let Some(session) = self.sessions.write().remove(&id) {
            session.close();
            info!("Viewer {} disconnected", id);
        }
    }

    fn unregister(&self, failed: Vec<u64>) {
        for id in failed {
            self.disconnect(id);
        }
    }

    /// Queue a frame to every session; sessions that refuse it are dropped.
    fn broadcast(&self, message: &ServerMessage) {
        let Some(frame) = Self::encode(message) else { return };
        let mut sessions = self.sessions.write();
        sessions.retain(|id, session| {
            let delivered = session.push(frame.clone());
            if !delivered {
                session.close();
                info!("Viewer {} dropped from broadcast", id);
            }
            delivered
        });
    }

    /// Turn a supervisor event into viewer frames.
    pub fn publish(&self, event: FeedEvent) {
        match event {
            FeedEvent::BookChanged { token, exchange, .. } => {
                let failed: Vec<u64> = {
                    let sessions = self.sessions.read();
                    // Queued events can be older than the store, so viewers
                    // get the book it holds now.
                    let Some(current) = self.store.get(&token, &exchange) else {
                        debug!("Dropping stale update for {} on {}", &token, &exchange);
                        return;
                    };
                    let Some(frame) = Self::encode(&ServerMessage::orderbook_update(&token, &exchange, &current)) else { return };
                    sessions.values()
                        .filter(|session| session.includes(&token, &exchange))
                        .filter(|session| !session.push(frame.clone()))
                        .map(|session| session.id())
                        .collect()
                };
                self.unregister(failed);
            },
            FeedEvent::StatusChanged { exchange, token, state } => {
                self.broadcast(&ServerMessage::ExchangeStatus { exchange, token, state });
            },
        }
    }

    fn reply(session: &ViewerSession, rejected: &CommandRejected) {
        debug!("Viewer {} command rejected: {}", session.id(), rejected);
        if let Some(frame) = Self::encode(&ServerMessage::error(rejected)) {
            session.push(frame);
        }
    }

    /// Report connectors that could not be created to the viewer that asked.
    fn report_failures(session: &ViewerSession, added: &Added) {
        for failure in &added.failures {
            error!("{}", failure);
            if let Some(frame) = Self::encode(&ServerMessage::Error { message: failure.to_string() }) {
                session.push(frame);
            }
        }
    }

    /// Handle one text frame from a viewer. Rejections are answered to that
    /// viewer only.
    pub async fn handle_text(&self, session: &ViewerSession, text: &str) {
        let result = match ViewerCommand::parse(text) {
            Ok(command) => self.execute(session, command).await,
            Err(rejected) => Err(rejected),
        };
        if let Err(rejected) = result {
            Self::reply(session, &rejected);
        }
    }

    pub fn reject(&self, session: &ViewerSession, rejected: CommandRejected) {
        Self::reply(session, &rejected);
    }

    async fn execute(&self, session: &ViewerSession, command: ViewerCommand) -> Result<(), CommandRejected> {
        match command {
            ViewerCommand::AddToken { token } => {
                let mut registry = self.registry.lock().await;
                let added = registry.add_token(&token)?;
                if added.fresh {
                    if let Some(token) = normalize_token(&token) {
                        self.broadcast(&ServerMessage::TokenAdded { token });
                    }
                }
                Self::report_failures(session, &added);
            },
            ViewerCommand::RemoveToken { token } => {
                let mut registry = self.registry.lock().await;
                let token = registry.remove_token(&token).await?;
                self.broadcast(&ServerMessage::TokenRemoved { token });
            },
            ViewerCommand::AddExchange { exchange, url, kind } => {
                let mut registry = self.registry.lock().await;
                let config = ExchangeConfig::new(exchange.trim(), url.trim(), kind);
                let descriptor = (&config).into();
                let added = registry.add_exchange(config)?;
                self.broadcast(&ServerMessage::ExchangeAdded { exchange: descriptor });
                Self::report_failures(session, &added);
            },
            ViewerCommand::RemoveExchange { exchange } => {
                let mut registry = self.registry.lock().await;
                let removed = registry.remove_exchange(&exchange).await?;
                self.broadcast(&ServerMessage::ExchangeRemoved { exchange: removed.name });
            },
            ViewerCommand::UpdatePrices { exchange } => {
                let registry = self.registry.lock().await;
                let refreshed = registry.refresh(exchange.as_deref())?;
                debug!("Viewer {} refreshed {} polled feeds", session.id(), refreshed);
            },
            ViewerCommand::Clear {} => {
                let _registry = self.registry.lock().await;
                let cleared = self.store.clear();
                info!("Cleared {} books", cleared);
                self.broadcast(&ServerMessage::OrderbooksCleared {});
            },
            ViewerCommand::Subscribe { tokens, exchanges } => {
                let tokens = tokens.iter()
                    .map(|raw| normalize_token(raw).ok_or_else(|| CommandRejected::InvalidToken(raw.clone())))
                    .collect::<Result<Vec<_>, _>>()?;
                session.set_scope(Scope { tokens, exchanges });
            },
        }
        Ok(())
    }

    /// Stop every feed and close every session.
    pub async fn shutdown(&self) {
        self.registry.lock().await.shutdown().await;
        let sessions: Vec<Arc<ViewerSession>> = self.sessions.write().drain().map(|(_, session)| session).collect();
        for session in sessions {
            session.close();
        }
    }
}
