//! Scripted connectors, a recording sleeper and a recording transition sink
//! for unit tests.

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::*;
use crate::error::{ConnectorError, FeedError, ParseError};
use crate::exchange::{BookUpdateReader, Connector, ConnectorFactory, ExchangeSource};
use crate::generic::GenericSource;
use crate::supervisor::{Sleeper, SupervisorState, TransitionSink};


pub const GENERIC_BOOK: &str = r#"{"asks":[["2000.5","1"]],"bids":[["1999.0","2"]]}"#;


/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Plays back scripted `start` and `next_raw` results, then idles forever.
pub struct ScriptedConnector {
    exchange: String,
    token: String,
    kind: TransportKind,
    starts: VecDeque<Result<(), FeedError>>,
    reads: VecDeque<Result<String, FeedError>>,
    reader: Box<dyn BookUpdateReader>,
    stops: Arc<AtomicUsize>,
    refreshes: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new(exchange: &str, token: &str, kind: TransportKind) -> Self {
        let pair = CurrencyPair { main: token.to_string(), counter: DEFAULT_QUOTE.to_string() };
        Self {
            exchange: exchange.to_string(),
            token: token.to_string(),
            kind,
            starts: VecDeque::new(),
            reads: VecDeque::new(),
            reader: GenericSource::new(kind).make_book_update_reader(&pair),
            stops: Arc::new(AtomicUsize::new(0)),
            refreshes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn starts(mut self, starts: Vec<Result<(), FeedError>>) -> Self {
        self.starts = starts.into();
        self
    }

    pub fn reads(mut self, reads: Vec<Result<String, FeedError>>) -> Self {
        self.reads = reads.into();
        self
    }

    pub fn stops(&self) -> Arc<AtomicUsize> {
        self.stops.clone()
    }

    pub fn refreshes(&self) -> Arc<AtomicUsize> {
        self.refreshes.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn exchange(&self) -> &str {
        &self.exchange
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn start(&mut self) -> Result<(), FeedError> {
        self.starts.pop_front().unwrap_or(Ok(()))
    }

    async fn next_raw(&mut self) -> Result<String, FeedError> {
        match self.reads.pop_front() {
            Some(read) => read,
            None => future::pending().await,
        }
    }

    fn normalize(&mut self, raw: &str) -> Result<Option<CanonicalOrderBook>, ParseError> {
        let update = self.reader.read_book_update(raw)?;
        Ok(update.map(|update| CanonicalOrderBook::new(update, Instant::now())))
    }

    fn refresh(&mut self) -> bool {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.kind == TransportKind::Polled
    }

    async fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds idle [ScriptedConnector]s and remembers which pairs were asked for.
#[derive(Default)]
pub struct ScriptedFactory {
    made: Mutex<Vec<(String, String)>>,
    stops: Arc<AtomicUsize>,
    refreshes: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn made(&self) -> Vec<(String, String)> {
        self.made.lock().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl ConnectorFactory for ScriptedFactory {
    fn make_connector(&self, exchange: &ExchangeConfig, token: &str) -> Result<Box<dyn Connector>, ConnectorError> {
        self.made.lock().push((exchange.name.clone(), token.to_string()));
        let mut connector = ScriptedConnector::new(&exchange.name, token, exchange.kind);
        connector.stops = self.stops.clone();
        connector.refreshes = self.refreshes.clone();
        Ok(Box::new(connector))
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.sleeps.lock().push(duration);
        future::ready(()).boxed()
    }
}

/// Records `(from, to, attempt)` for every transition.
#[derive(Default)]
pub struct RecordingTransitions {
    recorded: Mutex<Vec<(SupervisorState, SupervisorState, u32)>>,
}

impl RecordingTransitions {
    pub fn recorded(&self) -> Vec<(SupervisorState, SupervisorState, u32)> {
        self.recorded.lock().clone()
    }
}

impl TransitionSink for RecordingTransitions {
    fn on_transition(&self, _exchange: &str, _token: &str, from: SupervisorState, to: SupervisorState, attempt: u32) {
        self.recorded.lock().push((from, to, attempt));
    }
}
