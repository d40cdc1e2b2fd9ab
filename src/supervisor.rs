//! Lifecycle of one connector: connect, read, back off on failure, and stop
//! on request. Time is injected through [Sleeper] and every state change is
//! reported to a [TransitionSink].

use futures::future::{BoxFuture, FutureExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::{CanonicalOrderBook, TransportKind};
use crate::error::FeedError;
use crate::exchange::Connector;
use crate::store::OrderbookStore;


const COMMAND_BUFFER: usize = 8;


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Connecting,
    Connected,
    BackingOff,
    Stopped,
}

impl Display for SupervisorState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Connecting => "connecting",
            SupervisorState::Connected => "connected",
            SupervisorState::BackingOff => "backing_off",
            SupervisorState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Reconnection delays: `min(max_delay, base_delay * growth^attempt)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub growth: f64,
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 2_000, growth: 1.5, max_delay_ms: 60_000 }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = (self.base_delay_ms as f64 * self.growth.powi(exponent)).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.round() as u64)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Source of backoff delays.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// Observer of supervisor state changes.
pub trait TransitionSink: Send + Sync {
    fn on_transition(&self, exchange: &str, token: &str, from: SupervisorState, to: SupervisorState, attempt: u32);
}

/// What the supervisors tell the [hub](crate::hub::BroadcastHub).
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A material change was applied to the store.
    BookChanged {
        token: String,
        exchange: String,
        book: CanonicalOrderBook,
    },
    StatusChanged {
        exchange: String,
        token: String,
        state: SupervisorState,
    },
}

/// Logs every transition and forwards the ones viewers care about as
/// [FeedEvent::StatusChanged]. Stopping is announced by the removal itself.
pub struct EventTransitionSink {
    events: mpsc::UnboundedSender<FeedEvent>,
}

impl EventTransitionSink {
    pub fn new(events: mpsc::UnboundedSender<FeedEvent>) -> Self {
        Self { events }
    }
}

impl TransitionSink for EventTransitionSink {
    fn on_transition(&self, exchange: &str, token: &str, from: SupervisorState, to: SupervisorState, attempt: u32) {
        info!("{} {}: {} -> {} (attempt {})", exchange, token, from, to, attempt);
        if to != SupervisorState::Stopped {
            let _ = self.events.send(FeedEvent::StatusChanged {
                exchange: exchange.to_string(),
                token: token.to_string(),
                state: to,
            });
        }
    }
}

/// Everything a supervisor shares with the rest of the relay.
#[derive(Clone)]
pub struct FeedContext {
    pub store: Arc<OrderbookStore>,
    pub events: mpsc::UnboundedSender<FeedEvent>,
    pub policy: BackoffPolicy,
    pub sleeper: Arc<dyn Sleeper>,
    pub transitions: Arc<dyn TransitionSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorCommand {
    /// Fetch now instead of waiting for the next poll.
    Refresh,
    Stop,
}

enum Exit {
    Stop,
    Failed(FeedError),
}

pub struct ReconnectSupervisor {
    exchange: String,
    token: String,
    connector: Box<dyn Connector>,
    context: FeedContext,
    commands: mpsc::Receiver<SupervisorCommand>,
    state: SupervisorState,
    attempt: u32,
}

impl ReconnectSupervisor {
    /// Run a supervisor for `connector` on its own task.
    pub fn spawn(connector: Box<dyn Connector>, context: FeedContext) -> SupervisorHandle {
        let (sender, commands) = mpsc::channel(COMMAND_BUFFER);
        let kind = connector.kind();
        let supervisor = Self {
            exchange: connector.exchange().to_string(),
            token: connector.token().to_string(),
            connector,
            context,
            commands,
            state: SupervisorState::Idle,
            attempt: 0,
        };
        SupervisorHandle { commands: sender, task: tokio::spawn(supervisor.run()), kind }
    }

    fn transition(&mut self, to: SupervisorState) {
        let from = self.state;
        self.state = to;
        self.context.transitions.on_transition(&self.exchange, &self.token, from, to, self.attempt);
    }

    async fn run(mut self) {
        self.transition(SupervisorState::Connecting);
        loop {
            let error = match self.connect_and_read().await {
                Exit::Stop => break,
                Exit::Failed(error) => error,
            };
            let (delay, grow) = match &error {
                FeedError::Unauthorized(_) => {
                    error!("{} {} rejected our credentials: {}", &self.exchange, &self.token, error);
                    (self.context.policy.max_delay(), false)
                },
                FeedError::ProtocolViolation(_) => {
                    error!("{} {} broke protocol: {}", &self.exchange, &self.token, error);
                    (self.context.policy.delay(self.attempt), true)
                },
                FeedError::TransientNetwork(_) => {
                    warn!("{} {} feed failed: {}", &self.exchange, &self.token, error);
                    (self.context.policy.delay(self.attempt), true)
                },
            };
            self.transition(SupervisorState::BackingOff);
            debug!("{} {} retrying in {}ms", &self.exchange, &self.token, delay.as_millis());
            if !self.back_off(delay).await {
                break;
            }
            if grow {
                self.attempt += 1;
            }
            self.transition(SupervisorState::Connecting);
        }
        self.connector.stop().await;
        self.transition(SupervisorState::Stopped);
    }

    async fn connect_and_read(&mut self) -> Exit {
        let started = {
            let start = self.connector.start();
            tokio::pin!(start);
            loop {
                tokio::select! {
                    biased;
                    result = &mut start => break result,
                    command = self.commands.recv() => match command {
                        Some(SupervisorCommand::Refresh) => debug!("{} {} still connecting", &self.exchange, &self.token),
                        Some(SupervisorCommand::Stop) | None => return Exit::Stop,
                    },
                }
            }
        };
        if let Err(error) = started {
            return Exit::Failed(error);
        }
        loop {
            let next = tokio::select! {
                raw = self.connector.next_raw() => raw,
                command = self.commands.recv() => match command {
                    Some(SupervisorCommand::Refresh) => {
                        if !self.connector.refresh() {
                            debug!("{} {} is a continuous feed, nothing to refresh", &self.exchange, &self.token);
                        }
                        continue;
                    },
                    Some(SupervisorCommand::Stop) | None => return Exit::Stop,
                },
            };
            let raw = match next {
                Ok(raw) => raw,
                Err(error) => return Exit::Failed(error),
            };
            if self.state == SupervisorState::Connecting {
                self.attempt = 0;
                self.transition(SupervisorState::Connected);
            }
            match self.connector.normalize(&raw) {
                Ok(Some(book)) => self.deliver(book),
                Ok(None) => (),
                Err(error) => warn!("Dropping message from {} {}: {}", &self.exchange, &self.token, error),
            }
        }
    }

    fn deliver(&self, book: CanonicalOrderBook) {
        if self.context.store.apply(&self.token, &self.exchange, book.clone()) {
            let _ = self.context.events.send(FeedEvent::BookChanged {
                token: self.token.clone(),
                exchange: self.exchange.clone(),
                book,
            });
        }
    }

    /// Wait out `delay`. Returns `false` when asked to stop meanwhile.
    async fn back_off(&mut self, delay: Duration) -> bool {
        let mut sleep = self.context.sleeper.sleep(delay);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(SupervisorCommand::Refresh) => debug!("{} {} is backing off, refresh ignored", &self.exchange, &self.token),
                    Some(SupervisorCommand::Stop) | None => return false,
                },
            }
        }
    }
}

/// Owner's side of a running supervisor.
pub struct SupervisorHandle {
    commands: mpsc::Sender<SupervisorCommand>,
    task: JoinHandle<()>,
    kind: TransportKind,
}

impl SupervisorHandle {
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Ask a polled feed for an immediate fetch. Returns whether the request
    /// was queued.
    pub fn refresh(&self) -> bool {
        self.kind == TransportKind::Polled && self.commands.try_send(SupervisorCommand::Refresh).is_ok()
    }

    /// Stop the supervisor and wait until its connector is released.
    pub async fn stop(self) {
        let _ = self.commands.send(SupervisorCommand::Stop).await;
        if let Err(error) = self.task.await {
            error!("Supervisor task failed: {}", error);
        }
    }
}
