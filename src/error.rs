//! Error types for feeds, message parsing, viewer commands and start-up.

use thiserror::Error;


/// Failure that terminates an upstream feed. Handled by the
/// [supervisor](crate::supervisor::ReconnectSupervisor), never shown to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Connection refused, reset, closed or timed out.
    #[error("network failure: {0}")]
    TransientNetwork(String),
    /// The upstream sent something the transport cannot accept.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// Credentials or access rejected by the exchange.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Failure to read a single upstream message. The message is dropped and the
/// feed keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed JSON: {0}")]
    Json(String),
    #[error("invalid number {0:?}")]
    Number(String),
    #[error("unexpected message shape: {0}")]
    Shape(String),
    /// The exchange answered with an error payload.
    #[error("exchange error: {0}")]
    Upstream(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(value: serde_json::Error) -> Self {
        ParseError::Json(value.to_string())
    }
}

/// Failure to create a connector for a (token, exchange) pair.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("invalid endpoint for {exchange}: {reason}")]
    InvalidEndpoint { exchange: String, reason: String },
    #[error("no capacity left for a connector to {exchange} ({token})")]
    Exhausted { exchange: String, token: String },
}

/// A viewer command that was refused. Reported only to the issuing viewer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandRejected {
    #[error("malformed command: {0}")]
    Malformed(String),
    #[error("invalid token {0:?}")]
    InvalidToken(String),
    #[error("unknown token {0}")]
    UnknownToken(String),
    #[error("exchange {0} already exists")]
    DuplicateExchange(String),
    #[error("unknown exchange {0}")]
    UnknownExchange(String),
    #[error("invalid exchange: {0}")]
    InvalidExchange(String),
}

/// Failure to load the settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse settings: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}
