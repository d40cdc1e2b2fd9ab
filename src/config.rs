//! Settings read once at start-up from a JSON file. Every field is optional;
//! missing ones take the defaults below.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::core::{normalize_token, ExchangeConfig, TransportKind};
use crate::error::ConfigError;
use crate::supervisor::BackoffPolicy;


const DEFAULT_LISTEN: &str = "127.0.0.1:8000";
const DEFAULT_TOKENS: [&str; 5] = ["BTC", "ETH", "XMR", "SOL", "DOGE"];


#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the viewer WebSocket server binds to.
    pub listen: String,
    pub tokens: Vec<String>,
    pub exchanges: Vec<ExchangeConfig>,
    pub backoff: BackoffPolicy,
    pub sessions: SessionSettings,
    pub feeds: FeedSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            tokens: DEFAULT_TOKENS.iter().map(|token| token.to_string()).collect(),
            exchanges: vec![
                ExchangeConfig::new("MEXC", "wss://wbs.mexc.com/ws", TransportKind::Streaming),
                ExchangeConfig::new("CoinEx", "wss://socket.coinex.com/", TransportKind::Streaming),
                ExchangeConfig::new("TradeOgre", "https://tradeogre.com/api/v1", TransportKind::Polled),
            ],
            backoff: BackoffPolicy::default(),
            sessions: SessionSettings::default(),
            feeds: FeedSettings::default(),
        }
    }
}

impl Settings {
    /// Read and validate a settings file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(text)?;
        settings.validated()
    }

    /// Normalize token symbols, drop repeated ones and reject exchanges that
    /// cannot be told apart.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        let mut tokens = Vec::with_capacity(self.tokens.len());
        for raw in &self.tokens {
            let token = normalize_token(raw)
                .ok_or_else(|| ConfigError::Invalid(format!("invalid token {:?}", raw)))?;
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        self.tokens = tokens;
        let mut names = HashSet::new();
        for exchange in &self.exchanges {
            if exchange.name.trim().is_empty() || exchange.url.trim().is_empty() {
                return Err(ConfigError::Invalid("exchange without name or url".to_string()));
            }
            if !names.insert(exchange.name.as_str()) {
                return Err(ConfigError::Invalid(format!("exchange {} configured twice", exchange.name)));
            }
        }
        if self.backoff.growth < 1.0 || self.backoff.base_delay_ms == 0 {
            return Err(ConfigError::Invalid("backoff must not shrink".to_string()));
        }
        if self.sessions.queue_capacity == 0 {
            return Err(ConfigError::Invalid("session queue capacity must be positive".to_string()));
        }
        Ok(self)
    }
}

/// Viewer session limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Frames queued per viewer before the oldest is dropped.
    pub queue_capacity: usize,
    /// Consecutive drops after which a viewer is disconnected.
    pub max_overflows: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { queue_capacity: 256, max_overflows: 64 }
    }
}

/// Upstream feed timings shared by every exchange unless overridden in
/// [ExchangeOptions](crate::core::ExchangeOptions).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub poll_interval_ms: u64,
    pub keepalive_ms: u64,
    pub idle_timeout_ms: u64,
    pub http_timeout_ms: u64,
    /// Upper bound on concurrently running connectors.
    pub max_connectors: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            keepalive_ms: 30_000,
            idle_timeout_ms: 60_000,
            http_timeout_ms: 10_000,
            max_connectors: 512,
        }
    }
}

impl FeedSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let settings = Settings::from_json("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.tokens, vec!["BTC", "ETH", "XMR", "SOL", "DOGE"]);
        assert_eq!(settings.exchanges[2].kind, TransportKind::Polled);
        assert_eq!(settings.backoff.base_delay_ms, 2000);
        assert_eq!(settings.sessions.queue_capacity, 256);
    }

    #[test]
    fn test_partial_settings() {
        let text = r#"{
            "listen": "0.0.0.0:9000",
            "tokens": [" eth", "ETH", "xmr"],
            "exchanges": [
                {"name": "Ex1", "url": "wss://feed.example.com", "type": "websocket"},
                {"name": "Ex2", "url": "https://api.example.com", "kind": "http",
                 "options": {"poll_interval_ms": 1000, "endpoint_template": "$URL/book/$TOKEN"}}
            ],
            "backoff": {"max_delay_ms": 10000},
            "feeds": {"idle_timeout_ms": 5000}
        }"#;
        let settings = Settings::from_json(text).unwrap();
        assert_eq!(settings.listen, "0.0.0.0:9000");
        assert_eq!(settings.tokens, vec!["ETH", "XMR"]);
        assert_eq!(settings.exchanges[0].kind, TransportKind::Streaming);
        assert_eq!(settings.exchanges[1].kind, TransportKind::Polled);
        assert_eq!(settings.exchanges[1].options.poll_interval_ms, Some(1000));
        assert_eq!(settings.backoff.max_delay_ms, 10_000);
        assert_eq!(settings.backoff.base_delay_ms, 2000);
        assert_eq!(settings.feeds.idle_timeout(), Duration::from_secs(5));
        assert_eq!(settings.feeds.poll_interval_ms, 5000);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(matches!(Settings::from_json(r#"{"tokens": ["BTC/USDT"]}"#), Err(ConfigError::Invalid(_))));
        let duplicate = r#"{"exchanges": [
            {"name": "Ex1", "url": "wss://a"},
            {"name": "Ex1", "url": "wss://b"}
        ]}"#;
        assert!(matches!(Settings::from_json(duplicate), Err(ConfigError::Invalid(_))));
        assert!(matches!(Settings::from_json("{"), Err(ConfigError::Json(_))));
        assert!(matches!(Settings::load(Path::new("/nonexistent/relay.json")), Err(ConfigError::Io(_))));
    }
}
