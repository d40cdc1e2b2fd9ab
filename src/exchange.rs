//! Common functionalities to build exchange connectors: an exchange-specific
//! [source](ExchangeSource) describes the endpoint and the message parser, a
//! [transport](crate::transport::Transport) moves the bytes, and
//! [ExchangeConnector] drives both.

use async_trait::async_trait;
use log::debug;
use reqwest::Url;
use std::time::{Duration, Instant};

use crate::core::*;
use crate::config::FeedSettings;
use crate::error::{ConnectorError, FeedError, ParseError};
use crate::transport::{Keepalive, PollTransport, Transport, WsTransport};
use crate::{coinex::CoinexSource, generic::GenericSource, mexc::MexcSource, tradeogre::TradeOgreSource, xeggex::XeggexSource};


/// Exchange-specific parser turning a raw upstream message into a
/// [BookUpdate]. Readers for diff-based feeds keep a local book between calls.
pub trait BookUpdateReader: Send {
    /// `Ok(None)` for messages that carry no book data (acks, pongs).
    fn read_book_update(&mut self, raw: &str) -> Result<Option<BookUpdate>, ParseError>;

    /// Forget any state accumulated from a previous connection.
    fn reset(&mut self) {}
}

/// Where and how to reach an exchange for one pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Streaming {
        ws_url: String,
        subscribe_messages: Vec<String>,
        keepalive_message: Option<String>,
    },
    Polled {
        url: String,
    },
}

/// Everything exchange-specific about a connector.
pub trait ExchangeSource: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn endpoint(&self, exchange: &ExchangeConfig, pair: &CurrencyPair) -> Endpoint;

    fn make_book_update_reader(&self, pair: &CurrencyPair) -> Box<dyn BookUpdateReader>;
}

/// Live feed for one (token, exchange) pair, as driven by a
/// [supervisor](crate::supervisor::ReconnectSupervisor).
#[async_trait]
pub trait Connector: Send {
    fn exchange(&self) -> &str;

    fn token(&self) -> &str;

    fn kind(&self) -> TransportKind;

    /// Open the upstream feed.
    async fn start(&mut self) -> Result<(), FeedError>;

    /// Next raw upstream message. Cancel-safe.
    async fn next_raw(&mut self) -> Result<String, FeedError>;

    /// Parse a raw message into a canonical book, `Ok(None)` for control messages.
    fn normalize(&mut self, raw: &str) -> Result<Option<CanonicalOrderBook>, ParseError>;

    /// Request an out-of-cycle fetch; `false` when the feed is continuous.
    fn refresh(&mut self) -> bool;

    /// Release the transport. Idempotent.
    async fn stop(&mut self);
}

/// Builds connectors for configured exchanges.
pub trait ConnectorFactory: Send + Sync {
    fn make_connector(&self, exchange: &ExchangeConfig, token: &str) -> Result<Box<dyn Connector>, ConnectorError>;

    /// Check an exchange before it is added, independently of any token.
    fn validate(&self, _exchange: &ExchangeConfig) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Generic connector: a transport strategy plus an exchange parser.
pub struct ExchangeConnector {
    exchange: String,
    token: String,
    kind: TransportKind,
    transport: Box<dyn Transport>,
    book_update_reader: Box<dyn BookUpdateReader>,
}

impl ExchangeConnector {
    pub fn new(
            exchange: String,
            token: String,
            kind: TransportKind,
            transport: Box<dyn Transport>,
            book_update_reader: Box<dyn BookUpdateReader>) -> Self {
        Self { exchange, token, kind, transport, book_update_reader }
    }
}

#[async_trait]
impl Connector for ExchangeConnector {
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
        self.book_update_reader.reset();
        self.transport.open().await
    }

    async fn next_raw(&mut self) -> Result<String, FeedError> {
        self.transport.recv().await
    }

    fn normalize(&mut self, raw: &str) -> Result<Option<CanonicalOrderBook>, ParseError> {
        let update = self.book_update_reader.read_book_update(raw)?;
        Ok(update.map(|update| CanonicalOrderBook::new(update, Instant::now())))
    }

    fn refresh(&mut self) -> bool {
        self.transport.refresh()
    }

    async fn stop(&mut self) {
        self.transport.close().await;
    }
}

/// The exchanges this relay knows how to talk to. Unknown names, or known
/// names configured with another transport kind, use the
/// [generic](crate::generic) format.
pub struct ExchangeCatalog {
    feeds: FeedSettings,
}

impl ExchangeCatalog {
    pub fn new(feeds: FeedSettings) -> Self {
        Self { feeds }
    }

    pub fn source_for(exchange: &ExchangeConfig) -> Box<dyn ExchangeSource> {
        let known: Option<Box<dyn ExchangeSource>> = match exchange.name.to_lowercase().as_str() {
            "mexc" => Some(Box::new(MexcSource)),
            "coinex" => Some(Box::new(CoinexSource)),
            "xeggex" => Some(Box::new(XeggexSource)),
            "tradeogre" => Some(Box::new(TradeOgreSource)),
            _ => None,
        };
        match known {
            Some(source) if source.kind() == exchange.kind => source,
            _ => Box::new(GenericSource::new(exchange.kind)),
        }
    }

    fn check_url(exchange: &ExchangeConfig, url: &str) -> Result<(), ConnectorError> {
        let invalid = |reason: String| ConnectorError::InvalidEndpoint { exchange: exchange.name.clone(), reason };
        let parsed = Url::parse(url).map_err(|error| invalid(format!("{}: {}", url, error)))?;
        let schemes: &[&str] = match exchange.kind {
            TransportKind::Streaming => &["ws", "wss"],
            TransportKind::Polled => &["http", "https"],
        };
        if schemes.contains(&parsed.scheme()) {
            Ok(())
        } else {
            Err(invalid(format!("scheme {} not usable for a {} exchange", parsed.scheme(), exchange.kind)))
        }
    }
}

impl ConnectorFactory for ExchangeCatalog {
    fn validate(&self, exchange: &ExchangeConfig) -> Result<(), ConnectorError> {
        Self::check_url(exchange, &exchange.url)
    }

    fn make_connector(&self, exchange: &ExchangeConfig, token: &str) -> Result<Box<dyn Connector>, ConnectorError> {
        let source = Self::source_for(exchange);
        let pair = exchange.pair(token);
        let transport: Box<dyn Transport> = match source.endpoint(exchange, &pair) {
            Endpoint::Streaming { ws_url, subscribe_messages, keepalive_message } => {
                Self::check_url(exchange, &ws_url)?;
                let interval = Duration::from_millis(exchange.options.keepalive_ms.unwrap_or(self.feeds.keepalive_ms));
                let keepalive = keepalive_message.map(|message| Keepalive { interval, message });
                Box::new(WsTransport::new(ws_url, subscribe_messages, keepalive, self.feeds.idle_timeout()))
            },
            Endpoint::Polled { url } => {
                Self::check_url(exchange, &url)?;
                let interval = Duration::from_millis(exchange.options.poll_interval_ms.unwrap_or(self.feeds.poll_interval_ms));
                Box::new(PollTransport::new(url, interval, self.feeds.http_timeout()))
            },
        };
        debug!("Created {} connector for {} on {}", exchange.kind, token, exchange.name);
        Ok(Box::new(ExchangeConnector::new(
            exchange.name.clone(),
            token.to_string(),
            exchange.kind,
            transport,
            source.make_book_update_reader(&pair),
        )))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_exchange_sources() {
        let mexc = ExchangeConfig::new("MEXC", "wss://wbs.mexc.com/ws", TransportKind::Streaming);
        match ExchangeCatalog::source_for(&mexc).endpoint(&mexc, &mexc.pair("BTC")) {
            Endpoint::Streaming { subscribe_messages, .. } => {
                assert!(subscribe_messages[0].contains("BTCUSDT"));
            },
            other => panic!("unexpected endpoint {:?}", other),
        }
        let ogre = ExchangeConfig::new("TradeOgre", "https://tradeogre.com/api/v1", TransportKind::Polled);
        assert_eq!(
            ExchangeCatalog::source_for(&ogre).endpoint(&ogre, &ogre.pair("XMR")),
            Endpoint::Polled { url: "https://tradeogre.com/api/v1/orders/XMR-USDT".to_string() }
        );
    }

    #[test]
    fn test_kind_mismatch_falls_back_to_generic() {
        let exchange = ExchangeConfig::new("MEXC", "https://api.mexc.com", TransportKind::Polled);
        assert_eq!(
            ExchangeCatalog::source_for(&exchange).endpoint(&exchange, &exchange.pair("BTC")),
            Endpoint::Polled { url: "https://api.mexc.com/BTC-USDT".to_string() }
        );
    }

    #[test]
    fn test_make_connector_checks_url() {
        let catalog = ExchangeCatalog::new(FeedSettings::default());
        let bad_scheme = ExchangeConfig::new("Ex1", "https://example.com", TransportKind::Streaming);
        assert!(matches!(
            catalog.make_connector(&bad_scheme, "BTC"),
            Err(ConnectorError::InvalidEndpoint { .. })
        ));
        let not_a_url = ExchangeConfig::new("Ex1", "nowhere", TransportKind::Polled);
        assert!(catalog.make_connector(&not_a_url, "BTC").is_err());
        assert!(catalog.validate(&not_a_url).is_err());
        let good = ExchangeConfig::new("Ex1", "wss://example.com/ws", TransportKind::Streaming);
        let connector = catalog.make_connector(&good, "BTC").unwrap();
        assert_eq!(connector.exchange(), "Ex1");
        assert_eq!(connector.token(), "BTC");
        assert_eq!(connector.kind(), TransportKind::Streaming);
    }
}
