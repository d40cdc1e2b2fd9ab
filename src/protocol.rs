//! JSON frames exchanged with viewers. Server frames are tagged by `type`,
//! viewer commands by `action`.

use std::collections::BTreeMap;
use std::sync::Arc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::*;
use crate::error::CommandRejected;
use crate::supervisor::SupervisorState;


/// One side of a book on the wire: `[[price, size], ...]`.
pub type WireLevels = Vec<[String; 2]>;

fn wire_price(price: Option<Decimal>) -> String {
    price.map_or_else(|| NO_DATA.to_string(), |price| price.to_string())
}

fn wire_levels(levels: &[PriceLevel]) -> WireLevels {
    levels.iter().map(|level| [level.price.to_string(), level.size.to_string()]).collect()
}

/// A book as shown to viewers. Prices keep the exchange's scale.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BookView {
    pub best_sell: String,
    pub best_buy: String,
    pub sell: WireLevels,
    pub buy: WireLevels,
}

impl BookView {
    /// A configured pair that has not produced a book yet.
    pub fn no_data() -> Self {
        Self {
            best_sell: NO_DATA.to_string(),
            best_buy: NO_DATA.to_string(),
            sell: Vec::new(),
            buy: Vec::new(),
        }
    }
}

impl From<&CanonicalOrderBook> for BookView {
    fn from(book: &CanonicalOrderBook) -> Self {
        Self {
            best_sell: wire_price(book.best_ask()),
            best_buy: wire_price(book.best_bid()),
            sell: wire_levels(book.asks()),
            buy: wire_levels(book.bids()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDescriptor {
    pub name: String,
    pub url: String,
    pub kind: TransportKind,
}

impl From<&ExchangeConfig> for ExchangeDescriptor {
    fn from(exchange: &ExchangeConfig) -> Self {
        Self { name: exchange.name.clone(), url: exchange.url.clone(), kind: exchange.kind }
    }
}

/// Frames sent to viewers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    InitialData {
        tokens: Vec<String>,
        exchanges: Vec<ExchangeDescriptor>,
        orderbooks: BTreeMap<String, BTreeMap<String, BookView>>,
    },
    OrderbookUpdate {
        exchange: String,
        token: String,
        best_sell: String,
        best_buy: String,
        sell: WireLevels,
        buy: WireLevels,
    },
    TokenAdded {
        token: String,
    },
    TokenRemoved {
        token: String,
    },
    ExchangeAdded {
        exchange: ExchangeDescriptor,
    },
    ExchangeRemoved {
        exchange: String,
    },
    ExchangeStatus {
        exchange: String,
        token: String,
        state: SupervisorState,
    },
    OrderbooksCleared {},
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn orderbook_update(token: &str, exchange: &str, book: &CanonicalOrderBook) -> Self {
        let view = BookView::from(book);
        ServerMessage::OrderbookUpdate {
            exchange: exchange.to_string(),
            token: token.to_string(),
            best_sell: view.best_sell,
            best_buy: view.best_buy,
            sell: view.sell,
            buy: view.buy,
        }
    }

    pub fn error(rejected: &CommandRejected) -> Self {
        ServerMessage::Error { message: rejected.to_string() }
    }

    /// Serialize once for fan-out to many sessions.
    pub fn to_frame(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

/// Commands sent by viewers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ViewerCommand {
    AddToken {
        token: String,
    },
    RemoveToken {
        token: String,
    },
    AddExchange {
        exchange: String,
        url: String,
        #[serde(rename = "type", alias = "kind", default)]
        kind: TransportKind,
    },
    RemoveExchange {
        exchange: String,
    },
    UpdatePrices {
        #[serde(default)]
        exchange: Option<String>,
    },
    Clear {},
    /// Restrict `orderbook_update` frames to some tokens and exchanges;
    /// an empty list means all of them.
    Subscribe {
        #[serde(default)]
        tokens: Vec<String>,
        #[serde(default)]
        exchanges: Vec<String>,
    },
}

impl ViewerCommand {
    pub fn parse(text: &str) -> Result<Self, CommandRejected> {
        serde_json::from_str(text).map_err(|error| CommandRejected::Malformed(error.to_string()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    fn book() -> CanonicalOrderBook {
        CanonicalOrderBook::new(
            BookUpdate {
                asks: vec![PriceLevel::from_strs("2000.5", "1.25").unwrap().unwrap()],
                bids: vec![],
            },
            Instant::now(),
        )
    }

    #[test]
    fn test_orderbook_update_frame() {
        let frame = ServerMessage::orderbook_update("ETH", "Ex1", &book()).to_frame().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({
            "type": "orderbook_update",
            "exchange": "Ex1",
            "token": "ETH",
            "best_sell": "2000.5",
            "best_buy": "X X X",
            "sell": [["2000.5", "1.25"]],
            "buy": [],
        }));
    }

    #[test]
    fn test_lifecycle_frames() {
        let exchange = ExchangeConfig::new("TradeOgre", "https://tradeogre.com/api/v1", TransportKind::Polled);
        let added = serde_json::to_value(ServerMessage::ExchangeAdded { exchange: (&exchange).into() }).unwrap();
        assert_eq!(added, json!({
            "type": "exchange_added",
            "exchange": {"name": "TradeOgre", "url": "https://tradeogre.com/api/v1", "kind": "polled"},
        }));
        let cleared = serde_json::to_value(ServerMessage::OrderbooksCleared {}).unwrap();
        assert_eq!(cleared, json!({"type": "orderbooks_cleared"}));
        let status = serde_json::to_value(ServerMessage::ExchangeStatus {
            exchange: "Ex1".to_string(),
            token: "BTC".to_string(),
            state: SupervisorState::BackingOff,
        }).unwrap();
        assert_eq!(status["state"], "backing_off");
        let error = ServerMessage::error(&CommandRejected::UnknownToken("DOGE".to_string()));
        assert_eq!(serde_json::to_value(error).unwrap(), json!({"type": "error", "message": "unknown token DOGE"}));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ViewerCommand::parse(r#"{"action":"add_token","token":"btc"}"#),
            Ok(ViewerCommand::AddToken { token: "btc".to_string() })
        );
        assert_eq!(
            ViewerCommand::parse(r#"{"action":"add_exchange","exchange":"Ex1","url":"https://ex1","type":"http"}"#),
            Ok(ViewerCommand::AddExchange {
                exchange: "Ex1".to_string(),
                url: "https://ex1".to_string(),
                kind: TransportKind::Polled,
            })
        );
        assert_eq!(
            ViewerCommand::parse(r#"{"action":"update_prices"}"#),
            Ok(ViewerCommand::UpdatePrices { exchange: None })
        );
        assert_eq!(ViewerCommand::parse(r#"{"action":"clear"}"#), Ok(ViewerCommand::Clear {}));
        assert_eq!(
            ViewerCommand::parse(r#"{"action":"subscribe","tokens":["ETH"]}"#),
            Ok(ViewerCommand::Subscribe { tokens: vec!["ETH".to_string()], exchanges: vec![] })
        );
    }

    #[test]
    fn test_malformed_commands() {
        for text in [r#"{"action":"sell_everything"}"#, r#"{"token":"BTC"}"#, "add_token BTC", r#"{"action":"add_token"}"#] {
            assert!(matches!(ViewerCommand::parse(text), Err(CommandRejected::Malformed(_))));
        }
    }
}
