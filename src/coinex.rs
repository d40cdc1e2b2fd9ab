//! CoinEx WebSocket exchange adapter. The feed sends a full book followed by
//! incremental diffs, merged here into a [LocalBook].

use serde::Deserialize;
use serde_json::Value;

use crate::core::*;
use crate::depth::LocalBook;
use crate::error::ParseError;
use crate::exchange::{BookUpdateReader, Endpoint, ExchangeSource};


const COINEX_DEPTH_LEVELS: usize = 50;
const COINEX_PING: &str = r#"{"method":"server.ping","params":[],"id":2}"#;


pub struct CoinexSource;

impl ExchangeSource for CoinexSource {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    fn endpoint(&self, exchange: &ExchangeConfig, pair: &CurrencyPair) -> Endpoint {
        let subscribe_message = format!(
            r#"{{"method":"depth.subscribe","params":["{}",{},"0",true],"id":1}}"#,
            pair, COINEX_DEPTH_LEVELS
        );
        Endpoint::Streaming {
            ws_url: exchange.url.clone(),
            subscribe_messages: vec![subscribe_message],
            keepalive_message: Some(COINEX_PING.to_string()),
        }
    }

    fn make_book_update_reader(&self, pair: &CurrencyPair) -> Box<dyn BookUpdateReader> {
        Box::new(CoinexBookUpdateReader { market: pair.to_string(), book: LocalBook::new() })
    }
}

struct CoinexBookUpdateReader {
    market: String,
    book: LocalBook,
}

/// Every CoinEx frame: either a server push (`method` + `params`) or a reply
/// to one of our requests (`result` / `error`).
#[derive(Deserialize, Debug)]
struct CoinexMessage {
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    error: Value,
}

#[derive(Deserialize, Debug)]
struct CoinexDepth {
    #[serde(default)]
    asks: Vec<RawLevel>,
    #[serde(default)]
    bids: Vec<RawLevel>,
}

impl BookUpdateReader for CoinexBookUpdateReader {
    fn read_book_update(&mut self, raw: &str) -> Result<Option<BookUpdate>, ParseError> {
        let message: CoinexMessage = serde_json::from_str(raw)?;
        match message.method.as_deref() {
            Some("depth.update") => {
                let (clean, depth, market): (bool, CoinexDepth, String) = serde_json::from_value(message.params)?;
                if market != self.market {
                    return Ok(None);
                }
                if clean {
                    self.book.replace(&depth.bids, &depth.asks)?;
                } else {
                    self.book.apply_diff(&depth.bids, &depth.asks)?;
                }
                Ok(Some(self.book.to_update()))
            },
            Some(_) => Ok(None),
            None if message.error.is_null() => Ok(None),
            None => Err(ParseError::Upstream(message.error.to_string())),
        }
    }

    fn reset(&mut self) {
        self.book.clear();
    }
}
