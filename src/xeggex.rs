//! Xeggex JSON-RPC WebSocket exchange adapter.

use serde::Deserialize;
use serde_json::Value;

use crate::core::*;
use crate::depth::LocalBook;
use crate::error::ParseError;
use crate::exchange::{BookUpdateReader, Endpoint, ExchangeSource};


const XEGGEX_PING: &str = r#"{"jsonrpc":"2.0","method":"ping","params":{},"id":2}"#;


pub struct XeggexSource;

impl ExchangeSource for XeggexSource {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    fn endpoint(&self, exchange: &ExchangeConfig, pair: &CurrencyPair) -> Endpoint {
        let subscribe_message = format!(
            r#"{{"jsonrpc":"2.0","method":"subscribeOrderbook","params":{{"symbol":"{}"}},"id":1}}"#,
            pair.joined("/")
        );
        Endpoint::Streaming {
            ws_url: exchange.url.clone(),
            subscribe_messages: vec![subscribe_message],
            keepalive_message: Some(XEGGEX_PING.to_string()),
        }
    }

    fn make_book_update_reader(&self, pair: &CurrencyPair) -> Box<dyn BookUpdateReader> {
        Box::new(XeggexBookUpdateReader { symbol: pair.joined("/"), book: LocalBook::new(), has_snapshot: false })
    }
}

/// Keeps the book from `snapshotOrderbook` and applies `updateOrderbook`
/// diffs. Diffs arriving before any snapshot are ignored.
struct XeggexBookUpdateReader {
    symbol: String,
    book: LocalBook,
    has_snapshot: bool,
}

#[derive(Deserialize, Debug)]
struct XeggexMessage {
    method: Option<String>,
    params: Option<XeggexBook>,
    #[serde(default)]
    error: Value,
}

#[derive(Deserialize, Debug)]
struct XeggexBook {
    symbol: String,
    #[serde(default)]
    asks: Vec<RawLevel>,
    #[serde(default)]
    bids: Vec<RawLevel>,
}

impl BookUpdateReader for XeggexBookUpdateReader {
    fn read_book_update(&mut self, raw: &str) -> Result<Option<BookUpdate>, ParseError> {
        let message: XeggexMessage = serde_json::from_str(raw)?;
        if !message.error.is_null() {
            return Err(ParseError::Upstream(message.error.to_string()));
        }
        let method = match message.method.as_deref() {
            Some(method @ ("snapshotOrderbook" | "updateOrderbook" | "orderbookUpdate")) => method,
            _ => return Ok(None),
        };
        let book = message.params
            .ok_or_else(|| ParseError::Shape(format!("{} without params", method)))?;
        if book.symbol != self.symbol {
            return Ok(None);
        }
        if method == "snapshotOrderbook" {
            self.book.replace(&book.bids, &book.asks)?;
            self.has_snapshot = true;
        } else if self.has_snapshot {
            self.book.apply_diff(&book.bids, &book.asks)?;
        } else {
            return Ok(None);
        }
        Ok(Some(self.book.to_update()))
    }

    fn reset(&mut self) {
        self.book.clear();
        self.has_snapshot = false;
    }
}
