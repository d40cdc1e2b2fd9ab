//! Adapter for exchanges without a dedicated module. Both transports expect
//! full snapshots shaped as `{"asks": [[price, size], ...], "bids": [...]}`.

use serde::Deserialize;

use crate::core::*;
use crate::error::ParseError;
use crate::exchange::{BookUpdateReader, Endpoint, ExchangeSource};


const DEFAULT_ENDPOINT_TEMPLATE: &str = "$URL/$TOKEN-$QUOTE";


/// Expand `$URL`, `$TOKEN` and `$QUOTE` in an endpoint or message template.
pub fn expand_template(template: &str, url: &str, pair: &CurrencyPair) -> String {
    template
        .replace("$URL", url.trim_end_matches('/'))
        .replace("$TOKEN", &pair.main)
        .replace("$QUOTE", &pair.counter)
}

pub struct GenericSource {
    kind: TransportKind,
}

impl GenericSource {
    pub fn new(kind: TransportKind) -> Self {
        Self { kind }
    }
}

impl ExchangeSource for GenericSource {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn endpoint(&self, exchange: &ExchangeConfig, pair: &CurrencyPair) -> Endpoint {
        match self.kind {
            TransportKind::Streaming => Endpoint::Streaming {
                ws_url: expand_template(&exchange.url, &exchange.url, pair),
                subscribe_messages: exchange.options.subscribe_template.iter()
                    .map(|template| expand_template(template, &exchange.url, pair))
                    .collect(),
                keepalive_message: None,
            },
            TransportKind::Polled => {
                let template = exchange.options.endpoint_template.as_deref().unwrap_or(DEFAULT_ENDPOINT_TEMPLATE);
                Endpoint::Polled { url: expand_template(template, &exchange.url, pair) }
            },
        }
    }

    fn make_book_update_reader(&self, _pair: &CurrencyPair) -> Box<dyn BookUpdateReader> {
        Box::new(GenericBookUpdateReader)
    }
}

struct GenericBookUpdateReader;

/// Snapshot fields may sit at the top level or under `data`.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum GenericMessage {
    Book(GenericBook),
    Wrapped { data: GenericBook },
    Other(serde_json::Value),
}

#[derive(Deserialize, Debug)]
struct GenericBook {
    asks: Vec<RawLevel>,
    bids: Vec<RawLevel>,
}

impl BookUpdateReader for GenericBookUpdateReader {
    fn read_book_update(&mut self, raw: &str) -> Result<Option<BookUpdate>, ParseError> {
        let book = match serde_json::from_str::<GenericMessage>(raw)? {
            GenericMessage::Book(book) | GenericMessage::Wrapped { data: book } => book,
            GenericMessage::Other(value) if value.is_object() => return Ok(None),
            GenericMessage::Other(value) => return Err(ParseError::Shape(format!("expected an object, got {}", value))),
        };
        Ok(Some(BookUpdate {
            bids: read_levels(&book.bids)?,
            asks: read_levels(&book.asks)?,
        }))
    }
}
