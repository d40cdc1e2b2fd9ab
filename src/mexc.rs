//! MEXC WebSocket exchange adapter for limited-depth book snapshots.

use log::debug;
use serde::Deserialize;

use crate::core::*;
use crate::error::ParseError;
use crate::exchange::{BookUpdateReader, Endpoint, ExchangeSource};


const MEXC_DEPTH_CHANNEL: &str = "spot@public.limit.depth.v3.api";
const MEXC_DEPTH_LEVELS: usize = 20;
const MEXC_PING: &str = r#"{"method":"PING"}"#;


/// MEXC implementation of the exchange adapter [ExchangeSource].
pub struct MexcSource;

impl ExchangeSource for MexcSource {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    fn endpoint(&self, exchange: &ExchangeConfig, pair: &CurrencyPair) -> Endpoint {
        let subscribe_message = format!(
            r#"{{"method":"SUBSCRIPTION","params":["{}@{}@{}"]}}"#,
            MEXC_DEPTH_CHANNEL, pair, MEXC_DEPTH_LEVELS
        );
        Endpoint::Streaming {
            ws_url: exchange.url.clone(),
            subscribe_messages: vec![subscribe_message],
            keepalive_message: Some(MEXC_PING.to_string()),
        }
    }

    fn make_book_update_reader(&self, pair: &CurrencyPair) -> Box<dyn BookUpdateReader> {
        Box::new(MexcBookUpdateReader { symbol: pair.to_string() })
    }
}

/// MEXC implementation of the message parser [BookUpdateReader].
struct MexcBookUpdateReader {
    symbol: String,
}

impl BookUpdateReader for MexcBookUpdateReader {
    fn read_book_update(&mut self, raw: &str) -> Result<Option<BookUpdate>, ParseError> {
        match serde_json::from_str::<MexcMessage>(raw)? {
            MexcMessage::Depth(depth) if depth.symbol == self.symbol => Ok(Some(depth.try_into()?)),
            MexcMessage::Depth(depth) => {
                debug!("Ignoring MEXC depth for {}", depth.symbol);
                Ok(None)
            },
            MexcMessage::Reply(reply) if reply.code == 0 => Ok(None),
            MexcMessage::Reply(reply) => Err(ParseError::Upstream(format!("{} ({})", reply.msg, reply.code))),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum MexcMessage {
    Depth(MexcDepth),
    Reply(MexcReply),
}

#[derive(Deserialize, Debug)]
struct MexcDepth {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "d")]
    data: MexcDepthData,
}

#[derive(Deserialize, Debug)]
struct MexcDepthData {
    #[serde(default)]
    asks: Vec<MexcLevel>,
    #[serde(default)]
    bids: Vec<MexcLevel>,
}

#[derive(Deserialize, Debug)]
struct MexcLevel {
    #[serde(rename = "p")]
    price: RawDecimal,
    #[serde(rename = "v")]
    volume: RawDecimal,
}

/// Subscription acknowledgements, pongs and errors.
#[derive(Deserialize, Debug)]
struct MexcReply {
    code: i64,
    msg: String,
}

fn read_mexc_levels(levels: Vec<MexcLevel>) -> Result<Vec<PriceLevel>, ParseError> {
    let raw: Vec<RawLevel> = levels.into_iter()
        .map(|level| RawLevel::Seq(vec![level.price, level.volume]))
        .collect();
    read_levels(&raw)
}

impl TryFrom<MexcDepth> for BookUpdate {
    type Error = ParseError;

    fn try_from(value: MexcDepth) -> Result<Self, Self::Error> {
        Ok(Self {
            bids: read_mexc_levels(value.data.bids)?,
            asks: read_mexc_levels(value.data.asks)?,
        })
    }
}
