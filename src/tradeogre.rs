//! TradeOgre HTTP exchange adapter. The order endpoint returns each side as
//! a map from price to amount.

use std::collections::HashMap;
use serde::Deserialize;

use crate::core::*;
use crate::error::ParseError;
use crate::exchange::{BookUpdateReader, Endpoint, ExchangeSource};
use crate::generic::expand_template;


const TRADEOGRE_ENDPOINT_TEMPLATE: &str = "$URL/orders/$TOKEN-$QUOTE";


pub struct TradeOgreSource;

impl ExchangeSource for TradeOgreSource {
    fn kind(&self) -> TransportKind {
        TransportKind::Polled
    }

    fn endpoint(&self, exchange: &ExchangeConfig, pair: &CurrencyPair) -> Endpoint {
        let template = exchange.options.endpoint_template.as_deref().unwrap_or(TRADEOGRE_ENDPOINT_TEMPLATE);
        Endpoint::Polled { url: expand_template(template, &exchange.url, pair) }
    }

    fn make_book_update_reader(&self, _pair: &CurrencyPair) -> Box<dyn BookUpdateReader> {
        Box::new(TradeOgreBookUpdateReader)
    }
}

struct TradeOgreBookUpdateReader;

#[derive(Deserialize, Debug)]
struct TradeOgreOrders {
    success: bool,
    error: Option<String>,
    #[serde(default)]
    buy: HashMap<String, RawDecimal>,
    #[serde(default)]
    sell: HashMap<String, RawDecimal>,
}

fn read_side(side: &HashMap<String, RawDecimal>) -> Result<Vec<PriceLevel>, ParseError> {
    let raw: Vec<RawLevel> = side.iter()
        .map(|(price, amount)| RawLevel::Seq(vec![RawDecimal::from(price.as_str()), amount.clone()]))
        .collect();
    read_levels(&raw)
}

impl BookUpdateReader for TradeOgreBookUpdateReader {
    fn read_book_update(&mut self, raw: &str) -> Result<Option<BookUpdate>, ParseError> {
        let orders: TradeOgreOrders = serde_json::from_str(raw)?;
        if !orders.success {
            return Err(ParseError::Upstream(orders.error.unwrap_or_else(|| "request failed".to_string())));
        }
        Ok(Some(BookUpdate {
            bids: read_side(&orders.buy)?,
            asks: read_side(&orders.sell)?,
        }))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_convert_tradeogre_orders() {
        let raw = r#"{"success":true,"buy":{"158.10":"1.5","157.00":"0.00000000","158.50":"2"},"sell":{"159.00":"3","160.25":"1"}}"#;
        let update = TradeOgreBookUpdateReader.read_book_update(raw).unwrap().unwrap();
        assert_eq!(update.bids.len(), 2);
        let book = CanonicalOrderBook::new(update, Instant::now());
        assert_eq!(book.best_bid().unwrap().to_string(), "158.50");
        assert_eq!(book.best_ask().unwrap().to_string(), "159.00");
    }

    #[test]
    fn test_tradeogre_failure() {
        let raw = r#"{"success":false,"error":"Market not found"}"#;
        assert_eq!(
            TradeOgreBookUpdateReader.read_book_update(raw),
            Err(ParseError::Upstream("Market not found".to_string()))
        );
    }

    #[test]
    fn test_tradeogre_template() {
        let mut exchange = ExchangeConfig::new("TradeOgre", "https://tradeogre.com/api/v1/", TransportKind::Polled);
        exchange.options.endpoint_template = Some("$URL/orders/$TOKEN-BTC".to_string());
        assert_eq!(
            TradeOgreSource.endpoint(&exchange, &exchange.pair("XMR")),
            Endpoint::Polled { url: "https://tradeogre.com/api/v1/orders/XMR-BTC".to_string() }
        );
    }
}
