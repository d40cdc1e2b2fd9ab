//! Canonical order book types shared by the exchange connectors, the
//! [store](crate::store::OrderbookStore) and the [hub](crate::hub::BroadcastHub).

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;


/// Maximum number of price levels kept on each side of a book.
pub const NUM_LEVELS: usize = 50;

/// Wire value standing for "no data" on one side of a book.
pub const NO_DATA: &str = "X X X";

/// Quote currency used when an exchange does not configure one.
pub const DEFAULT_QUOTE: &str = "USDT";

const MAX_TOKEN_LEN: usize = 16;


/// Side of a trading book. Asks are ranked from the lowest price,
/// bids from the highest.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Order of two prices on this side, best first.
    pub fn rank(&self, price_a: Decimal, price_b: Decimal) -> Ordering {
        match self {
            Side::Ask => price_a.cmp(&price_b),
            Side::Bid => price_b.cmp(&price_a),
        }
    }
}

/// How a connector obtains data from an exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// A persistent WebSocket feed.
    #[default]
    #[serde(alias = "websocket", alias = "ws")]
    Streaming,
    /// Fixed-interval HTTP requests.
    #[serde(alias = "http", alias = "rest")]
    Polled,
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Streaming => write!(f, "streaming"),
            TransportKind::Polled => write!(f, "polled"),
        }
    }
}

/// Optional per-exchange tuning read from the settings file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeOptions {
    /// Quote currency of the traded pairs, `USDT` when absent.
    pub quote: Option<String>,
    /// URL template for polled exchanges, with `$URL` and `$TOKEN` placeholders.
    pub endpoint_template: Option<String>,
    /// Subscription message template for generic streaming exchanges.
    pub subscribe_template: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub keepalive_ms: Option<u64>,
}

/// A configured exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    pub url: String,
    #[serde(alias = "type", default)]
    pub kind: TransportKind,
    #[serde(default)]
    pub options: ExchangeOptions,
}

impl ExchangeConfig {
    pub fn new(name: &str, url: &str, kind: TransportKind) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            kind,
            options: ExchangeOptions::default(),
        }
    }

    /// The traded pair for `token` on this exchange.
    pub fn pair(&self, token: &str) -> CurrencyPair {
        CurrencyPair {
            main: token.to_string(),
            counter: self.options.quote.clone().unwrap_or_else(|| DEFAULT_QUOTE.to_string()),
        }
    }
}

/// A traded pair, e.g. `BTC` against `USDT`.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct CurrencyPair {
    pub main: String,
    pub counter: String,
}

impl CurrencyPair {
    /// Pair code with a separator between the two currencies, e.g. `BTC/USDT`.
    pub fn joined(&self, separator: &str) -> String {
        format!("{}{}{}", self.main, separator, self.counter)
    }
}

impl Display for CurrencyPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.main, self.counter)
    }
}

/// Normalize a token symbol typed by a viewer or read from settings.
///
/// Returns [None] when the symbol is empty, too long or not alphanumeric.
pub fn normalize_token(raw: &str) -> Option<String> {
    let token = raw.trim().to_uppercase();
    let valid = !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(token)
}

/// A number as it appears in exchange payloads: a string, a JSON number or `null`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum RawDecimal {
    Text(String),
    Number(serde_json::Number),
    Null,
}

impl RawDecimal {
    fn as_text(&self) -> Cow<'_, str> {
        match self {
            RawDecimal::Text(text) => Cow::Borrowed(text.as_str()),
            RawDecimal::Number(number) => Cow::Owned(number.to_string()),
            RawDecimal::Null => Cow::Borrowed(""),
        }
    }

    /// Parse into a positive decimal. Empty, `null` and non-positive values
    /// are "no data" and yield [None]; anything unparsable is an error.
    pub fn positive(&self) -> Result<Option<Decimal>, ParseError> {
        let text = self.as_text();
        let text = text.trim();
        if text.is_empty() || text.eq_ignore_ascii_case("null") {
            return Ok(None);
        }
        let value = Decimal::from_str(text)
            .or_else(|_| Decimal::from_scientific(text))
            .map_err(|_| ParseError::Number(text.to_string()))?;
        Ok((value > Decimal::ZERO).then_some(value))
    }
}

impl From<&str> for RawDecimal {
    fn from(value: &str) -> Self {
        RawDecimal::Text(value.to_string())
    }
}

/// A price level in the shapes exchanges commonly use: `[price, size, ...]`
/// or `{"price": .., "quantity": ..}`.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawLevel {
    Seq(Vec<RawDecimal>),
    Object {
        price: RawDecimal,
        #[serde(alias = "amount", alias = "size", alias = "volume")]
        quantity: RawDecimal,
    },
}

impl RawLevel {
    /// Price and size, each [None] when the exchange reports "no data".
    pub fn read(&self) -> Result<(Option<Decimal>, Option<Decimal>), ParseError> {
        match self {
            RawLevel::Seq(values) if values.len() >= 2 => Ok((values[0].positive()?, values[1].positive()?)),
            RawLevel::Seq(values) => Err(ParseError::Shape(format!("price level with {} values", values.len()))),
            RawLevel::Object { price, quantity } => Ok((price.positive()?, quantity.positive()?)),
        }
    }
}

/// Read a full side of a snapshot, skipping levels without data.
pub fn read_levels(raw: &[RawLevel]) -> Result<Vec<PriceLevel>, ParseError> {
    let mut levels = Vec::with_capacity(raw.len());
    for level in raw {
        if let (Some(price), Some(size)) = level.read()? {
            levels.push(PriceLevel { price, size });
        }
    }
    Ok(levels)
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    /// Build a level from its textual representation, [None] if either
    /// value is "no data".
    pub fn from_strs(price_str: &str, size_str: &str) -> Result<Option<PriceLevel>, ParseError> {
        let price = RawDecimal::from(price_str).positive()?;
        let size = RawDecimal::from(size_str).positive()?;
        Ok(price.zip(size).map(|(price, size)| PriceLevel { price, size }))
    }
}

/// A book as read from one exchange message, sides in any order.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct BookUpdate {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Normalized book for one (token, exchange) pair.
///
/// Asks are sorted ascending and bids descending by construction, so the
/// best prices are always the first level of each side.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct CanonicalOrderBook {
    asks: Vec<PriceLevel>,
    bids: Vec<PriceLevel>,
    observed_at: Instant,
}

impl CanonicalOrderBook {
    pub fn new(update: BookUpdate, observed_at: Instant) -> Self {
        Self {
            asks: Self::rank(update.asks, Side::Ask),
            bids: Self::rank(update.bids, Side::Bid),
            observed_at,
        }
    }

    /// A book without data on either side.
    pub fn empty(observed_at: Instant) -> Self {
        Self::new(BookUpdate::default(), observed_at)
    }

    fn rank(mut levels: Vec<PriceLevel>, side: Side) -> Vec<PriceLevel> {
        levels.retain(|level| level.price > Decimal::ZERO && level.size > Decimal::ZERO);
        levels.sort_by(|a, b| side.rank(a.price, b.price));
        levels.truncate(NUM_LEVELS);
        levels
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|level| level.price)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|level| level.price)
    }

    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    pub fn observed_at(&self) -> Instant {
        self.observed_at
    }

    /// Move the observation time past `previous` if the clock did not advance.
    pub(crate) fn observed_after(&mut self, previous: Instant) {
        if self.observed_at <= previous {
            self.observed_at = previous + std::time::Duration::from_nanos(1);
        }
    }

    /// Whether replacing `self` with `next` changes a best price or the
    /// presence of data on either side. Depth-only changes are not material.
    pub fn is_material_change(&self, next: &CanonicalOrderBook) -> bool {
        self.best_ask() != next.best_ask() || self.best_bid() != next.best_bid()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: &str, size: &str) -> PriceLevel {
        PriceLevel::from_strs(price, size).unwrap().unwrap()
    }

    #[test]
    fn test_canonical_book_sorts_sides() {
        let update = BookUpdate {
            bids: vec![level("99.5", "1"), level("100.0", "2"), level("98", "3")],
            asks: vec![level("101.5", "1"), level("100.5", "2")],
        };
        let book = CanonicalOrderBook::new(update, Instant::now());
        assert_eq!(book.best_bid(), Some(Decimal::from_str("100.0").unwrap()));
        assert_eq!(book.best_ask(), Some(Decimal::from_str("100.5").unwrap()));
        let bid_prices: Vec<String> = book.bids().iter().map(|l| l.price.to_string()).collect();
        assert_eq!(bid_prices, vec!["100.0", "99.5", "98"]);
    }

    #[test]
    fn test_side_rank() {
        let (low, high) = (Decimal::from_str("1.5").unwrap(), Decimal::from_str("2").unwrap());
        assert_eq!(Side::Ask.rank(low, high), Ordering::Less);
        assert_eq!(Side::Bid.rank(low, high), Ordering::Greater);
        assert_eq!(Side::Bid.rank(high, high), Ordering::Equal);
    }

    #[test]
    fn test_crossed_book_is_preserved() {
        let update = BookUpdate {
            bids: vec![level("101", "1")],
            asks: vec![level("100", "1")],
        };
        let book = CanonicalOrderBook::new(update, Instant::now());
        assert!(book.best_bid() > book.best_ask());
    }

    #[test]
    fn test_zero_and_null_prices_are_no_data() {
        assert_eq!(PriceLevel::from_strs("0.0", "5").unwrap(), None);
        assert_eq!(PriceLevel::from_strs("", "5").unwrap(), None);
        assert_eq!(PriceLevel::from_strs("null", "5").unwrap(), None);
        assert_eq!(RawDecimal::Null.positive().unwrap(), None);
        assert!(PriceLevel::from_strs("abc", "5").is_err());
        let book = CanonicalOrderBook::empty(Instant::now());
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn test_raw_level_shapes() {
        let pair: RawLevel = serde_json::from_str(r#"["1.5", "2"]"#).unwrap();
        let triple: RawLevel = serde_json::from_str(r#"[1.5, 2, 1700000000]"#).unwrap();
        let object: RawLevel = serde_json::from_str(r#"{"price": "1.5", "amount": "2"}"#).unwrap();
        for raw in [pair, triple, object] {
            let (price, size) = raw.read().unwrap();
            assert_eq!(price, Some(Decimal::from_str("1.5").unwrap()));
            assert_eq!(size, Some(Decimal::from_str("2").unwrap()));
        }
        let short: RawLevel = serde_json::from_str(r#"["1.5"]"#).unwrap();
        assert!(short.read().is_err());
    }

    #[test]
    fn test_scientific_notation() {
        let raw = RawDecimal::from("1.2e-5");
        assert_eq!(raw.positive().unwrap(), Some(Decimal::from_str("0.000012").unwrap()));
    }

    #[test]
    fn test_material_change() {
        let now = Instant::now();
        let a = CanonicalOrderBook::new(BookUpdate { bids: vec![level("1", "1")], asks: vec![level("2", "1")] }, now);
        let deeper = CanonicalOrderBook::new(
            BookUpdate { bids: vec![level("1", "1"), level("0.5", "3")], asks: vec![level("2", "4")] },
            now,
        );
        let moved = CanonicalOrderBook::new(BookUpdate { bids: vec![level("1.1", "1")], asks: vec![level("2", "1")] }, now);
        let one_sided = CanonicalOrderBook::new(BookUpdate { bids: vec![], asks: vec![level("2", "1")] }, now);
        assert!(!a.is_material_change(&deeper));
        assert!(a.is_material_change(&moved));
        assert!(a.is_material_change(&one_sided));
    }

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token(" btc "), Some("BTC".to_string()));
        assert_eq!(normalize_token(""), None);
        assert_eq!(normalize_token("BTC/USDT"), None);
        assert_eq!(normalize_token("ABCDEFGHIJKLMNOPQ"), None);
    }

    #[test]
    fn test_transport_kind_aliases() {
        let kind: TransportKind = serde_json::from_str(r#""websocket""#).unwrap();
        assert_eq!(kind, TransportKind::Streaming);
        let kind: TransportKind = serde_json::from_str(r#""http""#).unwrap();
        assert_eq!(kind, TransportKind::Polled);
        assert_eq!(serde_json::to_string(&TransportKind::Polled).unwrap(), r#""polled""#);
    }

    #[test]
    fn test_currency_pair_display() {
        let exchange = ExchangeConfig::new("MEXC", "wss://example", TransportKind::Streaming);
        let pair = exchange.pair("BTC");
        assert_eq!(pair.to_string(), "BTCUSDT");
        assert_eq!(pair.joined("/"), "BTC/USDT");
    }
}
