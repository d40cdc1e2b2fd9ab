//! Connector-local depth book for exchanges that stream incremental diffs.
//!
//! Bids are keyed by [Reverse] prices so that iteration yields the highest
//! bid first; asks use natural ordering.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use rust_decimal::Decimal;

use crate::core::*;
use crate::error::ParseError;


#[derive(Debug, Default)]
pub struct LocalBook {
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl LocalBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Set the size at a price. A missing size removes the level.
    pub fn set(&mut self, side: Side, price: Decimal, size: Option<Decimal>) {
        match (side, size) {
            (Side::Bid, Some(size)) => { self.bids.insert(Reverse(price), size); },
            (Side::Bid, None) => { self.bids.remove(&Reverse(price)); },
            (Side::Ask, Some(size)) => { self.asks.insert(price, size); },
            (Side::Ask, None) => { self.asks.remove(&price); },
        }
    }

    /// Apply a diff message. Levels without a price are skipped. Nothing
    /// changes unless every level of both sides parses.
    pub fn apply_diff(&mut self, bids: &[RawLevel], asks: &[RawLevel]) -> Result<(), ParseError> {
        let mut changes = Vec::with_capacity(bids.len() + asks.len());
        for (side, levels) in [(Side::Bid, bids), (Side::Ask, asks)] {
            for level in levels {
                if let (Some(price), size) = level.read()? {
                    changes.push((side, price, size));
                }
            }
        }
        for (side, price, size) in changes {
            self.set(side, price, size);
        }
        Ok(())
    }

    /// Replace the whole book with a snapshot.
    pub fn replace(&mut self, bids: &[RawLevel], asks: &[RawLevel]) -> Result<(), ParseError> {
        let bids = read_levels(bids)?;
        let asks = read_levels(asks)?;
        self.clear();
        for level in bids {
            self.set(Side::Bid, level.price, Some(level.size));
        }
        for level in asks {
            self.set(Side::Ask, level.price, Some(level.size));
        }
        Ok(())
    }

    /// The best [NUM_LEVELS] levels of each side.
    pub fn to_update(&self) -> BookUpdate {
        BookUpdate {
            bids: self.bids.iter()
                .take(NUM_LEVELS)
                .map(|(Reverse(price), size)| PriceLevel { price: *price, size: *size })
                .collect(),
            asks: self.asks.iter()
                .take(NUM_LEVELS)
                .map(|(price, size)| PriceLevel { price: *price, size: *size })
                .collect(),
        }
    }
}
