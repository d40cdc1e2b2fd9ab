//! Latest [CanonicalOrderBook] per (token, exchange).
//!
//! The outer map is write-locked only to add or remove keys. Each entry has
//! its own mutex, so writers for different pairs never wait on each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::core::CanonicalOrderBook;


/// `token -> exchange -> book`, as returned by [OrderbookStore::snapshot].
pub type BookSnapshot = BTreeMap<String, BTreeMap<String, CanonicalOrderBook>>;

type BookKey = (String, String);

#[derive(Debug, Default)]
struct Entry {
    book: Option<CanonicalOrderBook>,
    /// Set once the key has been removed from the map; writers holding a
    /// stale handle must look the key up again.
    retired: bool,
}

#[derive(Debug, Default)]
pub struct OrderbookStore {
    entries: RwLock<HashMap<BookKey, Arc<Mutex<Entry>>>>,
}

impl OrderbookStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(token: &str, exchange: &str) -> BookKey {
        (token.to_string(), exchange.to_string())
    }

    fn slot(&self, token: &str, exchange: &str) -> Arc<Mutex<Entry>> {
        let key = Self::key(token, exchange);
        if let Some(slot) = self.entries.read().get(&key) {
            return slot.clone();
        }
        self.entries.write().entry(key).or_default().clone()
    }

    /// Replace the book for (token, exchange).
    ///
    /// # Arguments
    ///
    /// * `book` - The freshly normalized book. Its observation time is moved
    /// past the stored one if the clock did not advance.
    ///
    /// # Returns
    ///
    /// Whether the change is material: a best price moved, data appeared or
    /// disappeared on a side, or the pair had no entry yet.
    pub fn apply(&self, token: &str, exchange: &str, mut book: CanonicalOrderBook) -> bool {
        loop {
            let slot = self.slot(token, exchange);
            let mut entry = slot.lock();
            if entry.retired {
                continue;
            }
            let material = match &entry.book {
                Some(previous) => {
                    book.observed_after(previous.observed_at());
                    previous.is_material_change(&book)
                },
                None => true,
            };
            entry.book = Some(book);
            return material;
        }
    }

    pub fn get(&self, token: &str, exchange: &str) -> Option<CanonicalOrderBook> {
        let slot = self.entries.read().get(&Self::key(token, exchange)).cloned()?;
        let entry = slot.lock();
        entry.book.clone()
    }

    pub fn contains(&self, token: &str, exchange: &str) -> bool {
        self.get(token, exchange).is_some()
    }

    fn remove_where(&self, matches: impl Fn(&BookKey) -> bool) -> usize {
        let mut entries = self.entries.write();
        let mut removed = 0;
        entries.retain(|key, slot| {
            if !matches(key) {
                return true;
            }
            let mut entry = slot.lock();
            if entry.book.take().is_some() {
                removed += 1;
            }
            entry.retired = true;
            false
        });
        removed
    }

    /// Delete every book of `token`. Returns the number of books removed.
    pub fn remove_token(&self, token: &str) -> usize {
        self.remove_where(|(key_token, _)| key_token == token)
    }

    /// Delete every book of `exchange`. Returns the number of books removed.
    pub fn remove_exchange(&self, exchange: &str) -> usize {
        self.remove_where(|(_, key_exchange)| key_exchange == exchange)
    }

    pub fn clear(&self) -> usize {
        self.remove_where(|_| true)
    }

    /// A point-in-time copy of every book. The key set cannot change while
    /// it is taken and each book is copied under its own lock.
    pub fn snapshot(&self) -> BookSnapshot {
        let entries = self.entries.read();
        let mut snapshot = BookSnapshot::new();
        for ((token, exchange), slot) in entries.iter() {
            if let Some(book) = &slot.lock().book {
                snapshot.entry(token.clone()).or_default().insert(exchange.clone(), book.clone());
            }
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.entries.read().values().filter(|slot| slot.lock().book.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
