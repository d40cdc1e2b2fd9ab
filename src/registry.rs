//! Configured tokens and exchanges, and the supervisor running for each
//! (exchange, token) pair.

use futures::future::join_all;
use log::{error, info};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{normalize_token, ExchangeConfig};
use crate::error::{CommandRejected, ConnectorError};
use crate::exchange::ConnectorFactory;
use crate::supervisor::{FeedContext, ReconnectSupervisor, SupervisorHandle};


/// Result of adding a token or an exchange.
#[derive(Debug, Default, PartialEq)]
pub struct Added {
    /// `false` when the token was already configured and nothing changed.
    pub fresh: bool,
    /// Pairs whose connector could not be created.
    pub failures: Vec<ConnectorError>,
}

pub struct FeedRegistry {
    tokens: Vec<String>,
    exchanges: Vec<ExchangeConfig>,
    supervisors: HashMap<(String, String), SupervisorHandle>,
    factory: Arc<dyn ConnectorFactory>,
    context: FeedContext,
    max_connectors: usize,
}

impl FeedRegistry {
    pub fn new(factory: Arc<dyn ConnectorFactory>, context: FeedContext, max_connectors: usize) -> Self {
        Self {
            tokens: Vec::new(),
            exchanges: Vec::new(),
            supervisors: HashMap::new(),
            factory,
            context,
            max_connectors,
        }
    }

    /// Load the start-up configuration. Entries that cannot be used are
    /// logged and skipped.
    pub fn configure(&mut self, tokens: &[String], exchanges: &[ExchangeConfig]) {
        for token in tokens {
            if let Err(rejected) = self.add_token(token) {
                error!("Skipping configured token: {}", rejected);
            }
        }
        for exchange in exchanges {
            match self.add_exchange(exchange.clone()) {
                Ok(added) => for failure in added.failures {
                    error!("{}", failure);
                },
                Err(rejected) => error!("Skipping configured exchange: {}", rejected),
            }
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn exchanges(&self) -> &[ExchangeConfig] {
        &self.exchanges
    }

    pub fn running(&self) -> usize {
        self.supervisors.len()
    }

    fn start_pair(&mut self, exchange: &ExchangeConfig, token: &str) -> Result<(), ConnectorError> {
        if self.supervisors.len() >= self.max_connectors {
            return Err(ConnectorError::Exhausted { exchange: exchange.name.clone(), token: token.to_string() });
        }
        let connector = self.factory.make_connector(exchange, token)?;
        let handle = ReconnectSupervisor::spawn(connector, self.context.clone());
        self.supervisors.insert((exchange.name.clone(), token.to_string()), handle);
        Ok(())
    }

    async fn stop_where(&mut self, matches: impl Fn(&(String, String)) -> bool) {
        let keys: Vec<(String, String)> = self.supervisors.keys().filter(|key| matches(*key)).cloned().collect();
        let handles: Vec<SupervisorHandle> = keys.iter().filter_map(|key| self.supervisors.remove(key)).collect();
        join_all(handles.into_iter().map(SupervisorHandle::stop)).await;
    }

    /// Add a token and start a feed for it on every configured exchange.
    pub fn add_token(&mut self, raw: &str) -> Result<Added, CommandRejected> {
        let token = normalize_token(raw).ok_or_else(|| CommandRejected::InvalidToken(raw.to_string()))?;
        if self.tokens.contains(&token) {
            return Ok(Added::default());
        }
        info!("Adding token {}", &token);
        self.tokens.push(token.clone());
        let exchanges = self.exchanges.clone();
        let failures = exchanges.iter()
            .filter_map(|exchange| self.start_pair(exchange, &token).err())
            .collect();
        Ok(Added { fresh: true, failures })
    }

    /// Remove a token. Its feeds are stopped before its books are purged.
    pub async fn remove_token(&mut self, raw: &str) -> Result<String, CommandRejected> {
        let token = normalize_token(raw)
            .filter(|token| self.tokens.contains(token))
            .ok_or_else(|| CommandRejected::UnknownToken(raw.to_string()))?;
        info!("Removing token {}", &token);
        self.tokens.retain(|configured| configured != &token);
        self.stop_where(|(_, pair_token)| pair_token == &token).await;
        self.context.store.remove_token(&token);
        Ok(token)
    }

    /// Configured exchange with this name, ignoring case and surrounding
    /// whitespace.
    fn find_exchange(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.exchanges.iter().position(|configured| configured.name.eq_ignore_ascii_case(name))
    }

    /// Add an exchange and start a feed on it for every configured token.
    pub fn add_exchange(&mut self, mut exchange: ExchangeConfig) -> Result<Added, CommandRejected> {
        exchange.name = exchange.name.trim().to_string();
        exchange.url = exchange.url.trim().to_string();
        if exchange.name.is_empty() || exchange.url.is_empty() {
            return Err(CommandRejected::InvalidExchange("name and url are required".to_string()));
        }
        if self.find_exchange(&exchange.name).is_some() {
            return Err(CommandRejected::DuplicateExchange(exchange.name));
        }
        self.factory.validate(&exchange).map_err(|error| CommandRejected::InvalidExchange(error.to_string()))?;
        info!("Adding {} exchange {} at {}", exchange.kind, &exchange.name, &exchange.url);
        let tokens = self.tokens.clone();
        let failures = tokens.iter()
            .filter_map(|token| self.start_pair(&exchange, token).err())
            .collect();
        self.exchanges.push(exchange);
        Ok(Added { fresh: true, failures })
    }

    /// Remove an exchange. Its feeds are stopped before its books are purged.
    pub async fn remove_exchange(&mut self, name: &str) -> Result<ExchangeConfig, CommandRejected> {
        let position = self.find_exchange(name)
            .ok_or_else(|| CommandRejected::UnknownExchange(name.to_string()))?;
        let exchange = self.exchanges.remove(position);
        info!("Removing exchange {}", &exchange.name);
        self.stop_where(|(pair_exchange, _)| pair_exchange == &exchange.name).await;
        self.context.store.remove_exchange(&exchange.name);
        Ok(exchange)
    }

    /// Ask polled feeds for an immediate fetch, on one exchange or all of
    /// them. Returns how many feeds were asked.
    pub fn refresh(&self, exchange: Option<&str>) -> Result<usize, CommandRejected> {
        let exchange = match exchange {
            Some(name) => {
                let position = self.find_exchange(name)
                    .ok_or_else(|| CommandRejected::UnknownExchange(name.to_string()))?;
                Some(self.exchanges[position].name.as_str())
            },
            None => None,
        };
        let refreshed = self.supervisors.iter()
            .filter(|(key, _)| exchange.map_or(true, |name| key.0 == name))
            .filter(|(_, handle)| handle.refresh())
            .count();
        Ok(refreshed)
    }

    /// Stop every feed.
    pub async fn shutdown(&mut self) {
        info!("Stopping {} feeds", self.supervisors.len());
        self.stop_where(|_| true).await;
    }
}
