pub mod core;
pub mod error;
pub mod depth;
pub mod transport;
pub mod exchange;
pub mod mexc;
pub mod coinex;
pub mod xeggex;
pub mod tradeogre;
pub mod generic;
pub mod config;
pub mod store;
pub mod supervisor;
pub mod registry;
pub mod protocol;
pub mod hub;
pub mod service;
pub mod cli;
#[cfg(test)]
mod testing;
