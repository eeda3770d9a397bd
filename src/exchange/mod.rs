pub mod binance;
pub mod client;
pub mod rate_limit;

pub use client::{ExchangeClient, ExchangeError, ExchangePosition, OrderAck, QuoteBalance, SymbolInfo};
