//! Broker Collaborator Interface
//!
//! The core depends on these traits only; the REST client and the in-memory
//! mock are interchangeable behind them. Futures are boxed by hand so the
//! traits stay object-safe.

pub mod mock;
pub mod rest;

pub use mock::MockBroker;
pub use rest::RestBroker;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{Credentials, Order, OrderAck, OrderSide, Position, QuoteMap, QuoteQuery};

/// Broker interaction errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Simulated failure: {0}")]
    Simulated(String),
}

/// Entry point: exchanges credentials for a live session.
pub trait Broker: Send + Sync {
    /// Authenticate and return a session handle all data calls go through.
    fn authenticate<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BrokerSession>, BrokerError>> + Send + 'a>>;
}

/// An authenticated broker session.
pub trait BrokerSession: Send + Sync {
    /// Fetch the current position book, already normalized.
    fn fetch_positions(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Position>, BrokerError>> + Send + '_>>;

    /// Fetch the day's order report, already normalized.
    fn fetch_orders(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, BrokerError>> + Send + '_>>;

    /// Fetch last traded prices for the given token/segment pairs.
    fn fetch_quotes<'a>(
        &'a self,
        queries: &'a [QuoteQuery],
    ) -> Pin<Box<dyn Future<Output = Result<QuoteMap, BrokerError>> + Send + 'a>>;

    /// Place a market order that closes (part of) a position.
    fn place_market_exit<'a>(
        &'a self,
        position: &'a Position,
        side: OrderSide,
        qty: i64,
    ) -> Pin<Box<dyn Future<Output = Result<OrderAck, BrokerError>> + Send + 'a>>;
}
