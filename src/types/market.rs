//! Market Data Types
//!
//! Positions, orders and quotes as the daemon sees them after normalizing the
//! broker's wire shapes. Only the fields the risk engine needs survive
//! parsing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Single-letter transaction code used by the broker API.
    pub fn code(&self) -> &'static str {
        match self {
            OrderSide::Buy => "B",
            OrderSide::Sell => "S",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// An open (or recently closed) position, reduced to the fields the MTM
/// formula consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument token.
    pub token: String,
    /// Exchange segment (e.g. `nse_fo`, `nse_cm`).
    pub segment: String,
    /// Trading symbol.
    pub symbol: String,
    /// Signed net quantity (buys minus sells, lot-adjusted for derivatives).
    pub net_qty: i64,
    /// Cumulative buy amount (carry-forward + fresh).
    pub total_buy_amt: f64,
    /// Cumulative sell amount (carry-forward + fresh).
    pub total_sell_amt: f64,
    /// Contract multiplier.
    pub multiplier: f64,
    /// Price scaling factor `(genNum/genDen) * (prcNum/prcDen)`.
    pub price_factor: f64,
    /// Lot size, kept for reference.
    pub lot_size: f64,
    /// Product code (needed to place the closing order).
    pub product: String,
}

impl Position {
    /// Whether the position still has open quantity.
    pub fn is_open(&self) -> bool {
        self.net_qty != 0
    }

    /// The market order side that closes this position, if it is open.
    pub fn closing_side(&self) -> Option<OrderSide> {
        match self.net_qty {
            n if n > 0 => Some(OrderSide::Sell),
            n if n < 0 => Some(OrderSide::Buy),
            _ => None,
        }
    }

    /// PnL of this leg given its last traded price. Missing quotes are fed
    /// in as `0.0`, which leaves only the realized component.
    pub fn leg_pnl(&self, ltp: f64) -> f64 {
        let realized = self.total_sell_amt - self.total_buy_amt;
        let unrealized = self.net_qty as f64 * ltp * self.multiplier * self.price_factor;
        realized + unrealized
    }
}

/// An order from the broker's order report, normalized for the stop-loss
/// scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Broker order id.
    pub order_id: String,
    /// Status, upper-cased (`COMPLETE`, `TRADED`, `REJECTED`, ...).
    pub status: String,
    /// Price type (`MKT`, `L`, `SL`, `SL-M`).
    pub order_type: String,
    /// Transaction side.
    pub side: OrderSide,
    /// Instrument token.
    pub token: String,
    /// Trading symbol.
    pub symbol: String,
    /// Ordered quantity.
    pub qty: i64,
    /// Filled quantity.
    pub filled_qty: i64,
}

impl Order {
    /// Whether this is a stop-loss flavored order.
    pub fn is_stop_loss(&self) -> bool {
        matches!(self.order_type.as_str(), "SL" | "SL-M")
    }

    /// Quantity still outstanding. Clamped at zero: brokers occasionally
    /// report fills exceeding the ordered quantity during amendments.
    pub fn pending_qty(&self) -> i64 {
        (self.qty - self.filled_qty).max(0)
    }

    /// Completion by fill count. Authoritative over the status string.
    pub fn is_fully_filled(&self) -> bool {
        self.qty > 0 && self.filled_qty >= self.qty
    }

    /// Completion by status string, the secondary signal.
    pub fn status_complete(&self) -> bool {
        matches!(self.status.as_str(), "COMPLETE" | "TRADED" | "FILLED")
    }
}

/// Last traded prices keyed by instrument token.
pub type QuoteMap = HashMap<String, f64>;

/// Token/segment pair used to request quotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteQuery {
    pub token: String,
    pub segment: String,
}

/// Acknowledgement for a placed exit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
}
