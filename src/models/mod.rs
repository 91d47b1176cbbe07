use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One OHLCV bar for a symbol.
///
/// Field order matches the columns of the daily CSV partitions, so the
/// struct round-trips through `csv` with headers intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub symbol: String,
}

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trend phase of a candle, from the short vs long SMA crossover.
///
/// `None` (unclassified) is represented at call sites with `Option<Phase>`
/// while either SMA is still inside its warm-up window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Markup,
    Markdown,
    Neutral,
}

/// Discrete directional signal derived from one qualifying candle.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub limit_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Queued,
    Working,
    Filled,
    Canceled,
    Rejected,
}

/// An order as tracked by the ledger. `price` is the signal limit price;
/// orders without one are executed at market.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub symbol: String,
    pub quantity: f64,
    pub side: Side,
    pub price: Option<f64>,
    pub status: OrderStatus,
}

/// Top-of-book snapshot used by the execution engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderBookTop {
    pub best_bid: f64,
    pub best_bid_size: f64,
    pub best_offer: f64,
    pub best_offer_size: f64,
}

/// Execution state machine mode. Transitions are monotonic:
/// Passive -> Aggressive -> Terminated, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Passive,
    Aggressive,
    Terminated,
}
