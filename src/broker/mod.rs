//! Exchange connectivity behind a single capability contract.
//!
//! The rest of the crate depends only on the [`Broker`] trait object, never
//! on a concrete exchange client, so execution logic can be driven by a
//! scripted broker in tests.

pub mod coinbase;

pub use coinbase::CoinbaseBroker;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::models::{OrderBookTop, OrderStatus, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
}

/// Acknowledgement for an order accepted by the exchange.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub id: String,
    pub status: OrderStatus,
}

/// Result of a fire-and-forget market execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub id: String,
    pub status: OrderStatus,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Best bid/offer and their sizes for a symbol.
    async fn get_orderbook_data(&self, symbol: &str) -> Result<OrderBookTop, BrokerError>;

    /// Place a limit or market order. `price` is required for limit orders.
    async fn place_order(
        &self,
        symbol: &str,
        order_type: OrderType,
        side: Side,
        amount: f64,
        price: Option<f64>,
    ) -> Result<PlacedOrder, BrokerError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError>;

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, BrokerError>;

    /// Submit a market order and report its terminal status.
    async fn execute_order(
        &self,
        symbol: &str,
        quantity: f64,
        side: Side,
    ) -> Result<ExecutionReport, BrokerError>;

    /// Available balance per currency.
    async fn get_account_balance(&self) -> Result<HashMap<String, f64>, BrokerError>;
}
