use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use crate::models::{Order, OrderStatus, Side};

/// FIFO order queue plus the fill-driven position ledger.
///
/// This layer does not talk to the broker and does not validate broker-side
/// feasibility. Callers share it behind a mutex; all ledger mutation is
/// serialized through that lock while broker I/O proceeds in parallel.
#[derive(Debug, Default)]
pub struct OrderManager {
    queue: VecDeque<Order>,
    executed: Vec<Order>,
    positions: HashMap<String, f64>,
    applied_fills: HashSet<Uuid>,
}

impl OrderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an order to the tail of the queue and return its handle.
    pub fn place_order(
        &mut self,
        symbol: &str,
        quantity: f64,
        side: Side,
        price: Option<f64>,
    ) -> Order {
        let order = Order {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            quantity,
            side,
            price,
            status: OrderStatus::Queued,
        };
        self.queue.push_back(order.clone());
        order
    }

    /// Drain all currently queued orders in insertion order, marking them
    /// Working. Idempotent on an empty queue.
    pub fn process_orders(&mut self) -> Vec<Order> {
        let mut drained = Vec::with_capacity(self.queue.len());
        while let Some(mut order) = self.queue.pop_front() {
            order.status = OrderStatus::Working;
            drained.push(order);
        }
        drained
    }

    /// Apply a confirmed fill to the position ledger: buys add quantity,
    /// sells subtract. Must be called once per filled order; replays of the
    /// same order id are ignored so a retried confirmation cannot
    /// double-count.
    pub fn update_positions(&mut self, order: &Order) {
        if !self.applied_fills.insert(order.id) {
            tracing::warn!(order_id = %order.id, "fill already applied, ignoring replay");
            return;
        }

        let delta = match order.side {
            Side::Buy => order.quantity,
            Side::Sell => -order.quantity,
        };
        *self.positions.entry(order.symbol.clone()).or_insert(0.0) += delta;

        let mut filled = order.clone();
        filled.status = OrderStatus::Filled;
        self.executed.push(filled);
    }

    pub fn positions(&self) -> &HashMap<String, f64> {
        &self.positions
    }

    pub fn executed_orders(&self) -> &[Order] {
        &self.executed
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }
}
