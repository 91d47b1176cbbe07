//! Per-order adaptive execution.
//!
//! Each open order runs its own state machine against live top-of-book
//! data: rest passively on the maker side, switch to crossing the spread
//! when time runs short or the book turns against the order, and give up
//! after a hard deadline. Modes only ever move forward:
//! Passive -> Aggressive -> Terminated.
//!
//! Based on the "world's simplest execution algorithm" family: passive
//! until a time limit, adverse move, or book imbalance forces aggression.

use std::sync::Arc;

use tokio::time::{interval, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, OrderType};
use crate::config::ExecutionSettings;
use crate::error::TradingError;
use crate::models::{ExecutionMode, Order, OrderBookTop, OrderStatus, Side};

/// Live state of one order's execution.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub mode: ExecutionMode,
    pub broker_order_id: Option<String>,
    pub started_at: Instant,
    pub reference_price: Option<f64>,
}

/// Terminal result of driving one order.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Filled {
        broker_order_id: String,
    },
    /// Aged past the total time limit unfilled. Canceled, not retried.
    TimedOut {
        broker_order_id: Option<String>,
    },
    /// The broker reported a non-filled terminal status (market path only).
    Unfilled {
        broker_order_id: String,
        status: OrderStatus,
    },
}

pub struct ExecutionEngine {
    broker: Arc<dyn Broker>,
    settings: ExecutionSettings,
    shutdown: CancellationToken,
}

/// Maker-side resting price: join the best bid for a buy, the best offer
/// for a sell.
fn passive_price(side: Side, book: &OrderBookTop) -> f64 {
    match side {
        Side::Buy => book.best_bid,
        Side::Sell => book.best_offer,
    }
}

/// Taker-side price: cross toward the best offer for a buy, the best bid
/// for a sell.
fn aggressive_price(side: Side, book: &OrderBookTop) -> f64 {
    match side {
        Side::Buy => book.best_offer,
        Side::Sell => book.best_bid,
    }
}

/// Adverse price move while resting passively. The predicate compares the
/// two sides of the spread, not the order's own reference price; DESIGN.md
/// records why this is kept as is.
fn is_adverse_price_move(side: Side, book: &OrderBookTop) -> bool {
    match side {
        Side::Buy => book.best_offer > book.best_bid,
        Side::Sell => book.best_bid < book.best_offer,
    }
}

/// Continued adverse move while already aggressive. Same predicate as the
/// passive check, kept separate because the two triggers are tuned
/// independently.
fn is_further_adverse_price_move(side: Side, book: &OrderBookTop) -> bool {
    is_adverse_price_move(side, book)
}

/// Opposing-side size over same-side size beyond the configured ratio.
fn is_order_imbalance(side: Side, book: &OrderBookTop, max_imbalance: f64) -> bool {
    match side {
        Side::Buy => book.best_offer_size / book.best_bid_size > max_imbalance,
        Side::Sell => book.best_bid_size / book.best_offer_size > max_imbalance,
    }
}

impl ExecutionEngine {
    pub fn new(
        broker: Arc<dyn Broker>,
        settings: ExecutionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            broker,
            settings,
            shutdown,
        }
    }

    /// Drive one order until filled, timed out, or shut down.
    ///
    /// Book data and the order's broker status are polled once per tick.
    /// Transient broker errors on the read path retry at the next tick;
    /// cancel failures are fatal for the order and surface the broker order
    /// id so the operator can reconcile manually.
    pub async fn execute(&self, order: &Order) -> Result<ExecutionOutcome, TradingError> {
        let passive_limit = Duration::from_secs(self.settings.passive_time_limit_secs);
        let total_limit = Duration::from_secs(self.settings.total_time_limit_secs);

        let mut state = ExecutionState {
            mode: ExecutionMode::Passive,
            broker_order_id: None,
            started_at: Instant::now(),
            reference_price: order.price,
        };
        let mut ticks = interval(Duration::from_secs(self.settings.tick_interval_secs.max(1)));

        tracing::info!(
            order_id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            quantity = order.quantity,
            "starting execution"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    if let Some(id) = state.broker_order_id.take() {
                        self.broker.cancel_order(&id).await.map_err(|source| {
                            TradingError::CancelFailed { order_id: id.clone(), source }
                        })?;
                        tracing::info!(order_id = %order.id, broker_order_id = %id, "canceled resting order on shutdown");
                    }
                    state.mode = ExecutionMode::Terminated;
                    return Err(TradingError::StopRequested);
                }
                _ = ticks.tick() => {}
            }

            // Fill check on the outstanding broker order, if any
            if let Some(id) = state.broker_order_id.clone() {
                match self.broker.get_order_status(&id).await {
                    Ok(OrderStatus::Filled) => {
                        state.mode = ExecutionMode::Terminated;
                        tracing::info!(order_id = %order.id, broker_order_id = %id, "order filled");
                        return Ok(ExecutionOutcome::Filled {
                            broker_order_id: id,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(order_id = %order.id, error = %e, "status fetch failed, retrying next tick");
                    }
                }
            }

            let elapsed = state.started_at.elapsed();
            let book = match self.broker.get_orderbook_data(&order.symbol).await {
                Ok(book) => book,
                Err(e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "order book fetch failed, retrying next tick");
                    continue;
                }
            };

            match state.mode {
                ExecutionMode::Passive => {
                    let timed = elapsed > passive_limit;
                    let adverse = is_adverse_price_move(order.side, &book);
                    let imbalanced =
                        is_order_imbalance(order.side, &book, self.settings.max_imbalance);

                    if timed || adverse || imbalanced {
                        tracing::info!(
                            order_id = %order.id,
                            timed,
                            adverse,
                            imbalanced,
                            "switching to aggressive mode"
                        );
                        state.mode = ExecutionMode::Aggressive;
                    } else if state.broker_order_id.is_none() {
                        // Maintain at most one resting order; a failed
                        // placement retries at the next tick
                        let price = passive_price(order.side, &book);
                        match self
                            .broker
                            .place_order(
                                &order.symbol,
                                OrderType::Limit,
                                order.side,
                                order.quantity,
                                Some(price),
                            )
                            .await
                        {
                            Ok(placed) => {
                                tracing::debug!(order_id = %order.id, broker_order_id = %placed.id, price, "resting passively");
                                state.broker_order_id = Some(placed.id);
                                state.reference_price = Some(price);
                            }
                            Err(e) => {
                                tracing::warn!(order_id = %order.id, error = %e, "passive placement failed, retrying next tick");
                            }
                        }
                    }
                }

                ExecutionMode::Aggressive => {
                    if elapsed > total_limit {
                        if let Some(id) = state.broker_order_id.take() {
                            self.broker.cancel_order(&id).await.map_err(|source| {
                                TradingError::CancelFailed {
                                    order_id: id.clone(),
                                    source,
                                }
                            })?;
                            state.mode = ExecutionMode::Terminated;
                            tracing::warn!(order_id = %order.id, broker_order_id = %id, "timed out unfilled, order canceled");
                            return Ok(ExecutionOutcome::TimedOut {
                                broker_order_id: Some(id),
                            });
                        }
                        state.mode = ExecutionMode::Terminated;
                        tracing::warn!(order_id = %order.id, "timed out with no resting order");
                        return Ok(ExecutionOutcome::TimedOut {
                            broker_order_id: None,
                        });
                    }

                    if is_further_adverse_price_move(order.side, &book) {
                        // Cancel-and-replace at the more aggressive price
                        if let Some(id) = state.broker_order_id.take() {
                            self.broker.cancel_order(&id).await.map_err(|source| {
                                TradingError::CancelFailed {
                                    order_id: id.clone(),
                                    source,
                                }
                            })?;
                        }
                        let price = aggressive_price(order.side, &book);
                        let placed = self
                            .broker
                            .place_order(
                                &order.symbol,
                                OrderType::Limit,
                                order.side,
                                order.quantity,
                                Some(price),
                            )
                            .await?;
                        tracing::debug!(order_id = %order.id, broker_order_id = %placed.id, price, "crossing the spread");
                        state.broker_order_id = Some(placed.id);
                        state.reference_price = Some(price);
                    }
                }

                ExecutionMode::Terminated => break,
            }
        }

        Ok(ExecutionOutcome::TimedOut {
            broker_order_id: None,
        })
    }
}
