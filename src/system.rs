//! Orchestration loop: refresh -> signal -> size -> queue -> execute ->
//! risk check, one cycle per fixed interval.
//!
//! Cycles never overlap: each runs to completion (including draining its
//! execution tasks) before the next tick is taken. Per-order execution runs
//! as one independent task per drained order, all serializing their ledger
//! mutations through the shared `OrderManager` mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::config::{ExecutionSettings, Settings};
use crate::data::CandleStore;
use crate::error::TradingError;
use crate::execution::{ExecutionEngine, ExecutionOutcome, OrderManager};
use crate::indicators;
use crate::models::{Candle, Order, OrderStatus};
use crate::signals::{SignalConfig, SignalEngine};
use crate::sizing::PositionSizer;

pub struct TradingSystem {
    broker: Arc<dyn Broker>,
    order_manager: Arc<Mutex<OrderManager>>,
    store: CandleStore,
    signal_engine: SignalEngine,
    sizer: PositionSizer,
    symbols: Vec<String>,
    execution: ExecutionSettings,
    cycle_interval: Duration,
    max_loss: f64,
    current_loss: f64,
    shutdown: CancellationToken,
}

impl TradingSystem {
    pub fn new(
        broker: Arc<dyn Broker>,
        settings: &Settings,
        shutdown: CancellationToken,
    ) -> crate::Result<Self> {
        Ok(Self {
            broker,
            order_manager: Arc::new(Mutex::new(OrderManager::new())),
            store: CandleStore::new(&settings.data_dir)?,
            signal_engine: SignalEngine::new(SignalConfig::default()),
            sizer: PositionSizer::new(&settings.risk),
            symbols: settings.symbols.clone(),
            execution: settings.execution.clone(),
            cycle_interval: Duration::from_secs(settings.cycle_interval_secs),
            max_loss: settings.risk.max_loss,
            current_loss: 0.0,
            shutdown,
        })
    }

    pub fn order_manager(&self) -> Arc<Mutex<OrderManager>> {
        self.order_manager.clone()
    }

    pub fn current_loss(&self) -> f64 {
        self.current_loss
    }

    /// Charge an amount against the loss budget checked each cycle.
    pub fn record_loss(&mut self, amount: f64) {
        self.current_loss += amount;
    }

    /// One full cycle. Per-symbol and per-order failures are isolated; the
    /// cycle only fails on storage errors.
    pub async fn run_cycle(&mut self) -> crate::Result<()> {
        // Latest persisted candles, grouped per symbol in time order
        let candles = self.store.load_recent(2)?;
        let mut by_symbol: HashMap<String, Vec<Candle>> = HashMap::new();
        for candle in candles {
            by_symbol
                .entry(candle.symbol.clone())
                .or_default()
                .push(candle);
        }
        for series in by_symbol.values_mut() {
            series.sort_by_key(|c| c.timestamp);
        }

        let warmup = self.signal_engine.config().long_window;
        for symbol in &self.symbols {
            let series = by_symbol.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
            if series.len() < warmup {
                tracing::debug!(
                    %symbol,
                    have = series.len(),
                    need = warmup,
                    "insufficient warm-up history, skipping symbol this cycle"
                );
                continue;
            }

            let signals = self.signal_engine.generate_signals(series);
            if signals.is_empty() {
                continue;
            }
            let atr = indicators::latest_atr(series, self.signal_engine.config().atr_period);

            for signal in signals {
                let notional = self.sizer.compute_notional(atr);
                if notional <= 0.0 {
                    tracing::info!(symbol = %signal.symbol, ?atr, "order suppressed by sizing");
                    continue;
                }
                let quantity = notional / signal.limit_price;
                let order = self.order_manager.lock().unwrap().place_order(
                    &signal.symbol,
                    quantity,
                    signal.side,
                    Some(signal.limit_price),
                );
                tracing::info!(
                    order_id = %order.id,
                    symbol = %order.symbol,
                    side = %order.side,
                    quantity,
                    limit_price = signal.limit_price,
                    "queued order from signal"
                );
            }
        }

        // Drain the queue, one independent execution task per order
        let drained = self.order_manager.lock().unwrap().process_orders();
        if drained.is_empty() {
            return Ok(());
        }

        let mut tasks: JoinSet<(Order, Result<ExecutionOutcome, TradingError>)> = JoinSet::new();
        for order in drained {
            let broker = self.broker.clone();
            let engine =
                ExecutionEngine::new(broker.clone(), self.execution.clone(), self.shutdown.clone());
            tasks.spawn(async move {
                let result = match order.price {
                    Some(_) => engine.execute(&order).await,
                    // Orders without a limit price go straight to market
                    None => broker
                        .execute_order(&order.symbol, order.quantity, order.side)
                        .await
                        .map(|report| match report.status {
                            OrderStatus::Filled => ExecutionOutcome::Filled {
                                broker_order_id: report.id,
                            },
                            status => ExecutionOutcome::Unfilled {
                                broker_order_id: report.id,
                                status,
                            },
                        })
                        .map_err(TradingError::from),
                };
                (order, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (order, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(error = %e, "execution task failed to complete");
                    continue;
                }
            };
            match result {
                Ok(ExecutionOutcome::Filled { broker_order_id }) => {
                    self.order_manager.lock().unwrap().update_positions(&order);
                    tracing::info!(
                        order_id = %order.id,
                        broker_order_id = %broker_order_id,
                        "order filled, position updated"
                    );
                }
                Ok(ExecutionOutcome::TimedOut { broker_order_id }) => {
                    // Unexecuted exposure counts against the loss budget
                    let exposure = order.price.unwrap_or(0.0) * order.quantity;
                    self.current_loss += exposure;
                    tracing::warn!(
                        order_id = %order.id,
                        ?broker_order_id,
                        exposure,
                        "order timed out unfilled"
                    );
                }
                Ok(ExecutionOutcome::Unfilled {
                    broker_order_id,
                    status,
                }) => {
                    tracing::info!(
                        order_id = %order.id,
                        %broker_order_id,
                        ?status,
                        "order not filled"
                    );
                }
                Err(TradingError::StopRequested) => {
                    tracing::info!(order_id = %order.id, "execution interrupted by shutdown");
                }
                Err(e) => {
                    tracing::error!(order_id = %order.id, error = %e, "execution failed");
                }
            }
        }

        Ok(())
    }

    /// Max-loss limit or the cooperative stop flag.
    pub fn check_stop_conditions(&self) -> bool {
        if self.current_loss >= self.max_loss {
            tracing::warn!(
                current_loss = self.current_loss,
                max_loss = self.max_loss,
                "max loss limit reached, stopping"
            );
            return true;
        }
        if self.shutdown.is_cancelled() {
            tracing::info!("stop signal received, stopping");
            return true;
        }
        false
    }

    /// Cycle loop. In-flight execution tasks are always drained inside
    /// `run_cycle` before the stop conditions are re-checked, so shutdown
    /// never abandons a live order.
    pub async fn run(mut self) -> crate::Result<()> {
        let shutdown = self.shutdown.clone();
        let mut ticks = interval(self.cycle_interval);

        tracing::info!(
            symbols = ?self.symbols,
            interval_s = self.cycle_interval.as_secs(),
            "trading loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("stop requested, exiting trading loop");
                    break;
                }
                _ = ticks.tick() => {}
            }

            if let Err(e) = self.run_cycle().await {
                tracing::error!(error = %e, "trading cycle failed");
            }

            if self.check_stop_conditions() {
                break;
            }
        }

        Ok(())
    }
}
