use thiserror::Error;

/// Failures at the exchange boundary.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The exchange answered but refused the request.
    #[error("exchange rejected request: {0}")]
    Api(String),

    #[error("order book for {0} is missing top-of-book liquidity")]
    EmptyBook(String),
}

/// Crate-wide error taxonomy.
///
/// Per-symbol and per-order failures are isolated by the callers: one
/// symbol's missing history or one order's broker error never aborts the
/// cycle for the others.
#[derive(Debug, Error)]
pub enum TradingError {
    /// Not enough warm-up history to classify a symbol this cycle. Skipped,
    /// not surfaced to the operator.
    #[error("insufficient history for {symbol}: have {have} candles, need {need}")]
    DataUnavailable {
        symbol: String,
        have: usize,
        need: usize,
    },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A cancel failed while unwinding an order. The order's last known
    /// broker state must be reconciled manually.
    #[error("cancel failed for order {order_id}: {source}")]
    CancelFailed {
        order_id: String,
        #[source]
        source: BrokerError,
    },

    #[error("stop requested")]
    StopRequested,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
