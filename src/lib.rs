// Core modules
pub mod broker;
pub mod config;
pub mod data;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod signals;
pub mod sizing;
pub mod system;

// Re-export commonly used types
pub use broker::Broker;
pub use error::{BrokerError, TradingError};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, TradingError>;
