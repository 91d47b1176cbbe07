// Order ledger and per-order adaptive execution
pub mod engine;
pub mod order_manager;

pub use engine::{ExecutionEngine, ExecutionOutcome, ExecutionState};
pub use order_manager::OrderManager;
