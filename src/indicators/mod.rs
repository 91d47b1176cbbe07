// Technical indicator calculations
pub mod atr;
pub mod moving_average;

pub use atr::{atr_series, latest_atr};
pub use moving_average::sma_series;
