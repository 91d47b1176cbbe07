// Market data acquisition and persistence
pub mod feed;
pub mod store;

pub use feed::MarketDataFeed;
pub use store::CandleStore;
