//! Core business logic abstractions

pub mod analytics;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fund;
pub mod log;
pub mod market;

// Re-export main types for cleaner imports
pub use clock::{Clock, ExchangeClock, ManualClock};
pub use error::ValuationError;
pub use market::{Granularity, MarketDataProvider, PriceRange};
