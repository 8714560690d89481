//! Terminal surface: one module per command family.

pub mod backtest;
pub mod funds;
pub mod intraday;
pub mod settings;
pub mod setup;
pub mod track;
pub mod ui;
pub mod valuation;
