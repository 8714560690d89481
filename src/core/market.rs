//! Market data abstractions consumed by the valuation engines.
//!
//! Every method reports missing or failed upstream content as `None` (or an empty map).
//! Implementations log the cause; callers treat "no data" as "source unavailable for
//! this attempt" and never as a fatal condition.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::fund::{CashRatio, FundListing, HoldingsReport, NavRecord, OfficialEstimate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Daily,
    FiveMinute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceRange {
    /// Inclusive calendar range.
    Between(NaiveDate, NaiveDate),
    /// The most recent `n` bars.
    Latest(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub time: NaiveDateTime,
    pub open: Option<f64>,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexClose {
    pub date: NaiveDate,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveQuote {
    pub price: f64,
    pub prior_close: f64,
}

impl LiveQuote {
    /// Percent change against the prior close, if the prior close is usable.
    pub fn change_percent(&self) -> Option<f64> {
        (self.prior_close > 0.0).then(|| (self.price - self.prior_close) / self.prior_close * 100.0)
    }
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Latest disclosed holdings published in `year_hint`.
    async fn holdings(&self, code: &str, year_hint: i32) -> Option<HoldingsReport>;

    async fn cash_ratio(&self, code: &str) -> Option<CashRatio>;

    /// NAV history ordered by date ascending.
    async fn nav_history(&self, code: &str) -> Option<Vec<NavRecord>>;

    async fn fund_profile(&self, code: &str) -> Option<FundListing>;

    /// Maps a feeder fund to the index vehicle it invests in.
    async fn resolve_feeder_target(&self, code: &str, name: &str) -> Option<String>;

    /// Bars ordered by time ascending.
    async fn price_history(
        &self,
        symbol: &str,
        granularity: Granularity,
        range: PriceRange,
    ) -> Option<Vec<PriceBar>>;

    async fn live_quotes(&self, symbols: &[String]) -> HashMap<String, LiveQuote>;

    /// Daily closes ordered by date ascending.
    async fn index_history(&self, benchmark: &str, range: PriceRange) -> Option<Vec<IndexClose>>;

    async fn official_estimate(&self, _code: &str) -> Option<OfficialEstimate> {
        None
    }

    /// Industry of a listed stock.
    async fn stock_industry(&self, _symbol: &str) -> Option<String> {
        None
    }
}
