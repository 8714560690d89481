//! Fund domain types shared by the engines and providers

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use super::error::ValuationError;

/// Number of disclosed holdings kept per fund.
pub const MAX_HOLDINGS: usize = 10;

/// Validates a fund code: exactly six ASCII digits after trimming.
pub fn validate_fund_code(code: &str) -> Result<String, ValuationError> {
    let code = code.trim();
    if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(code.to_string())
    } else {
        Err(ValuationError::Validation(format!(
            "fund code must be 6 digits, got '{code}'"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundProfile {
    pub code: String,
    pub name: String,
    pub fund_type: String,
    pub benchmark_symbol: String,
}

/// Name and type as listed in the provider's fund directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundListing {
    pub code: String,
    pub name: String,
    pub fund_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub symbol: String,
    pub name: String,
    /// Percent of NAV.
    pub weight: f64,
    #[serde(default)]
    pub industry: Option<String>,
}

/// Holdings for the latest disclosed reporting period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingsReport {
    pub holdings: Vec<Holding>,
    pub report_period: Option<String>,
}

impl HoldingsReport {
    /// Drops non-positive weights, sorts descending by weight and keeps the top ten.
    pub fn normalized(mut self) -> Self {
        self.holdings.retain(|h| h.weight > 0.0 && !h.symbol.is_empty());
        self.holdings
            .sort_by(|a, b| b.weight.total_cmp(&a.weight));
        self.holdings.truncate(MAX_HOLDINGS);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashRatio {
    pub percent: f64,
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavRecord {
    pub date: NaiveDate,
    pub nav: f64,
    pub daily_return: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavMetrics {
    pub ret1m: Option<f64>,
    pub ret3m: Option<f64>,
    pub ret1y: Option<f64>,
    pub sharpe: Option<f64>,
    pub max_drawdown: Option<f64>,
}

/// Everything the valuation engine needs about one fund, cached per code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationSnapshot {
    pub code: String,
    pub name: String,
    pub fund_type: String,
    pub benchmark_symbol: String,
    pub holdings_date: Option<String>,
    /// Code of the vehicle whose holdings were used, when redirected from a feeder fund.
    #[serde(default)]
    pub holdings_source: Option<String>,
    pub cash_ratio: Option<f64>,
    pub base_nav: Option<f64>,
    pub base_nav_date: Option<NaiveDate>,
    pub nav_metrics: Option<NavMetrics>,
    pub holdings: Vec<Holding>,
    pub actual_zzl: Option<f64>,
    pub actual_date: Option<NaiveDate>,
    pub actual_nav: Option<f64>,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EstimateSource {
    /// Estimate published by the official feed.
    Eastmoney,
    /// Estimate computed here from disclosed holdings.
    #[default]
    Holdings,
}

impl Display for EstimateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EstimateSource::Eastmoney => write!(f, "eastmoney"),
            EstimateSource::Holdings => write!(f, "holdings"),
        }
    }
}

impl FromStr for EstimateSource {
    type Err = ValuationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eastmoney" => Ok(EstimateSource::Eastmoney),
            "holdings" => Ok(EstimateSource::Holdings),
            other => Err(ValuationError::Validation(format!(
                "unknown estimate source '{other}'"
            ))),
        }
    }
}

/// Live estimate published by the official feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfficialEstimate {
    pub value: f64,
    pub time: NaiveDateTime,
}
