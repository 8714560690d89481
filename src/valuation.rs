//! Holdings-weighted valuation model.
//!
//! The baseline estimate scales the weight-normalised return of the holdings that have a
//! price change by the fund's equity ratio ("full-position scaling"). Holdings without a
//! price change are excluded from both numerator and denominator, so the disclosed
//! top-ten are assumed to stand for the whole non-cash portion of the fund.

use crate::core::fund::Holding;
use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

pub const STRATEGY_VERSION: &str = "improved_v1";

/// Holdings reports younger than this are fully trusted.
const FRESH_DAYS: i64 = 45;
/// Staleness at which the freshness discount bottoms out.
const STALE_DAYS: i64 = 365;
const FRESHNESS_FLOOR: f64 = 0.65;

const INDEX_CONFIDENCE: f64 = 0.25;
const MIXED_CONFIDENCE: f64 = 0.65;
const DEFAULT_CONFIDENCE: f64 = 0.8;

pub const DEFAULT_BENCHMARK: &str = "1.000300";

/// Keyword to benchmark index, first match wins.
const BENCHMARK_RULES: &[(&str, &str)] = &[
    ("中证1000", "1.000852"),
    ("中证500", "1.000905"),
    ("创业板", "0.399006"),
    ("科创50", "1.000688"),
    ("科创板", "1.000688"),
    ("上证50", "1.000016"),
    ("恒生", "100.HSI"),
    ("纳斯达克", "100.NDX"),
    ("标普500", "100.SPX"),
    ("沪深300", DEFAULT_BENCHMARK),
];

static QUARTER_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})\s*年\s*([1-4])\s*季度").expect("valid regex"));

/// Result of one valuation epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Sum of the weights of holdings with a price change.
    pub matched_weight: f64,
    /// Weight-normalised holdings return, percent.
    pub raw_equity_return: f64,
    pub equity_ratio: f64,
    /// Estimated fund return, percent.
    pub value: f64,
}

/// Fraction of assets not held in cash, bounded to `[0, 1]`.
pub fn equity_ratio(cash_ratio: Option<f64>) -> f64 {
    let cash = cash_ratio.unwrap_or(0.0).max(0.0);
    (1.0 - cash / 100.0).clamp(0.0, 1.0)
}

/// Baseline estimate from holdings and per-symbol percent price changes.
///
/// Returns `None` when no holding has a positive matched weight; the caller must treat
/// that epoch as having no data.
pub fn estimate_return(
    holdings: &[Holding],
    changes: &HashMap<String, f64>,
    cash_ratio: Option<f64>,
) -> Option<Estimate> {
    let (matched_weight, contribution) = holdings
        .iter()
        .filter_map(|h| changes.get(&h.symbol).map(|change| (h.weight, *change)))
        .filter(|(_, change)| change.is_finite())
        .fold((0.0, 0.0), |(weight, contrib), (w, change)| {
            (weight + w, contrib + w * change)
        });

    if matched_weight <= 0.0 {
        return None;
    }

    let equity_ratio = equity_ratio(cash_ratio);
    let raw_equity_return = contribution / matched_weight;
    Some(Estimate {
        matched_weight,
        raw_equity_return,
        equity_ratio,
        value: raw_equity_return * equity_ratio,
    })
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Benchmark index inferred from the fund's name, then its type.
pub fn infer_benchmark(name: &str, fund_type: &str) -> &'static str {
    [name, fund_type]
        .iter()
        .find_map(|text| {
            BENCHMARK_RULES
                .iter()
                .find(|(keyword, _)| text.contains(keyword))
                .map(|(_, symbol)| *symbol)
        })
        .unwrap_or(DEFAULT_BENCHMARK)
}

/// How much the disclosed top-ten holdings can be trusted for this kind of fund.
pub fn type_confidence(fund_type: &str, name: &str) -> f64 {
    let is_index = |text: &str| text.contains("指数") || text.to_uppercase().contains("ETF");
    if is_index(fund_type) || is_index(name) {
        INDEX_CONFIDENCE
    } else if fund_type.contains("混合") {
        MIXED_CONFIDENCE
    } else {
        DEFAULT_CONFIDENCE
    }
}

/// Parses a report period such as `2024-12-31` or `2024年4季度股票投资明细` into the
/// period's end date.
pub fn parse_report_date(label: &str) -> Option<NaiveDate> {
    let label = label.trim();
    if let Some(date) = label
        .get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
    {
        return Some(date);
    }
    let caps = QUARTER_LABEL.captures(label)?;
    let year: i32 = caps[1].parse().ok()?;
    let (month, day) = match &caps[2] {
        "1" => (3, 31),
        "2" => (6, 30),
        "3" => (9, 30),
        _ => (12, 31),
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Confidence discount for an ageing holdings report: 1.0 up to 45 days, then linear
/// down to 0.65 at one year. An unknown report date gets the floor.
pub fn freshness(holdings_date: Option<NaiveDate>, as_of: NaiveDate) -> f64 {
    let Some(holdings_date) = holdings_date else {
        return FRESHNESS_FLOOR;
    };
    let staleness = (as_of - holdings_date).num_days();
    if staleness <= FRESH_DAYS {
        return 1.0;
    }
    if staleness >= STALE_DAYS {
        return FRESHNESS_FLOOR;
    }
    let progress = (staleness - FRESH_DAYS) as f64 / (STALE_DAYS - FRESH_DAYS) as f64;
    1.0 - (1.0 - FRESHNESS_FLOOR) * progress
}

pub fn holdings_weight(
    fund_type: &str,
    name: &str,
    holdings_date: Option<NaiveDate>,
    as_of: NaiveDate,
) -> f64 {
    (type_confidence(fund_type, name) * freshness(holdings_date, as_of)).clamp(0.0, 1.0)
}

/// Blends the baseline with a benchmark-index proxy. Without a benchmark return the
/// proxy is the baseline itself, so the blend collapses to the baseline.
pub fn improved_estimate(
    baseline: &Estimate,
    benchmark_return: Option<f64>,
    holdings_weight: f64,
) -> f64 {
    let proxy = benchmark_return
        .filter(|r| r.is_finite())
        .map_or(baseline.value, |r| r * baseline.equity_ratio);
    baseline.value * holdings_weight + proxy * (1.0 - holdings_weight)
}
