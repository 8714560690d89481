//! Per-fund, per-day series of intraday estimates.

use crate::core::clock::Clock;
use crate::core::error::ValuationError;
use crate::core::fund::{EstimateSource, Holding, validate_fund_code};
use crate::core::market::{Granularity, MarketDataProvider, PriceBar, PriceRange};
use crate::snapshot::SnapshotService;
use crate::state::{AppState, Section};
use crate::valuation::{estimate_return, round4};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fewer points than this for today triggers a backfill.
const BACKFILL_THRESHOLD: usize = 10;
/// Enough 5-minute bars to cover the latest session of any market.
const MINUTE_BAR_LOOKBACK: usize = 400;
const DAILY_BAR_LOOKBACK: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntradayPoint {
    /// Exchange-local `HH:MM`.
    pub time: String,
    /// Estimated return, percent.
    pub value: f64,
    #[serde(default)]
    pub source: EstimateSource,
}

/// Points for one day, ordered by time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntradaySeries {
    pub date: NaiveDate,
    pub points: Vec<IntradayPoint>,
}

/// Bars fetched for one holding.
#[derive(Debug, Clone, Default)]
pub struct SymbolBars {
    pub minute: Vec<PriceBar>,
    pub daily: Vec<PriceBar>,
}

/// Canonical `HH:MM` form of a time label.
pub fn normalize_time(time: &str) -> Result<String, ValuationError> {
    NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map(|t| t.format("%H:%M").to_string())
        .map_err(|_| ValuationError::Validation(format!("time must be HH:MM, got '{time}'")))
}

/// Inserts or overwrites the point at `point.time`, keeping `points` sorted.
pub fn upsert_point(points: &mut Vec<IntradayPoint>, point: IntradayPoint) {
    match points.binary_search_by(|p| p.time.cmp(&point.time)) {
        Ok(index) => points[index] = point,
        Err(index) => points.insert(index, point),
    }
}

/// Percent change per `HH:MM` for one symbol on its own latest bar date.
fn symbol_changes(bars: &SymbolBars) -> Option<(NaiveDate, BTreeMap<String, f64>)> {
    let target = bars.minute.iter().map(|b| b.time.date()).max()?;
    let day_bars: Vec<&PriceBar> = bars
        .minute
        .iter()
        .filter(|b| b.time.date() == target)
        .collect();

    let last_daily = bars.daily.last()?;
    let prior_close = if last_daily.time.date() == target {
        match bars.daily.len() {
            n if n >= 2 => bars.daily[n - 2].close,
            _ => day_bars.first()?.open?,
        }
    } else {
        last_daily.close
    };
    if prior_close <= 0.0 {
        return None;
    }

    let changes = day_bars
        .iter()
        .map(|b| {
            (
                b.time.format("%H:%M").to_string(),
                (b.close - prior_close) / prior_close * 100.0,
            )
        })
        .collect();
    Some((target, changes))
}

/// Rebuilds a day of holdings-based points from 5-minute bars.
///
/// The series is dated with the latest bar date across all symbols.
pub fn reconstruct_series(
    holdings: &[Holding],
    cash_ratio: Option<f64>,
    bars: &HashMap<String, SymbolBars>,
) -> Option<IntradaySeries> {
    let mut latest: Option<NaiveDate> = None;
    let mut per_symbol: HashMap<&str, BTreeMap<String, f64>> = HashMap::new();
    for holding in holdings {
        let Some((date, changes)) = bars.get(&holding.symbol).and_then(symbol_changes) else {
            continue;
        };
        latest = latest.max(Some(date));
        per_symbol.insert(holding.symbol.as_str(), changes);
    }
    let date = latest?;

    let times: BTreeSet<&String> = per_symbol.values().flat_map(|c| c.keys()).collect();
    let points: Vec<IntradayPoint> = times
        .into_iter()
        .filter_map(|time| {
            let changes: HashMap<String, f64> = per_symbol
                .iter()
                .filter_map(|(symbol, c)| c.get(time).map(|v| (symbol.to_string(), *v)))
                .collect();
            let estimate = estimate_return(holdings, &changes, cash_ratio)?;
            Some(IntradayPoint {
                time: time.clone(),
                value: round4(estimate.value),
                source: EstimateSource::Holdings,
            })
        })
        .collect();

    (!points.is_empty()).then_some(IntradaySeries { date, points })
}

pub struct IntradayStore {
    state: Arc<AppState>,
    snapshots: Arc<SnapshotService>,
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
}

impl IntradayStore {
    pub fn new(
        state: Arc<AppState>,
        snapshots: Arc<SnapshotService>,
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state,
            snapshots,
            provider,
            clock,
        }
    }

    /// Records a point for today, replacing any point already at that time.
    pub async fn append_point(
        &self,
        code: &str,
        time: &str,
        value: f64,
        source: EstimateSource,
    ) -> Result<(), ValuationError> {
        let code = validate_fund_code(code)?;
        let time = normalize_time(time)?;
        if !value.is_finite() {
            return Err(ValuationError::Validation(format!(
                "value must be a finite number, got {value}"
            )));
        }

        let today = self.clock.today();
        let mut data = self.state.lock().await;
        let points = data
            .intraday
            .entry(code.clone())
            .or_default()
            .entry(today)
            .or_default();
        upsert_point(points, IntradayPoint { time, value, source });
        debug!("Recorded {} point for {} ({} today)", source, code, points.len());
        self.state.save(&data, Section::Intraday).await;
        Ok(())
    }

    /// Today's series, backfilled when sparse. Falls back to the most recent stored day
    /// when today has nothing.
    pub async fn get_today(&self, code: &str) -> Result<IntradaySeries, ValuationError> {
        let code = validate_fund_code(code)?;
        let today = self.clock.today();

        if self.points_on(&code, today).await.len() < BACKFILL_THRESHOLD {
            self.reconstruct_from_minute_bars(&code).await;
        }

        let points = self.points_on(&code, today).await;
        if !points.is_empty() {
            return Ok(IntradaySeries {
                date: today,
                points,
            });
        }

        let data = self.state.lock().await;
        let latest = data
            .intraday
            .get(&code)
            .and_then(|days| days.iter().rev().find(|(_, points)| !points.is_empty()));
        Ok(match latest {
            Some((date, points)) => {
                info!("No intraday points for {} today, returning {}", code, date);
                IntradaySeries {
                    date: *date,
                    points: points.clone(),
                }
            }
            None => IntradaySeries {
                date: today,
                points: Vec::new(),
            },
        })
    }

    async fn points_on(&self, code: &str, date: NaiveDate) -> Vec<IntradayPoint> {
        let data = self.state.lock().await;
        data.intraday
            .get(code)
            .and_then(|days| days.get(&date))
            .cloned()
            .unwrap_or_default()
    }

    /// Rebuilds the latest session from 5-minute bars of the current holdings and stores
    /// it. Official-feed points at times the rebuild does not cover are kept.
    pub async fn reconstruct_from_minute_bars(&self, code: &str) -> Option<IntradaySeries> {
        let snapshot = match self.snapshots.get_or_refresh(code).await {
            Ok(served) => served.snapshot,
            Err(e) => {
                warn!("Cannot backfill {}: {}", code, e);
                return None;
            }
        };
        info!(
            "Backfilling intraday history for {} from {} holdings",
            code,
            snapshot.holdings.len()
        );

        let mut bars = HashMap::new();
        for holding in &snapshot.holdings {
            let minute = self
                .provider
                .price_history(
                    &holding.symbol,
                    Granularity::FiveMinute,
                    PriceRange::Latest(MINUTE_BAR_LOOKBACK),
                )
                .await;
            let daily = self
                .provider
                .price_history(
                    &holding.symbol,
                    Granularity::Daily,
                    PriceRange::Latest(DAILY_BAR_LOOKBACK),
                )
                .await;
            match (minute, daily) {
                (Some(minute), Some(daily)) if !minute.is_empty() && !daily.is_empty() => {
                    bars.insert(holding.symbol.clone(), SymbolBars { minute, daily });
                }
                _ => debug!("No bars for {} in {}", holding.symbol, code),
            }
        }

        let Some(series) = reconstruct_series(&snapshot.holdings, snapshot.cash_ratio, &bars)
        else {
            warn!("No historical 5-minute data for any holding of {}", code);
            return None;
        };

        let mut data = self.state.lock().await;
        let day = data
            .intraday
            .entry(code.to_string())
            .or_default()
            .entry(series.date)
            .or_default();
        let covered: BTreeSet<&str> = series.points.iter().map(|p| p.time.as_str()).collect();
        day.retain(|p| p.source == EstimateSource::Eastmoney && !covered.contains(p.time.as_str()));
        for point in &series.points {
            upsert_point(day, point.clone());
        }
        info!(
            "Reconstructed {} points for {} on {}",
            series.points.len(),
            code,
            series.date
        );
        self.state.save(&data, Section::Intraday).await;
        Some(series)
    }
}
