//! Replays the valuation model over recent published NAV history.

use crate::core::clock::Clock;
use crate::core::fund::{Holding, NavRecord};
use crate::core::market::{Granularity, IndexClose, MarketDataProvider, PriceBar, PriceRange};
use crate::snapshot::SnapshotService;
use crate::state::{AppState, Section, StateData};
use crate::valuation::{
    STRATEGY_VERSION, estimate_return, holdings_weight, improved_estimate, parse_report_date,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Calendar days of price history fetched before the first NAV date.
const HISTORY_PADDING_DAYS: i64 = 10;
/// Partial sweep results are persisted after this many funds.
const SAVE_EVERY: usize = 5;

/// Error statistics over a set of signed errors (estimate minus actual, percent).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub mae: f64,
    pub rmse: f64,
    /// Percent of samples within 0.2 points.
    pub hit_rate_02: f64,
    /// Percent of samples within 0.5 points.
    pub hit_rate_05: f64,
    pub max_err: f64,
    pub bias: f64,
}

impl BacktestMetrics {
    pub fn from_errors(errors: &[f64]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        let n = errors.len() as f64;
        let abs: Vec<f64> = errors.iter().map(|e| e.abs()).collect();
        let within = |limit: f64| abs.iter().filter(|e| **e <= limit).count() as f64 / n * 100.0;
        Some(Self {
            mae: abs.iter().sum::<f64>() / n,
            rmse: (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt(),
            hit_rate_02: within(0.2),
            hit_rate_05: within(0.5),
            max_err: abs.iter().copied().fold(0.0, f64::max),
            bias: errors.iter().sum::<f64>() / n,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub code: String,
    pub name: String,
    pub strategy_version: String,
    /// Metrics of the improved estimate.
    #[serde(flatten)]
    pub metrics: BacktestMetrics,
    pub baseline: BacktestMetrics,
    pub samples: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestJobState {
    pub running: bool,
    pub date: Option<NaiveDate>,
    /// Funds covered by the sweep, in sweep order.
    #[serde(default)]
    pub codes: Vec<String>,
    /// Bumped for every new sweep; only the latest sweep updates this state.
    #[serde(default)]
    pub generation: u64,
    pub total: usize,
    pub completed: usize,
    pub started_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl BacktestJobState {
    /// Whether a finished sweep for `date` covered exactly `codes`.
    fn swept(&self, date: NaiveDate, codes: &[String]) -> bool {
        !self.running
            && self.date == Some(date)
            && self.completed == self.total
            && self.codes.len() == codes.len()
            && codes.iter().all(|c| self.codes.contains(c))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub date: NaiveDate,
    pub results: Vec<BacktestResult>,
    pub pending: bool,
    pub total: usize,
    pub completed: usize,
}

/// Inputs for replaying one fund.
pub struct Replay<'a> {
    pub holdings: &'a [Holding],
    pub cash_ratio: Option<f64>,
    pub fund_type: &'a str,
    pub name: &'a str,
    pub holdings_date: Option<NaiveDate>,
    /// Published NAV records; those without a daily return are skipped.
    pub nav: &'a [NavRecord],
    /// Symbol to date to percent return.
    pub stock_returns: &'a HashMap<String, HashMap<NaiveDate, f64>>,
    pub benchmark_returns: &'a HashMap<NaiveDate, f64>,
}

/// Improved and baseline metrics plus the number of dates that produced a sample.
pub fn replay(input: &Replay<'_>) -> Option<(BacktestMetrics, BacktestMetrics, usize)> {
    let mut baseline_errors = Vec::new();
    let mut improved_errors = Vec::new();

    for record in input.nav {
        let Some(actual) = record.daily_return else {
            continue;
        };
        let changes: HashMap<String, f64> = input
            .holdings
            .iter()
            .filter_map(|h| {
                input
                    .stock_returns
                    .get(&h.symbol)
                    .and_then(|returns| returns.get(&record.date))
                    .map(|r| (h.symbol.clone(), *r))
            })
            .collect();
        let Some(baseline) = estimate_return(input.holdings, &changes, input.cash_ratio) else {
            debug!("No holdings match on {}, skipped", record.date);
            continue;
        };

        let weight = holdings_weight(input.fund_type, input.name, input.holdings_date, record.date);
        let improved = improved_estimate(
            &baseline,
            input.benchmark_returns.get(&record.date).copied(),
            weight,
        );
        baseline_errors.push(baseline.value - actual);
        improved_errors.push(improved - actual);
    }

    let samples = improved_errors.len();
    Some((
        BacktestMetrics::from_errors(&improved_errors)?,
        BacktestMetrics::from_errors(&baseline_errors)?,
        samples,
    ))
}

/// Close-to-close percent returns keyed by the later date.
pub fn daily_returns(closes: &[(NaiveDate, f64)]) -> HashMap<NaiveDate, f64> {
    closes
        .windows(2)
        .filter(|pair| pair[0].1 > 0.0)
        .map(|pair| (pair[1].0, (pair[1].1 / pair[0].1 - 1.0) * 100.0))
        .collect()
}

fn bar_closes(bars: &[PriceBar]) -> Vec<(NaiveDate, f64)> {
    bars.iter().map(|b| (b.time.date(), b.close)).collect()
}

fn index_closes(closes: &[IndexClose]) -> Vec<(NaiveDate, f64)> {
    closes.iter().map(|c| (c.date, c.close)).collect()
}

pub struct BacktestEngine {
    state: Arc<AppState>,
    snapshots: Arc<SnapshotService>,
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
    days: usize,
}

impl BacktestEngine {
    pub fn new(
        state: Arc<AppState>,
        snapshots: Arc<SnapshotService>,
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn Clock>,
        days: usize,
    ) -> Self {
        Self {
            state,
            snapshots,
            provider,
            clock,
            days,
        }
    }

    /// Backtests one fund over its last `days` published NAVs.
    pub async fn run_single_backtest(&self, code: &str) -> Option<BacktestResult> {
        let snapshot = match self.snapshots.get_or_refresh(code).await {
            Ok(served) => served.snapshot,
            Err(e) => {
                warn!("Backtest skipped for {}: {}", code, e);
                return None;
            }
        };
        let mut nav = self.provider.nav_history(code).await?;
        nav.sort_by_key(|r| r.date);
        let nav = &nav[nav.len().saturating_sub(self.days)..];
        let (first, last) = (nav.first()?.date, nav.last()?.date);
        let range = PriceRange::Between(first - Duration::days(HISTORY_PADDING_DAYS), last);

        let mut stock_returns = HashMap::new();
        for holding in &snapshot.holdings {
            match self
                .provider
                .price_history(&holding.symbol, Granularity::Daily, range)
                .await
            {
                Some(bars) => {
                    stock_returns.insert(holding.symbol.clone(), daily_returns(&bar_closes(&bars)));
                }
                None => debug!("No daily history for {}", holding.symbol),
            }
        }
        let benchmark_returns = self
            .provider
            .index_history(&snapshot.benchmark_symbol, range)
            .await
            .map(|closes| daily_returns(&index_closes(&closes)))
            .unwrap_or_default();

        let replay_input = Replay {
            holdings: &snapshot.holdings,
            cash_ratio: snapshot.cash_ratio,
            fund_type: &snapshot.fund_type,
            name: &snapshot.name,
            holdings_date: snapshot.holdings_date.as_deref().and_then(parse_report_date),
            nav,
            stock_returns: &stock_returns,
            benchmark_returns: &benchmark_returns,
        };
        let Some((metrics, baseline, samples)) = replay(&replay_input) else {
            warn!("Backtest for {} matched no historical dates", code);
            return None;
        };
        info!(
            "Backtest {}: {} samples, mae {:.4} (baseline {:.4})",
            code, samples, metrics.mae, baseline.mae
        );

        Some(BacktestResult {
            code: code.to_string(),
            name: snapshot.name,
            strategy_version: STRATEGY_VERSION.to_string(),
            metrics,
            baseline,
            samples,
        })
    }

    /// Today's report. Starts a background sweep when results are missing or `force` is
    /// set and no sweep for today is running, then returns whatever is cached.
    pub async fn report(self: &Arc<Self>, force: bool) -> BacktestReport {
        let today = self.clock.today();
        let now = self.clock.now();
        let mut data = self.state.lock().await;
        let codes = data.settings.fund_codes.clone();
        if codes.is_empty() {
            return BacktestReport {
                date: today,
                results: Vec::new(),
                pending: false,
                total: 0,
                completed: 0,
            };
        }

        let running_today = data.job.running && data.job.date == Some(today);
        let complete = data
            .backtests
            .get(&today)
            .is_some_and(|cached| codes.iter().all(|c| cached.contains_key(c)));
        // A finished sweep over the same funds is final even if some produced no result.
        let swept_today = data.job.swept(today, &codes);

        if !force && (complete || swept_today) {
            debug!("Returning cached backtest report");
            return self.collect(&data, &codes, today, false);
        }

        if !running_today {
            if force {
                data.backtests.remove(&today);
            }
            let generation = data.job.generation + 1;
            info!(
                "Starting backtest sweep {} over {} funds",
                generation,
                codes.len()
            );
            data.job = BacktestJobState {
                running: true,
                date: Some(today),
                codes: codes.clone(),
                generation,
                total: codes.len(),
                completed: 0,
                started_at: Some(now),
                updated_at: Some(now),
            };
            self.state.save(&data, Section::BacktestJob).await;
            let engine = Arc::clone(self);
            let sweep_codes = codes.clone();
            tokio::spawn(async move { engine.sweep(sweep_codes, today, generation).await });
        }

        self.collect(&data, &codes, today, true)
    }

    pub async fn job_state(&self) -> BacktestJobState {
        self.state.lock().await.job.clone()
    }

    fn collect(
        &self,
        data: &StateData,
        codes: &[String],
        date: NaiveDate,
        pending: bool,
    ) -> BacktestReport {
        let results: Vec<BacktestResult> = data
            .backtests
            .get(&date)
            .map(|cached| codes.iter().filter_map(|c| cached.get(c).cloned()).collect())
            .unwrap_or_default();
        let (total, completed) = if data.job.date == Some(date) {
            (data.job.total, data.job.completed)
        } else {
            (codes.len(), results.len())
        };
        BacktestReport {
            date,
            results,
            pending,
            total,
            completed,
        }
    }

    async fn sweep(self: Arc<Self>, codes: Vec<String>, date: NaiveDate, generation: u64) {
        for (index, code) in codes.iter().enumerate() {
            let result = self.run_single_backtest(code).await;

            let mut data = self.state.lock().await;
            if let Some(result) = result {
                data.backtests
                    .entry(date)
                    .or_default()
                    .insert(code.clone(), result);
            }
            if data.job.generation == generation {
                data.job.completed = index + 1;
                data.job.updated_at = Some(self.clock.now());
            }
            if (index + 1) % SAVE_EVERY == 0 {
                self.state.save(&data, Section::Backtest).await;
                self.state.save(&data, Section::BacktestJob).await;
            }
        }

        let mut data = self.state.lock().await;
        if data.job.generation == generation {
            data.job.running = false;
            data.job.updated_at = Some(self.clock.now());
        } else {
            debug!("Sweep {} for {} was superseded, job state left alone", generation, date);
        }
        data.prune_backtests(self.clock.today());
        self.state.save(&data, Section::Backtest).await;
        self.state.save(&data, Section::BacktestJob).await;
        info!(
            "Backtest sweep finished: {} of {} funds produced results",
            data.backtests.get(&date).map_or(0, |r| r.len()),
            codes.len()
        );
    }
}
