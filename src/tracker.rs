//! Market-hours loop that records live estimates for every tracked fund.

use crate::core::clock::Clock;
use crate::core::config::TrackerConfig;
use crate::core::error::ValuationError;
use crate::core::fund::EstimateSource;
use crate::core::market::MarketDataProvider;
use crate::intraday::IntradayStore;
use crate::snapshot::SnapshotService;
use crate::state::AppState;
use crate::valuation::{estimate_return, round4};
use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const TRADING_WINDOWS: [((u32, u32), (u32, u32)); 2] = [((9, 15), (11, 30)), ((13, 0), (15, 0))];
const BUCKET_MINUTES: u32 = 5;

/// Weekday inside one of the trading windows, bounds inclusive. Holidays are not known.
pub fn is_market_time(now: NaiveDateTime) -> bool {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let time = now.time();
    TRADING_WINDOWS.iter().any(|((sh, sm), (eh, em))| {
        match (
            NaiveTime::from_hms_opt(*sh, *sm, 0),
            NaiveTime::from_hms_opt(*eh, *em, 0),
        ) {
            (Some(start), Some(end)) => start <= time && time <= end,
            _ => false,
        }
    })
}

/// `HH:MM` of the 5-minute bucket `now` falls in, rounding up. Minutes past :55 roll into
/// the next hour.
pub fn bucket_time(now: NaiveDateTime) -> String {
    let minutes = now.minute().div_ceil(BUCKET_MINUTES) * BUCKET_MINUTES;
    let hour_start = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    (hour_start + Duration::minutes(i64::from(minutes)))
        .format("%H:%M")
        .to_string()
}

pub struct BackgroundTracker {
    state: Arc<AppState>,
    snapshots: Arc<SnapshotService>,
    intraday: Arc<IntradayStore>,
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
}

impl BackgroundTracker {
    pub fn new(
        state: Arc<AppState>,
        snapshots: Arc<SnapshotService>,
        intraday: Arc<IntradayStore>,
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn Clock>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            state,
            snapshots,
            intraday,
            provider,
            clock,
            config,
        }
    }

    /// Runs until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            interval_secs = self.config.interval_secs,
            "Starting background intraday tracker"
        );
        tokio::pin!(shutdown);
        loop {
            let pause = if is_market_time(self.clock.now()) {
                match self.sweep_once().await {
                    Ok(recorded) => {
                        debug!("Sweep recorded {} points", recorded);
                        self.config.interval()
                    }
                    Err(e) => {
                        error!("Background tracker error: {:#}", e);
                        self.config.retry()
                    }
                }
            } else {
                self.config.interval()
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = &mut shutdown => {
                    info!("Background tracker stopping");
                    break;
                }
            }
        }
    }

    /// Records one point per tracked fund. Returns the number of points written.
    pub async fn sweep_once(&self) -> Result<usize> {
        let codes = self.state.lock().await.settings.fund_codes.clone();
        if codes.is_empty() {
            return Ok(0);
        }
        info!("Background tracking {} funds", codes.len());

        let mut recorded = 0;
        for (index, code) in codes.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.fund_delay()).await;
            }
            match self.track_fund(code).await {
                Ok(points) => recorded += points,
                Err(ValuationError::NotFound(reason)) => {
                    warn!("Skipping {} this sweep: {}", code, reason);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(recorded)
    }

    async fn track_fund(&self, code: &str) -> Result<usize, ValuationError> {
        let snapshot = self.snapshots.get_or_refresh(code).await?.snapshot;
        let now = self.clock.now();
        let mut recorded = 0;

        // Written first so a holdings point in the same minute takes precedence.
        if let Some(official) = self.provider.official_estimate(code).await
            && official.time.date() == now.date()
        {
            let time = official.time.format("%H:%M").to_string();
            self.intraday
                .append_point(code, &time, official.value, EstimateSource::Eastmoney)
                .await?;
            recorded += 1;
        }

        let symbols: Vec<String> = snapshot.holdings.iter().map(|h| h.symbol.clone()).collect();
        let changes: HashMap<String, f64> = self
            .provider
            .live_quotes(&symbols)
            .await
            .into_iter()
            .filter_map(|(symbol, quote)| quote.change_percent().map(|c| (symbol, c)))
            .collect();
        match estimate_return(&snapshot.holdings, &changes, snapshot.cash_ratio) {
            Some(estimate) => {
                self.intraday
                    .append_point(
                        code,
                        &bucket_time(now),
                        round4(estimate.value),
                        EstimateSource::Holdings,
                    )
                    .await?;
                recorded += 1;
            }
            None => debug!("No quotes matched holdings of {}", code),
        }
        Ok(recorded)
    }
}
