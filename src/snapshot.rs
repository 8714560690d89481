//! Snapshot cache with NAV freshness checks and failure backoff.

use crate::accuracy::AccuracyTracker;
use crate::backoff::{BackoffPolicy, BackoffState};
use crate::core::analytics::compute_nav_metrics;
use crate::core::clock::Clock;
use crate::core::error::ValuationError;
use crate::core::fund::{FundProfile, HoldingsReport, NavRecord, ValuationSnapshot, validate_fund_code};
use crate::core::market::MarketDataProvider;
use crate::state::{AppState, CacheEntry, Section};
use crate::valuation::infer_benchmark;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const CACHE_TTL_DAYS: i64 = 7;
const NAV_CHECK_INTERVAL_MINUTES: i64 = 30;
/// Official NAVs are assumed published by this exchange-local hour.
const NAV_REFRESH_AFTER_HOUR: u32 = 18;
/// Holdings are looked up for the current year and this many before it.
const HOLDINGS_YEAR_LOOKBACK: i32 = 2;

/// A snapshot as served to a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ServedSnapshot {
    pub snapshot: ValuationSnapshot,
    /// Expired data served because a refresh was suppressed or failed.
    pub stale: bool,
    pub cached_at: NaiveDateTime,
}

impl ServedSnapshot {
    fn from_entry(entry: &CacheEntry, stale: bool) -> Self {
        Self {
            snapshot: entry.snapshot.clone(),
            stale,
            cached_at: entry.fetched_at,
        }
    }
}

/// Whether a fresh cache entry's NAV fields should be re-fetched.
///
/// Never-checked entries always refresh. Otherwise the last check must be older than 30
/// minutes, the cached NAV must not already be today's, and it must be past 18:00.
pub fn should_refresh_nav(
    base_nav_date: Option<NaiveDate>,
    nav_checked_at: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> bool {
    let Some(checked_at) = nav_checked_at else {
        return true;
    };
    now - checked_at > Duration::minutes(NAV_CHECK_INTERVAL_MINUTES)
        && base_nav_date != Some(now.date())
        && now.hour() >= NAV_REFRESH_AFTER_HOUR
}

/// Copies the latest NAV record and derived metrics into `snapshot`.
fn apply_nav_history(snapshot: &mut ValuationSnapshot, history: &[NavRecord]) {
    let Some(last) = history.last() else {
        return;
    };
    snapshot.base_nav = Some(last.nav);
    snapshot.base_nav_date = Some(last.date);
    snapshot.nav_metrics = compute_nav_metrics(history);
    snapshot.actual_zzl = last.daily_return;
    snapshot.actual_date = Some(last.date);
    snapshot.actual_nav = Some(last.nav);
}

pub struct SnapshotService {
    state: Arc<AppState>,
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
    accuracy: AccuracyTracker,
    policy: BackoffPolicy,
}

impl SnapshotService {
    pub fn new(
        state: Arc<AppState>,
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn Clock>,
        accuracy: AccuracyTracker,
    ) -> Self {
        Self {
            state,
            provider,
            clock,
            accuracy,
            policy: BackoffPolicy::default(),
        }
    }

    /// Serves the cached snapshot for `code`, refreshing it when due.
    ///
    /// Fails with `NotFound` only when there is no cached snapshot to fall back on.
    #[instrument(skip(self))]
    pub async fn get_or_refresh(&self, code: &str) -> Result<ServedSnapshot, ValuationError> {
        let code = validate_fund_code(code)?;
        let now = self.clock.now();
        let (cached, backoff) = {
            let data = self.state.lock().await;
            (
                data.valuations.get(&code).cloned(),
                data.backoff.get(&code).copied(),
            )
        };

        if let Some(entry) = &cached
            && now < entry.expires_at
        {
            if should_refresh_nav(entry.snapshot.base_nav_date, entry.nav_checked_at, now) {
                return Ok(self.refresh_nav(&code, entry.clone()).await);
            }
            debug!("Serving fresh snapshot for {}", code);
            return Ok(ServedSnapshot::from_entry(entry, false));
        }

        if let Some(backoff) = backoff
            && backoff.is_active(now)
        {
            return match &cached {
                Some(entry) => {
                    debug!("Backoff active for {}, serving stale snapshot", code);
                    Ok(ServedSnapshot::from_entry(entry, true))
                }
                None => Err(ValuationError::NotFound(format!(
                    "no data for {code}, next retry after {}",
                    backoff.next_retry_at.format("%H:%M:%S")
                ))),
            };
        }

        match self.fetch_snapshot(&code).await {
            Some(snapshot) => Ok(self.store_snapshot(&code, snapshot).await),
            None => {
                let backoff = self.register_failure(&code, now).await;
                match &cached {
                    Some(entry) => {
                        info!("Using stale snapshot for {} as the refresh failed", code);
                        Ok(ServedSnapshot::from_entry(entry, true))
                    }
                    None => Err(ValuationError::NotFound(format!(
                        "no holdings found for {code}, next retry after {}",
                        backoff.next_retry_at.format("%H:%M:%S")
                    ))),
                }
            }
        }
    }

    /// Resolves and caches the fund's profile.
    pub async fn profile(&self, code: &str) -> Option<FundProfile> {
        if let Some(profile) = self.state.lock().await.profiles.get(code) {
            return Some(profile.clone());
        }

        let listing = self.provider.fund_profile(code).await?;
        let profile = FundProfile {
            code: code.to_string(),
            benchmark_symbol: infer_benchmark(&listing.name, &listing.fund_type).to_string(),
            name: listing.name,
            fund_type: listing.fund_type,
        };
        debug!(
            "Resolved profile for {}: {} ({}), benchmark {}",
            code, profile.name, profile.fund_type, profile.benchmark_symbol
        );

        let mut data = self.state.lock().await;
        data.profiles.insert(code.to_string(), profile.clone());
        self.state.save(&data, Section::Profiles).await;
        Some(profile)
    }

    async fn refresh_nav(&self, code: &str, entry: CacheEntry) -> ServedSnapshot {
        debug!("Refreshing NAV for {}", code);
        let history = self.provider.nav_history(code).await;
        let now = self.clock.now();

        let served = {
            let mut data = self.state.lock().await;
            let entry = data.valuations.entry(code.to_string()).or_insert(entry);
            if let Some(history) = &history {
                apply_nav_history(&mut entry.snapshot, history);
            }
            entry.nav_checked_at = Some(now);
            entry.fetched_at = now;
            entry.expires_at = now + Duration::days(CACHE_TTL_DAYS);
            let served = ServedSnapshot::from_entry(entry, false);
            self.state.save(&data, Section::Valuation).await;
            served
        };

        self.record_actual(&served.snapshot).await;
        served
    }

    /// Full re-fetch. `None` when no holdings could be obtained.
    async fn fetch_snapshot(&self, code: &str) -> Option<ValuationSnapshot> {
        info!("Fetching snapshot for {}", code);
        let profile = self.profile(code).await;
        let (name, fund_type) = profile
            .as_ref()
            .map(|p| (p.name.clone(), p.fund_type.clone()))
            .unwrap_or_default();

        let (report, holdings_source) = self.holdings_with_redirect(code, &name).await?;
        let cash = self.provider.cash_ratio(code).await;
        let history = self.provider.nav_history(code).await;

        let holdings_date = report
            .report_period
            .clone()
            .or_else(|| cash.and_then(|c| c.as_of).map(|d| d.to_string()));
        let mut snapshot = ValuationSnapshot {
            code: code.to_string(),
            benchmark_symbol: profile
                .map(|p| p.benchmark_symbol)
                .unwrap_or_else(|| infer_benchmark(&name, &fund_type).to_string()),
            name,
            fund_type,
            holdings_date,
            holdings_source,
            cash_ratio: cash.map(|c| c.percent.clamp(0.0, 100.0)),
            base_nav: None,
            base_nav_date: None,
            nav_metrics: None,
            holdings: report.holdings,
            actual_zzl: None,
            actual_date: None,
            actual_nav: None,
        };
        if let Some(history) = &history {
            apply_nav_history(&mut snapshot, history);
        }
        Some(snapshot)
    }

    /// Tries the fund itself, then once its feeder target.
    async fn holdings_with_redirect(
        &self,
        code: &str,
        name: &str,
    ) -> Option<(HoldingsReport, Option<String>)> {
        if let Some(report) = self.latest_holdings(code).await {
            return Some((report, None));
        }
        if name.is_empty() {
            return None;
        }

        let target = self
            .provider
            .resolve_feeder_target(code, name)
            .await
            .filter(|target| target != code)?;
        info!("Redirecting holdings fetch from {} to target fund {}", code, target);
        let report = self.latest_holdings(&target).await?;
        Some((report, Some(target)))
    }

    async fn latest_holdings(&self, code: &str) -> Option<HoldingsReport> {
        let current_year = self.clock.today().year();
        for year in (current_year - HOLDINGS_YEAR_LOOKBACK..=current_year).rev() {
            match self.provider.holdings(code, year).await {
                Some(report) => {
                    let mut report = report.normalized();
                    if !report.holdings.is_empty() {
                        for holding in report.holdings.iter_mut().filter(|h| h.industry.is_none()) {
                            holding.industry = self.provider.stock_industry(&holding.symbol).await;
                        }
                        return Some(report);
                    }
                }
                None => debug!("No holdings for {} in {}", code, year),
            }
        }
        warn!("No holdings found for {}", code);
        None
    }

    async fn store_snapshot(&self, code: &str, snapshot: ValuationSnapshot) -> ServedSnapshot {
        let now = self.clock.now();
        let entry = CacheEntry {
            snapshot,
            fetched_at: now,
            expires_at: now + Duration::days(CACHE_TTL_DAYS),
            nav_checked_at: Some(now),
        };
        let served = ServedSnapshot::from_entry(&entry, false);
        {
            let mut data = self.state.lock().await;
            data.valuations.insert(code.to_string(), entry);
            data.backoff.remove(code);
            self.state.save(&data, Section::Valuation).await;
        }
        self.record_actual(&served.snapshot).await;
        served
    }

    async fn register_failure(&self, code: &str, now: NaiveDateTime) -> BackoffState {
        let mut data = self.state.lock().await;
        let state = BackoffState::register_failure(data.backoff.get(code).copied(), &self.policy, now);
        data.backoff.insert(code.to_string(), state);
        warn!(
            "Snapshot fetch failed for {} ({} consecutive), backing off until {}",
            code, state.failure_count, state.next_retry_at
        );
        state
    }

    async fn record_actual(&self, snapshot: &ValuationSnapshot) {
        if let (Some(actual), Some(date)) = (snapshot.actual_zzl, snapshot.actual_date) {
            self.accuracy
                .record_accuracy(&snapshot.code, date, actual)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::test_support::{FakeProvider, at, holding, listing, nav};
    use std::sync::atomic::Ordering;

    fn service(provider: Arc<FakeProvider>, clock: Arc<ManualClock>) -> SnapshotService {
        let state = Arc::new(AppState::in_memory());
        SnapshotService::new(
            state.clone(),
            provider,
            clock,
            AccuracyTracker::new(state),
        )
    }

    fn fund_provider() -> FakeProvider {
        let provider = FakeProvider::default();
        provider.add_listing(listing("161725", "招商中证白酒指数A", "指数型-股票"));
        provider.add_holdings("161725", vec![holding("600519", 15.0), holding("000858", 12.0)]);
        provider.add_nav(
            "161725",
            vec![nav(2024, 3, 1, 1.00, Some(0.5)), nav(2024, 3, 4, 1.01, Some(1.0))],
        );
        provider
    }

    #[test]
    fn test_should_refresh_nav_rules() {
        let evening = at(2024, 3, 5, 19, 0);
        let afternoon = at(2024, 3, 5, 14, 0);
        let yesterday = NaiveDate::from_ymd_opt(2024, 3, 4);

        assert!(should_refresh_nav(yesterday, None, afternoon));
        assert!(should_refresh_nav(yesterday, Some(at(2024, 3, 5, 18, 0)), evening));
        assert!(!should_refresh_nav(yesterday, Some(at(2024, 3, 5, 18, 45)), evening));
        assert!(!should_refresh_nav(yesterday, Some(at(2024, 3, 5, 10, 0)), afternoon));
        assert!(!should_refresh_nav(
            Some(evening.date()),
            Some(at(2024, 3, 5, 10, 0)),
            evening
        ));
    }

    #[tokio::test]
    async fn test_full_fetch_then_cache_hit() {
        let provider = Arc::new(fund_provider());
        let clock = Arc::new(ManualClock::new(at(2024, 3, 5, 10, 0)));
        let service = service(provider.clone(), clock.clone());

        let served = service.get_or_refresh("161725").await.unwrap();
        assert!(!served.stale);
        assert_eq!(served.snapshot.name, "招商中证白酒指数A");
        assert_eq!(served.snapshot.benchmark_symbol, "1.000300");
        assert_eq!(served.snapshot.holdings[0].symbol, "600519");
        assert_eq!(served.snapshot.actual_zzl, Some(1.0));
        assert_eq!(served.snapshot.base_nav_date, NaiveDate::from_ymd_opt(2024, 3, 4));

        clock.advance(Duration::hours(1));
        let again = service.get_or_refresh("161725").await.unwrap();
        assert_eq!(again.cached_at, served.cached_at);
        assert_eq!(provider.holdings_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_holdings_carry_stock_industry() {
        let provider = fund_provider();
        provider.add_industry("600519", "酿酒行业");
        let provider = Arc::new(provider);
        let service = service(provider.clone(), Arc::new(ManualClock::new(at(2024, 3, 5, 10, 0))));

        let served = service.get_or_refresh("161725").await.unwrap();

        let industries: Vec<Option<&str>> = served
            .snapshot
            .holdings
            .iter()
            .map(|h| h.industry.as_deref())
            .collect();
        assert_eq!(industries, vec![Some("酿酒行业"), None]);
        assert_eq!(provider.industry_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_code_is_rejected() {
        let service = service(
            Arc::new(FakeProvider::default()),
            Arc::new(ManualClock::new(at(2024, 3, 5, 10, 0))),
        );
        assert!(matches!(
            service.get_or_refresh("abc").await,
            Err(ValuationError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_fund_backs_off() {
        let provider = Arc::new(FakeProvider::default());
        let clock = Arc::new(ManualClock::new(at(2024, 3, 5, 10, 0)));
        let service = service(provider.clone(), clock.clone());

        assert!(matches!(
            service.get_or_refresh("000001").await,
            Err(ValuationError::NotFound(_))
        ));
        let calls = provider.holdings_calls.load(Ordering::SeqCst);

        // suppressed inside the ten second window
        clock.advance(Duration::seconds(5));
        assert!(service.get_or_refresh("000001").await.is_err());
        assert_eq!(provider.holdings_calls.load(Ordering::SeqCst), calls);

        clock.advance(Duration::seconds(6));
        assert!(service.get_or_refresh("000001").await.is_err());
        assert!(provider.holdings_calls.load(Ordering::SeqCst) > calls);
        let data = service.state.lock().await;
        assert_eq!(data.backoff["000001"].failure_count, 2);
    }

    #[tokio::test]
    async fn test_expired_entry_served_stale_on_failure() {
        let provider = Arc::new(fund_provider());
        let clock = Arc::new(ManualClock::new(at(2024, 3, 5, 10, 0)));
        let service = service(provider.clone(), clock.clone());
        let first = service.get_or_refresh("161725").await.unwrap();

        provider.failing.store(true, Ordering::SeqCst);
        clock.advance(Duration::days(CACHE_TTL_DAYS) + Duration::minutes(1));
        let stale = service.get_or_refresh("161725").await.unwrap();
        assert!(stale.stale);
        assert_eq!(stale.cached_at, first.cached_at);

        provider.failing.store(false, Ordering::SeqCst);
        let calls = provider.holdings_calls.load(Ordering::SeqCst);
        // backoff still active: stale again without touching the provider
        let stale = service.get_or_refresh("161725").await.unwrap();
        assert!(stale.stale);
        assert_eq!(provider.holdings_calls.load(Ordering::SeqCst), calls);

        clock.advance(Duration::seconds(11));
        let fresh = service.get_or_refresh("161725").await.unwrap();
        assert!(!fresh.stale);
        assert!(service.state.lock().await.backoff.is_empty());
    }

    #[tokio::test]
    async fn test_evening_nav_refresh_extends_expiry() {
        let provider = Arc::new(fund_provider());
        let clock = Arc::new(ManualClock::new(at(2024, 3, 5, 10, 0)));
        let service = service(provider.clone(), clock.clone());
        service.get_or_refresh("161725").await.unwrap();

        provider.add_nav(
            "161725",
            vec![
                nav(2024, 3, 1, 1.00, Some(0.5)),
                nav(2024, 3, 4, 1.01, Some(1.0)),
                nav(2024, 3, 5, 1.02, Some(0.99)),
            ],
        );
        clock.set(at(2024, 3, 5, 19, 0));
        let refreshed = service.get_or_refresh("161725").await.unwrap();

        assert_eq!(refreshed.snapshot.actual_zzl, Some(0.99));
        assert_eq!(refreshed.cached_at, at(2024, 3, 5, 19, 0));
        assert_eq!(provider.holdings_calls.load(Ordering::SeqCst), 1);
        let data = service.state.lock().await;
        assert_eq!(
            data.valuations["161725"].expires_at,
            at(2024, 3, 12, 19, 0)
        );
    }

    #[tokio::test]
    async fn test_feeder_fund_redirects_once() {
        let provider = FakeProvider::default();
        provider.add_listing(listing("014163", "某沪深300ETF联接A", "指数型-股票"));
        provider.add_holdings("510300", vec![holding("600519", 5.0)]);
        provider.add_feeder("014163", "510300");
        let clock = Arc::new(ManualClock::new(at(2024, 3, 5, 10, 0)));
        let service = service(Arc::new(provider), clock);

        let served = service.get_or_refresh("014163").await.unwrap();
        assert_eq!(served.snapshot.holdings_source.as_deref(), Some("510300"));
        assert_eq!(served.snapshot.holdings.len(), 1);
    }
}
