//! In-memory market data for unit tests.

use crate::core::fund::{
    CashRatio, FundListing, Holding, HoldingsReport, NavRecord, OfficialEstimate,
};
use crate::core::market::{
    Granularity, IndexClose, LiveQuote, MarketDataProvider, PriceBar, PriceRange,
};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

pub fn holding(symbol: &str, weight: f64) -> Holding {
    Holding {
        symbol: symbol.to_string(),
        name: symbol.to_string(),
        weight,
        industry: None,
    }
}

pub fn listing(code: &str, name: &str, fund_type: &str) -> FundListing {
    FundListing {
        code: code.to_string(),
        name: name.to_string(),
        fund_type: fund_type.to_string(),
    }
}

pub fn nav(y: i32, m: u32, d: u32, nav: f64, daily_return: Option<f64>) -> NavRecord {
    NavRecord {
        date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
        nav,
        daily_return,
    }
}

pub fn bar(time: NaiveDateTime, open: f64, close: f64) -> PriceBar {
    PriceBar {
        time,
        open: Some(open),
        close,
    }
}

fn in_range(date: NaiveDate, range: PriceRange) -> bool {
    match range {
        PriceRange::Between(start, end) => start <= date && date <= end,
        PriceRange::Latest(_) => true,
    }
}

fn tail<T: Clone>(items: &[T], range: PriceRange) -> Vec<T> {
    match range {
        PriceRange::Latest(n) => items[items.len().saturating_sub(n)..].to_vec(),
        PriceRange::Between(..) => items.to_vec(),
    }
}

/// Scripted provider. `failing` makes every call report no data.
#[derive(Default)]
pub struct FakeProvider {
    pub failing: AtomicBool,
    pub holdings_calls: AtomicUsize,
    pub quote_calls: AtomicUsize,
    pub index_calls: AtomicUsize,
    pub industry_calls: AtomicUsize,
    index_gate: Mutex<Option<Arc<Semaphore>>>,
    industries: Mutex<HashMap<String, String>>,
    holdings: Mutex<HashMap<String, HoldingsReport>>,
    cash: Mutex<HashMap<String, CashRatio>>,
    navs: Mutex<HashMap<String, Vec<NavRecord>>>,
    listings: Mutex<HashMap<String, FundListing>>,
    feeders: Mutex<HashMap<String, String>>,
    bars: Mutex<HashMap<(String, Granularity), Vec<PriceBar>>>,
    quotes: Mutex<HashMap<String, LiveQuote>>,
    index: Mutex<HashMap<String, Vec<IndexClose>>>,
    estimates: Mutex<HashMap<String, OfficialEstimate>>,
}

impl FakeProvider {
    fn failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }

    pub fn add_listing(&self, listing: FundListing) {
        self.listings
            .lock()
            .unwrap()
            .insert(listing.code.clone(), listing);
    }

    pub fn add_holdings(&self, code: &str, holdings: Vec<Holding>) {
        self.holdings.lock().unwrap().insert(
            code.to_string(),
            HoldingsReport {
                holdings,
                report_period: Some("2024年4季度股票投资明细".to_string()),
            },
        );
    }

    pub fn add_cash(&self, code: &str, percent: f64) {
        self.cash.lock().unwrap().insert(
            code.to_string(),
            CashRatio {
                percent,
                as_of: None,
            },
        );
    }

    pub fn add_nav(&self, code: &str, history: Vec<NavRecord>) {
        self.navs.lock().unwrap().insert(code.to_string(), history);
    }

    pub fn add_feeder(&self, code: &str, target: &str) {
        self.feeders
            .lock()
            .unwrap()
            .insert(code.to_string(), target.to_string());
    }

    pub fn add_bars(&self, symbol: &str, granularity: Granularity, bars: Vec<PriceBar>) {
        self.bars
            .lock()
            .unwrap()
            .insert((symbol.to_string(), granularity), bars);
    }

    pub fn add_quote(&self, symbol: &str, price: f64, prior_close: f64) {
        self.quotes
            .lock()
            .unwrap()
            .insert(symbol.to_string(), LiveQuote { price, prior_close });
    }

    pub fn add_index(&self, symbol: &str, closes: Vec<IndexClose>) {
        self.index.lock().unwrap().insert(symbol.to_string(), closes);
    }

    pub fn add_industry(&self, symbol: &str, industry: &str) {
        self.industries
            .lock()
            .unwrap()
            .insert(symbol.to_string(), industry.to_string());
    }

    /// Makes every later `index_history` call wait for a permit on the returned semaphore.
    pub fn hold_index_history(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.index_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn add_estimate(&self, code: &str, estimate: OfficialEstimate) {
        self.estimates
            .lock()
            .unwrap()
            .insert(code.to_string(), estimate);
    }
}

#[async_trait]
impl MarketDataProvider for FakeProvider {
    async fn holdings(&self, code: &str, _year_hint: i32) -> Option<HoldingsReport> {
        self.holdings_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing() {
            return None;
        }
        self.holdings.lock().unwrap().get(code).cloned()
    }

    async fn cash_ratio(&self, code: &str) -> Option<CashRatio> {
        if self.failing() {
            return None;
        }
        self.cash.lock().unwrap().get(code).copied()
    }

    async fn nav_history(&self, code: &str) -> Option<Vec<NavRecord>> {
        if self.failing() {
            return None;
        }
        self.navs.lock().unwrap().get(code).cloned()
    }

    async fn fund_profile(&self, code: &str) -> Option<FundListing> {
        if self.failing() {
            return None;
        }
        self.listings.lock().unwrap().get(code).cloned()
    }

    async fn resolve_feeder_target(&self, code: &str, _name: &str) -> Option<String> {
        if self.failing() {
            return None;
        }
        self.feeders.lock().unwrap().get(code).cloned()
    }

    async fn price_history(
        &self,
        symbol: &str,
        granularity: Granularity,
        range: PriceRange,
    ) -> Option<Vec<PriceBar>> {
        if self.failing() {
            return None;
        }
        let bars = self.bars.lock().unwrap();
        let series = bars.get(&(symbol.to_string(), granularity))?;
        let filtered: Vec<PriceBar> = series
            .iter()
            .filter(|b| in_range(b.time.date(), range))
            .copied()
            .collect();
        Some(tail(&filtered, range))
    }

    async fn live_quotes(&self, symbols: &[String]) -> HashMap<String, LiveQuote> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing() {
            return HashMap::new();
        }
        let quotes = self.quotes.lock().unwrap();
        symbols
            .iter()
            .filter_map(|s| quotes.get(s).map(|q| (s.clone(), *q)))
            .collect()
    }

    async fn index_history(&self, benchmark: &str, range: PriceRange) -> Option<Vec<IndexClose>> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.index_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.failing() {
            return None;
        }
        let index = self.index.lock().unwrap();
        let series = index.get(benchmark)?;
        let filtered: Vec<IndexClose> = series
            .iter()
            .filter(|c| in_range(c.date, range))
            .copied()
            .collect();
        Some(tail(&filtered, range))
    }

    async fn official_estimate(&self, code: &str) -> Option<OfficialEstimate> {
        if self.failing() {
            return None;
        }
        self.estimates.lock().unwrap().get(code).copied()
    }

    async fn stock_industry(&self, symbol: &str) -> Option<String> {
        self.industry_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing() {
            return None;
        }
        self.industries.lock().unwrap().get(symbol).cloned()
    }
}
