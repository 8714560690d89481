use crate::core::fund::{CashRatio, FundListing, HoldingsReport, NavRecord, OfficialEstimate};
use crate::core::market::{
    Granularity, IndexClose, LiveQuote, MarketDataProvider, PriceBar, PriceRange,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::trace;

/// Serializes every call into the wrapped provider.
///
/// Upstream clients are not safe to drive concurrently, so one instance of this gate must be
/// shared by every caller in the process. A call holds the gate for its whole duration.
pub struct GatedProvider<T: MarketDataProvider> {
    inner: T,
    gate: Mutex<()>,
}

impl<T: MarketDataProvider> GatedProvider<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }
}

#[async_trait]
impl<T: MarketDataProvider> MarketDataProvider for GatedProvider<T> {
    async fn holdings(&self, code: &str, year_hint: i32) -> Option<HoldingsReport> {
        let _guard = self.gate.lock().await;
        trace!("Gate acquired for holdings: {}", code);
        self.inner.holdings(code, year_hint).await
    }

    async fn cash_ratio(&self, code: &str) -> Option<CashRatio> {
        let _guard = self.gate.lock().await;
        self.inner.cash_ratio(code).await
    }

    async fn nav_history(&self, code: &str) -> Option<Vec<NavRecord>> {
        let _guard = self.gate.lock().await;
        self.inner.nav_history(code).await
    }

    async fn fund_profile(&self, code: &str) -> Option<FundListing> {
        let _guard = self.gate.lock().await;
        self.inner.fund_profile(code).await
    }

    async fn resolve_feeder_target(&self, code: &str, name: &str) -> Option<String> {
        let _guard = self.gate.lock().await;
        self.inner.resolve_feeder_target(code, name).await
    }

    async fn price_history(
        &self,
        symbol: &str,
        granularity: Granularity,
        range: PriceRange,
    ) -> Option<Vec<PriceBar>> {
        let _guard = self.gate.lock().await;
        trace!("Gate acquired for price history: {}", symbol);
        self.inner.price_history(symbol, granularity, range).await
    }

    async fn live_quotes(&self, symbols: &[String]) -> HashMap<String, LiveQuote> {
        let _guard = self.gate.lock().await;
        self.inner.live_quotes(symbols).await
    }

    async fn index_history(&self, benchmark: &str, range: PriceRange) -> Option<Vec<IndexClose>> {
        let _guard = self.gate.lock().await;
        self.inner.index_history(benchmark, range).await
    }

    async fn official_estimate(&self, code: &str) -> Option<OfficialEstimate> {
        let _guard = self.gate.lock().await;
        self.inner.official_estimate(code).await
    }

    async fn stock_industry(&self, symbol: &str) -> Option<String> {
        let _guard = self.gate.lock().await;
        self.inner.stock_industry(symbol).await
    }
}
