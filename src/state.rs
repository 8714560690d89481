//! Shared mutable state and its persistence.
//!
//! All caches, history and settings live in one [`StateData`] behind a single
//! `tokio::sync::Mutex`. The lock is held only around reads and mutations, never across a
//! provider call. Each persisted section is rewritten whole while the lock is held, so
//! concurrent saves cannot interleave.

use crate::backoff::BackoffState;
use crate::backtest::{BacktestJobState, BacktestResult};
use crate::core::cache::KeyValueCollection;
use crate::core::fund::{EstimateSource, FundProfile, ValuationSnapshot};
use crate::intraday::IntradayPoint;
use crate::settings::UserSettings;
use crate::store::memory::MemoryCollection;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Days of intraday history kept when loading.
pub const INTRADAY_RETENTION_DAYS: i64 = 3;
/// Days of backtest reports kept.
pub const BACKTEST_RETENTION_DAYS: i64 = 7;

/// A cached snapshot with its refresh bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub snapshot: ValuationSnapshot,
    pub fetched_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    /// Last NAV refresh attempt.
    #[serde(default)]
    pub nav_checked_at: Option<NaiveDateTime>,
}

pub type DayPoints = BTreeMap<NaiveDate, Vec<IntradayPoint>>;
pub type DayErrors = BTreeMap<NaiveDate, BTreeMap<EstimateSource, f64>>;

#[derive(Debug, Default)]
pub struct StateData {
    pub valuations: HashMap<String, CacheEntry>,
    pub profiles: HashMap<String, FundProfile>,
    /// Not persisted: a restart forgets failures.
    pub backoff: HashMap<String, BackoffState>,
    pub settings: UserSettings,
    pub intraday: HashMap<String, DayPoints>,
    pub accuracy: HashMap<String, DayErrors>,
    pub backtests: BTreeMap<NaiveDate, HashMap<String, BacktestResult>>,
    pub job: BacktestJobState,
}

impl StateData {
    /// Drops intraday days older than the retention window.
    pub fn prune_intraday(&mut self, today: NaiveDate) {
        let cutoff = today - Duration::days(INTRADAY_RETENTION_DAYS);
        for days in self.intraday.values_mut() {
            days.retain(|date, _| *date >= cutoff);
        }
        self.intraday.retain(|_, days| !days.is_empty());
    }

    pub fn prune_backtests(&mut self, today: NaiveDate) {
        let cutoff = today - Duration::days(BACKTEST_RETENTION_DAYS);
        self.backtests.retain(|date, _| *date >= cutoff);
    }
}

/// A persisted slice of [`StateData`], one key each in the state collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Valuation,
    Profiles,
    Settings,
    Intraday,
    Accuracy,
    Backtest,
    BacktestJob,
}

impl Section {
    pub fn key(&self) -> &'static str {
        match self {
            Section::Valuation => "valuation",
            Section::Profiles => "profiles",
            Section::Settings => "settings",
            Section::Intraday => "intraday",
            Section::Accuracy => "accuracy",
            Section::Backtest => "backtest",
            Section::BacktestJob => "backtest_job",
        }
    }
}

pub struct AppState {
    data: Mutex<StateData>,
    collection: Arc<dyn KeyValueCollection>,
}

impl AppState {
    /// Restores every section from `collection`, pruning expired history.
    pub async fn load(collection: Arc<dyn KeyValueCollection>, today: NaiveDate) -> Self {
        let mut data = StateData {
            valuations: read_section(collection.as_ref(), Section::Valuation).await,
            profiles: read_section(collection.as_ref(), Section::Profiles).await,
            settings: read_section(collection.as_ref(), Section::Settings).await,
            intraday: read_section(collection.as_ref(), Section::Intraday).await,
            accuracy: read_section(collection.as_ref(), Section::Accuracy).await,
            backtests: read_section(collection.as_ref(), Section::Backtest).await,
            job: read_section(collection.as_ref(), Section::BacktestJob).await,
            ..StateData::default()
        };
        if data.job.running {
            info!(
                "Backtest sweep for {:?} was interrupted at {} of {}",
                data.job.date, data.job.completed, data.job.total
            );
            data.job.running = false;
        }
        data.prune_intraday(today);
        data.prune_backtests(today);
        info!(
            "Loaded state: {} cached funds, {} tracked, intraday history for {} funds",
            data.valuations.len(),
            data.settings.fund_codes.len(),
            data.intraday.len()
        );

        Self {
            data: Mutex::new(data),
            collection,
        }
    }

    /// Fresh state kept only in memory.
    pub fn in_memory() -> Self {
        Self {
            data: Mutex::new(StateData::default()),
            collection: Arc::new(MemoryCollection::new()),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, StateData> {
        self.data.lock().await
    }

    /// Rewrites one section. Callers pass the guarded data so the write happens under the
    /// state lock.
    pub async fn save(&self, data: &StateData, section: Section) {
        let encoded = match section {
            Section::Valuation => serde_json::to_vec(&data.valuations),
            Section::Profiles => serde_json::to_vec(&data.profiles),
            Section::Settings => serde_json::to_vec(&data.settings),
            Section::Intraday => serde_json::to_vec(&data.intraday),
            Section::Accuracy => serde_json::to_vec(&data.accuracy),
            Section::Backtest => serde_json::to_vec(&data.backtests),
            Section::BacktestJob => serde_json::to_vec(&data.job),
        };
        match encoded {
            Ok(bytes) => {
                self.collection
                    .put(section.key().as_bytes(), &bytes, None)
                    .await;
                debug!("Saved {} section ({} bytes)", section.key(), bytes.len());
            }
            Err(e) => warn!("Failed to encode {} section: {}", section.key(), e),
        }
    }
}

async fn read_section<T: DeserializeOwned + Default>(
    collection: &dyn KeyValueCollection,
    section: Section,
) -> T {
    let Some(bytes) = collection.get(section.key().as_bytes()).await else {
        return T::default();
    };
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        warn!("Discarding unreadable {} section: {}", section.key(), e);
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_sections_round_trip_through_collection() {
        let collection: Arc<dyn KeyValueCollection> = Arc::new(MemoryCollection::new());
        let today = date(2024, 3, 8);
        {
            let state = AppState::load(collection.clone(), today).await;
            let mut data = state.lock().await;
            data.settings.fund_codes = vec!["161725".into()];
            data.accuracy
                .entry("161725".into())
                .or_default()
                .insert(today, BTreeMap::from([(EstimateSource::Holdings, 0.05)]));
            state.save(&data, Section::Settings).await;
            state.save(&data, Section::Accuracy).await;
        }

        let state = AppState::load(collection, today).await;
        let data = state.lock().await;
        assert_eq!(data.settings.fund_codes, vec!["161725"]);
        assert_eq!(
            data.accuracy["161725"][&today][&EstimateSource::Holdings],
            0.05
        );
    }

    #[tokio::test]
    async fn test_load_prunes_old_history() {
        let collection: Arc<dyn KeyValueCollection> = Arc::new(MemoryCollection::new());
        let today = date(2024, 3, 8);
        {
            let state = AppState::load(collection.clone(), today).await;
            let mut data = state.lock().await;
            let days = data.intraday.entry("161725".into()).or_default();
            days.insert(date(2024, 3, 4), vec![]);
            days.insert(date(2024, 3, 5), vec![]);
            days.insert(today, vec![]);
            data.backtests.insert(date(2024, 2, 29), HashMap::new());
            data.backtests.insert(date(2024, 3, 1), HashMap::new());
            state.save(&data, Section::Intraday).await;
            state.save(&data, Section::Backtest).await;
        }

        let state = AppState::load(collection, today).await;
        let data = state.lock().await;
        let kept: Vec<NaiveDate> = data.intraday["161725"].keys().copied().collect();
        assert_eq!(kept, vec![date(2024, 3, 5), today]);
        let kept: Vec<NaiveDate> = data.backtests.keys().copied().collect();
        assert_eq!(kept, vec![date(2024, 3, 1)]);
    }

    #[tokio::test]
    async fn test_interrupted_sweep_is_not_running_after_reload() {
        let collection: Arc<dyn KeyValueCollection> = Arc::new(MemoryCollection::new());
        let today = date(2024, 3, 8);
        {
            let state = AppState::load(collection.clone(), today).await;
            let mut data = state.lock().await;
            data.job = BacktestJobState {
                running: true,
                date: Some(today),
                codes: vec!["161725".into(), "110011".into()],
                generation: 3,
                total: 2,
                completed: 1,
                ..BacktestJobState::default()
            };
            state.save(&data, Section::BacktestJob).await;
        }

        let state = AppState::load(collection, today).await;
        let data = state.lock().await;
        assert!(!data.job.running);
        assert_eq!(data.job.generation, 3);
        assert_eq!(data.job.completed, 1);
        assert_eq!(data.job.codes, vec!["161725", "110011"]);
    }

    #[tokio::test]
    async fn test_unreadable_section_falls_back_to_default() {
        let collection: Arc<dyn KeyValueCollection> = Arc::new(MemoryCollection::new());
        collection.put(b"settings", b"not json", None).await;
        let state = AppState::load(collection, date(2024, 3, 8)).await;
        assert_eq!(state.lock().await.settings, UserSettings::default());
    }
}
