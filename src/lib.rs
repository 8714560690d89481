pub mod accuracy;
pub mod backoff;
pub mod backtest;
pub mod cli;
pub mod core;
pub mod intraday;
pub mod providers;
pub mod settings;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod tracker;
pub mod valuation;

#[cfg(test)]
mod test_support;

use crate::accuracy::AccuracyTracker;
use crate::backtest::BacktestEngine;
use crate::cli::settings::SettingsChanges;
use crate::core::cache::{KeyValueCollection, Store};
use crate::core::clock::{Clock, ExchangeClock};
use crate::core::config::AppConfig;
use crate::core::fund::EstimateSource;
use crate::core::market::MarketDataProvider;
use crate::intraday::IntradayStore;
use crate::providers::util::http_client;
use crate::providers::{EastmoneyProvider, GatedProvider, SinaQuoteClient};
use crate::snapshot::SnapshotService;
use crate::state::AppState;
use crate::store::KeyValueStore;
use crate::tracker::BackgroundTracker;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

const STATE_COLLECTION: &str = "state";
const METADATA_COLLECTION: &str = "metadata";

pub enum AppCommand {
    FundsList,
    FundsAdd(Vec<String>),
    FundsRemove(Vec<String>),
    Settings(SettingsChanges),
    Valuation(String),
    Intraday(String),
    Record {
        code: String,
        time: String,
        value: f64,
        source: EstimateSource,
    },
    BestSource(String),
    Backtest { force: bool },
    Track,
}

/// The engines wired to one shared state, provider and clock.
pub struct App {
    pub config: AppConfig,
    pub state: Arc<AppState>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub clock: Arc<dyn Clock>,
    pub accuracy: AccuracyTracker,
    pub snapshots: Arc<SnapshotService>,
    pub intraday: Arc<IntradayStore>,
    pub backtest: Arc<BacktestEngine>,
    store: Option<Arc<KeyValueStore>>,
}

impl App {
    /// Loads state from `collection` and builds the engines around `provider`.
    ///
    /// `provider` is used as given; callers that reach real upstream hosts must pass it
    /// through a [`GatedProvider`].
    pub async fn new(
        config: AppConfig,
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn Clock>,
        collection: Arc<dyn KeyValueCollection>,
    ) -> Self {
        let state = Arc::new(AppState::load(collection, clock.today()).await);
        let accuracy = AccuracyTracker::new(state.clone());
        let snapshots = Arc::new(SnapshotService::new(
            state.clone(),
            provider.clone(),
            clock.clone(),
            accuracy.clone(),
        ));
        let intraday = Arc::new(IntradayStore::new(
            state.clone(),
            snapshots.clone(),
            provider.clone(),
            clock.clone(),
        ));
        let backtest = Arc::new(BacktestEngine::new(
            state.clone(),
            snapshots.clone(),
            provider.clone(),
            clock.clone(),
            config.backtest.days,
        ));

        Self {
            config,
            state,
            provider,
            clock,
            accuracy,
            snapshots,
            intraday,
            backtest,
            store: None,
        }
    }

    /// Opens the persistent store and the Eastmoney provider described by `config`.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let data_path = config.default_data_path()?;
        let store = Arc::new(KeyValueStore::open(&data_path)?);
        let state_collection = store
            .get_collection(STATE_COLLECTION, true, true)
            .context("Failed to open state collection")?;
        let metadata = store
            .get_collection(METADATA_COLLECTION, true, true)
            .context("Failed to open metadata collection")?;

        let client = http_client(config.http_timeout())?;
        let sina = config.providers.sina.clone().unwrap_or_default();
        let eastmoney = config.providers.eastmoney.clone().unwrap_or_default();
        let quotes = SinaQuoteClient::new(&sina.base_url, client.clone());
        let provider: Arc<dyn MarketDataProvider> = Arc::new(GatedProvider::new(
            EastmoneyProvider::new(eastmoney, client, quotes, metadata),
        ));

        let mut app = Self::new(config, provider, Arc::new(ExchangeClock), state_collection).await;
        app.store = Some(store);
        Ok(app)
    }

    pub fn tracker(&self) -> BackgroundTracker {
        BackgroundTracker::new(
            self.state.clone(),
            self.snapshots.clone(),
            self.intraday.clone(),
            self.provider.clone(),
            self.clock.clone(),
            self.config.tracker.clone(),
        )
    }

    /// Syncs the persistent store to disk.
    pub fn flush(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store.persist()?;
            debug!("State flushed to disk");
        }
        Ok(())
    }
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("navcast starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let app = App::from_config(config).await?;
    let result = match command {
        AppCommand::FundsList => cli::funds::list(&app).await,
        AppCommand::FundsAdd(codes) => cli::funds::add(&app, &codes).await,
        AppCommand::FundsRemove(codes) => cli::funds::remove(&app, &codes).await,
        AppCommand::Settings(changes) => cli::settings::run(&app, changes).await,
        AppCommand::Valuation(code) => cli::valuation::run(&app, &code).await,
        AppCommand::Intraday(code) => cli::intraday::show(&app, &code).await,
        AppCommand::Record {
            code,
            time,
            value,
            source,
        } => cli::intraday::record(&app, &code, &time, value, source).await,
        AppCommand::BestSource(code) => cli::intraday::best_source(&app, &code).await,
        AppCommand::Backtest { force } => cli::backtest::run(&app, force).await,
        AppCommand::Track => cli::track::run(&app).await,
    };
    app.flush()?;
    result
}
