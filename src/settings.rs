//! Persisted user tracking settings.

use crate::core::error::ValuationError;
use crate::core::fund::{EstimateSource, validate_fund_code};
use crate::state::{AppState, Section};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use tracing::info;

const REFRESH_INTERVAL_RANGE: RangeInclusive<u32> = 5..=3600;
const DECIMALS_RANGE: RangeInclusive<u8> = 0..=6;

/// Which estimate the surface should show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuationMode {
    Official,
    Holdings,
    /// Whichever source has been more accurate recently.
    #[default]
    Smart,
}

impl ValuationMode {
    /// Source to display, given the source currently recommended by accuracy history.
    pub fn source(self, recommended: EstimateSource) -> EstimateSource {
        match self {
            ValuationMode::Official => EstimateSource::Eastmoney,
            ValuationMode::Holdings => EstimateSource::Holdings,
            ValuationMode::Smart => recommended,
        }
    }
}

impl Display for ValuationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValuationMode::Official => write!(f, "official"),
            ValuationMode::Holdings => write!(f, "holdings"),
            ValuationMode::Smart => write!(f, "smart"),
        }
    }
}

impl FromStr for ValuationMode {
    type Err = ValuationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "official" => Ok(ValuationMode::Official),
            "holdings" => Ok(ValuationMode::Holdings),
            "smart" => Ok(ValuationMode::Smart),
            other => Err(ValuationError::Validation(format!(
                "unknown valuation mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub fund_codes: Vec<String>,
    pub refresh_interval_sec: u32,
    pub auto_refresh_enabled: bool,
    pub decimals: u8,
    pub valuation_mode: ValuationMode,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            fund_codes: Vec::new(),
            refresh_interval_sec: 30,
            auto_refresh_enabled: true,
            decimals: 3,
            valuation_mode: ValuationMode::Smart,
        }
    }
}

impl UserSettings {
    /// Checks bounds and normalises the fund code list.
    pub fn validated(mut self) -> Result<Self, ValuationError> {
        if !REFRESH_INTERVAL_RANGE.contains(&self.refresh_interval_sec) {
            return Err(ValuationError::Validation(format!(
                "refresh interval must be within {}..={} seconds, got {}",
                REFRESH_INTERVAL_RANGE.start(),
                REFRESH_INTERVAL_RANGE.end(),
                self.refresh_interval_sec
            )));
        }
        if !DECIMALS_RANGE.contains(&self.decimals) {
            return Err(ValuationError::Validation(format!(
                "decimals must be within {}..={}, got {}",
                DECIMALS_RANGE.start(),
                DECIMALS_RANGE.end(),
                self.decimals
            )));
        }
        self.fund_codes = normalize_fund_codes(&self.fund_codes)?;
        Ok(self)
    }
}

/// Trims, validates and deduplicates codes, keeping first-seen order. Blank entries are
/// skipped.
pub fn normalize_fund_codes<S: AsRef<str>>(codes: &[S]) -> Result<Vec<String>, ValuationError> {
    let mut seen = HashSet::new();
    let mut output = Vec::new();
    for code in codes {
        let code = code.as_ref().trim();
        if code.is_empty() {
            continue;
        }
        let code = validate_fund_code(code)?;
        if seen.insert(code.clone()) {
            output.push(code);
        }
    }
    Ok(output)
}

pub async fn get_settings(state: &AppState) -> UserSettings {
    state.lock().await.settings.clone()
}

/// Applies `change` to a copy of the current settings and stores the result if it
/// validates. The stored settings are left untouched on a validation error.
pub async fn update_settings<F>(state: &AppState, change: F) -> Result<UserSettings, ValuationError>
where
    F: FnOnce(&mut UserSettings),
{
    let mut data = state.lock().await;
    let mut updated = data.settings.clone();
    change(&mut updated);
    let updated = updated.validated()?;

    data.settings = updated.clone();
    state.save(&data, Section::Settings).await;
    info!(
        "Saved settings tracking {} funds",
        updated.fund_codes.len()
    );
    Ok(updated)
}
