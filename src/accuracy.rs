//! Per-source estimate accuracy against published daily changes.

use crate::core::fund::EstimateSource;
use crate::intraday::IntradayPoint;
use crate::state::{AppState, Section};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Points after this time are after-hours noise.
const CLOSE_CUTOFF: &str = "15:05";
/// Number of most recent recorded days averaged by [`AccuracyTracker::best_source`].
const BEST_SOURCE_WINDOW: usize = 5;

#[derive(Clone)]
pub struct AccuracyTracker {
    state: Arc<AppState>,
}

impl AccuracyTracker {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Records the absolute error of each source's closing value on `date`.
    ///
    /// Nothing is stored when the day has no usable points.
    pub async fn record_accuracy(&self, code: &str, date: NaiveDate, actual_return: f64) {
        let mut data = self.state.lock().await;
        let Some(points) = data.intraday.get(code).and_then(|days| days.get(&date)) else {
            debug!("No intraday points for {} on {}, accuracy not recorded", code, date);
            return;
        };

        let errors: BTreeMap<EstimateSource, f64> = closing_values(points)
            .into_iter()
            .map(|(source, value)| (source, (value - actual_return).abs()))
            .collect();
        if errors.is_empty() {
            return;
        }

        info!("Recorded accuracy for {} on {}: {:?}", code, date, errors);
        data.accuracy
            .entry(code.to_string())
            .or_default()
            .insert(date, errors);
        self.state.save(&data, Section::Accuracy).await;
    }

    /// The source with the lower mean error over the last five recorded days.
    pub async fn best_source(&self, code: &str) -> EstimateSource {
        let data = self.state.lock().await;
        let Some(history) = data.accuracy.get(code).filter(|h| !h.is_empty()) else {
            return EstimateSource::Eastmoney;
        };

        let recent: Vec<&BTreeMap<EstimateSource, f64>> =
            history.values().rev().take(BEST_SOURCE_WINDOW).collect();
        let mean = |source: EstimateSource| -> Option<f64> {
            let errors: Vec<f64> = recent.iter().filter_map(|e| e.get(&source)).copied().collect();
            (!errors.is_empty()).then(|| errors.iter().sum::<f64>() / errors.len() as f64)
        };

        match (mean(EstimateSource::Eastmoney), mean(EstimateSource::Holdings)) {
            (None, _) => EstimateSource::Holdings,
            (Some(_), None) => EstimateSource::Eastmoney,
            (Some(official), Some(holdings)) if holdings <= official => EstimateSource::Holdings,
            _ => EstimateSource::Eastmoney,
        }
    }
}

/// Latest value per source at or before the close, scanning backwards in time.
fn closing_values(points: &[IntradayPoint]) -> BTreeMap<EstimateSource, f64> {
    let mut sorted: Vec<&IntradayPoint> = points.iter().collect();
    sorted.sort_by(|a, b| a.time.cmp(&b.time));

    let mut found = BTreeMap::new();
    for point in sorted.into_iter().rev() {
        if point.time.as_str() > CLOSE_CUTOFF {
            continue;
        }
        found.entry(point.source).or_insert(point.value);
        if found.len() == 2 {
            break;
        }
    }
    found
}
