//! Performance figures derived from a fund's published NAV history.
use crate::core::fund::{NavMetrics, NavRecord};
use chrono::Duration;
use tracing::debug;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Computes trailing returns, Sharpe ratio and max drawdown from an ordered NAV history.
///
/// Returns `None` for an empty history. Individual figures that cannot be computed
/// (not enough history, zero volatility, non-finite results) are left as `None`.
pub fn compute_nav_metrics(history: &[NavRecord]) -> Option<NavMetrics> {
    let last = history.last()?;

    let trailing = |days: i64| -> Option<f64> {
        let cutoff = last.date - Duration::days(days);
        let base = history.iter().rev().find(|r| r.date <= cutoff)?;
        finite(pct_change(base.nav, last.nav)?)
    };

    let metrics = NavMetrics {
        ret1m: trailing(30),
        ret3m: trailing(90),
        ret1y: trailing(365),
        sharpe: sharpe_ratio(history),
        max_drawdown: max_drawdown(history),
    };
    debug!(
        "NAV metrics over {} records: {:?}",
        history.len(),
        metrics
    );
    Some(metrics)
}

fn pct_change(from: f64, to: f64) -> Option<f64> {
    if from <= 0.0 {
        return None;
    }
    Some((to / from - 1.0) * 100.0)
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn sharpe_ratio(history: &[NavRecord]) -> Option<f64> {
    let returns: Vec<f64> = history
        .windows(2)
        .filter(|pair| pair[0].nav > 0.0)
        .map(|pair| pair[1].nav / pair[0].nav - 1.0)
        .collect();
    if returns.len() < 2 {
        return None;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    if std <= 0.0 {
        return None;
    }
    finite(mean / std * TRADING_DAYS_PER_YEAR.sqrt())
}

fn max_drawdown(history: &[NavRecord]) -> Option<f64> {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for record in history {
        peak = peak.max(record.nav);
        if peak > 0.0 {
            worst = worst.min(record.nav / peak - 1.0);
        }
    }
    finite(worst * 100.0)
}
