use super::ui;
use crate::App;
use crate::core::fund::{EstimateSource, NavMetrics, OfficialEstimate, ValuationSnapshot};
use crate::settings::get_settings;
use crate::snapshot::ServedSnapshot;
use crate::valuation::{Estimate, estimate_return};
use anyhow::Result;
use comfy_table::Cell;
use std::collections::HashMap;

pub async fn run(app: &App, code: &str) -> Result<()> {
    let served = app.snapshots.get_or_refresh(code).await?;
    let settings = get_settings(&app.state).await;
    let snapshot = &served.snapshot;

    let symbols: Vec<String> = snapshot.holdings.iter().map(|h| h.symbol.clone()).collect();
    let (quotes, official) = futures::join!(
        app.provider.live_quotes(&symbols),
        app.provider.official_estimate(&snapshot.code)
    );
    let changes: HashMap<String, f64> = quotes
        .into_iter()
        .filter_map(|(symbol, quote)| quote.change_percent().map(|c| (symbol, c)))
        .collect();
    let estimate = estimate_return(&snapshot.holdings, &changes, snapshot.cash_ratio);
    let recommended = app.accuracy.best_source(&snapshot.code).await;
    let shown = settings.valuation_mode.source(recommended);

    print_header(&served);
    print_holdings(snapshot, &changes, settings.decimals);
    if let Some(metrics) = &snapshot.nav_metrics {
        print_metrics(metrics);
    }
    print_estimates(estimate, official, shown, recommended, settings.decimals);
    Ok(())
}

fn print_header(served: &ServedSnapshot) {
    let snapshot = &served.snapshot;
    println!(
        "\n{}",
        ui::paint(
            &format!("{} ({})", snapshot.name, snapshot.code),
            ui::Tone::Title
        )
    );
    let line = |label: &str, value: String| {
        println!("{} {}", ui::paint(label, ui::Tone::Label), value);
    };
    line("Type:", snapshot.fund_type.clone());
    line("Benchmark:", snapshot.benchmark_symbol.clone());
    let holdings_date = snapshot.holdings_date.clone().unwrap_or_else(|| "N/A".into());
    match &snapshot.holdings_source {
        Some(source) => line("Holdings:", format!("{holdings_date} (via {source})")),
        None => line("Holdings:", holdings_date),
    }
    line(
        "Cash:",
        snapshot
            .cash_ratio
            .map_or("N/A".into(), |c| format!("{c:.2}%")),
    );
    match (snapshot.base_nav, snapshot.base_nav_date) {
        (Some(nav), Some(date)) => line("Last NAV:", format!("{nav:.4} on {date}")),
        _ => line("Last NAV:", "N/A".into()),
    }
    if let (Some(zzl), Some(date)) = (snapshot.actual_zzl, snapshot.actual_date) {
        line("Last change:", format!("{} on {date}", ui::format_change(zzl, 2)));
    }
    let cached = served.cached_at.format("%Y-%m-%d %H:%M").to_string();
    if served.stale {
        println!(
            "{}",
            ui::paint(
                &format!("Showing stale data cached at {cached}; refresh failed"),
                ui::Tone::Warning
            )
        );
    } else {
        line("Cached at:", cached);
    }
}

fn print_holdings(snapshot: &ValuationSnapshot, changes: &HashMap<String, f64>, decimals: u8) {
    if snapshot.holdings.is_empty() {
        return;
    }
    let mut table = ui::table(&["Symbol", "Name", "Industry", "Weight", "Change"]);
    for holding in &snapshot.holdings {
        table.add_row(vec![
            Cell::new(&holding.symbol),
            Cell::new(&holding.name),
            holding
                .industry
                .as_ref()
                .map_or(ui::na_cell(false), Cell::new),
            Cell::new(format!("{:.2}%", holding.weight)),
            changes
                .get(&holding.symbol)
                .map_or(ui::na_cell(false), |c| ui::change_cell(*c, decimals)),
        ]);
    }
    println!("{table}");
}

fn print_metrics(metrics: &NavMetrics) {
    let mut table = ui::table(&["1M", "3M", "1Y", "Sharpe", "Max Drawdown"]);
    let pct = |v: f64| format!("{v:.2}%");
    table.add_row(vec![
        ui::format_optional_cell(metrics.ret1m, pct),
        ui::format_optional_cell(metrics.ret3m, pct),
        ui::format_optional_cell(metrics.ret1y, pct),
        ui::format_optional_cell(metrics.sharpe, |v| format!("{v:.2}")),
        ui::format_optional_cell(metrics.max_drawdown, pct),
    ]);
    println!("{table}");
}

fn print_estimates(
    estimate: Option<Estimate>,
    official: Option<OfficialEstimate>,
    shown: EstimateSource,
    recommended: EstimateSource,
    decimals: u8,
) {
    let mut table = ui::table(&["Source", "Estimate", "Detail"]);

    let marker = |source: EstimateSource| {
        if source == shown {
            format!("{source} *")
        } else {
            source.to_string()
        }
    };
    table.add_row(vec![
        Cell::new(marker(EstimateSource::Holdings)),
        estimate.map_or(ui::na_cell(false), |e| ui::change_cell(e.value, decimals)),
        Cell::new(estimate.map_or(String::new(), |e| {
            format!("matched {:.1}% of NAV", e.matched_weight)
        })),
    ]);
    table.add_row(vec![
        Cell::new(marker(EstimateSource::Eastmoney)),
        official.map_or(ui::na_cell(false), |o| ui::change_cell(o.value, decimals)),
        Cell::new(official.map_or(String::new(), |o| {
            format!("as of {}", o.time.format("%m-%d %H:%M"))
        })),
    ]);
    println!("{table}");
    println!(
        "{}",
        ui::paint(
            &format!("* displayed source; recommended by recent accuracy: {recommended}"),
            ui::Tone::Subtle
        )
    );
}
