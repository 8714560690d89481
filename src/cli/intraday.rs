use super::ui;
use crate::App;
use crate::core::fund::{EstimateSource, validate_fund_code};
use crate::settings::get_settings;
use anyhow::Result;
use comfy_table::Cell;

pub async fn show(app: &App, code: &str) -> Result<()> {
    let series = app.intraday.get_today(code).await?;
    let decimals = get_settings(&app.state).await.decimals;

    println!(
        "\n{}",
        ui::paint(
            &format!("Intraday estimates for {} on {}", code.trim(), series.date),
            ui::Tone::Title
        )
    );
    if series.points.is_empty() {
        println!("No points recorded yet.");
        return Ok(());
    }
    if series.date != app.clock.today() {
        println!(
            "{}",
            ui::paint(
                "No points for today yet; showing the most recent day",
                ui::Tone::Warning
            )
        );
    }

    let mut table = ui::table(&["Time", "Estimate", "Source"]);
    for point in &series.points {
        table.add_row(vec![
            Cell::new(&point.time),
            ui::change_cell(point.value, decimals),
            Cell::new(point.source.to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn record(
    app: &App,
    code: &str,
    time: &str,
    value: f64,
    source: EstimateSource,
) -> Result<()> {
    app.intraday.append_point(code, time, value, source).await?;
    println!(
        "Recorded {} {} at {} ({})",
        code.trim(),
        ui::format_change(value, 4),
        time.trim(),
        source
    );
    Ok(())
}

pub async fn best_source(app: &App, code: &str) -> Result<()> {
    let code = validate_fund_code(code)?;
    let source = app.accuracy.best_source(&code).await;
    println!("{source}");
    Ok(())
}
