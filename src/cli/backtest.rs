use super::ui;
use crate::App;
use crate::backtest::BacktestReport;
use crate::settings::get_settings;
use anyhow::Result;
use comfy_table::Cell;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run(app: &App, force: bool) -> Result<()> {
    if get_settings(&app.state).await.fund_codes.is_empty() {
        println!("No funds tracked. Add some with `navcast funds add <code>...`.");
        return Ok(());
    }

    let mut report = app.backtest.report(force).await;
    if report.pending {
        let pb = ui::progress_bar(report.total as u64, "Backtesting");
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            let job = app.backtest.job_state().await;
            pb.set_position(job.completed as u64);
            if !job.running {
                break;
            }
        }
        pb.finish_and_clear();
        report = app.backtest.report(false).await;
    }

    print_report(&report);
    Ok(())
}

fn print_report(report: &BacktestReport) {
    println!(
        "\n{}",
        ui::paint(
            &format!("Estimation backtest for {}", report.date),
            ui::Tone::Title
        )
    );
    if report.results.is_empty() {
        println!("No fund produced a backtest result.");
        return;
    }

    let mut table = ui::table(&[
        "Code",
        "Name",
        "Samples",
        "MAE",
        "RMSE",
        "Hit ≤0.2",
        "Hit ≤0.5",
        "Max Err",
        "Bias",
        "Baseline MAE",
    ]);
    for result in &report.results {
        let m = &result.metrics;
        table.add_row(vec![
            Cell::new(&result.code),
            Cell::new(&result.name),
            Cell::new(result.samples),
            Cell::new(format!("{:.3}", m.mae)),
            Cell::new(format!("{:.3}", m.rmse)),
            Cell::new(format!("{:.1}%", m.hit_rate_02)),
            Cell::new(format!("{:.1}%", m.hit_rate_05)),
            Cell::new(format!("{:.3}", m.max_err)),
            Cell::new(format!("{:+.3}", m.bias)),
            Cell::new(format!("{:.3}", result.baseline.mae)),
        ]);
    }
    println!("{table}");
    if report.pending {
        println!(
            "{}",
            ui::paint(
                &format!("{} of {} funds done; still running", report.completed, report.total),
                ui::Tone::Subtle
            )
        );
    }
}
