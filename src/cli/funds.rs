use super::ui;
use crate::App;
use crate::settings::{get_settings, normalize_fund_codes, update_settings};
use anyhow::Result;
use comfy_table::Cell;
use futures::future::join_all;

pub async fn list(app: &App) -> Result<()> {
    let codes = get_settings(&app.state).await.fund_codes;
    if codes.is_empty() {
        println!("No funds tracked. Add some with `navcast funds add <code>...`.");
        return Ok(());
    }

    let pb = ui::progress_bar(codes.len() as u64, "Loading profiles");
    let profiles = join_all(codes.iter().map(|code| {
        let pb = pb.clone();
        async move {
            let profile = app.snapshots.profile(code).await;
            pb.inc(1);
            (code, profile)
        }
    }))
    .await;
    pb.finish_and_clear();

    let mut table = ui::table(&["Code", "Name", "Type", "Benchmark"]);
    for (code, profile) in profiles {
        match profile {
            Some(p) => table.add_row(vec![
                Cell::new(code),
                Cell::new(p.name),
                Cell::new(p.fund_type),
                Cell::new(p.benchmark_symbol),
            ]),
            None => table.add_row(vec![
                Cell::new(code),
                ui::na_cell(true),
                ui::na_cell(true),
                ui::na_cell(true),
            ]),
        };
    }
    println!("{table}");
    Ok(())
}

pub async fn add(app: &App, codes: &[String]) -> Result<()> {
    let codes = normalize_fund_codes(codes)?;
    let settings = update_settings(&app.state, |s| {
        for code in codes {
            if !s.fund_codes.contains(&code) {
                s.fund_codes.push(code);
            }
        }
    })
    .await?;
    println!(
        "Tracking {} funds: {}",
        settings.fund_codes.len(),
        settings.fund_codes.join(", ")
    );
    Ok(())
}

pub async fn remove(app: &App, codes: &[String]) -> Result<()> {
    let codes = normalize_fund_codes(codes)?;
    let settings =
        update_settings(&app.state, |s| s.fund_codes.retain(|c| !codes.contains(c))).await?;
    println!(
        "Tracking {} funds{}",
        settings.fund_codes.len(),
        if settings.fund_codes.is_empty() {
            String::new()
        } else {
            format!(": {}", settings.fund_codes.join(", "))
        }
    );
    Ok(())
}
