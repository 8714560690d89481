use super::ui;
use crate::App;
use crate::settings::{UserSettings, ValuationMode, get_settings, update_settings};
use anyhow::Result;
use comfy_table::Cell;

/// Fields to change; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct SettingsChanges {
    pub mode: Option<ValuationMode>,
    pub decimals: Option<u8>,
    pub refresh_interval_sec: Option<u32>,
    pub auto_refresh: Option<bool>,
}

impl SettingsChanges {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.decimals.is_none()
            && self.refresh_interval_sec.is_none()
            && self.auto_refresh.is_none()
    }

    fn apply(self, settings: &mut UserSettings) {
        if let Some(mode) = self.mode {
            settings.valuation_mode = mode;
        }
        if let Some(decimals) = self.decimals {
            settings.decimals = decimals;
        }
        if let Some(refresh) = self.refresh_interval_sec {
            settings.refresh_interval_sec = refresh;
        }
        if let Some(auto_refresh) = self.auto_refresh {
            settings.auto_refresh_enabled = auto_refresh;
        }
    }
}

pub async fn run(app: &App, changes: SettingsChanges) -> Result<()> {
    let settings = if changes.is_empty() {
        get_settings(&app.state).await
    } else {
        update_settings(&app.state, |s| changes.apply(s)).await?
    };
    print_settings(&settings);
    Ok(())
}

fn print_settings(settings: &UserSettings) {
    let mut table = ui::table(&["Setting", "Value"]);
    let codes = if settings.fund_codes.is_empty() {
        ui::paint("(none)", ui::Tone::Subtle)
    } else {
        settings.fund_codes.join(", ")
    };
    table.add_row(vec![Cell::new("Tracked funds"), Cell::new(codes)]);
    table.add_row(vec![
        Cell::new("Valuation mode"),
        Cell::new(settings.valuation_mode.to_string()),
    ]);
    table.add_row(vec![
        Cell::new("Decimals"),
        Cell::new(settings.decimals.to_string()),
    ]);
    table.add_row(vec![
        Cell::new("Refresh interval"),
        Cell::new(format!("{}s", settings.refresh_interval_sec)),
    ]);
    table.add_row(vec![
        Cell::new("Auto refresh"),
        Cell::new(settings.auto_refresh_enabled.to_string()),
    ]);
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_apply_only_given_fields() {
        let mut settings = UserSettings::default();
        let changes = SettingsChanges {
            mode: Some(ValuationMode::Holdings),
            decimals: Some(2),
            ..SettingsChanges::default()
        };
        assert!(!changes.is_empty());
        changes.apply(&mut settings);

        assert_eq!(settings.valuation_mode, ValuationMode::Holdings);
        assert_eq!(settings.decimals, 2);
        assert_eq!(settings.refresh_interval_sec, 30);
        assert!(settings.auto_refresh_enabled);
        assert!(SettingsChanges::default().is_empty());
    }
}
