//! Terminal styling shared by the commands.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}";

pub enum Tone {
    Title,
    Label,
    Warning,
    Subtle,
}

pub fn paint(text: &str, tone: Tone) -> String {
    let styled = match tone {
        Tone::Title => style(text).bold().underlined(),
        Tone::Label => style(text).bold(),
        Tone::Warning => style(text).yellow(),
        Tone::Subtle => style(text).dim(),
    };
    styled.to_string()
}

/// Rounded table with a bold cyan header row.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| {
            Cell::new(h)
                .fg(Color::Cyan)
                .add_attribute(Attribute::Bold)
        }));
    table
}

/// Right-aligned value, or a grey "N/A".
pub fn format_optional_cell<T>(value: Option<T>, format_fn: impl Fn(T) -> String) -> Cell {
    match value {
        Some(v) => Cell::new(format_fn(v)).set_alignment(CellAlignment::Right),
        None => na_cell(false).set_alignment(CellAlignment::Right),
    }
}

/// Signed percentage with `decimals` places, e.g. `+0.850%`.
pub fn format_change(change: f64, decimals: u8) -> String {
    format!("{:+.*}%", usize::from(decimals), change)
}

/// Gains are red and losses green, as quoted on mainland exchanges.
pub fn change_cell(change: f64, decimals: u8) -> Cell {
    let color = if change > 0.0 {
        Color::Red
    } else if change < 0.0 {
        Color::Green
    } else {
        Color::Reset
    };
    Cell::new(format_change(change, decimals))
        .fg(color)
        .set_alignment(CellAlignment::Right)
}

/// "N/A", red when the value is missing because a lookup failed.
pub fn na_cell(failed: bool) -> Cell {
    Cell::new("N/A").fg(if failed { Color::Red } else { Color::DarkGrey })
}

pub fn progress_bar(len: u64, message: &'static str) -> ProgressBar {
    let bar_style = ProgressStyle::default_bar()
        .template(PROGRESS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    ProgressBar::new(len).with_style(bar_style).with_message(message)
}
