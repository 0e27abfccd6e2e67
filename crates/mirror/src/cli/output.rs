//! Output formatting for CLI commands

use chrono::{DateTime, Local, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

/// Print a table with headers and rows
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }

    println!("{}", table);
}

/// Format a millisecond epoch stamp relative to `now_ms`
///
/// Examples:
/// - "12 seconds ago"
/// - "3 hours ago"
/// - "2024-12-15 14:30" (if older than a week)
pub fn format_stamp(stamp_ms: Option<i64>, now_ms: i64) -> String {
    let Some(stamp_ms) = stamp_ms else {
        return "never".to_string();
    };
    let secs = (now_ms - stamp_ms).max(0) / 1000;

    if secs < 60 {
        format!("{} second{} ago", secs, plural(secs))
    } else if secs < 3600 {
        let mins = secs / 60;
        format!("{} minute{} ago", mins, plural(mins))
    } else if secs < 86400 {
        let hours = secs / 3600;
        format!("{} hour{} ago", hours, plural(hours))
    } else if secs < 604800 {
        let days = secs / 86400;
        format!("{} day{} ago", days, plural(days))
    } else {
        format_absolute(stamp_ms)
    }
}

pub fn format_absolute(stamp_ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(stamp_ms) {
        Some(time) => time.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => stamp_ms.to_string(),
    }
}

/// "850ms", "4.2s", "3m 05s"
pub fn format_duration_ms(ms: i64) -> String {
    if ms < 1000 {
        format!("{}ms", ms.max(0))
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m {:02}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}

/// Cut to `max` characters, marking the cut with an ellipsis.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
