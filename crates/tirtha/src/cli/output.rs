//! Output formatting utilities for CLI commands
//!
//! Provides consistent formatting for:
//! - Tables with column alignment
//! - Durations and timestamps
//! - Colors for run and task states

use chrono::{DateTime, Local, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use std::time::Duration;
use tirtha_protocol::RunStatus;

/// Format a duration compactly
///
/// Examples:
/// - 42s -> "42s"
/// - 125s -> "2m 05s"
/// - 7322s -> "2h 02m"
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Format a timestamp as "X time ago", or absolute local time past a week.
pub fn format_time(time: DateTime<Utc>) -> String {
    let secs = (Utc::now() - time).num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }
    let secs = secs as u64;

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
        format_time_absolute(time)
    }
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

pub fn format_time_absolute(time: DateTime<Utc>) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%Y-%m-%d %H:%M").to_string()
}

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

/// Print a table with custom column colors
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
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
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| {
                let cell = Cell::new(text);
                if let Some(c) = color {
                    cell.fg(c)
                } else {
                    cell
                }
            })
            .collect();
        table.add_row(cells);
    }

    println!("{}", table);
}

/// Display color for a Run status
pub fn run_status_color(status: RunStatus) -> Color {
    match status {
        RunStatus::Running => Color::Cyan,
        RunStatus::Done => Color::Green,
        RunStatus::Archived => Color::Blue,
        RunStatus::Manual => Color::Magenta,
        RunStatus::Error => Color::Red,
        RunStatus::Cancelled => Color::Yellow,
    }
}
