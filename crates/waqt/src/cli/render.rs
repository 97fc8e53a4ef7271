//! Text rendering of schedule snapshots.

use std::fmt::Write as _;

use crate::error::Result;
use crate::service::{ScheduleSnapshot, ScheduleState};
use crate::timetable::{format_date, CalculationMethod};

use super::OutputFormat;

/// Render `snapshot` in the requested format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render(snapshot: &ScheduleSnapshot, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Plain => Ok(plain(snapshot)),
        OutputFormat::Table => Ok(table(snapshot)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(snapshot)?),
    }
}

/// One line per fact: location, next prayer, status.
#[must_use]
pub fn plain(snapshot: &ScheduleSnapshot) -> String {
    let mut out = header(snapshot);

    match snapshot.next_entry() {
        Some(next) => {
            let _ = writeln!(
                out,
                "Next: {} ({}) at {} in {}",
                next.prayer,
                next.arabic_name,
                next.time_label(),
                next.time_remaining.as_deref().unwrap_or_default()
            );
        }
        None if !snapshot.is_error() => {
            let _ = writeln!(out, "Status: {}", snapshot.state);
        }
        None => {}
    }

    out.push_str(&status_footer(snapshot));
    out
}

/// The full day as an aligned table with the next prayer marked.
#[must_use]
pub fn table(snapshot: &ScheduleSnapshot) -> String {
    let mut out = header(snapshot);

    if snapshot.entries.is_empty() {
        if !snapshot.is_error() {
            let _ = writeln!(out, "Status: {}", snapshot.state);
        }
    } else {
        out.push('\n');
        let _ = writeln!(out, "  {:<9} {:<7} {:<6}", "PRAYER", "", "TIME");
        for entry in &snapshot.entries {
            let marker = if entry.is_next { ">" } else { " " };
            let _ = write!(
                out,
                "{marker} {:<9} {:<7} {:<6}",
                entry.prayer.name(),
                entry.arabic_name,
                entry.time_label()
            );
            if let Some(remaining) = &entry.time_remaining {
                let _ = write!(out, " in {remaining}");
            }
            out.push('\n');
        }
    }

    out.push_str(&status_footer(snapshot));
    out
}

/// The supported calculation methods with their ids and keys.
#[must_use]
pub fn methods(current: CalculationMethod) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>3}  {:<20} {}", "ID", "KEY", "NAME");
    for method in CalculationMethod::ALL {
        let marker = if method == current { " (default)" } else { "" };
        let _ = writeln!(
            out,
            "{:>3}  {:<20} {}{marker}",
            method.id(),
            method.key(),
            method.label()
        );
    }
    out
}

fn header(snapshot: &ScheduleSnapshot) -> String {
    let mut out = String::new();
    if let Some(location) = &snapshot.location {
        let _ = writeln!(out, "{} ({})", location.name, location.coordinates);
    }
    if let Some(date) = snapshot.date {
        let _ = writeln!(out, "{} - {}", format_date(date), snapshot.method);
    }
    out
}

fn status_footer(snapshot: &ScheduleSnapshot) -> String {
    let Some(error) = &snapshot.error else {
        return String::new();
    };
    match snapshot.state {
        ScheduleState::TimetableFailed if snapshot.stale => {
            format!("Showing the last timetable received. Refresh failed: {error}\n")
        }
        _ => format!("Error: {error}\n"),
    }
}
