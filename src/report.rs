//! Text timeline of an invocation's telemetry.
//!
//! Each task gets one row. A column is idle (`' '`) outside the task's
//! lifetime, waiting (`'░'`) when the task spent at least half of the
//! column suspended on lookups, and running otherwise. The running glyph
//! encodes how the task concluded: `'█'` fulfilled, `'▓'` rejected, `'▒'`
//! aborted by the flow ending.

use crate::{
    telemetry::{OutcomeKind, TelemetryEntry, TelemetrySink},
    types::TaskName,
    utils::{RangeColumns, overlap},
};
use core::{fmt::Write as _, ops::Range, time::Duration};
use std::io::Write as _;

const IDLE: char = ' ';
const WAITING: char = '░';

/// Default chart width in columns.
pub const DEFAULT_WIDTH: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Idle,
    Waiting,
    Running,
}

fn running_glyph(outcome: Option<OutcomeKind>) -> char {
    match outcome {
        Some(OutcomeKind::Fulfilled) | None => '█',
        Some(OutcomeKind::Rejected) => '▓',
        Some(OutcomeKind::Aborted) => '▒',
    }
}

fn status(outcome: Option<OutcomeKind>) -> &'static str {
    match outcome {
        Some(OutcomeKind::Fulfilled) => "fulfilled",
        Some(OutcomeKind::Rejected) => "rejected",
        Some(OutcomeKind::Aborted) => "aborted",
        None => "running",
    }
}

fn nanos(duration: Duration) -> u128 {
    duration.as_nanos()
}

fn millis(duration: Duration) -> String {
    format!("{:.1}ms", duration.as_secs_f64() * 1000.0)
}

/// Lifetime of the entry; zero-length tasks still cover one nanosecond so
/// they show up in the column they ran in.
fn lifetime(entry: &TelemetryEntry) -> Range<u128> {
    let start = nanos(entry.start);
    let end = entry.end.map_or(start, nanos).max(start + 1);
    start..end
}

fn cell(entry: &TelemetryEntry, column: &Range<u128>) -> Cell {
    let lifetime = lifetime(entry);
    let active = overlap(&lifetime, column);
    if active == 0 {
        return Cell::Idle;
    }
    let waiting: u128 = entry
        .waits
        .iter()
        .map(|wait| {
            let wait = nanos(wait.start).max(lifetime.start)..nanos(wait.end).min(lifetime.end);
            overlap(&wait, column)
        })
        .sum();
    if waiting.min(active) * 2 >= active {
        Cell::Waiting
    } else {
        Cell::Running
    }
}

/// Renders `entries` as a timeline `width` columns wide.
#[must_use]
pub fn render(entries: &[TelemetryEntry], width: usize) -> String {
    let width = width.max(1);
    let mut out = String::new();
    let Some(origin) = entries.iter().map(|entry| nanos(entry.start)).min() else {
        out.push_str("(no tasks)\n");
        return out;
    };
    let finish = entries
        .iter()
        .map(|entry| lifetime(entry).end)
        .max()
        .unwrap_or(origin);
    // Keep every column at least one nanosecond wide.
    let span = origin..finish.max(origin + width as u128);
    let total = Duration::from_nanos(u64::try_from(finish - origin).unwrap_or(u64::MAX));

    let name_width = entries
        .iter()
        .map(|entry| entry.name.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);
    let _ = writeln!(
        out,
        "{:<name_width$} │{:<width$}│ {} tasks in {}",
        "task",
        "timeline",
        entries.len(),
        millis(total),
    );
    for entry in entries {
        let glyph = running_glyph(entry.outcome);
        let row: String = (0..width)
            .map(|idx| match cell(entry, &span.column(idx, width)) {
                Cell::Idle => IDLE,
                Cell::Waiting => WAITING,
                Cell::Running => glyph,
            })
            .collect();
        let _ = write!(
            out,
            "{:<name_width$} │{row}│ {} {}",
            entry.name.as_str(),
            status(entry.outcome),
            millis(entry.duration()),
        );
        if !entry.waits.is_empty() {
            let _ = write!(out, " (waited {})", millis(entry.waited()));
        }
        if !entry.dependencies.is_empty() {
            let names: Vec<&str> = entry.dependencies.iter().map(TaskName::as_str).collect();
            let _ = write!(out, " ← {}", names.join(", "));
        }
        out.push('\n');
    }
    out
}

/// [`TelemetrySink`] that prints the rendered timeline to stderr.
#[derive(Debug, Clone, Copy)]
pub struct Chart {
    width: usize,
}

impl Chart {
    /// Chart `width` columns wide.
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self { width }
    }
}

impl Default for Chart {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH)
    }
}

impl TelemetrySink for Chart {
    fn consume(&self, entries: &[TelemetryEntry]) {
        let chart = render(entries, self.width);
        if let Err(error) = std::io::stderr().lock().write_all(chart.as_bytes()) {
            tracing::warn!(%error, "failed to write task timeline");
        }
    }
}
