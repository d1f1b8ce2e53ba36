//! The diff renderer (SPEC_FULL.md §4.7): turns [`crate::correlate::CorrelationRow`]s
//! into an aligned, colorized comparison table.
//!
//! Ported from `cmd/diff.go`'s `diffPrinter`/`fmtDiff` and
//! `cmd/table_column.go`'s `tableColumnType` in original_source. The Go
//! version hands the rows to `github.com/geckoboard/cli-table`; this crate
//! has no equivalent table-layout dependency in the corpus, so column widths
//! are computed by hand the way the teacher's own `display.rs` hand-rolled
//! its box-drawing call tree (padding, `{:>width$}` alignment) rather than
//! reaching for an external table crate.

use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;

use crate::correlate::CorrelationRow;
use crate::error::{PrismError, Result};
use crate::tree::{CallMetrics, Profile};

const DIFF_EPSILON: f64 = 0.01;

/// `{time, percent}` -- SPEC_FULL.md §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayFormat {
    Time,
    Percent,
}

impl FromStr for DisplayFormat {
    type Err = PrismError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "time" => Ok(DisplayFormat::Time),
            "percent" => Ok(DisplayFormat::Percent),
            other => Err(PrismError::InvalidArgument(format!(
                "unsupported display format {other:?}; expected \"time\" or \"percent\""
            ))),
        }
    }
}

/// `{auto, ns, us, ms, s}` -- SPEC_FULL.md §4.7. `Auto` is resolved to a
/// concrete unit by [`detect_unit`] before rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DisplayUnit {
    Ns,
    Us,
    Ms,
    S,
    Auto,
}

impl FromStr for DisplayUnit {
    type Err = PrismError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(DisplayUnit::Auto),
            "ns" => Ok(DisplayUnit::Ns),
            "us" => Ok(DisplayUnit::Us),
            "ms" => Ok(DisplayUnit::Ms),
            "s" => Ok(DisplayUnit::S),
            other => Err(PrismError::InvalidArgument(format!(
                "unsupported display unit {other:?}; expected one of auto, ns, us, ms, s"
            ))),
        }
    }
}

impl DisplayUnit {
    /// Convert a duration to this unit's floating-point scale.
    fn convert(self, duration: Duration) -> f64 {
        let nanos = duration.as_nanos() as f64;
        match self {
            DisplayUnit::Ns => nanos,
            DisplayUnit::Us => nanos / 1_000.0,
            DisplayUnit::Ms => nanos / 1_000_000.0,
            DisplayUnit::S => nanos / 1_000_000_000.0,
            DisplayUnit::Auto => unreachable!("Auto must be resolved before formatting"),
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            DisplayUnit::Ns => "ns",
            DisplayUnit::Us => "us",
            DisplayUnit::Ms => "ms",
            DisplayUnit::S => "s",
            DisplayUnit::Auto => unreachable!("Auto must be resolved before formatting"),
        }
    }

    fn format(self, value: f64) -> String {
        format!("{:.1}{}", value, self.suffix())
    }
}

/// `total, min, max, mean, median, invocations, p50, p75, p90, p99, stddev`
/// -- SPEC_FULL.md §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Total,
    Min,
    Max,
    Mean,
    Median,
    Invocations,
    P50,
    P75,
    P90,
    P99,
    StdDev,
}

impl Column {
    const ALL: [Column; 11] = [
        Column::Total,
        Column::Min,
        Column::Max,
        Column::Mean,
        Column::Median,
        Column::Invocations,
        Column::P50,
        Column::P75,
        Column::P90,
        Column::P99,
        Column::StdDev,
    ];

    fn name(self) -> &'static str {
        match self {
            Column::Total => "total",
            Column::Min => "min",
            Column::Max => "max",
            Column::Mean => "mean",
            Column::Median => "median",
            Column::Invocations => "invocations",
            Column::P50 => "p50",
            Column::P75 => "p75",
            Column::P90 => "p90",
            Column::P99 => "p99",
            Column::StdDev => "stddev",
        }
    }

    fn header(self, format: DisplayFormat) -> String {
        if matches!(self, Column::Invocations) {
            return "invoc".to_string();
        }
        if matches!(self, Column::StdDev) {
            return "stddev".to_string();
        }
        let symbol = match format {
            DisplayFormat::Time => "ms",
            DisplayFormat::Percent => "%",
        };
        format!("{} ({})", self.name(), symbol)
    }

    /// Pull this column's duration out of a [`CallMetrics`] node. Not
    /// meaningful for `Invocations`/`StdDev`, which are formatted directly
    /// from their own (non-duration) fields by [`format_cell`].
    fn duration(self, metrics: &CallMetrics) -> Duration {
        match self {
            Column::Total => metrics.total_time,
            Column::Min => metrics.min_time,
            Column::Max => metrics.max_time,
            Column::Mean => metrics.mean_time,
            Column::Median => metrics.median_time,
            Column::P50 => metrics.p50_time,
            Column::P75 => metrics.p75_time,
            Column::P90 => metrics.p90_time,
            Column::P99 => metrics.p99_time,
            Column::Invocations | Column::StdDev => Duration::ZERO,
        }
    }
}

fn supported_column_names() -> String {
    Column::ALL
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a comma-delimited column list, e.g. `"total,mean,invocations"`.
pub fn parse_columns(list: &str) -> Result<Vec<Column>> {
    list.split(',')
        .map(str::trim)
        .map(|name| match name {
            "total" => Ok(Column::Total),
            "min" => Ok(Column::Min),
            "max" => Ok(Column::Max),
            "mean" => Ok(Column::Mean),
            "median" => Ok(Column::Median),
            "invocations" => Ok(Column::Invocations),
            "p50" => Ok(Column::P50),
            "p75" => Ok(Column::P75),
            "p90" => Ok(Column::P90),
            "p99" => Ok(Column::P99),
            "stddev" => Ok(Column::StdDev),
            other => Err(PrismError::UnknownColumn(
                other.to_string(),
                supported_column_names(),
            )),
        })
        .collect()
}

/// Render a diff table comparing `profiles[0]` (the baseline) against every
/// other profile, one row per [`CorrelationRow`], one column group per
/// profile. Colors are emitted as raw ANSI escapes; callers writing to a
/// non-terminal should pass the result through [`strip_ansi`].
pub fn render(
    profiles: &[Profile],
    format: DisplayFormat,
    unit: DisplayUnit,
    columns: &[Column],
    clip_threshold: f64,
) -> Result<String> {
    if profiles.len() < 2 {
        return Err(PrismError::InsufficientProfiles);
    }
    if columns.is_empty() {
        return Err(PrismError::InvalidArgument(
            "no table columns specified for diff output".into(),
        ));
    }

    let rows = crate::correlate::correlate(profiles);
    let unit = if unit == DisplayUnit::Auto {
        detect_unit(&rows, columns)
    } else {
        unit
    };

    let header_rows = build_header(profiles, columns, format);
    let body_rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| build_row(&profiles[0].target, row, columns, format, unit, clip_threshold))
        .collect();

    Ok(tabularize(header_rows, body_rows))
}

/// Mirror the original's `detectTimeUnit`: find the coarsest unit for which
/// the largest observed value across the selected columns still formats as
/// `>= 1.0`.
fn detect_unit(rows: &[CorrelationRow], columns: &[Column]) -> DisplayUnit {
    let mut max_nanos: u128 = 0;
    for row in rows {
        for metrics in row.metrics.iter().flatten() {
            for &column in columns {
                if matches!(column, Column::Invocations | Column::StdDev) {
                    continue;
                }
                max_nanos = max_nanos.max(column.duration(metrics).as_nanos());
            }
        }
    }

    for candidate in [DisplayUnit::S, DisplayUnit::Ms, DisplayUnit::Us] {
        if candidate.convert(Duration::from_nanos(max_nanos as u64)) >= 1.0 {
            return candidate;
        }
    }
    DisplayUnit::Ns
}

fn build_header(profiles: &[Profile], columns: &[Column], format: DisplayFormat) -> Vec<Vec<String>> {
    let mut group_titles = vec!["call stack".to_string()];
    let mut column_headers = vec![String::new()];

    for (index, profile) in profiles.iter().enumerate() {
        let title = match (&profile.label, index) {
            (Some(label), 0) => format!("{label} - baseline"),
            (None, 0) => "baseline".to_string(),
            (Some(label), _) => label.clone(),
            (None, i) => format!("profile {i}"),
        };
        group_titles.push(title);
        group_titles.extend(std::iter::repeat(String::new()).take(columns.len().saturating_sub(1)));
        for column in columns {
            column_headers.push(column.header(format));
        }
    }

    vec![group_titles, column_headers]
}

fn build_row(
    root: &CallMetrics,
    row: &CorrelationRow,
    columns: &[Column],
    format: DisplayFormat,
    unit: DisplayUnit,
    clip_threshold: f64,
) -> Vec<String> {
    let indent = "| ".repeat(row.depth);
    let marker = if row.has_children { "- " } else { "+ " };
    let mut cells = vec![format!("{indent}{marker}{}", row.fn_name)];

    let baseline = row.metrics[0];
    for metrics in &row.metrics {
        for &column in columns {
            cells.push(format_cell(root, baseline, *metrics, column, format, unit, clip_threshold));
        }
    }
    cells
}

/// SPEC_FULL.md §4.7's per-cell formatting rule.
fn format_cell(
    root: &CallMetrics,
    baseline: Option<&CallMetrics>,
    candidate: Option<&CallMetrics>,
    column: Column,
    format: DisplayFormat,
    unit: DisplayUnit,
    clip_threshold: f64,
) -> String {
    let Some(candidate) = candidate else {
        return String::new();
    };

    if matches!(column, Column::Invocations) {
        return candidate.invocations.to_string();
    }
    if matches!(column, Column::StdDev) {
        return format!("{:.3}", candidate.std_dev);
    }

    let Some(baseline) = baseline else {
        return String::new();
    };

    let root_val = unit.convert(column.duration(root));
    let base_val = unit.convert(column.duration(baseline));
    let cand_val = unit.convert(column.duration(candidate));

    let is_baseline_cell = std::ptr::eq(baseline, candidate);
    if is_baseline_cell {
        return match format {
            DisplayFormat::Time => unit.format(cand_val),
            DisplayFormat::Percent => {
                let pct = if root_val != 0.0 { 100.0 * cand_val / root_val } else { 0.0 };
                format!("{pct:.1}%")
            }
        };
    }

    let abs_delta = (base_val - cand_val).abs();
    let pct = if root_val != 0.0 { 100.0 * cand_val / root_val } else { 0.0 };

    let mut speedup = if cand_val != 0.0 { base_val / cand_val } else { 0.0 };
    if abs_delta < DIFF_EPSILON {
        speedup = 1.0;
    }

    let (color, symbol) = if speedup == 0.0 || speedup == 1.0 {
        ("\x1b[33m", '=') // yellow
    } else if speedup >= 1.0 {
        ("\x1b[32m", '<') // green: candidate is faster
    } else {
        ("\x1b[31m", '>') // red: candidate is slower
    };

    match format {
        DisplayFormat::Time => {
            if cand_val == 0.0 || (abs_delta / cand_val).abs() < clip_threshold {
                format!("{} (--)", unit.format(cand_val))
            } else {
                format!("{} ({color}{symbol} {speedup:.1}x\x1b[0m)", unit.format(cand_val))
            }
        }
        DisplayFormat::Percent => {
            if abs_delta < clip_threshold {
                format!("{pct:.1}% (--)")
            } else {
                format!("{pct:.1}% ({color}{symbol} {speedup:.1}x\x1b[0m)")
            }
        }
    }
}

/// Lay rows out into a padded, left/right-aligned plain-text table. The
/// first column (the call-stack tree) is left-aligned; every measurement
/// column is right-aligned, matching `cli-table`'s alignment choices in the
/// original Go renderer.
fn tabularize(header_rows: Vec<Vec<String>>, body_rows: Vec<Vec<String>>) -> String {
    let num_cols = header_rows.first().map_or(0, Vec::len);
    let mut widths = vec![0usize; num_cols];

    for row in header_rows.iter().chain(body_rows.iter()) {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(visible_width(cell));
        }
    }

    let mut out = String::new();
    for row in &header_rows {
        write_row(&mut out, row, &widths);
    }
    for row in &body_rows {
        write_row(&mut out, row, &widths);
    }
    out
}

fn write_row(out: &mut String, row: &[String], widths: &[usize]) {
    for (i, cell) in row.iter().enumerate() {
        let pad = widths[i].saturating_sub(visible_width(cell));
        if i == 0 {
            let _ = write!(out, "{cell}{:pad$}", "", pad = pad);
        } else {
            let _ = write!(out, " {:pad$}{cell}", "", pad = pad);
        }
    }
    out.push('\n');
}

/// Width of a cell ignoring ANSI color escapes, so padding aligns on the
/// visible text rather than counting escape bytes.
fn visible_width(cell: &str) -> usize {
    strip_ansi(cell).chars().count()
}

/// Strip ANSI escape sequences (`\x1b[...m`) from `s`. Used by the CLI's
/// consumer when stdout is not a terminal or color was explicitly disabled
/// -- SPEC_FULL.md's "thin collaborator" ANSI-stripping routine.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
