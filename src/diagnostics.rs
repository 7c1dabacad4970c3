//! Console diagnostics: missing values, descriptive statistics and previews.
//! Informational only; nothing here affects the pipeline results.

use polars::prelude::*;

use crate::aggregate::{Cell, SummaryTable};
use crate::cleaning::MissingReport;
use crate::errors::TableError;
use crate::table::{frame_error, TimeTable};

/// Descriptive statistics of one column, missing values excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub name: String,
    pub count: usize,
    pub mean: Option<f64>,
    /// Sample standard deviation (n - 1).
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

/// Quantiles interpolate linearly between order statistics.
pub fn column_stats(name: &str, values: &Float64Chunked) -> PolarsResult<ColumnStats> {
    let count = values.len() - values.null_count();
    Ok(ColumnStats {
        name: name.to_string(),
        count,
        mean: values.mean(),
        std: if count > 1 { values.std(1) } else { None },
        min: values.min(),
        q25: values.quantile(0.25, QuantileMethod::Linear)?,
        median: values.median(),
        q75: values.quantile(0.75, QuantileMethod::Linear)?,
        max: values.max(),
    })
}

pub fn describe(table: &TimeTable) -> Result<Vec<ColumnStats>, TableError> {
    table
        .column_names()
        .iter()
        .map(|name| {
            table
                .frame()
                .column(name)
                .and_then(|c| column_stats(name, c.f64()?))
                .map_err(|e| frame_error(table.name(), e))
        })
        .collect()
}

/// Rows where `column` holds exactly `target`. `None` if the column is absent.
pub fn count_equal(table: &TimeTable, column: &str, target: f64) -> Option<usize> {
    let values = table.values(column).ok()?;
    Some(values.iter().filter(|v| **v == Some(target)).count())
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.3}", v),
        None => "NaN".to_string(),
    }
}

fn fmt_cell(cell: &Cell) -> String {
    match cell {
        Cell::Number(v) => fmt_opt(*v),
        Cell::Time(Some(t)) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        Cell::Time(None) => "NaT".to_string(),
    }
}

pub fn print_missing_report(report: &MissingReport) {
    println!("\nMissing values in '{}' ({} rows):", report.source, report.rows);
    for (column, missing) in &report.counts {
        println!("  {:<40} {}", column, missing);
    }
}

pub fn print_statistics(stats: &[ColumnStats]) {
    println!("\nGlobal statistics:");
    println!(
        "  {:<32} {:>8} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "column", "count", "mean", "std", "min", "25%", "50%", "75%", "max"
    );
    for s in stats {
        println!(
            "  {:<32} {:>8} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
            s.name,
            s.count,
            fmt_opt(s.mean),
            fmt_opt(s.std),
            fmt_opt(s.min),
            fmt_opt(s.q25),
            fmt_opt(s.median),
            fmt_opt(s.q75),
            fmt_opt(s.max)
        );
    }
}

/// Prints the first `rows` rows of a summary table under `title`.
pub fn print_summary_preview(title: &str, summary: &SummaryTable, rows: usize) {
    println!("\n{} ({} rows):", title, summary.len());
    if summary.is_empty() {
        println!("  (none)");
        return;
    }
    let header: Vec<String> = ["station", "period"]
        .iter()
        .map(|s| s.to_string())
        .chain(summary.labels().iter().cloned())
        .collect();
    println!("  {}", header.join(" | "));
    for row in summary.rows().iter().take(rows) {
        let mut line = vec![row.station.clone(), row.period.to_string()];
        line.extend(row.cells.iter().map(fmt_cell));
        println!("  {}", line.join(" | "));
    }
}
