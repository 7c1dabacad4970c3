//! Value corrections applied to a loaded table before it is merged.

use chrono::NaiveDateTime;
use log::{debug, info};

use crate::errors::TableError;
use crate::table::TimeTable;

/// Per-column missing-value counts of one source, taken before interpolation.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingReport {
    pub source: String,
    pub rows: usize,
    pub counts: Vec<(String, usize)>,
}

impl MissingReport {
    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, n)| n).sum()
    }
}

pub fn missing_counts(table: &TimeTable) -> Result<MissingReport, TableError> {
    let counts = table
        .column_names()
        .into_iter()
        .map(|name| table.missing_count(&name).map(|n| (name, n)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MissingReport {
        source: table.name().to_string(),
        rows: table.len(),
        counts,
    })
}

/// Replaces negative values of the named columns by zero.
/// Returns the cleaned table and the number of values changed.
pub fn clamp_non_negative(mut table: TimeTable, columns: &[String]) -> Result<(TimeTable, usize), TableError> {
    let mut clamped = 0usize;
    for name in columns {
        let mut values = table.values(name)?;
        for value in values.iter_mut() {
            if let Some(v) = value {
                if *v < 0.0 {
                    *v = 0.0;
                    clamped += 1;
                }
            }
        }
        table.replace_values(name, values)?;
    }
    if clamped > 0 {
        info!("Clamped {} negative value(s) to zero in '{}'", clamped, table.name());
    }
    Ok((table, clamped))
}

/// Fills interior gaps of one series by linear interpolation over elapsed
/// time. Runs at either end stay missing. `index` must be sorted.
pub fn interpolate_series(index: &[NaiveDateTime], values: &[Option<f64>]) -> (Vec<Option<f64>>, usize) {
    let mut out = values.to_vec();
    let mut filled = 0usize;
    let mut previous: Option<usize> = None;

    for i in 0..values.len() {
        if values[i].is_none() {
            continue;
        }
        if let Some(p) = previous {
            if i > p + 1 {
                let (t0, v0) = (index[p], values[p].unwrap_or_default());
                let (t1, v1) = (index[i], values[i].unwrap_or_default());
                let span = (t1 - t0).num_milliseconds() as f64;
                for (j, slot) in out.iter_mut().enumerate().take(i).skip(p + 1) {
                    *slot = Some(if span <= 0.0 {
                        v0
                    } else {
                        let elapsed = (index[j] - t0).num_milliseconds() as f64;
                        v0 + (v1 - v0) * elapsed / span
                    });
                    filled += 1;
                }
            }
        }
        previous = Some(i);
    }
    (out, filled)
}

/// Applies [`interpolate_series`] to every column, writing filled columns
/// back into the frame.
pub fn interpolate_time(mut table: TimeTable) -> Result<(TimeTable, usize), TableError> {
    let mut total = 0usize;
    for name in &table.column_names() {
        let (values, filled) = interpolate_series(table.index(), &table.values(name)?);
        if filled > 0 {
            debug!("Interpolated {} value(s) in '{}.{}'", filled, table.name(), name);
            table.replace_values(name, values)?;
        }
        total += filled;
    }
    if total > 0 {
        info!("Filled {} gap value(s) by time interpolation in '{}'", total, table.name());
    }
    Ok((table, total))
}
