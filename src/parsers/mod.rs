pub mod csv_parser;
pub mod xlsx_parser;

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::config::SourceConfig;
use crate::errors::{ParseError, TableError};
use crate::table::{TimeBasis, TimeTable};
use crate::utils::{clean_label, parse_locale_float};

/// A cell as seen by the shared table assembly, independent of file format.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RawCell<'a> {
    Empty,
    Text(&'a str),
    Number(f64),
}

struct PendingColumn {
    name: String,
    source_index: usize,
    values: Vec<Option<f64>>,
    filled: usize,
    unparsed: usize,
}

/// Collects rows from a parser and turns them into a sorted [`TimeTable`].
pub(crate) struct TableAssembler {
    path: PathBuf,
    name: String,
    explicit_columns: bool,
    null_markers: Vec<String>,
    timestamp_index: usize,
    basis: Option<TimeBasis>,
    index: Vec<NaiveDateTime>,
    columns: Vec<PendingColumn>,
}

impl TableAssembler {
    /// Resolves the configured timestamp and data columns against the header.
    pub(crate) fn new(source: &SourceConfig, path: &Path, raw_headers: &[String]) -> Result<Self, ParseError> {
        let headers: Vec<String> = raw_headers.iter().map(|h| clean_label(h)).collect();
        let wanted_ts = clean_label(&source.timestamp_column);
        let timestamp_index = headers
            .iter()
            .position(|h| *h == wanted_ts)
            .ok_or_else(|| ParseError::MissingColumn {
                path: path.to_path_buf(),
                column: wanted_ts.clone(),
            })?;

        let mut columns: Vec<PendingColumn> = Vec::new();
        let pending = |name: &str, source_index: usize| PendingColumn {
            name: name.to_string(),
            source_index,
            values: Vec::new(),
            filled: 0,
            unparsed: 0,
        };

        match &source.columns {
            Some(selection) => {
                for wanted in selection {
                    let wanted = clean_label(wanted);
                    let source_index = headers
                        .iter()
                        .position(|h| *h == wanted)
                        .ok_or_else(|| ParseError::MissingColumn {
                            path: path.to_path_buf(),
                            column: wanted.clone(),
                        })?;
                    columns.push(pending(wanted.as_str(), source_index));
                }
            }
            None => {
                for (i, header) in headers.iter().enumerate() {
                    if i == timestamp_index {
                        continue;
                    }
                    if header.is_empty() {
                        debug!("Skipping unnamed column {} in {}", i, path.display());
                        continue;
                    }
                    if columns.iter().any(|c| c.name == *header) {
                        warn!("Duplicate column label '{}' in {}; keeping the first", header, path.display());
                        continue;
                    }
                    columns.push(pending(header.as_str(), i));
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            name: source.name.clone(),
            explicit_columns: source.columns.is_some(),
            null_markers: source.null_markers.iter().map(|m| m.trim().to_string()).collect(),
            timestamp_index,
            basis: None,
            index: Vec::new(),
            columns,
        })
    }

    pub(crate) fn timestamp_index(&self) -> usize {
        self.timestamp_index
    }

    pub(crate) fn column_indices(&self) -> Vec<usize> {
        self.columns.iter().map(|c| c.source_index).collect()
    }

    /// Appends one row. `cells` is aligned with [`TableAssembler::column_indices`].
    pub(crate) fn push_row(
        &mut self,
        file_row: usize,
        timestamp: (NaiveDateTime, TimeBasis),
        cells: &[RawCell<'_>],
    ) -> Result<(), ParseError> {
        let (ts, basis) = timestamp;
        match self.basis {
            None => self.basis = Some(basis),
            Some(expected) if expected != basis => {
                return Err(ParseError::MixedTimestampRepresentation {
                    path: self.path.clone(),
                    row: file_row,
                    expected,
                    found: basis,
                });
            }
            Some(_) => {}
        }
        self.index.push(ts);

        for (column, cell) in self.columns.iter_mut().zip(cells.iter().copied()) {
            let value = match cell {
                RawCell::Empty => None,
                RawCell::Number(v) if v.is_finite() => Some(v),
                RawCell::Number(_) => None,
                RawCell::Text(text) => {
                    let text = text.trim();
                    if text.is_empty() || self.null_markers.iter().any(|m| m == text) {
                        None
                    } else {
                        let parsed = parse_locale_float(text);
                        if parsed.is_none() {
                            column.unparsed += 1;
                        }
                        parsed
                    }
                }
            };
            if value.is_some() {
                column.filled += 1;
            }
            column.values.push(value);
        }
        Ok(())
    }

    pub(crate) fn timestamp_error(&self, file_row: usize, value: &str, format: Option<&str>, message: String) -> ParseError {
        ParseError::TimestampParseError {
            path: self.path.clone(),
            row: file_row,
            value: value.to_string(),
            format: format.unwrap_or("auto").to_string(),
            message,
        }
    }

    pub(crate) fn finish(self) -> Result<TimeTable, ParseError> {
        let rows = self.index.len();
        let mut table = TimeTable::new(self.name, self.basis.unwrap_or(TimeBasis::Naive), self.index);
        for column in self.columns {
            if !self.explicit_columns && column.filled == 0 && column.unparsed > 0 {
                info!(
                    "Dropping non-numeric column '{}' from {}",
                    column.name,
                    self.path.display()
                );
                continue;
            }
            if column.unparsed > 0 {
                warn!(
                    "{} value(s) in column '{}' of {} could not be parsed as numbers and are treated as missing",
                    column.unparsed,
                    column.name,
                    self.path.display()
                );
            }
            table
                .push_column(column.name, column.values)
                .map_err(|e| match e {
                    TableError::DuplicateColumn { column, .. } => ParseError::DuplicateColumn {
                        path: self.path.clone(),
                        column,
                    },
                    other => ParseError::Table {
                        path: self.path.clone(),
                        source: other,
                    },
                })?;
        }
        let table = table.sort_by_time().map_err(|e| ParseError::Table {
            path: self.path.clone(),
            source: e,
        })?;
        debug!("Assembled {} rows from {}", rows, self.path.display());
        Ok(table)
    }
}
