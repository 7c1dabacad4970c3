//! Time-indexed table shared by every pipeline stage, backed by a polars
//! `DataFrame`.
//!
//! The frame always holds a `Datetime` time column and, once stations are
//! assigned, a string station column. Every other column is `Float64`. Nulls
//! are explicit missing values and are never replaced by zero implicitly.

use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use polars::prelude::{
    ChunkCompareEq, DataFrame, DataType, DatetimeChunked, IdxCa, IdxSize, IntoSeries, NamedFrom,
    PolarsError, PolarsResult, Series, SortMultipleOptions, TimeUnit,
};
use std::fmt;

use crate::errors::TableError;

/// Name of the frame column carrying the timestamps.
pub const TIME_COLUMN: &str = "__time";
/// Name of the frame column carrying station labels.
pub const STATION_COLUMN: &str = "__station";

/// How the timestamps of a table are represented.
///
/// `Utc` tables were parsed from offset-carrying values (or localized from a
/// configured zone) and normalized to UTC. `Naive` tables hold wall-clock
/// values with no zone information. The two can never be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBasis {
    Naive,
    Utc,
}

impl fmt::Display for TimeBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBasis::Naive => write!(f, "naive local"),
            TimeBasis::Utc => write!(f, "UTC"),
        }
    }
}

pub(crate) fn frame_error(table: &str, source: PolarsError) -> TableError {
    TableError::Frame {
        table: table.to_string(),
        source,
    }
}

fn is_reserved(name: &str) -> bool {
    name == TIME_COLUMN || name == STATION_COLUMN
}

fn read_index(frame: &DataFrame) -> PolarsResult<Vec<NaiveDateTime>> {
    let millis = frame.column(TIME_COLUMN)?.cast(&DataType::Int64)?;
    millis
        .i64()?
        .into_iter()
        .map(|ms| {
            ms.and_then(DateTime::from_timestamp_millis)
                .map(|t| t.naive_utc())
                .ok_or_else(|| PolarsError::ComputeError("null or out-of-range timestamp".into()))
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct TimeTable {
    name: String,
    basis: TimeBasis,
    /// Calendar zone of a `Utc` table; days and months are cut in this zone.
    zone: Option<Tz>,
    /// Mirror of the time column for positional access.
    index: Vec<NaiveDateTime>,
    frame: DataFrame,
}

impl TimeTable {
    pub fn new(name: impl Into<String>, basis: TimeBasis, index: Vec<NaiveDateTime>) -> Self {
        let time = DatetimeChunked::from_naive_datetime(
            TIME_COLUMN.into(),
            index.iter().copied(),
            TimeUnit::Milliseconds,
        )
        .into_series();
        Self {
            name: name.into(),
            basis,
            zone: None,
            index,
            frame: time.into_frame(),
        }
    }

    /// Same table metadata around a frame produced by a polars operation.
    pub(crate) fn with_frame(&self, frame: DataFrame) -> Result<Self, TableError> {
        let index = read_index(&frame).map_err(|e| frame_error(&self.name, e))?;
        Ok(Self {
            name: self.name.clone(),
            basis: self.basis,
            zone: self.zone,
            index,
            frame,
        })
    }

    /// Sets the calendar zone. Naive tables have no instant to convert and
    /// ignore it.
    pub fn with_zone(mut self, zone: Option<Tz>) -> Self {
        self.zone = match self.basis {
            TimeBasis::Utc => zone,
            TimeBasis::Naive => None,
        };
        self
    }

    /// Builder-style helper, mostly for tests and fixtures.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<Self, TableError> {
        self.push_column(name, values)?;
        Ok(self)
    }

    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), TableError> {
        let name = name.into();
        if values.len() != self.len() {
            return Err(TableError::LengthMismatch {
                table: self.name.clone(),
                column: name,
                expected: self.len(),
                found: values.len(),
            });
        }
        if is_reserved(&name) || self.has_column(&name) {
            return Err(TableError::DuplicateColumn {
                table: self.name.clone(),
                column: name,
            });
        }
        let added = self
            .frame
            .with_column(Series::new(name.as_str().into(), values))
            .map(|_| ());
        added.map_err(|e| frame_error(&self.name, e))
    }

    /// Replaces the values of an existing column.
    pub fn replace_values(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<(), TableError> {
        self.require(name)?;
        if values.len() != self.len() {
            return Err(TableError::LengthMismatch {
                table: self.name.clone(),
                column: name.to_string(),
                expected: self.len(),
                found: values.len(),
            });
        }
        let replaced = self
            .frame
            .replace(name, Series::new(name.into(), values))
            .map(|_| ());
        replaced.map_err(|e| frame_error(&self.name, e))
    }

    pub fn with_stations(mut self, stations: Vec<String>) -> Result<Self, TableError> {
        if stations.len() != self.len() {
            return Err(TableError::LengthMismatch {
                table: self.name.clone(),
                column: "station".to_string(),
                expected: self.len(),
                found: stations.len(),
            });
        }
        let added = self
            .frame
            .with_column(Series::new(STATION_COLUMN.into(), stations))
            .map(|_| ());
        added.map_err(|e| frame_error(&self.name, e))?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn basis(&self) -> TimeBasis {
        self.basis
    }

    pub fn zone(&self) -> Option<Tz> {
        self.zone
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    /// Timestamps as wall-clock time in the table's calendar zone.
    pub fn local_index(&self) -> Vec<NaiveDateTime> {
        match self.zone {
            Some(zone) => self
                .index
                .iter()
                .map(|t| zone.from_utc_datetime(t).naive_local())
                .collect(),
            None => self.index.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Value columns in frame order.
    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|n| n.as_str())
            .filter(|n| !is_reserved(n))
            .map(str::to_string)
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        !is_reserved(name) && self.frame.get_column_index(name).is_some()
    }

    /// Fails with the table name when the column is absent.
    pub fn require(&self, name: &str) -> Result<(), TableError> {
        if self.has_column(name) {
            Ok(())
        } else {
            Err(TableError::UnknownColumn {
                table: self.name.clone(),
                column: name.to_string(),
            })
        }
    }

    pub fn values(&self, name: &str) -> Result<Vec<Option<f64>>, TableError> {
        self.require(name)?;
        let column = self.frame.column(name).map_err(|e| frame_error(&self.name, e))?;
        let values = column.f64().map_err(|e| frame_error(&self.name, e))?;
        Ok(values.into_iter().collect())
    }

    pub fn missing_count(&self, name: &str) -> Result<usize, TableError> {
        self.require(name)?;
        let column = self.frame.column(name).map_err(|e| frame_error(&self.name, e))?;
        Ok(column.null_count())
    }

    /// Per-row station labels, once assigned.
    pub fn stations(&self) -> Option<Vec<String>> {
        let labels = self.frame.column(STATION_COLUMN).ok()?.str().ok()?;
        Some(
            labels
                .into_iter()
                .map(|s| s.unwrap_or_default().to_string())
                .collect(),
        )
    }

    pub fn is_sorted(&self) -> bool {
        self.index.windows(2).all(|w| w[0] <= w[1])
    }

    /// Stable sort of every row by timestamp.
    pub fn sort_by_time(self) -> Result<Self, TableError> {
        if self.is_sorted() {
            return Ok(self);
        }
        let sorted = self
            .frame
            .sort(
                [TIME_COLUMN],
                SortMultipleOptions::new().with_maintain_order(true),
            )
            .map_err(|e| frame_error(&self.name, e))?;
        self.with_frame(sorted)
    }

    /// New table holding the given rows in the given order.
    pub fn take_rows(&self, rows: &[usize]) -> Result<Self, TableError> {
        let idx = IdxCa::from_vec(
            "rows".into(),
            rows.iter().map(|&r| r as IdxSize).collect(),
        );
        let frame = self.frame.take(&idx).map_err(|e| frame_error(&self.name, e))?;
        self.with_frame(frame)
    }

    /// Rows assigned to `station`, in table order.
    pub fn station_rows(&self, station: &str) -> Result<Self, TableError> {
        let Ok(labels) = self.frame.column(STATION_COLUMN) else {
            return self.take_rows(&[]);
        };
        let mask = labels
            .str()
            .map_err(|e| frame_error(&self.name, e))?
            .equal(station);
        let frame = self.frame.filter(&mask).map_err(|e| frame_error(&self.name, e))?;
        self.with_frame(frame)
    }

    /// Keeps only the named columns, in the given order.
    pub fn select(&self, names: &[String]) -> Result<Self, TableError> {
        for name in names {
            self.require(name)?;
        }
        let mut keep = vec![TIME_COLUMN.to_string()];
        if self.frame.get_column_index(STATION_COLUMN).is_some() {
            keep.push(STATION_COLUMN.to_string());
        }
        keep.extend(names.iter().cloned());
        let frame = self.frame.select(keep).map_err(|e| frame_error(&self.name, e))?;
        Ok(Self {
            name: self.name.clone(),
            basis: self.basis,
            zone: self.zone,
            index: self.index.clone(),
            frame,
        })
    }
}
