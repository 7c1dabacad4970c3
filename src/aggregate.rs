//! Grouping of row-level data into per-station daily or monthly summaries.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, info, warn};
use polars::prelude::{
    col, lit, when, DataFrame, DataType, Expr, IntoLazy, NamedFrom, Null, PolarsError, PolarsResult, Series,
    SortMultipleOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::config::AggregationConfig;
use crate::errors::TableError;
use crate::table::{frame_error, TimeTable, STATION_COLUMN};

/// Group label used for rows that carry no station.
pub const UNASSIGNED_STATION: &str = "unassigned";

const PERIOD_COLUMN: &str = "__period";
const ROW_COLUMN: &str = "__row";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Daily,
    Monthly,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Daily => write!(f, "daily"),
            Granularity::Monthly => write!(f, "monthly"),
        }
    }
}

/// Calendar bucket of a summary row. A month is keyed by its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Period {
    Day(NaiveDate),
    Month(NaiveDate),
}

impl Period {
    /// Bucket of a wall-clock timestamp.
    pub fn of(ts: NaiveDateTime, granularity: Granularity) -> Self {
        let date = ts.date();
        match granularity {
            Granularity::Daily => Period::Day(date),
            Granularity::Monthly => Period::Month(date.with_day(1).unwrap_or(date)),
        }
    }

    fn from_key(key: i32, granularity: Granularity) -> Option<Self> {
        let date = NaiveDate::from_num_days_from_ce_opt(key)?;
        Some(match granularity {
            Granularity::Daily => Period::Day(date),
            Granularity::Monthly => Period::Month(date),
        })
    }

    fn key(&self) -> i32 {
        self.first_day().num_days_from_ce()
    }

    pub fn first_day(&self) -> NaiveDate {
        match self {
            Period::Day(d) | Period::Month(d) => *d,
        }
    }

    /// Midnight at the start of the period, used as the x position in charts.
    pub fn start(&self) -> NaiveDateTime {
        self.first_day().and_time(NaiveTime::MIN)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Day(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Period::Month(d) => write!(f, "{}", d.format("%Y-%m")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Sum,
    Mean,
    Max,
    Min,
}

impl Reducer {
    /// Group-wise reduction of `source`. Missing values are skipped and a
    /// group that observed nothing reduces to missing, sums included.
    pub fn expr(self, source: &str) -> Expr {
        let values = col(source);
        match self {
            Reducer::Sum => when(values.clone().count().gt(lit(0)))
                .then(values.sum())
                .otherwise(lit(Null {})),
            Reducer::Mean => values.mean(),
            Reducer::Max => values.max(),
            Reducer::Min => values.min(),
        }
    }
}

/// One output column: `reducer` applied to row-level column `source`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AggregateSpec {
    pub source: String,
    pub reducer: Reducer,
    pub label: String,
}

/// Time of the maximum of `by` in each group, and the value of `lookup` at
/// that time.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PeakSpec {
    pub by: String,
    pub lookup: String,
    pub time_label: String,
    pub value_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Number(Option<f64>),
    Time(Option<NaiveDateTime>),
}

impl Cell {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => *v,
            Cell::Time(_) => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::Time(t) => *t,
            Cell::Number(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub station: String,
    pub period: Period,
    pub cells: Vec<Cell>,
}

/// One row per (station, period), cells aligned with `labels`.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    granularity: Granularity,
    labels: Vec<String>,
    rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn from_rows(granularity: Granularity, labels: Vec<String>, rows: Vec<SummaryRow>) -> Result<Self, TableError> {
        let table = Self {
            granularity,
            labels,
            rows: Vec::new(),
        };
        if let Some(bad) = rows.iter().find(|r| r.cells.len() != table.labels.len()) {
            return Err(TableError::LengthMismatch {
                table: table.table_name(),
                column: format!("{} {}", bad.station, bad.period),
                expected: table.labels.len(),
                found: bad.cells.len(),
            });
        }
        Ok(Self { rows, ..table })
    }

    fn table_name(&self) -> String {
        format!("{} summary", self.granularity)
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn label_index(&self, label: &str) -> Result<usize, TableError> {
        self.labels
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| TableError::UnknownColumn {
                table: self.table_name(),
                column: label.to_string(),
            })
    }

    /// Value of a numeric cell; time cells read as missing.
    pub fn number(&self, row: &SummaryRow, label: &str) -> Result<Option<f64>, TableError> {
        let i = self.label_index(label)?;
        Ok(row.cells[i].as_number())
    }

    pub fn numbers(&self, label: &str) -> Result<Vec<Option<f64>>, TableError> {
        let i = self.label_index(label)?;
        Ok(self.rows.iter().map(|r| r.cells[i].as_number()).collect())
    }

    /// Appends a numeric column computed elsewhere.
    pub fn with_column(mut self, label: impl Into<String>, values: Vec<Option<f64>>) -> Result<Self, TableError> {
        let label = label.into();
        if self.labels.contains(&label) {
            return Err(TableError::DuplicateColumn {
                table: self.table_name(),
                column: label,
            });
        }
        if values.len() != self.rows.len() {
            return Err(TableError::LengthMismatch {
                table: self.table_name(),
                column: label,
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.cells.push(Cell::Number(value));
        }
        self.labels.push(label);
        Ok(self)
    }

    /// Keeps only the named columns, in the given order.
    pub fn select(&self, labels: &[String]) -> Result<Self, TableError> {
        let positions = labels
            .iter()
            .map(|l| self.label_index(l))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            granularity: self.granularity,
            labels: labels.to_vec(),
            rows: self
                .rows
                .iter()
                .map(|r| SummaryRow {
                    station: r.station.clone(),
                    period: r.period,
                    cells: positions.iter().map(|&i| r.cells[i]).collect(),
                })
                .collect(),
        })
    }

    pub fn filter<F: Fn(&SummaryRow) -> bool>(&self, keep: F) -> Self {
        Self {
            granularity: self.granularity,
            labels: self.labels.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    pub fn station_rows(&self, station: &str) -> Self {
        self.filter(|r| r.station == station)
    }

    /// Distinct station labels in row order.
    pub fn stations(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for row in &self.rows {
            if !seen.contains(&row.station.as_str()) {
                seen.push(&row.station);
            }
        }
        seen
    }
}

fn float_values(frame: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let values = frame.column(name)?.cast(&DataType::Float64)?;
    Ok(values.f64()?.into_iter().collect())
}

/// Row-level frame extended with the grouping keys and the row position.
fn keyed_frame(table: &TimeTable, granularity: Granularity) -> PolarsResult<DataFrame> {
    let periods: Vec<i32> = table
        .local_index()
        .iter()
        .map(|ts| Period::of(*ts, granularity).key())
        .collect();
    let stations = table
        .stations()
        .unwrap_or_else(|| vec![UNASSIGNED_STATION.to_string(); table.len()]);
    let rows: Vec<u32> = (0..table.len() as u32).collect();

    let mut frame = table.frame().clone();
    frame.with_column(Series::new(STATION_COLUMN.into(), stations))?;
    frame.with_column(Series::new(PERIOD_COLUMN.into(), periods))?;
    frame.with_column(Series::new(ROW_COLUMN.into(), rows))?;
    Ok(frame)
}

/// Row holding the maximum of `by` in each (station, period) group. Groups
/// where `by` was never observed have no entry; ties keep the first row.
fn peak_rows(frame: &DataFrame, by: &str) -> PolarsResult<HashMap<(String, i32), usize>> {
    let peaks = frame
        .clone()
        .lazy()
        .filter(col(by).is_not_null())
        .group_by([col(STATION_COLUMN), col(PERIOD_COLUMN)])
        .agg([col(ROW_COLUMN).get(col(by).arg_max()).alias(ROW_COLUMN)])
        .collect()?;
    let rows = peaks.column(ROW_COLUMN)?.cast(&DataType::Int64)?;
    let stations = peaks.column(STATION_COLUMN)?.str()?;
    let periods = peaks.column(PERIOD_COLUMN)?.i32()?;

    let mut out = HashMap::with_capacity(peaks.height());
    for ((station, period), row) in stations.into_iter().zip(periods).zip(rows.i64()?) {
        if let (Some(station), Some(period), Some(row)) = (station, period, row) {
            out.insert((station.to_string(), period), row as usize);
        }
    }
    Ok(out)
}

/// Groups `table` by (station, period) and applies the plan. Periods are cut
/// on the table's local calendar. Rows are ordered by station, then period.
pub fn aggregate(table: &TimeTable, granularity: Granularity, plan: &AggregationConfig) -> Result<SummaryTable, TableError> {
    for spec in &plan.aggregates {
        table.require(&spec.source)?;
    }
    let frame_err = |e: PolarsError| frame_error(table.name(), e);

    let frame = keyed_frame(table, granularity).map_err(frame_err)?;
    let reductions: Vec<Expr> = plan
        .aggregates
        .iter()
        .map(|s| s.reducer.expr(&s.source).alias(s.label.as_str()))
        .collect();
    let grouped = frame
        .clone()
        .lazy()
        .group_by([col(STATION_COLUMN), col(PERIOD_COLUMN)])
        .agg(reductions)
        .sort(
            [STATION_COLUMN, PERIOD_COLUMN],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()
        .map_err(frame_err)?;

    let mut labels: Vec<String> = plan.aggregates.iter().map(|s| s.label.clone()).collect();
    let columns = labels
        .iter()
        .map(|label| float_values(&grouped, label))
        .collect::<PolarsResult<Vec<_>>>()
        .map_err(frame_err)?;

    let peak = match &plan.peak {
        Some(spec) => {
            let lookup = PeakLookup::new(table, spec)?;
            table.require(&spec.by)?;
            labels.push(spec.time_label.clone());
            labels.push(spec.value_label.clone());
            Some((lookup, peak_rows(&frame, &spec.by).map_err(frame_err)?))
        }
        None => None,
    };

    let stations = grouped
        .column(STATION_COLUMN)
        .and_then(|c| c.str())
        .map_err(frame_err)?;
    let periods = grouped
        .column(PERIOD_COLUMN)
        .and_then(|c| c.i32())
        .map_err(frame_err)?;

    let mut rows = Vec::with_capacity(grouped.height());
    for (i, (station, key)) in stations.into_iter().zip(periods).enumerate() {
        let station = station.unwrap_or(UNASSIGNED_STATION).to_string();
        let Some(period) = key.and_then(|k| Period::from_key(k, granularity)) else {
            warn!("Skipping group of station '{}' with no period", station);
            continue;
        };
        let mut cells: Vec<Cell> = columns.iter().map(|values| Cell::Number(values[i])).collect();
        if let Some((lookup, peaks)) = &peak {
            let (time, value) = match peaks.get(&(station.clone(), period.key())) {
                Some(&row) => lookup.resolve(&station, row),
                None => {
                    debug!("No peak value for station '{}' on {}", station, period);
                    (None, None)
                }
            };
            cells.push(Cell::Time(time));
            cells.push(Cell::Number(value));
        }
        rows.push(SummaryRow { station, period, cells });
    }

    info!(
        "Aggregated {} rows of '{}' into {} {} group(s)",
        table.len(),
        table.name(),
        rows.len(),
        granularity
    );
    SummaryTable::from_rows(granularity, labels, rows)
}

/// Keyed access back into the row-level table for the peak row of a group.
struct PeakLookup {
    index: Vec<NaiveDateTime>,
    local: Vec<NaiveDateTime>,
    lookup: Vec<Option<f64>>,
    keys: HashSet<(String, NaiveDateTime)>,
}

impl PeakLookup {
    fn new(table: &TimeTable, spec: &PeakSpec) -> Result<Self, TableError> {
        let stations = table
            .stations()
            .unwrap_or_else(|| vec![UNASSIGNED_STATION.to_string(); table.len()]);
        Ok(Self {
            index: table.index().to_vec(),
            local: table.local_index(),
            lookup: table.values(&spec.lookup)?,
            keys: stations.into_iter().zip(table.index().iter().copied()).collect(),
        })
    }

    /// Local time of `row` and its lookup value. The value is read from the
    /// same row as the maximum, so duplicate timestamps cannot mix rows.
    fn resolve(&self, station: &str, row: usize) -> (Option<NaiveDateTime>, Option<f64>) {
        let (Some(&ts), Some(&local)) = (self.index.get(row), self.local.get(row)) else {
            warn!("Peak row {} of station '{}' is out of range", row, station);
            return (None, None);
        };
        if self.keys.contains(&(station.to_string(), ts)) {
            (Some(local), self.lookup.get(row).copied().flatten())
        } else {
            warn!("Peak lookup for station '{}' at {} found no row", station, ts);
            (Some(local), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TimeBasis;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn ts(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn spec(source: &str, reducer: Reducer, label: &str) -> AggregateSpec {
        AggregateSpec {
            source: source.to_string(),
            reducer,
            label: label.to_string(),
        }
    }

    fn plan() -> AggregationConfig {
        AggregationConfig {
            aggregates: vec![
                spec("Temp", Reducer::Mean, "Temp_module_moy"),
                spec("Temp", Reducer::Max, "Temp_module_max"),
                spec("P", Reducer::Sum, "Energie_journaliere"),
            ],
            peak: Some(PeakSpec {
                by: "Temp".to_string(),
                lookup: "P".to_string(),
                time_label: "Heure_temp_max".to_string(),
                value_label: "Puissance_temp_max".to_string(),
            }),
            performance_ratio: None,
            export_columns: None,
        }
    }

    fn table() -> TimeTable {
        TimeTable::new(
            "central",
            TimeBasis::Naive,
            vec![ts(1, 10), ts(1, 11), ts(1, 12), ts(2, 10), ts(2, 11)],
        )
        .with_column("Temp", vec![Some(30.0), Some(40.0), Some(40.0), None, None])
        .unwrap()
        .with_column("P", vec![Some(100.0), Some(150.0), Some(120.0), None, Some(5.0)])
        .unwrap()
        .with_stations(vec!["Centrale".to_string(); 5])
        .unwrap()
    }

    #[test]
    fn reducers_skip_missing_values() {
        let table = TimeTable::new("t", TimeBasis::Naive, vec![ts(1, 0), ts(1, 1), ts(1, 2), ts(2, 0)])
            .with_column("v", vec![Some(4.0), None, Some(-2.0), None])
            .unwrap();
        let plan = AggregationConfig {
            aggregates: vec![
                spec("v", Reducer::Sum, "sum"),
                spec("v", Reducer::Mean, "mean"),
                spec("v", Reducer::Max, "max"),
                spec("v", Reducer::Min, "min"),
            ],
            peak: None,
            performance_ratio: None,
            export_columns: None,
        };
        let summary = aggregate(&table, Granularity::Daily, &plan).unwrap();
        assert_eq!(
            summary.rows()[0].cells,
            vec![
                Cell::Number(Some(2.0)),
                Cell::Number(Some(1.0)),
                Cell::Number(Some(4.0)),
                Cell::Number(Some(-2.0))
            ]
        );
        // nothing observed on the second day, not even a zero sum
        assert_eq!(summary.rows()[1].cells, vec![Cell::Number(None); 4]);
    }

    #[test]
    fn daily_groups_hold_sum_max_and_peak() {
        let summary = aggregate(&table(), Granularity::Daily, &plan()).unwrap();
        assert_eq!(
            summary.labels(),
            &[
                "Temp_module_moy",
                "Temp_module_max",
                "Energie_journaliere",
                "Heure_temp_max",
                "Puissance_temp_max"
            ]
        );
        assert_eq!(summary.len(), 2);

        let day1 = &summary.rows()[0];
        assert_eq!(day1.period, Period::Day(ts(1, 0).date()));
        assert_relative_eq!(summary.number(day1, "Temp_module_moy").unwrap().unwrap(), 110.0 / 3.0);
        assert_eq!(summary.number(day1, "Temp_module_max").unwrap(), Some(40.0));
        assert_eq!(summary.number(day1, "Energie_journaliere").unwrap(), Some(370.0));
        // first maximum wins the tie between 11:00 and 12:00
        assert_eq!(day1.cells[3], Cell::Time(Some(ts(1, 11))));
        assert_eq!(day1.cells[4], Cell::Number(Some(150.0)));

        let day2 = &summary.rows()[1];
        assert_eq!(summary.number(day2, "Temp_module_max").unwrap(), None);
        assert_eq!(summary.number(day2, "Energie_journaliere").unwrap(), Some(5.0));
        assert_eq!(day2.cells[3], Cell::Time(None));
    }

    #[test]
    fn groups_are_split_by_station_and_month() {
        let table = TimeTable::new(
            "multi",
            TimeBasis::Naive,
            vec![ts(1, 0), ts(1, 1), ts(2, 0), ts(2, 1)],
        )
        .with_column("P", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)])
        .unwrap()
        .with_stations(vec!["B".into(), "A".into(), "B".into(), "A".into()])
        .unwrap();
        let plan = AggregationConfig {
            aggregates: vec![spec("P", Reducer::Sum, "Energie")],
            peak: None,
            performance_ratio: None,
            export_columns: None,
        };
        let summary = aggregate(&table, Granularity::Monthly, &plan).unwrap();
        assert_eq!(summary.stations(), vec!["A", "B"]);
        assert_eq!(summary.numbers("Energie").unwrap(), vec![Some(6.0), Some(4.0)]);
        assert_eq!(summary.rows()[0].period.to_string(), "2024-06");
    }

    #[test]
    fn peak_value_comes_from_the_row_holding_the_maximum() {
        let table = TimeTable::new("central", TimeBasis::Naive, vec![ts(1, 10), ts(1, 11), ts(1, 11)])
            .with_column("Temp", vec![Some(30.0), Some(45.0), Some(20.0)])
            .unwrap()
            .with_column("P", vec![Some(1.0), Some(200.0), Some(999.0)])
            .unwrap();
        let plan = AggregationConfig {
            aggregates: Vec::new(),
            ..plan()
        };
        let summary = aggregate(&table, Granularity::Daily, &plan).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(
            summary.rows()[0].cells,
            vec![Cell::Time(Some(ts(1, 11))), Cell::Number(Some(200.0))]
        );
    }

    #[test]
    fn peak_lookup_misses_for_a_key_outside_the_table() {
        let table = table();
        let lookup = PeakLookup::new(&table, plan().peak.as_ref().unwrap()).unwrap();
        assert_eq!(lookup.resolve("Centrale", 1), (Some(ts(1, 11)), Some(150.0)));
        assert_eq!(lookup.resolve("Nord", 1), (Some(ts(1, 11)), None));
        assert_eq!(lookup.resolve("Centrale", 99), (None, None));
    }

    #[test]
    fn zoned_table_groups_on_local_days() {
        // 06:00..18:00 in Sydney, stored as UTC instants
        let sydney = chrono_tz::Australia::Sydney;
        let index: Vec<NaiveDateTime> = (6..=18)
            .map(|h| sydney.from_local_datetime(&ts(1, h)).single().unwrap().naive_utc())
            .collect();
        let table = TimeTable::new("central", TimeBasis::Utc, index)
            .with_column("P", vec![Some(10.0); 13])
            .unwrap()
            .with_column("Temp", (6..=18).map(|h| Some(h as f64)).collect())
            .unwrap()
            .with_zone(Some(sydney));
        let plan = AggregationConfig {
            aggregates: vec![spec("P", Reducer::Sum, "Energie")],
            ..plan()
        };
        let summary = aggregate(&table, Granularity::Daily, &plan).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary.rows()[0].period, Period::Day(ts(1, 0).date()));
        assert_eq!(summary.numbers("Energie").unwrap(), vec![Some(130.0)]);
        // peak time is reported on the local clock
        assert_eq!(summary.rows()[0].cells[1], Cell::Time(Some(ts(1, 18))));
    }

    #[test]
    fn unknown_source_column_is_reported() {
        let plan = AggregationConfig {
            aggregates: vec![spec("Irradiance", Reducer::Sum, "Irr")],
            peak: None,
            performance_ratio: None,
            export_columns: None,
        };
        assert!(matches!(
            aggregate(&table(), Granularity::Daily, &plan),
            Err(TableError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn select_and_append_columns() {
        let summary = aggregate(&table(), Granularity::Daily, &plan())
            .unwrap()
            .with_column("RP", vec![Some(0.5), None])
            .unwrap();
        let picked = summary
            .select(&["RP".to_string(), "Temp_module_max".to_string()])
            .unwrap();
        assert_eq!(picked.labels(), &["RP", "Temp_module_max"]);
        assert_eq!(picked.rows()[0].cells, vec![Cell::Number(Some(0.5)), Cell::Number(Some(40.0))]);
        assert!(summary.clone().with_column("RP", vec![None, None]).is_err());
        assert!(summary.with_column("X", vec![None]).is_err());
    }
}
