//! Workbook output and read-back of summary sheets.
//!
//! Every workbook is saved to a temporary sibling and renamed over the
//! destination, so a re-run replaces earlier output and a failed save leaves
//! no partial file behind.

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::info;
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use std::fs;
use std::path::{Path, PathBuf};

use crate::aggregate::{Cell, Granularity, Period, SummaryRow, SummaryTable};
use crate::anomalies::AnomalyReport;
use crate::config::OutputConfig;
use crate::errors::ExportError;
use crate::table::TimeTable;
use crate::utils::excel_serial_to_datetime;

const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";
const DATE_FORMAT: &str = "yyyy-mm-dd";

/// Content of one worksheet.
pub enum Sheet<'a> {
    /// Row-level data: local timestamp, station, then every column of the
    /// table.
    Rows(&'a TimeTable),
    /// Station, period, then every label of the summary.
    Summary(&'a SummaryTable),
}

fn xlsx_error(path: &Path) -> impl Fn(XlsxError) -> ExportError + '_ {
    move |source| ExportError::Xlsx {
        path: path.to_path_buf(),
        source,
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn replace_with(tmp: &Path, path: &Path) -> Result<(), ExportError> {
    fs::rename(tmp, path).map_err(|source| {
        let _ = fs::remove_file(tmp);
        ExportError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Writes `contents` to `path` through a temporary sibling.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ExportError> {
    let tmp = tmp_path(path);
    fs::write(&tmp, contents).map_err(|source| ExportError::Io {
        path: tmp.clone(),
        source,
    })?;
    replace_with(&tmp, path)
}

struct Formats {
    header: Format,
    datetime: Format,
    date: Format,
}

impl Formats {
    fn new() -> Self {
        Self {
            header: Format::new().set_bold(),
            datetime: Format::new().set_num_format(DATETIME_FORMAT),
            date: Format::new().set_num_format(DATE_FORMAT),
        }
    }
}

fn write_header(sheet: &mut Worksheet, labels: &[&str], formats: &Formats) -> Result<(), XlsxError> {
    for (col, label) in labels.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *label, &formats.header)?;
    }
    Ok(())
}

/// Row-level columns pulled out of the frame ahead of writing.
struct RowsData {
    index: Vec<NaiveDateTime>,
    stations: Option<Vec<String>>,
    columns: Vec<(String, Vec<Option<f64>>)>,
}

impl RowsData {
    fn of(table: &TimeTable) -> Result<Self, ExportError> {
        let columns = table
            .column_names()
            .into_iter()
            .map(|name| table.values(&name).map(|values| (name, values)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            index: table.local_index(),
            stations: table.stations(),
            columns,
        })
    }
}

fn write_rows_sheet(sheet: &mut Worksheet, data: &RowsData, formats: &Formats) -> Result<(), XlsxError> {
    let mut header = vec!["Date", "Station"];
    header.extend(data.columns.iter().map(|(name, _)| name.as_str()));
    write_header(sheet, &header, formats)?;
    sheet.set_column_width(0, 20.0)?;

    for (i, ts) in data.index.iter().enumerate() {
        let row = (i + 1) as u32;
        sheet.write_datetime_with_format(row, 0, ts, &formats.datetime)?;
        if let Some(station) = data.stations.as_ref().and_then(|s| s.get(i)) {
            sheet.write_string(row, 1, station)?;
        }
        for (c, (_, values)) in data.columns.iter().enumerate() {
            if let Some(v) = values[i] {
                sheet.write_number(row, (c + 2) as u16, v)?;
            }
        }
    }
    Ok(())
}

fn write_summary_sheet(sheet: &mut Worksheet, summary: &SummaryTable, formats: &Formats) -> Result<(), XlsxError> {
    let period_label = match summary.granularity() {
        Granularity::Daily => "Date",
        Granularity::Monthly => "Mois",
    };
    let mut header = vec!["Station", period_label];
    header.extend(summary.labels().iter().map(String::as_str));
    write_header(sheet, &header, formats)?;
    sheet.set_column_width(1, 12.0)?;

    for (i, summary_row) in summary.rows().iter().enumerate() {
        let row = (i + 1) as u32;
        sheet.write_string(row, 0, &summary_row.station)?;
        match summary_row.period {
            Period::Day(_) => {
                sheet.write_datetime_with_format(row, 1, &summary_row.period.start(), &formats.date)?;
            }
            Period::Month(_) => {
                sheet.write_string(row, 1, summary_row.period.to_string())?;
            }
        }
        for (c, cell) in summary_row.cells.iter().enumerate() {
            let col = (c + 2) as u16;
            match cell {
                Cell::Number(Some(v)) => {
                    sheet.write_number(row, col, *v)?;
                }
                Cell::Time(Some(t)) => {
                    sheet.write_datetime_with_format(row, col, t, &formats.datetime)?;
                    sheet.set_column_width(col, 20.0)?;
                }
                Cell::Number(None) | Cell::Time(None) => {}
            }
        }
    }
    Ok(())
}

/// Writes the given sheets, in order, to a new workbook at `path`.
pub fn write_workbook(path: &Path, sheets: &[(&str, Sheet<'_>)]) -> Result<(), ExportError> {
    let formats = Formats::new();
    let mut workbook = Workbook::new();
    for (name, content) in sheets {
        let sheet = workbook.add_worksheet();
        sheet.set_name(*name).map_err(xlsx_error(path))?;
        let written = match content {
            Sheet::Rows(table) => write_rows_sheet(sheet, &RowsData::of(table)?, &formats),
            Sheet::Summary(summary) => write_summary_sheet(sheet, summary, &formats),
        };
        written.map_err(xlsx_error(path))?;
    }

    let tmp = tmp_path(path);
    workbook.save(&tmp).map_err(xlsx_error(path))?;
    replace_with(&tmp, path)?;
    info!("Wrote {} sheet(s) to {}", sheets.len(), path.display());
    Ok(())
}

/// Hourly rows, the daily summary and (when configured) the monthly summary.
pub fn write_analysis_workbook(
    path: &Path,
    output: &OutputConfig,
    hourly: &TimeTable,
    daily: &SummaryTable,
    monthly: Option<&SummaryTable>,
) -> Result<(), ExportError> {
    let mut sheets = vec![
        (output.hourly_sheet.as_str(), Sheet::Rows(hourly)),
        (output.daily_sheet.as_str(), Sheet::Summary(daily)),
    ];
    if let Some(monthly) = monthly {
        sheets.push((output.monthly_sheet.as_str(), Sheet::Summary(monthly)));
    }
    write_workbook(path, &sheets)
}

pub fn write_anomaly_workbook(path: &Path, output: &OutputConfig, report: &AnomalyReport) -> Result<(), ExportError> {
    write_workbook(
        path,
        &[
            (output.low_performance_sheet.as_str(), Sheet::Summary(&report.low_performance)),
            (output.zero_output_sheet.as_str(), Sheet::Summary(&report.zero_output)),
        ],
    )
}

fn read_error(path: &Path, sheet: &str, message: impl Into<String>) -> ExportError {
    ExportError::Read {
        path: path.to_path_buf(),
        sheet: sheet.to_string(),
        message: message.into(),
    }
}

fn cell_period(cell: &Data, granularity: Granularity) -> Option<Period> {
    let date = match cell {
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64()).map(|t| t.date()),
        Data::Float(f) => excel_serial_to_datetime(*f).map(|t| t.date()),
        Data::String(s) | Data::DateTimeIso(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d"))
                .ok()
        }
        _ => None,
    }?;
    Some(Period::of(date.and_time(NaiveTime::MIN), granularity))
}

/// Reads a summary sheet written by [`write_workbook`] back into a [`SummaryTable`].
///
/// A column is read back as time cells when any of its cells is a date;
/// a column left entirely blank reads back as numbers.
pub fn read_summary_sheet(path: &Path, sheet: &str, granularity: Granularity) -> Result<SummaryTable, ExportError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| read_error(path, sheet, e.to_string()))?;
    let range = workbook
        .worksheet_range(sheet)
        .map_err(|e| read_error(path, sheet, e.to_string()))?;

    let mut rows = range.rows();
    let header = rows.next().ok_or_else(|| read_error(path, sheet, "sheet is empty"))?;
    if header.len() < 2 {
        return Err(read_error(path, sheet, "expected station and period columns"));
    }
    let labels: Vec<String> = header[2..].iter().map(|c| c.to_string()).collect();
    let data: Vec<&[Data]> = rows.collect();

    let is_time: Vec<bool> = (0..labels.len())
        .map(|c| {
            data.iter()
                .any(|r| matches!(r.get(c + 2), Some(Data::DateTime(_)) | Some(Data::DateTimeIso(_))))
        })
        .collect();

    let mut summary_rows = Vec::with_capacity(data.len());
    for (i, row) in data.iter().enumerate() {
        let station = row.first().map(|c| c.to_string()).unwrap_or_default();
        let period = row
            .get(1)
            .and_then(|c| cell_period(c, granularity))
            .ok_or_else(|| read_error(path, sheet, format!("row {} has no valid period", i + 2)))?;
        let cells = is_time
            .iter()
            .enumerate()
            .map(|(c, time)| {
                let cell = row.get(c + 2).unwrap_or(&Data::Empty);
                if *time {
                    Cell::Time(match cell {
                        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64()),
                        _ => None,
                    })
                } else {
                    Cell::Number(match cell {
                        Data::Float(f) => Some(*f),
                        Data::Int(n) => Some(*n as f64),
                        _ => None,
                    })
                }
            })
            .collect();
        summary_rows.push(SummaryRow { station, period, cells });
    }

    SummaryTable::from_rows(granularity, labels, summary_rows).map_err(|e| read_error(path, sheet, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TimeBasis;
    use approx::assert_relative_eq;
    use chrono::NaiveDateTime;

    fn ts(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn daily() -> SummaryTable {
        let row = |d: u32, energy: Option<f64>, rp: Option<f64>| SummaryRow {
            station: "Centrale".to_string(),
            period: Period::Day(ts(d, 0).date()),
            cells: vec![Cell::Number(energy), Cell::Time(Some(ts(d, 13))), Cell::Number(rp)],
        };
        SummaryTable::from_rows(
            Granularity::Daily,
            vec![
                "Energie_journaliere".to_string(),
                "Heure_temp_max".to_string(),
                "RP".to_string(),
            ],
            vec![row(1, Some(1234.5678), Some(0.8123456789)), row(2, Some(0.0), None)],
        )
        .unwrap()
    }

    fn hourly() -> TimeTable {
        TimeTable::new("central", TimeBasis::Naive, vec![ts(1, 12), ts(1, 13)])
            .with_column("Puissance", vec![Some(10.0), None])
            .unwrap()
            .with_stations(vec!["Centrale".to_string(); 2])
            .unwrap()
    }

    #[test]
    fn daily_summary_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.xlsx");
        let output = OutputConfig::default();
        write_analysis_workbook(&path, &output, &hourly(), &daily(), None).unwrap();

        let back = read_summary_sheet(&path, &output.daily_sheet, Granularity::Daily).unwrap();
        let original = daily();
        assert_eq!(back.labels(), original.labels());
        assert_eq!(back.len(), 2);
        for (a, b) in back.rows().iter().zip(original.rows()) {
            assert_eq!(a.station, b.station);
            assert_eq!(a.period, b.period);
            assert_eq!(a.cells[1], b.cells[1]);
            match (a.cells[0].as_number(), b.cells[0].as_number()) {
                (Some(x), Some(y)) => assert_relative_eq!(x, y, epsilon = 1e-9),
                (x, y) => assert_eq!(x, y),
            }
        }
        assert_eq!(back.rows()[1].cells[2], Cell::Number(None));
        assert!(!dir.path().join("analysis.xlsx.tmp").exists());
    }

    #[test]
    fn rerun_overwrites_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anomalies.xlsx");
        let output = OutputConfig::default();
        let full = AnomalyReport {
            low_performance: daily(),
            zero_output: daily(),
        };
        write_anomaly_workbook(&path, &output, &full).unwrap();

        let empty = AnomalyReport {
            low_performance: daily().filter(|_| false),
            zero_output: daily().filter(|r| r.period == Period::Day(ts(2, 0).date())),
        };
        write_anomaly_workbook(&path, &output, &empty).unwrap();

        let low = read_summary_sheet(&path, &output.low_performance_sheet, Granularity::Daily).unwrap();
        let zero = read_summary_sheet(&path, &output.zero_output_sheet, Granularity::Daily).unwrap();
        assert!(low.is_empty());
        assert_eq!(zero.len(), 1);
    }

    #[test]
    fn monthly_periods_are_written_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monthly.xlsx");
        let monthly = SummaryTable::from_rows(
            Granularity::Monthly,
            vec!["Energie".to_string()],
            vec![SummaryRow {
                station: "A".to_string(),
                period: Period::Month(ts(1, 0).date()),
                cells: vec![Cell::Number(Some(42.0))],
            }],
        )
        .unwrap();
        write_workbook(&path, &[("Mensuel_Resume", Sheet::Summary(&monthly))]).unwrap();
        let back = read_summary_sheet(&path, "Mensuel_Resume", Granularity::Monthly).unwrap();
        assert_eq!(back, monthly);
    }

    #[test]
    fn missing_sheet_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.xlsx");
        write_workbook(&path, &[("Journalier_Resume", Sheet::Summary(&daily()))]).unwrap();
        assert!(matches!(
            read_summary_sheet(&path, "absent", Granularity::Daily),
            Err(ExportError::Read { .. })
        ));
    }
}
