use calamine::{open_workbook_auto, Data, Reader};
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use log::{debug, info};
use std::path::Path;

use super::{RawCell, TableAssembler};
use crate::config::SourceConfig;
use crate::errors::ParseError;
use crate::table::{TimeBasis, TimeTable};
use crate::utils::{excel_serial_to_datetime, localize, parse_timestamp};

fn spreadsheet_error(path: &Path, message: impl Into<String>) -> ParseError {
    ParseError::SpreadsheetError {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn to_raw_cell(cell: &Data) -> RawCell<'_> {
    match cell {
        Data::Float(f) => RawCell::Number(*f),
        Data::Int(i) => RawCell::Number(*i as f64),
        Data::String(s) => RawCell::Text(s),
        _ => RawCell::Empty,
    }
}

/// Timestamp of a spreadsheet cell: native date cells, Excel serial numbers
/// and text are accepted.
fn cell_timestamp(
    cell: &Data,
    format: Option<&str>,
    tz: Option<&Tz>,
) -> Result<(NaiveDateTime, TimeBasis), String> {
    let naive = match cell {
        Data::String(s) | Data::DateTimeIso(s) => return parse_timestamp(s, format, tz),
        Data::DateTime(dt) => dt
            .as_datetime()
            .ok_or_else(|| format!("date cell {:?} is out of range", dt))?,
        Data::Float(f) => excel_serial_to_datetime(*f).ok_or_else(|| format!("serial date {} is out of range", f))?,
        Data::Int(i) => excel_serial_to_datetime(*i as f64).ok_or_else(|| format!("serial date {} is out of range", i))?,
        Data::Empty => return Err("empty timestamp".to_string()),
        other => return Err(format!("unsupported timestamp cell '{}'", other)),
    };
    match tz {
        Some(tz) => localize(naive, tz).map(|utc| (utc, TimeBasis::Utc)),
        None => Ok((naive, TimeBasis::Naive)),
    }
}

/// Loads one worksheet (the configured one, or the first) into a table.
/// The first non-empty row is the header.
pub fn parse_xlsx(source: &SourceConfig, file_path: &Path, tz: Option<&Tz>) -> Result<TimeTable, ParseError> {
    info!("Parsing spreadsheet source '{}' from {}", source.name, file_path.display());
    let mut workbook = open_workbook_auto(file_path).map_err(|e| spreadsheet_error(file_path, e.to_string()))?;

    let sheet_name = match &source.sheet {
        Some(name) => name.clone(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| spreadsheet_error(file_path, "workbook has no sheets"))?,
    };
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| spreadsheet_error(file_path, format!("sheet '{}': {}", sheet_name, e)))?;

    let mut rows = range
        .rows()
        .enumerate()
        .filter(|(_, row)| !row.iter().all(|c| matches!(c, Data::Empty)));

    let (_, header_row) = rows
        .next()
        .ok_or_else(|| spreadsheet_error(file_path, format!("sheet '{}' is empty", sheet_name)))?;
    let headers: Vec<String> = header_row.iter().map(header_text).collect();

    let mut assembler = TableAssembler::new(source, file_path, &headers)?;
    let ts_index = assembler.timestamp_index();
    let column_indices = assembler.column_indices();
    let format = source.timestamp_format.as_deref();

    for (position, row) in rows {
        // spreadsheet rows are 1-based and the range may start below row 1
        let file_row = range.start().map_or(0, |(r, _)| r as usize) + position + 1;
        let ts_cell = row.get(ts_index).unwrap_or(&Data::Empty);
        let timestamp = cell_timestamp(ts_cell, format, tz)
            .map_err(|message| assembler.timestamp_error(file_row, &ts_cell.to_string(), format, message))?;

        let cells: Vec<RawCell<'_>> = column_indices
            .iter()
            .map(|&i| row.get(i).map_or(RawCell::Empty, to_raw_cell))
            .collect();
        assembler.push_row(file_row, timestamp, &cells)?;
    }

    let table = assembler.finish()?;
    debug!(
        "Finished parse_xlsx for {} (sheet '{}'). Parsed {} rows.",
        file_path.display(),
        sheet_name,
        table.len()
    );
    Ok(table)
}
