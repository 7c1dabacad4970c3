use chrono_tz::Tz;
use csv::{ReaderBuilder, StringRecord};
use log::{debug, info};
use std::fs::File;
use std::path::Path;

use super::{RawCell, TableAssembler};
use crate::config::SourceConfig;
use crate::errors::ParseError;
use crate::table::TimeTable;
use crate::utils::{clean_label, parse_timestamp};

fn open_reader(file_path: &Path, delimiter: u8) -> Result<csv::Reader<File>, ParseError> {
    let file = File::open(file_path).map_err(|e| ParseError::IoError {
        path: file_path.to_path_buf(),
        source: e,
    })?;
    Ok(ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(file))
}

/// Loads a delimited-text source into a time-indexed table.
///
/// Every timestamp must parse; a single bad cell aborts the load. Numeric
/// cells that fail to parse become missing values.
pub fn parse_csv(source: &SourceConfig, file_path: &Path, delimiter: u8, tz: Option<&Tz>) -> Result<TimeTable, ParseError> {
    info!("Parsing CSV source '{}' from {}", source.name, file_path.display());
    let mut reader = open_reader(file_path, delimiter)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ParseError::HeaderReadError {
            path: file_path.to_path_buf(),
            source: e,
        })?
        .iter()
        .map(str::to_string)
        .collect();

    let mut assembler = TableAssembler::new(source, file_path, &headers)?;
    let ts_index = assembler.timestamp_index();
    let column_indices = assembler.column_indices();
    let format = source.timestamp_format.as_deref();

    let mut record = StringRecord::new();
    let mut row_index = 0usize;
    loop {
        let has_row = reader.read_record(&mut record).map_err(|e| ParseError::CsvError {
            path: file_path.to_path_buf(),
            source: e,
        })?;
        if !has_row {
            break;
        }
        // header is row 1
        let file_row = row_index + 2;
        row_index += 1;

        let raw_ts = record.get(ts_index).unwrap_or("");
        let timestamp = parse_timestamp(raw_ts, format, tz)
            .map_err(|message| assembler.timestamp_error(file_row, raw_ts, format, message))?;

        let cells: Vec<RawCell<'_>> = column_indices
            .iter()
            .map(|&i| match record.get(i) {
                Some(value) => RawCell::Text(value),
                None => RawCell::Empty,
            })
            .collect();
        assembler.push_row(file_row, timestamp, &cells)?;
    }

    let table = assembler.finish()?;
    debug!(
        "Finished parse_csv for {}. Parsed {} rows, {} columns.",
        file_path.display(),
        table.len(),
        table.column_names().len()
    );
    Ok(table)
}

/// Reads the station reference list: the non-empty cells of one text column.
pub fn load_station_names(file_path: &Path, column: &str, delimiter: u8) -> Result<Vec<String>, ParseError> {
    let mut reader = open_reader(file_path, delimiter)?;
    let wanted = clean_label(column);
    let position = reader
        .headers()
        .map_err(|e| ParseError::HeaderReadError {
            path: file_path.to_path_buf(),
            source: e,
        })?
        .iter()
        .position(|h| clean_label(h) == wanted)
        .ok_or_else(|| ParseError::MissingColumn {
            path: file_path.to_path_buf(),
            column: wanted.clone(),
        })?;

    let mut names = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| ParseError::CsvError {
            path: file_path.to_path_buf(),
            source: e,
        })?;
        if let Some(name) = record.get(position).map(str::trim).filter(|n| !n.is_empty()) {
            names.push(name.to_string());
        }
    }
    info!("Loaded {} station names from {}", names.len(), file_path.display());
    Ok(names)
}
