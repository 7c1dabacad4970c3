use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::table::TimeBasis;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse JSON configuration in {path}: {source}")]
    JsonParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Configuration file not found at {path}")]
    NotFound { path: PathBuf },
    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: String, message: String },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading data file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV error in {path}: {source}")]
    CsvError {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Error reading CSV headers in {path}: {source}")]
    HeaderReadError {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Spreadsheet error in {path}: {message}")]
    SpreadsheetError { path: PathBuf, message: String },
    #[error("Column '{column}' not found in {path}")]
    MissingColumn { path: PathBuf, column: String },
    #[error("Column '{column}' selected more than once for {path}")]
    DuplicateColumn { path: PathBuf, column: String },
    #[error("Timestamp parsing error in {path} at row {row} for value '{value}' with format '{format}': {message}")]
    TimestampParseError {
        path: PathBuf,
        row: usize,
        value: String,
        format: String,
        message: String,
    },
    #[error("Timestamp at row {row} in {path} is {found} but earlier rows are {expected}")]
    MixedTimestampRepresentation {
        path: PathBuf,
        row: usize,
        expected: TimeBasis,
        found: TimeBasis,
    },
    #[error("Failed to assemble table from {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: TableError,
    },
}

#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("Cannot join '{secondary}' ({secondary_basis} timestamps) onto '{primary}' ({primary_basis} timestamps); normalize both sources to one representation")]
    IncompatibleTimeBasis {
        primary: String,
        primary_basis: TimeBasis,
        secondary: String,
        secondary_basis: TimeBasis,
    },
    #[error("No tables to merge")]
    NoTables,
}

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Column '{column}' not found in table '{table}'")]
    UnknownColumn { table: String, column: String },
    #[error("Column '{column}' in table '{table}' has {found} values, expected {expected}")]
    LengthMismatch {
        table: String,
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("Column '{column}' already exists in table '{table}'")]
    DuplicateColumn { table: String, column: String },
    #[error("Dataframe operation failed on table '{table}': {source}")]
    Frame {
        table: String,
        #[source]
        source: polars::prelude::PolarsError,
    },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write workbook {path}: {source}")]
    Xlsx {
        path: PathBuf,
        #[source]
        source: rust_xlsxwriter::XlsxError,
    },
    #[error("IO error on output {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read sheet '{sheet}' from {path}: {message}")]
    Read {
        path: PathBuf,
        sheet: String,
        message: String,
    },
    #[error("Failed to render chart '{chart}': {message}")]
    Render { chart: String, message: String },
    #[error("Invalid dashboard: {0}")]
    InvalidDashboard(String),
    #[error("Cannot export table: {0}")]
    Table(#[from] TableError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Parsing failed: {0}")]
    Parse(#[from] ParseError),
    #[error("Alignment failed: {0}")]
    Alignment(#[from] AlignmentError),
    #[error("Table error: {0}")]
    Table(#[from] TableError),
    #[error("Export failed: {0}")]
    Export(#[from] ExportError),
}
