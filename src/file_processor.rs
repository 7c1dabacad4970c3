use chrono_tz::Tz;
use log::info;

use crate::config::{SourceConfig, SourceFormat};
use crate::errors::{ConfigError, PipelineError};
use crate::parsers;
use crate::table::TimeTable;

/// Loads a single source based on its configuration.
/// Selects the appropriate parser and returns the parsed table or an error.
pub fn load_source(source: &SourceConfig) -> Result<TimeTable, PipelineError> {
    info!(
        "Processing source '{}': {} ({:?})",
        source.name,
        source.path.display(),
        source.format
    );

    let tz: Option<Tz> = match &source.timezone {
        Some(name) => Some(name.parse::<Tz>().map_err(|_| ConfigError::Invalid {
            field: format!("sources.{}.timezone", source.name),
            message: format!("unknown timezone '{}'", name),
        })?),
        None => None,
    };

    let table = match source.format {
        SourceFormat::Csv => {
            let delimiter = source.delimiter_byte()?;
            parsers::csv_parser::parse_csv(source, &source.path, delimiter, tz.as_ref())?
        }
        SourceFormat::Xlsx => parsers::xlsx_parser::parse_xlsx(source, &source.path, tz.as_ref())?,
    }
    .with_zone(tz);

    info!(
        "Loaded source '{}': {} rows, {} columns, {} timestamps",
        table.name(),
        table.len(),
        table.column_names().len(),
        table.basis()
    );
    Ok(table)
}
