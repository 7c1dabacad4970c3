pub mod aggregate;
pub mod anomalies;
pub mod charts;
pub mod cleaning;
pub mod config;
pub mod dashboard;
pub mod derive;
pub mod diagnostics;
pub mod errors;
pub mod export;
pub mod file_processor;
pub mod merge;
pub mod metrics;
pub mod parsers;
pub mod pipeline;
pub mod table;
pub mod utils;
pub mod validation;

pub use config::{load_config, PipelineConfig};
pub use errors::PipelineError;
pub use pipeline::{run, write_outputs, PipelineOutput};

#[cfg(test)]
mod tests;
