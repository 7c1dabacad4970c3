//! Derived metrics and station labelling.

use log::{info, warn};

use crate::aggregate::SummaryTable;
use crate::config::{EfficiencyConfig, PerformanceRatioConfig};
use crate::errors::{ConfigError, TableError};
use crate::table::TimeTable;

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// `measured / theoretical * 100`; missing when either operand is missing
/// or the theoretical value is zero.
pub fn efficiency(measured: Option<f64>, theoretical: Option<f64>) -> Option<f64> {
    match (measured, theoretical) {
        (Some(m), Some(t)) if t != 0.0 => finite(m / t * 100.0),
        _ => None,
    }
}

/// `energy / (installed_capacity * irradiation)`.
pub fn performance_ratio(energy: Option<f64>, installed_capacity: f64, irradiation: Option<f64>) -> Option<f64> {
    match (energy, irradiation) {
        (Some(e), Some(g)) if installed_capacity * g != 0.0 => finite(e / (installed_capacity * g)),
        _ => None,
    }
}

pub fn with_efficiency(mut table: TimeTable, cfg: &EfficiencyConfig) -> Result<TimeTable, TableError> {
    let measured = table.values(&cfg.measured)?;
    let theoretical = table.values(&cfg.theoretical)?;
    let values: Vec<Option<f64>> = measured
        .into_iter()
        .zip(theoretical)
        .map(|(m, t)| efficiency(m, t))
        .collect();
    let undefined = values.iter().filter(|v| v.is_none()).count();
    if undefined > 0 {
        info!(
            "Efficiency undefined for {} of {} rows (missing or zero theoretical value)",
            undefined,
            values.len()
        );
    }
    table.push_column(cfg.output.clone(), values)?;
    Ok(table)
}

pub fn with_performance_ratio(summary: SummaryTable, cfg: &PerformanceRatioConfig) -> Result<SummaryTable, TableError> {
    let energy = summary.numbers(&cfg.energy)?;
    let irradiation = summary.numbers(&cfg.irradiation)?;
    let values: Vec<Option<f64>> = energy
        .into_iter()
        .zip(irradiation)
        .map(|(e, g)| performance_ratio(e, cfg.installed_capacity, g))
        .collect();
    summary.with_column(cfg.label.clone(), values)
}

/// How rows are attributed to stations.
#[derive(Debug, Clone, PartialEq)]
pub enum StationPolicy {
    Single(String),
    /// Row `i` gets `names[i % names.len()]`. The labels are synthetic and do
    /// not reflect which station produced a row.
    RoundRobin(Vec<String>),
}

impl StationPolicy {
    pub fn round_robin(names: Vec<String>) -> Result<Self, ConfigError> {
        if names.is_empty() {
            return Err(ConfigError::Invalid {
                field: "stations".to_string(),
                message: "station list is empty".to_string(),
            });
        }
        Ok(StationPolicy::RoundRobin(names))
    }

    pub fn assign(&self, rows: usize) -> Vec<String> {
        match self {
            StationPolicy::Single(name) => vec![name.clone(); rows],
            StationPolicy::RoundRobin(names) if names.is_empty() => Vec::new(),
            StationPolicy::RoundRobin(names) => (0..rows).map(|i| names[i % names.len()].clone()).collect(),
        }
    }
}

pub fn with_stations(table: TimeTable, policy: &StationPolicy) -> Result<TimeTable, TableError> {
    if let StationPolicy::RoundRobin(names) = policy {
        warn!(
            "Assigning {} synthetic station labels round-robin over {} rows; groups do not reflect real stations",
            names.len(),
            table.len()
        );
    }
    let labels = policy.assign(table.len());
    table.with_stations(labels)
}
