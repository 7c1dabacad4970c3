use log::info;
use serde::{Deserialize, Serialize};

use crate::aggregate::SummaryTable;
use crate::config::AnomalyConfig;
use crate::errors::TableError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct AnomalyThresholds {
    pub min_performance_ratio: f64,
    pub min_irradiation: f64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            min_performance_ratio: 0.6,
            min_irradiation: 50.0,
        }
    }
}

/// Performance ratio below the threshold. A missing ratio never qualifies.
pub fn is_low_performance(performance_ratio: Option<f64>, thresholds: &AnomalyThresholds) -> bool {
    matches!(performance_ratio, Some(pr) if pr < thresholds.min_performance_ratio)
}

/// No energy produced although irradiation exceeded the threshold.
pub fn is_zero_output(energy: Option<f64>, irradiation: Option<f64>, thresholds: &AnomalyThresholds) -> bool {
    matches!((energy, irradiation), (Some(e), Some(g)) if e == 0.0 && g > thresholds.min_irradiation)
}

/// Two independent subsets of the daily summary; a day can be in both.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyReport {
    pub low_performance: SummaryTable,
    pub zero_output: SummaryTable,
}

pub fn detect(daily: &SummaryTable, cfg: &AnomalyConfig) -> Result<AnomalyReport, TableError> {
    let pr = daily.label_index(&cfg.performance_ratio)?;
    let energy = daily.label_index(&cfg.energy)?;
    let irradiation = daily.label_index(&cfg.irradiation)?;
    let thresholds = &cfg.thresholds;

    let low_performance = daily.filter(|row| is_low_performance(row.cells[pr].as_number(), thresholds));
    let zero_output = daily.filter(|row| {
        is_zero_output(
            row.cells[energy].as_number(),
            row.cells[irradiation].as_number(),
            thresholds,
        )
    });

    info!(
        "Anomalies: {} day(s) with {} < {}, {} day(s) with zero output above {} irradiation",
        low_performance.len(),
        cfg.performance_ratio,
        thresholds.min_performance_ratio,
        zero_output.len(),
        thresholds.min_irradiation
    );
    Ok(AnomalyReport {
        low_performance,
        zero_output,
    })
}
