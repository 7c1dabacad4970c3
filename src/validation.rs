//! Module for data validation logic.
//!
//! Checks never fail a run: every issue is logged as a warning and counted.

use log::warn;

use crate::table::TimeTable;

/// Plausible range for a column, chosen from keywords in its label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeRule {
    pub kind: &'static str,
    pub min: f64,
    pub max: f64,
}

/// Picks the range rule for a column label, if any applies.
pub fn range_rule(label: &str) -> Option<RangeRule> {
    let lower = label.to_lowercase();
    if lower.contains("temp") {
        Some(RangeRule {
            kind: "temperature",
            min: -40.0,
            max: 100.0,
        })
    }
    // Irradiance in W/m², measured after clamping
    else if lower.contains("irrad") || lower.contains("ghi") || lower.contains("dni") || lower.contains("dhi") {
        Some(RangeRule {
            kind: "irradiance",
            min: 0.0,
            max: 2000.0,
        })
    } else if lower.contains("cloud") || lower.contains("nuage") || lower.contains('%') {
        Some(RangeRule {
            kind: "percentage",
            min: 0.0,
            max: 100.0,
        })
    } else {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationSummary {
    pub duplicate_timestamps: usize,
    /// (column, number of values outside the plausible range)
    pub out_of_range: Vec<(String, usize)>,
}

impl ValidationSummary {
    pub fn issue_count(&self) -> usize {
        self.duplicate_timestamps + self.out_of_range.iter().map(|(_, n)| n).sum::<usize>()
    }
}

/// Validates a loaded table: duplicate timestamps and implausible values.
pub fn validate_table(table: &TimeTable) -> ValidationSummary {
    let mut summary = ValidationSummary {
        duplicate_timestamps: table.index().windows(2).filter(|w| w[0] == w[1]).count(),
        ..Default::default()
    };
    if summary.duplicate_timestamps > 0 {
        warn!(
            "Validation: '{}' has {} duplicate timestamp(s)",
            table.name(),
            summary.duplicate_timestamps
        );
    }

    for name in table.column_names() {
        let Some(rule) = range_rule(&name) else {
            continue;
        };
        let Ok(values) = table.values(&name) else {
            continue;
        };
        let outside: Vec<f64> = values
            .into_iter()
            .flatten()
            .filter(|v| !(rule.min..=rule.max).contains(v))
            .collect();
        if let Some(first) = outside.first() {
            warn!(
                "Validation: {} value(s) of {} column '{}' in '{}' outside {} to {} (e.g. {})",
                outside.len(),
                rule.kind,
                name,
                table.name(),
                rule.min,
                rule.max,
                first
            );
            summary.out_of_range.push((name.clone(), outside.len()));
        }
    }
    summary
}
