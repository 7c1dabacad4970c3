//! Left-outer joins of time series on exact timestamp equality.

use log::{debug, info, warn};
use polars::prelude::{col, IntoLazy, JoinArgs, JoinType, SortMultipleOptions};
use std::collections::HashSet;

use crate::errors::{AlignmentError, PipelineError};
use crate::table::{frame_error, TimeTable, TIME_COLUMN};

const ROW_COLUMN: &str = "__row";

/// Joins `secondary` onto `primary`. Every primary row is kept exactly once
/// and in its original order; secondary fields without a matching timestamp
/// are missing.
///
/// When the secondary holds the same timestamp more than once, the last row
/// in load order supplies the values.
pub fn left_join(primary: TimeTable, secondary: &TimeTable) -> Result<TimeTable, PipelineError> {
    if primary.basis() != secondary.basis() {
        return Err(AlignmentError::IncompatibleTimeBasis {
            primary: primary.name().to_string(),
            primary_basis: primary.basis(),
            secondary: secondary.name().to_string(),
            secondary_basis: secondary.basis(),
        }
        .into());
    }

    let duplicates = secondary.index().windows(2).filter(|w| w[0] == w[1]).count();
    if duplicates > 0 {
        warn!(
            "'{}' has {} duplicate timestamp(s); the last row for each wins",
            secondary.name(),
            duplicates
        );
    }

    let keys: HashSet<_> = secondary.index().iter().collect();
    let matched = primary.index().iter().filter(|ts| keys.contains(ts)).count();
    if matched == 0 && !primary.is_empty() && !secondary.is_empty() {
        warn!(
            "No timestamp of '{}' matches '{}'; all of its columns are missing",
            secondary.name(),
            primary.name()
        );
    }

    let mut last_values = Vec::new();
    for name in secondary.column_names() {
        let mut label = name.clone();
        if primary.has_column(&label) {
            label = format!("{}_{}", name, secondary.name());
            info!(
                "Column '{}' of '{}' collides with an existing column; renamed to '{}'",
                name,
                secondary.name(),
                label
            );
        }
        last_values.push(col(name.as_str()).last().alias(label.as_str()));
    }

    // one row per timestamp, the last in load order
    let deduplicated = secondary
        .frame()
        .clone()
        .lazy()
        .group_by_stable([col(TIME_COLUMN)])
        .agg(last_values);

    let joined = primary
        .frame()
        .clone()
        .lazy()
        .with_row_index(ROW_COLUMN, None)
        .join(
            deduplicated,
            [col(TIME_COLUMN)],
            [col(TIME_COLUMN)],
            JoinArgs::new(JoinType::Left),
        )
        .sort([ROW_COLUMN], SortMultipleOptions::default())
        .collect()
        .and_then(|frame| frame.drop(ROW_COLUMN))
        .map_err(|e| frame_error(primary.name(), e))?;
    let merged = primary.with_frame(joined)?;

    debug!(
        "Joined '{}' onto '{}': {}/{} rows matched",
        secondary.name(),
        merged.name(),
        matched,
        merged.len()
    );
    Ok(merged)
}

/// Joins every table onto the first one, in order.
pub fn merge_all(tables: Vec<TimeTable>) -> Result<TimeTable, PipelineError> {
    let mut iter = tables.into_iter();
    let mut merged = iter.next().ok_or(AlignmentError::NoTables)?;
    for secondary in iter {
        merged = left_join(merged, &secondary)?;
    }
    info!(
        "Merged table '{}': {} rows, {} columns",
        merged.name(),
        merged.len(),
        merged.column_names().len()
    );
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TimeBasis;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn primary() -> TimeTable {
        TimeTable::new("central", TimeBasis::Naive, vec![ts(0), ts(1), ts(1), ts(2)])
            .with_column("Puissance", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)])
            .unwrap()
    }

    #[test]
    fn row_count_follows_primary() {
        let weather = TimeTable::new("weather", TimeBasis::Naive, vec![ts(1), ts(5)])
            .with_column("Temp", vec![Some(20.0), Some(25.0)])
            .unwrap();
        let merged = left_join(primary(), &weather).unwrap();
        assert_eq!(merged.len(), 4);
        assert_eq!(merged.index(), &[ts(0), ts(1), ts(1), ts(2)]);
        assert_eq!(
            merged.values("Temp").unwrap(),
            vec![None, Some(20.0), Some(20.0), None]
        );
    }

    #[test]
    fn last_duplicate_wins() {
        let theory = TimeTable::new("theory", TimeBasis::Naive, vec![ts(0), ts(0), ts(2)])
            .with_column("P_theo", vec![Some(10.0), Some(11.0), Some(12.0)])
            .unwrap();
        let merged = left_join(primary(), &theory).unwrap();
        assert_eq!(
            merged.values("P_theo").unwrap(),
            vec![Some(11.0), None, None, Some(12.0)]
        );
    }

    #[test]
    fn colliding_labels_are_renamed() {
        let other = TimeTable::new("theory", TimeBasis::Naive, vec![ts(0)])
            .with_column("Puissance", vec![Some(9.0)])
            .unwrap();
        let merged = left_join(primary(), &other).unwrap();
        assert_eq!(merged.column_names(), vec!["Puissance", "Puissance_theory"]);
        assert_eq!(merged.values("Puissance").unwrap()[0], Some(1.0));
    }

    #[test]
    fn last_duplicate_wins_even_when_missing() {
        let theory = TimeTable::new("theory", TimeBasis::Naive, vec![ts(1), ts(1)])
            .with_column("P_theo", vec![Some(10.0), None])
            .unwrap();
        let merged = left_join(primary(), &theory).unwrap();
        assert_eq!(merged.values("P_theo").unwrap(), vec![None, None, None, None]);
    }

    #[test]
    fn calendar_zone_survives_the_join() {
        let central = TimeTable::new("central", TimeBasis::Utc, vec![ts(0), ts(1)])
            .with_column("P", vec![Some(1.0), Some(2.0)])
            .unwrap()
            .with_zone(Some(chrono_tz::Australia::Sydney));
        let weather = TimeTable::new("weather", TimeBasis::Utc, vec![ts(1)])
            .with_column("T", vec![Some(5.0)])
            .unwrap();
        let merged = left_join(central, &weather).unwrap();
        assert_eq!(merged.zone(), Some(chrono_tz::Australia::Sydney));
        assert_eq!(merged.values("T").unwrap(), vec![None, Some(5.0)]);
    }

    #[test]
    fn mixed_time_bases_are_rejected() {
        let utc = TimeTable::new("weather", TimeBasis::Utc, vec![ts(0)]);
        assert!(matches!(
            left_join(primary(), &utc),
            Err(PipelineError::Alignment(AlignmentError::IncompatibleTimeBasis { .. }))
        ));
    }

    #[test]
    fn unmatched_secondary_yields_missing_columns() {
        let weather = TimeTable::new("weather", TimeBasis::Naive, vec![ts(9)])
            .with_column("Temp", vec![Some(1.0)])
            .unwrap();
        let merged = merge_all(vec![primary(), weather]).unwrap();
        assert_eq!(merged.len(), 4);
        assert_eq!(merged.missing_count("Temp").unwrap(), 4);
    }

    #[test]
    fn merging_nothing_is_an_error() {
        assert!(matches!(
            merge_all(Vec::new()),
            Err(PipelineError::Alignment(AlignmentError::NoTables))
        ));
    }
}
