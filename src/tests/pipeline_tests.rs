use approx::assert_relative_eq;
use chrono::{NaiveDate, NaiveDateTime};

use super::test_helpers::{central_config, write};
use crate::aggregate::{aggregate, Cell, Granularity, Period};
use crate::config::{AggregationConfig, SourceConfig, StationConfig};
use crate::errors::{AlignmentError, ConfigError, ParseError, PipelineError};
use crate::export::read_summary_sheet;
use crate::file_processor::load_source;
use crate::pipeline::{run, write_outputs};

fn ts(d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
}

#[test]
fn central_plant_run_produces_expected_summaries() {
    let dir = tempfile::tempdir().unwrap();
    let config = central_config(dir.path());
    let output = run(&config).unwrap();

    // merge keeps exactly the primary rows
    assert_eq!(output.merged.len(), 6);
    assert_eq!(output.merged.stations().unwrap()[0], "Centrale");

    let irradiance = output.merged.values("Irradiance [W/m2]").unwrap();
    assert!(irradiance.iter().flatten().all(|v| *v >= 0.0));
    assert_eq!(irradiance[0], Some(0.0));
    assert_relative_eq!(irradiance[2].unwrap(), 350.0);

    assert_eq!(
        output.merged.values("Efficacite_%").unwrap(),
        vec![Some(50.0), Some(50.0), None, None, Some(0.0), None]
    );
    assert_eq!(
        output.merged.values("Temp_air").unwrap(),
        vec![Some(18.5), None, None, None, None, Some(21.0)]
    );

    let daily = &output.daily_export;
    assert_eq!(
        daily.labels(),
        &[
            "Temp_module_moy",
            "Temp_module_max",
            "Heure_temp_max",
            "Puissance_temp_max",
            "Irradiation_journaliere",
            "Energie_journaliere",
            "RP"
        ]
    );
    assert_eq!(daily.len(), 2);
    let day1 = &daily.rows()[0];
    assert_eq!(day1.period, Period::Day(ts(1, 0).date()));
    assert_eq!(daily.number(day1, "Energie_journaliere").unwrap(), Some(500.0));
    assert_eq!(daily.number(day1, "Temp_module_max").unwrap(), Some(45.0));
    assert_relative_eq!(daily.number(day1, "Temp_module_moy").unwrap().unwrap(), 37.5);
    assert_relative_eq!(daily.number(day1, "Irradiation_journaliere").unwrap().unwrap(), 1050.0);
    assert_relative_eq!(daily.number(day1, "RP").unwrap().unwrap(), 500.0 / 1050.0);
    assert_eq!(day1.cells[2].as_time(), Some(ts(1, 11)));
    assert_eq!(daily.number(day1, "Puissance_temp_max").unwrap(), Some(200.0));

    let monthly = output.monthly.as_ref().unwrap();
    assert_eq!(monthly.len(), 1);
    assert_eq!(monthly.numbers("Energie_mensuelle").unwrap(), vec![Some(500.0)]);
    assert_relative_eq!(monthly.numbers("Efficacite_moy").unwrap()[0].unwrap(), 100.0 / 3.0);

    let anomalies = output.anomalies.as_ref().unwrap();
    assert_eq!(anomalies.low_performance.len(), 2);
    assert_eq!(anomalies.zero_output.len(), 1);
    assert_eq!(anomalies.zero_output.rows()[0].period, Period::Day(ts(2, 0).date()));

    assert_eq!(output.zero_power_rows, Some(2));
    assert_eq!(output.missing[0].counts[1], ("Irradiance [W/m2]".to_string(), 1));
    assert_eq!(output.hourly_export.column_names(), vec!["Puissance [kW]"]);

    let charts = output.charts.as_ref().unwrap();
    assert_eq!(charts.overlays.len(), 1);
    assert_eq!(charts.overlays[0].1.len(), 3);
    assert_eq!(charts.dashboard.as_ref().unwrap().traces.len(), 4);
    let rendered: Vec<&str> = charts.rendered.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        rendered,
        vec![
            "performance_ratio.svg",
            "overlay_Centrale.svg",
            "dashboard_Centrale.svg",
            "dashboard.html"
        ]
    );
    assert!(charts.rendered[0].contents.starts_with("<svg"));
    // rendering happens in memory
    assert!(!config.output.dir.exists());
}

#[test]
fn outputs_are_written_and_daily_sheet_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let config = central_config(dir.path());
    let output = run(&config).unwrap();
    let written = write_outputs(&config, &output).unwrap();
    assert_eq!(written.len(), 6);
    for path in &written {
        assert!(path.exists(), "{} missing", path.display());
    }
    let overlay = std::fs::read_to_string(config.output.dir.join("overlay_Centrale.svg")).unwrap();
    let rendered = &output.charts.as_ref().unwrap().rendered;
    assert_eq!(overlay, rendered.iter().find(|f| f.name == "overlay_Centrale.svg").unwrap().contents);

    let analysis = config.output.dir.join(&config.output.analysis_workbook);
    let back = read_summary_sheet(&analysis, &config.output.daily_sheet, Granularity::Daily).unwrap();
    assert_eq!(back.labels(), output.daily_export.labels());
    for (read, original) in back.rows().iter().zip(output.daily_export.rows()) {
        assert_eq!(read.period, original.period);
        for (a, b) in read.cells.iter().zip(&original.cells) {
            match (a, b) {
                (Cell::Number(Some(x)), Cell::Number(Some(y))) => assert_relative_eq!(*x, *y, epsilon = 1e-9),
                _ => assert_eq!(a, b),
            }
        }
    }

    let monthly = read_summary_sheet(&analysis, &config.output.monthly_sheet, Granularity::Monthly).unwrap();
    assert_eq!(monthly.rows()[0].period.to_string(), "2024-06");

    // second run replaces the files rather than appending
    let again = write_outputs(&config, &output).unwrap();
    assert_eq!(again, written);
    let back = read_summary_sheet(&analysis, &config.output.daily_sheet, Granularity::Daily).unwrap();
    assert_eq!(back.len(), 2);
}

#[test]
fn bad_timestamp_aborts_before_any_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = central_config(dir.path());
    write(dir.path(), "weather.csv", "DateTime,Temp_air\nyesterday,18\n");
    let err = run(&config).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Parse(ParseError::TimestampParseError { row: 2, .. })
    ));
    assert!(!config.output.dir.exists());
}

#[test]
fn offset_and_naive_sources_cannot_be_joined() {
    let dir = tempfile::tempdir().unwrap();
    let config = central_config(dir.path());
    write(
        dir.path(),
        "weather.csv",
        "DateTime,Temp_air\n2024-06-01T10:00:00+02:00,18\n",
    );
    assert!(matches!(
        run(&config),
        Err(PipelineError::Alignment(AlignmentError::IncompatibleTimeBasis { .. }))
    ));
}

#[test]
fn round_robin_stations_split_the_groups() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = central_config(dir.path());
    let stations = write(dir.path(), "plants.csv", "System_Name,kWp\nNord,5\nSud,6\n");
    config.stations = StationConfig::RoundRobin {
        path: stations,
        column: "System_Name".to_string(),
        delimiter: None,
    };
    let output = run(&config).unwrap();
    assert_eq!(output.daily.len(), 4);
    assert_eq!(output.daily.stations(), vec!["Nord", "Sud"]);
    let nord_day1 = &output.daily.rows()[0];
    // rows 10:00 and 12:00 of the first day
    assert_eq!(output.daily.number(nord_day1, "Energie_journaliere").unwrap(), Some(250.0));
    assert_eq!(output.charts.unwrap().dashboard.unwrap().views.len(), 2);
}

#[test]
fn empty_station_list_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = central_config(dir.path());
    let stations = write(dir.path(), "plants.csv", "System_Name\n\n");
    config.stations = StationConfig::RoundRobin {
        path: stations,
        column: "System_Name".to_string(),
        delimiter: None,
    };
    assert!(matches!(
        run(&config),
        Err(PipelineError::Config(ConfigError::Invalid { .. }))
    ));
}

#[test]
fn thresholds_change_the_flagged_days() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = central_config(dir.path());
    let anomalies = config.anomalies.as_mut().unwrap();
    anomalies.thresholds.min_performance_ratio = 0.1;
    anomalies.thresholds.min_irradiation = 1000.0;
    let output = run(&config).unwrap();
    let report = output.anomalies.unwrap();
    assert_eq!(report.low_performance.len(), 1);
    assert!(report.zero_output.is_empty());
}

#[test]
fn stations_sharing_a_slug_get_distinct_chart_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = central_config(dir.path());
    let stations = write(dir.path(), "plants.csv", "System_Name\nNord Est\nNord_Est\n");
    config.stations = StationConfig::RoundRobin {
        path: stations,
        column: "System_Name".to_string(),
        delimiter: None,
    };
    let output = run(&config).unwrap();
    let names: Vec<&str> = output
        .charts
        .as_ref()
        .unwrap()
        .rendered
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert!(names.contains(&"overlay_Nord_Est.svg"));
    assert!(names.contains(&"overlay_Nord_Est_2.svg"));
    assert!(names.contains(&"dashboard_Nord_Est.svg"));
    assert!(names.contains(&"dashboard_Nord_Est_2.svg"));

    let written = write_outputs(&config, &output).unwrap();
    // analysis, anomalies, performance ratio, 2 overlays, 2 views, selector
    assert_eq!(written.len(), 8);
    let html = std::fs::read_to_string(config.output.dir.join("dashboard.html")).unwrap();
    assert!(html.contains("dashboard_Nord_Est_2.svg"));
}

#[test]
fn localized_source_groups_days_on_its_own_calendar() {
    let dir = tempfile::tempdir().unwrap();
    let body: String = std::iter::once("Date,P\n".to_string())
        .chain((6..=18).map(|h| format!("2024-06-01 {:02}:00:00,10\n", h)))
        .collect();
    let path = write(dir.path(), "sydney.csv", &body);
    let source: SourceConfig = serde_json::from_value(serde_json::json!({
        "name": "central",
        "path": path,
        "format": "csv",
        "timestamp_column": "Date",
        "timezone": "Australia/Sydney"
    }))
    .unwrap();
    let table = load_source(&source).unwrap();
    // stored as UTC instants, the first ones on the previous UTC day
    assert_eq!(table.index()[0], ts(1, 6) - chrono::Duration::hours(10));

    let plan: AggregationConfig = serde_json::from_value(serde_json::json!({
        "aggregates": [{ "source": "P", "reducer": "sum", "label": "Energie" }]
    }))
    .unwrap();
    let daily = aggregate(&table, Granularity::Daily, &plan).unwrap();
    assert_eq!(daily.len(), 1);
    assert_eq!(daily.rows()[0].period, Period::Day(ts(1, 0).date()));
    assert_eq!(daily.numbers("Energie").unwrap(), vec![Some(130.0)]);
}
