//! End-to-end run: everything up to the diagnostics happens in memory, then
//! outputs are written in a separate step.

use log::{info, warn};
use std::fs;
use std::path::PathBuf;

use crate::aggregate::{aggregate, Granularity, SummaryTable};
use crate::anomalies::{detect, AnomalyReport};
use crate::charts::{line_chart_svg, overlay_chart_svg, RenderedFile, TimeSeries};
use crate::cleaning::{clamp_non_negative, interpolate_time, missing_counts, MissingReport};
use crate::config::{AggregationConfig, PipelineConfig, StationConfig};
use crate::dashboard::{render_dashboard, station_dashboard, unique_slugs, Dashboard};
use crate::derive::{with_efficiency, with_performance_ratio, with_stations, StationPolicy};
use crate::diagnostics::{self, ColumnStats};
use crate::errors::{ConfigError, ExportError, PipelineError};
use crate::export::{write_analysis_workbook, write_anomaly_workbook, write_atomic};
use crate::file_processor::load_source;
use crate::merge::merge_all;
use crate::metrics::METRICS;
use crate::parsers::csv_parser::load_station_names;
use crate::table::TimeTable;
use crate::validation::{validate_table, ValidationSummary};

/// Chart inputs resolved against the results, and the files rendered from
/// them.
#[derive(Debug, Clone, Default)]
pub struct ChartPlan {
    pub performance_ratio: Vec<TimeSeries>,
    /// (station, series) per station.
    pub overlays: Vec<(String, Vec<TimeSeries>)>,
    pub dashboard: Option<Dashboard>,
    pub rendered: Vec<RenderedFile>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Cleaned, merged row-level table with stations and derived columns.
    pub merged: TimeTable,
    pub daily: SummaryTable,
    pub monthly: Option<SummaryTable>,
    pub anomalies: Option<AnomalyReport>,
    /// Row-level columns selected for the hourly sheet.
    pub hourly_export: TimeTable,
    pub daily_export: SummaryTable,
    pub monthly_export: Option<SummaryTable>,
    pub missing: Vec<MissingReport>,
    pub validation: Vec<(String, ValidationSummary)>,
    pub statistics: Vec<ColumnStats>,
    pub zero_power_rows: Option<usize>,
    pub charts: Option<ChartPlan>,
}

fn station_policy(config: &PipelineConfig) -> Result<StationPolicy, PipelineError> {
    match &config.stations {
        StationConfig::Single { name } => Ok(StationPolicy::Single(
            name.clone().unwrap_or_else(|| config.plant_name.clone()),
        )),
        StationConfig::RoundRobin { path, column, .. } => {
            let delimiter = config.stations_delimiter()?;
            let names = load_station_names(path, column, delimiter)?;
            Ok(StationPolicy::round_robin(names)?)
        }
    }
}

/// Loads and cleans every source. The clamp list may name columns of any
/// source, but each one must exist somewhere.
fn load_sources(config: &PipelineConfig) -> Result<(Vec<TimeTable>, Vec<MissingReport>, Vec<(String, ValidationSummary)>), PipelineError> {
    let mut tables = Vec::with_capacity(config.sources.len());
    let mut missing = Vec::new();
    let mut validation = Vec::new();
    let mut clamped_somewhere = vec![false; config.cleaning.clamp_non_negative.len()];

    for source in &config.sources {
        let table = crate::time_stage!(format!("load {}", source.name), load_source(source))?;
        METRICS.lock().record_source(table.len());
        missing.push(missing_counts(&table)?);

        let to_clamp: Vec<String> = config
            .cleaning
            .clamp_non_negative
            .iter()
            .enumerate()
            .filter(|(_, c)| table.has_column(c))
            .map(|(i, c)| {
                clamped_somewhere[i] = true;
                c.clone()
            })
            .collect();
        let (table, clamped) = clamp_non_negative(table, &to_clamp)?;

        let checks = validate_table(&table);
        METRICS.lock().record_validation_issues(checks.issue_count());
        validation.push((source.name.clone(), checks));

        let (table, interpolated) = if config.cleaning.interpolate {
            interpolate_time(table)?
        } else {
            (table, 0)
        };
        METRICS.lock().record_cleaning(clamped, interpolated);
        tables.push(table);
    }

    if let Some(i) = clamped_somewhere.iter().position(|found| !found) {
        return Err(ConfigError::Invalid {
            field: "cleaning.clamp_non_negative".to_string(),
            message: format!("column '{}' is not in any source", config.cleaning.clamp_non_negative[i]),
        }
        .into());
    }
    Ok((tables, missing, validation))
}

fn summarize(table: &TimeTable, granularity: Granularity, plan: &AggregationConfig) -> Result<(SummaryTable, SummaryTable), PipelineError> {
    let mut summary = crate::time_stage!(format!("aggregate {}", granularity), aggregate(table, granularity, plan))?;
    if let Some(pr) = &plan.performance_ratio {
        summary = with_performance_ratio(summary, pr)?;
    }
    METRICS.lock().record_summary_groups(summary.len());
    let export = match &plan.export_columns {
        Some(columns) => summary.select(columns)?,
        None => summary.clone(),
    };
    Ok((summary, export))
}

fn plan_charts(config: &PipelineConfig, merged: &TimeTable, daily: &SummaryTable) -> Result<Option<ChartPlan>, PipelineError> {
    let Some(charts) = &config.output.charts else {
        return Ok(None);
    };
    let mut plan = ChartPlan::default();
    if let Some(label) = &charts.performance_ratio {
        plan.performance_ratio = TimeSeries::per_station(daily, label)?;
    }
    if !charts.overlay.is_empty() {
        for station in daily.stations() {
            let rows = daily.station_rows(station);
            let mut series = Vec::with_capacity(charts.overlay.len());
            for label in &charts.overlay {
                series.extend(TimeSeries::per_station(&rows, label)?);
            }
            plan.overlays.push((station.to_string(), series));
        }
    }
    if let Some(dashboard) = &charts.dashboard {
        plan.dashboard = Some(station_dashboard(dashboard, merged, daily)?);
    }
    plan.rendered = render_charts(&config.plant_name, &plan)?;
    Ok(Some(plan))
}

/// Renders every planned chart so that a rendering failure surfaces before
/// any file is written.
fn render_charts(plant_name: &str, plan: &ChartPlan) -> Result<Vec<RenderedFile>, PipelineError> {
    let mut rendered = Vec::new();
    if !plan.performance_ratio.is_empty() {
        rendered.push(RenderedFile {
            name: "performance_ratio.svg".to_string(),
            contents: line_chart_svg(
                &format!("{} - performance ratio", plant_name),
                "RP",
                &plan.performance_ratio,
            )?,
        });
    }
    let stems = unique_slugs(plan.overlays.iter().map(|(station, _)| station.as_str()));
    for ((station, series), stem) in plan.overlays.iter().zip(stems) {
        rendered.push(RenderedFile {
            name: format!("overlay_{}.svg", stem),
            contents: overlay_chart_svg(&format!("{} - daily indicators", station), series)?,
        });
    }
    if let Some(dashboard) = &plan.dashboard {
        if dashboard.views.is_empty() {
            warn!("Dashboard '{}' has no views; nothing rendered", dashboard.title);
        } else {
            rendered.extend(render_dashboard(dashboard)?);
        }
    }
    Ok(rendered)
}

/// Runs every stage in memory. Nothing is written to disk.
pub fn run(config: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    info!("Starting pipeline for '{}' with {} source(s)", config.plant_name, config.sources.len());
    let policy = station_policy(config)?;

    let (tables, missing, validation) = load_sources(config)?;
    let merged = crate::time_stage!("merge", merge_all(tables))?;
    METRICS.lock().record_merge(merged.len());

    let mut merged = with_stations(merged, &policy)?;
    if let Some(efficiency) = &config.efficiency {
        merged = with_efficiency(merged, efficiency)?;
    }

    let (daily, daily_export) = summarize(&merged, Granularity::Daily, &config.daily)?;
    let (monthly, monthly_export) = match config.aggregation(Granularity::Monthly) {
        Some(plan) => {
            let (summary, export) = summarize(&merged, Granularity::Monthly, plan)?;
            (Some(summary), Some(export))
        }
        None => (None, None),
    };

    let anomalies = match &config.anomalies {
        Some(cfg) => {
            let report = crate::time_stage!("anomalies", detect(&daily, cfg))?;
            METRICS
                .lock()
                .record_anomalies(report.low_performance.len(), report.zero_output.len());
            Some(report)
        }
        None => None,
    };

    let hourly_columns: Vec<String> = if !config.output.hourly_columns.is_empty() {
        config.output.hourly_columns.clone()
    } else if let Some(efficiency) = &config.efficiency {
        vec![efficiency.measured.clone()]
    } else {
        merged.column_names()
    };
    let hourly_export = merged.select(&hourly_columns)?;

    let statistics = diagnostics::describe(&merged)?;
    let zero_power_rows = match &config.diagnostics.zero_power_column {
        Some(column) => Some(diagnostics::count_equal(&merged, column, 0.0).ok_or_else(|| {
            ConfigError::Invalid {
                field: "diagnostics.zero_power_column".to_string(),
                message: format!("column '{}' is not in the merged table", column),
            }
        })?),
        None => None,
    };

    let charts = plan_charts(config, &merged, &daily)?;

    info!(
        "Pipeline finished in memory: {} rows, {} daily group(s)",
        merged.len(),
        daily.len()
    );
    Ok(PipelineOutput {
        merged,
        daily,
        monthly,
        anomalies,
        hourly_export,
        daily_export,
        monthly_export,
        missing,
        validation,
        statistics,
        zero_power_rows,
        charts,
    })
}

/// Writes workbooks and the already rendered charts into the output
/// directory, replacing any earlier files of the same name. Returns the
/// written paths.
pub fn write_outputs(config: &PipelineConfig, output: &PipelineOutput) -> Result<Vec<PathBuf>, PipelineError> {
    let dir = &config.output.dir;
    fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.clone(),
        source,
    })?;
    let mut written = Vec::new();

    let analysis = dir.join(&config.output.analysis_workbook);
    crate::time_stage!(
        "write analysis workbook",
        write_analysis_workbook(
            &analysis,
            &config.output,
            &output.hourly_export,
            &output.daily_export,
            output.monthly_export.as_ref(),
        )
    )?;
    METRICS.lock().record_file_written();
    written.push(analysis);

    if let Some(report) = &output.anomalies {
        let path = dir.join(&config.output.anomaly_workbook);
        write_anomaly_workbook(&path, &config.output, report)?;
        METRICS.lock().record_file_written();
        written.push(path);
    }

    for file in output.charts.iter().flat_map(|plan| &plan.rendered) {
        let path = dir.join(&file.name);
        write_atomic(&path, file.contents.as_bytes())?;
        METRICS.lock().record_file_written();
        written.push(path);
    }

    info!("Wrote {} output file(s) to {}", written.len(), dir.display());
    Ok(written)
}

/// Console diagnostics of a finished run.
pub fn print_diagnostics(config: &PipelineConfig, output: &PipelineOutput) {
    for report in &output.missing {
        diagnostics::print_missing_report(report);
    }
    diagnostics::print_statistics(&output.statistics);
    if let (Some(column), Some(count)) = (&config.diagnostics.zero_power_column, output.zero_power_rows) {
        println!("\nRows with {} = 0: {}", column, count);
    }

    let preview = config.diagnostics.preview_rows;
    diagnostics::print_summary_preview("Daily summary", &output.daily_export, preview);
    if let Some(monthly) = &output.monthly_export {
        diagnostics::print_summary_preview("Monthly summary", monthly, preview);
    }
    if let Some(report) = &output.anomalies {
        diagnostics::print_summary_preview("Low performance days", &report.low_performance, report.low_performance.len());
        diagnostics::print_summary_preview("Zero output days", &report.zero_output, report.zero_output.len());
    }
}
