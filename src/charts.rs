//! Static SVG charts of summary columns.

use chrono::{DateTime, NaiveDateTime};
use log::warn;
use plotters::prelude::*;
use std::fmt::Display;

use crate::aggregate::SummaryTable;
use crate::errors::{ExportError, TableError};

pub const CHART_SIZE: (u32, u32) = (1200, 600);

pub(crate) const SERIES_COLORS: [RGBColor; 8] = [
    RGBColor(33, 150, 243),
    RGBColor(244, 67, 54),
    RGBColor(76, 175, 80),
    RGBColor(255, 152, 0),
    RGBColor(156, 39, 176),
    RGBColor(0, 150, 136),
    RGBColor(121, 85, 72),
    RGBColor(96, 125, 139),
];

pub(crate) fn series_color(i: usize) -> RGBColor {
    SERIES_COLORS[i % SERIES_COLORS.len()]
}

pub(crate) fn render_error(chart: &str, e: impl Display) -> ExportError {
    ExportError::Render {
        chart: chart.to_string(),
        message: e.to_string(),
    }
}

pub(crate) fn epoch_seconds(ts: NaiveDateTime) -> f64 {
    ts.and_utc().timestamp() as f64
}

pub(crate) fn format_epoch(secs: f64) -> String {
    DateTime::from_timestamp(secs.round() as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Axis range covering `values`, widened when it would be empty.
pub(crate) fn padded_range<I: IntoIterator<Item = f64>>(values: I) -> (f64, f64) {
    let (lo, hi) = values
        .into_iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if lo == hi {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.1 };
        return (lo - pad, hi + pad);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

/// Consecutive runs of observed points; a missing value breaks the line.
pub(crate) fn runs(points: &[(f64, Option<f64>)]) -> Vec<Vec<(f64, f64)>> {
    let mut out: Vec<Vec<(f64, f64)>> = Vec::new();
    let mut current = Vec::new();
    for &(x, y) in points {
        match y {
            Some(y) => current.push((x, y)),
            None if !current.is_empty() => out.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// A rendered output file held in memory until the write step.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFile {
    pub name: String,
    pub contents: String,
}

/// One summary column over time.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub label: String,
    pub points: Vec<(NaiveDateTime, Option<f64>)>,
}

impl TimeSeries {
    /// One series per station for `label`, x at the start of each period.
    pub fn per_station(summary: &SummaryTable, label: &str) -> Result<Vec<TimeSeries>, TableError> {
        let column = summary.label_index(label)?;
        let stations = summary.stations();
        let single = stations.len() == 1;
        Ok(stations
            .into_iter()
            .map(|station| TimeSeries {
                label: if single {
                    label.to_string()
                } else {
                    format!("{} ({})", label, station)
                },
                points: summary
                    .rows()
                    .iter()
                    .filter(|r| r.station == station)
                    .map(|r| (r.period.start(), r.cells[column].as_number()))
                    .collect(),
            })
            .collect())
    }

    pub fn observed_range(&self) -> Option<(f64, f64)> {
        self.points.iter().filter_map(|(_, v)| *v).fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    fn plot_points(&self) -> Vec<(f64, Option<f64>)> {
        self.points.iter().map(|(t, v)| (epoch_seconds(*t), *v)).collect()
    }

    /// Values rescaled to [0, 1] over the series' own range.
    fn normalized(&self) -> Vec<(f64, Option<f64>)> {
        let Some((lo, hi)) = self.observed_range() else {
            return Vec::new();
        };
        self.points
            .iter()
            .map(|(t, v)| {
                let y = v.map(|v| if hi > lo { (v - lo) / (hi - lo) } else { 0.5 });
                (epoch_seconds(*t), y)
            })
            .collect()
    }
}

fn non_empty<'a>(title: &str, series: &'a [TimeSeries]) -> Vec<&'a TimeSeries> {
    series
        .iter()
        .filter(|s| {
            let keep = s.observed_range().is_some();
            if !keep {
                warn!("Chart '{}': series '{}' has no values and is skipped", title, s.label);
            }
            keep
        })
        .collect()
}

fn draw_time_chart(
    title: &str,
    y_desc: &str,
    series: &[(String, Vec<(f64, Option<f64>)>)],
    y_range: (f64, f64),
) -> Result<String, ExportError> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, CHART_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(|e| render_error(title, e))?;

        let (x_min, x_max) = padded_range(series.iter().flat_map(|(_, p)| p.iter().map(|(x, _)| *x)));
        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 22))
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(x_min..x_max, y_range.0..y_range.1)
            .map_err(|e| render_error(title, e))?;

        chart
            .configure_mesh()
            .x_desc("Date")
            .y_desc(y_desc)
            .x_labels(10)
            .x_label_formatter(&|x| format_epoch(*x))
            .draw()
            .map_err(|e| render_error(title, e))?;

        for (i, (label, points)) in series.iter().enumerate() {
            let color = series_color(i);
            for (n, run) in runs(points).into_iter().enumerate() {
                let anno = chart
                    .draw_series(LineSeries::new(run, color.stroke_width(2)))
                    .map_err(|e| render_error(title, e))?;
                if n == 0 {
                    anno.label(label.as_str())
                        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
                }
            }
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(|e| render_error(title, e))?;
        root.present().map_err(|e| render_error(title, e))?;
    }
    Ok(svg)
}

/// Line chart of one or more series sharing the value axis.
pub fn line_chart_svg(title: &str, y_desc: &str, series: &[TimeSeries]) -> Result<String, ExportError> {
    let kept = non_empty(title, series);
    let y_range = padded_range(
        kept.iter()
            .filter_map(|s| s.observed_range())
            .flat_map(|(lo, hi)| [lo, hi]),
    );
    let prepared: Vec<(String, Vec<(f64, Option<f64>)>)> =
        kept.iter().map(|s| (s.label.clone(), s.plot_points())).collect();
    draw_time_chart(title, y_desc, &prepared, y_range)
}

/// Several series on one time axis, each scaled to its own range. The legend
/// carries the original range of every series.
pub fn overlay_chart_svg(title: &str, series: &[TimeSeries]) -> Result<String, ExportError> {
    let prepared: Vec<(String, Vec<(f64, Option<f64>)>)> = non_empty(title, series)
        .into_iter()
        .filter_map(|s| {
            let (lo, hi) = s.observed_range()?;
            Some((format!("{} [{:.2} .. {:.2}]", s.label, lo, hi), s.normalized()))
        })
        .collect();
    draw_time_chart(title, "normalized value", &prepared, (-0.05, 1.05))
}
