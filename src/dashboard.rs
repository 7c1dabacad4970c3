//! Multi-panel dashboard described as data: panels, traces and views.
//!
//! A view is a visibility mask over the full trace list. Each view renders to
//! its own SVG and an HTML page switches between them with a selector.

use log::{debug, warn};
use plotters::prelude::*;
use std::collections::HashSet;

use crate::aggregate::SummaryTable;
use crate::charts::{
    epoch_seconds, format_epoch, padded_range, render_error, runs, series_color, RenderedFile, CHART_SIZE,
};
use crate::config::{DashboardConfig, PanelSource, TraceStyle};
use crate::errors::{ExportError, PipelineError};
use crate::table::TimeTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Time,
    Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub title: String,
    pub x_kind: AxisKind,
    pub x_desc: String,
    pub y_desc: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub panel: usize,
    pub label: String,
    pub style: TraceStyle,
    /// x is epoch seconds on time panels.
    pub points: Vec<(f64, Option<f64>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub key: String,
    pub visible: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dashboard {
    pub title: String,
    pub panels: Vec<Panel>,
    pub traces: Vec<Trace>,
    pub views: Vec<View>,
}

impl Dashboard {
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.panels.is_empty() {
            return Err(ExportError::InvalidDashboard("no panels".to_string()));
        }
        if let Some(t) = self.traces.iter().find(|t| t.panel >= self.panels.len()) {
            return Err(ExportError::InvalidDashboard(format!(
                "trace '{}' refers to panel {} of {}",
                t.label,
                t.panel,
                self.panels.len()
            )));
        }
        for view in &self.views {
            if view.visible.len() != self.traces.len() {
                return Err(ExportError::InvalidDashboard(format!(
                    "view '{}' has a mask of {} entries for {} traces",
                    view.key,
                    view.visible.len(),
                    self.traces.len()
                )));
            }
        }
        Ok(())
    }

    /// Renders the panels stacked vertically, showing only the traces the
    /// view marks visible.
    pub fn render_view(&self, view: &View) -> Result<String, ExportError> {
        self.validate()?;
        let chart_name = format!("{} / {}", self.title, view.key);
        let height = CHART_SIZE.1 / 2 * self.panels.len() as u32;
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, (CHART_SIZE.0, height.max(CHART_SIZE.1))).into_drawing_area();
            root.fill(&WHITE).map_err(|e| render_error(&chart_name, e))?;
            let root = root
                .titled(&format!("{} - {}", self.title, view.key), ("sans-serif", 24))
                .map_err(|e| render_error(&chart_name, e))?;
            let areas = root.split_evenly((self.panels.len(), 1));

            for (p, (panel, area)) in self.panels.iter().zip(areas.iter()).enumerate() {
                let traces: Vec<&Trace> = self
                    .traces
                    .iter()
                    .zip(&view.visible)
                    .filter(|(t, shown)| **shown && t.panel == p)
                    .map(|(t, _)| t)
                    .collect();
                draw_panel(area, panel, &traces).map_err(|e| render_error(&chart_name, e))?;
            }
            root.present().map_err(|e| render_error(&chart_name, e))?;
        }
        Ok(svg)
    }
}

fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, plotters::coord::Shift>,
    panel: &Panel,
    traces: &[&Trace],
) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    let (x_min, x_max) = padded_range(traces.iter().flat_map(|t| t.points.iter().map(|(x, _)| *x)));
    let (y_min, y_max) = padded_range(traces.iter().flat_map(|t| t.points.iter().filter_map(|(_, y)| *y)));

    let mut chart = ChartBuilder::on(area)
        .caption(&panel.title, ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    let formatter: Box<dyn Fn(&f64) -> String> = match panel.x_kind {
        AxisKind::Time => Box::new(|x: &f64| format_epoch(*x)),
        AxisKind::Value => Box::new(|x: &f64| format!("{:.1}", x)),
    };
    chart
        .configure_mesh()
        .x_desc(panel.x_desc.as_str())
        .y_desc(panel.y_desc.as_str())
        .x_labels(8)
        .x_label_formatter(&*formatter)
        .draw()?;

    for (i, trace) in traces.iter().enumerate() {
        let color = series_color(i);
        let mut labelled = false;
        if matches!(trace.style, TraceStyle::Line | TraceStyle::LineMarkers) {
            for run in runs(&trace.points) {
                let anno = chart.draw_series(LineSeries::new(run, color.stroke_width(2)))?;
                if !labelled {
                    anno.label(trace.label.as_str())
                        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
                    labelled = true;
                }
            }
        }
        if matches!(trace.style, TraceStyle::Markers | TraceStyle::LineMarkers) {
            let anno = chart.draw_series(
                trace
                    .points
                    .iter()
                    .filter_map(|(x, y)| y.map(|y| Circle::new((*x, y), 3, color.filled()))),
            )?;
            if !labelled {
                anno.label(trace.label.as_str())
                    .legend(move |(x, y)| Circle::new((x + 10, y), 3, color.filled()));
            }
        }
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

/// File-name-safe form of a view key.
pub fn slug(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Slugs of `keys`, in order, made distinct: a key whose slug is already
/// taken gets the first free `_2`, `_3`, ... suffix.
pub fn unique_slugs<'a, I: IntoIterator<Item = &'a str>>(keys: I) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for key in keys {
        let base = slug(key);
        let mut candidate = base.clone();
        let mut n = 2;
        while used.contains(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        if candidate != base {
            warn!("'{}' shares the file name '{}' with another key; using '{}'", key, base, candidate);
        }
        used.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Selector page switching between the rendered view images.
pub fn selector_html(dashboard: &Dashboard, files: &[(String, String)]) -> String {
    let title = html_escape(&dashboard.title);
    let options: String = files
        .iter()
        .map(|(key, file)| format!("      <option value=\"{}\">{}</option>\n", html_escape(file), html_escape(key)))
        .collect();
    let first = files.first().map(|(_, f)| html_escape(f)).unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n  <meta charset=\"utf-8\">\n  <title>{title}</title>\n</head>\n<body>\n  <h1>{title}</h1>\n  <label for=\"view\">Station</label>\n  <select id=\"view\" onchange=\"document.getElementById('chart').src = this.value;\">\n{options}  </select>\n  <div><img id=\"chart\" src=\"{first}\" alt=\"{title}\"></div>\n</body>\n</html>\n"
    )
}

/// Renders one SVG per view and the `dashboard.html` selector page.
pub fn render_dashboard(dashboard: &Dashboard) -> Result<Vec<RenderedFile>, ExportError> {
    dashboard.validate()?;
    let stems = unique_slugs(dashboard.views.iter().map(|v| v.key.as_str()));
    let mut rendered = Vec::with_capacity(dashboard.views.len() + 1);
    let mut options = Vec::with_capacity(dashboard.views.len());
    for (view, stem) in dashboard.views.iter().zip(stems) {
        let name = format!("dashboard_{}.svg", stem);
        rendered.push(RenderedFile {
            name: name.clone(),
            contents: dashboard.render_view(view)?,
        });
        options.push((view.key.clone(), name));
    }
    rendered.push(RenderedFile {
        name: "dashboard.html".to_string(),
        contents: selector_html(dashboard, &options),
    });
    debug!("Rendered dashboard '{}' with {} view(s)", dashboard.title, dashboard.views.len());
    Ok(rendered)
}

/// Builds one trace per (station, panel, y column) and one view per station
/// showing that station's traces.
pub fn station_dashboard(cfg: &DashboardConfig, rows: &TimeTable, daily: &SummaryTable) -> Result<Dashboard, PipelineError> {
    let mut dashboard = Dashboard {
        title: cfg.title.clone(),
        ..Default::default()
    };
    for panel in &cfg.panels {
        dashboard.panels.push(Panel {
            title: panel.title.clone(),
            x_kind: if panel.x.is_some() { AxisKind::Value } else { AxisKind::Time },
            x_desc: panel.x.clone().unwrap_or_else(|| "Date".to_string()),
            y_desc: panel.y_desc.clone().unwrap_or_else(|| panel.y.join(", ")),
        });
    }

    let stations = daily.stations();
    let mut owners: Vec<&str> = Vec::new();
    for &station in &stations {
        let station_rows = rows.station_rows(station)?;
        let station_daily = daily.station_rows(station);
        for (p, panel) in cfg.panels.iter().enumerate() {
            for y in &panel.y {
                let points = match panel.source {
                    PanelSource::Rows => row_points(&station_rows, panel.x.as_deref(), y)?,
                    PanelSource::Daily => daily_points(&station_daily, panel.x.as_deref(), y)?,
                };
                if points.iter().all(|(_, v)| v.is_none()) {
                    warn!(
                        "Dashboard panel '{}': no values of '{}' for station '{}'; trace skipped",
                        panel.title, y, station
                    );
                    continue;
                }
                dashboard.traces.push(Trace {
                    panel: p,
                    label: y.clone(),
                    style: panel.style,
                    points,
                });
                owners.push(station);
            }
        }
    }

    for station in stations {
        dashboard.views.push(View {
            key: station.to_string(),
            visible: owners.iter().map(|o| *o == station).collect(),
        });
    }
    dashboard.validate()?;
    Ok(dashboard)
}

fn row_points(table: &TimeTable, x: Option<&str>, y: &str) -> Result<Vec<(f64, Option<f64>)>, PipelineError> {
    let ys = table.values(y)?;
    Ok(match x {
        None => table
            .local_index()
            .into_iter()
            .map(epoch_seconds)
            .zip(ys)
            .collect(),
        Some(x) => table
            .values(x)?
            .into_iter()
            .zip(ys)
            .filter_map(|(x, y)| x.map(|x| (x, y)))
            .collect(),
    })
}

fn daily_points(summary: &SummaryTable, x: Option<&str>, y: &str) -> Result<Vec<(f64, Option<f64>)>, PipelineError> {
    let ys = summary.numbers(y)?;
    Ok(match x {
        None => summary
            .rows()
            .iter()
            .map(|r| epoch_seconds(r.period.start()))
            .zip(ys)
            .collect(),
        Some(x) => summary
            .numbers(x)?
            .into_iter()
            .zip(ys)
            .filter_map(|(x, y)| x.map(|x| (x, y)))
            .collect(),
    })
}
