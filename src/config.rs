use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::aggregate::{AggregateSpec, Granularity, PeakSpec};
use crate::anomalies::AnomalyThresholds;
use crate::errors::ConfigError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Xlsx,
}

/// One time-indexed input file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub path: PathBuf,
    pub format: SourceFormat,
    pub timestamp_column: String,
    #[serde(default)]
    pub timestamp_format: Option<String>,
    /// IANA zone, e.g. "Europe/Paris", used to localize naive timestamps.
    /// Days and months of this source are cut on its calendar.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub null_markers: Vec<String>,
    /// Restricts the loaded columns; all numeric columns when absent.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl SourceConfig {
    pub fn delimiter_byte(&self) -> Result<u8, ConfigError> {
        delimiter_byte(self.delimiter.as_deref(), &format!("sources.{}.delimiter", self.name))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum StationConfig {
    /// One station per file.
    Single {
        #[serde(default)]
        name: Option<String>,
    },
    /// Synthetic labels dealt by row position over a reference list.
    RoundRobin {
        path: PathBuf,
        column: String,
        #[serde(default)]
        delimiter: Option<String>,
    },
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig::Single { name: None }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CleaningConfig {
    #[serde(default)]
    pub clamp_non_negative: Vec<String>,
    #[serde(default = "default_true")]
    pub interpolate: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            clamp_non_negative: Vec::new(),
            interpolate: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EfficiencyConfig {
    pub measured: String,
    pub theoretical: String,
    pub output: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PerformanceRatioConfig {
    pub energy: String,
    pub irradiation: String,
    pub installed_capacity: f64,
    #[serde(default = "default_pr_label")]
    pub label: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AggregationConfig {
    pub aggregates: Vec<AggregateSpec>,
    #[serde(default)]
    pub peak: Option<PeakSpec>,
    #[serde(default)]
    pub performance_ratio: Option<PerformanceRatioConfig>,
    /// Column order of the exported sheet; every label when absent.
    #[serde(default)]
    pub export_columns: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AnomalyConfig {
    pub performance_ratio: String,
    pub energy: String,
    pub irradiation: String,
    #[serde(flatten)]
    pub thresholds: AnomalyThresholds,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DiagnosticsConfig {
    #[serde(default)]
    pub zero_power_column: Option<String>,
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            zero_power_column: None,
            preview_rows: default_preview_rows(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PanelSource {
    #[default]
    Rows,
    Daily,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TraceStyle {
    #[default]
    Line,
    Markers,
    LineMarkers,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PanelConfig {
    pub title: String,
    #[serde(default)]
    pub source: PanelSource,
    /// Column plotted on the x axis; time when absent.
    #[serde(default)]
    pub x: Option<String>,
    pub y: Vec<String>,
    #[serde(default)]
    pub style: TraceStyle,
    #[serde(default)]
    pub y_desc: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DashboardConfig {
    #[serde(default = "default_dashboard_title")]
    pub title: String,
    pub panels: Vec<PanelConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChartConfig {
    /// Daily summary label drawn as a line chart over time.
    #[serde(default)]
    pub performance_ratio: Option<String>,
    /// Daily summary labels drawn on one shared time axis.
    #[serde(default)]
    pub overlay: Vec<String>,
    #[serde(default)]
    pub dashboard: Option<DashboardConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_analysis_workbook")]
    pub analysis_workbook: String,
    #[serde(default = "default_anomaly_workbook")]
    pub anomaly_workbook: String,
    #[serde(default = "default_hourly_sheet")]
    pub hourly_sheet: String,
    #[serde(default = "default_daily_sheet")]
    pub daily_sheet: String,
    #[serde(default = "default_monthly_sheet")]
    pub monthly_sheet: String,
    #[serde(default = "default_low_performance_sheet")]
    pub low_performance_sheet: String,
    #[serde(default = "default_zero_output_sheet")]
    pub zero_output_sheet: String,
    #[serde(default)]
    pub hourly_columns: Vec<String>,
    #[serde(default)]
    pub charts: Option<ChartConfig>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            analysis_workbook: default_analysis_workbook(),
            anomaly_workbook: default_anomaly_workbook(),
            hourly_sheet: default_hourly_sheet(),
            daily_sheet: default_daily_sheet(),
            monthly_sheet: default_monthly_sheet(),
            low_performance_sheet: default_low_performance_sheet(),
            zero_output_sheet: default_zero_output_sheet(),
            hourly_columns: Vec::new(),
            charts: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_plant_name")]
    pub plant_name: String,
    /// The first source is the primary series of the merge.
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub stations: StationConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub efficiency: Option<EfficiencyConfig>,
    pub daily: AggregationConfig,
    #[serde(default)]
    pub monthly: Option<AggregationConfig>,
    #[serde(default)]
    pub anomalies: Option<AnomalyConfig>,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(invalid("sources", "at least one source is required"));
        }
        for source in &self.sources {
            source.delimiter_byte()?;
            if let Some(tz) = &source.timezone {
                tz.parse::<chrono_tz::Tz>().map_err(|_| {
                    invalid(&format!("sources.{}.timezone", source.name), &format!("unknown timezone '{}'", tz))
                })?;
            }
        }
        self.stations_delimiter()?;
        validate_aggregation(&self.daily, "daily")?;
        if let Some(monthly) = &self.monthly {
            validate_aggregation(monthly, "monthly")?;
        }
        if let Some(anomalies) = &self.anomalies {
            let t = &anomalies.thresholds;
            if !t.min_performance_ratio.is_finite() || !t.min_irradiation.is_finite() {
                return Err(invalid("anomalies", "thresholds must be finite numbers"));
            }
        }
        Ok(())
    }

    /// Delimiter of the station reference file; comma unless configured.
    pub fn stations_delimiter(&self) -> Result<u8, ConfigError> {
        match &self.stations {
            StationConfig::RoundRobin { delimiter, .. } => delimiter_byte(delimiter.as_deref(), "stations.delimiter"),
            StationConfig::Single { .. } => Ok(b','),
        }
    }

    pub fn aggregation(&self, granularity: Granularity) -> Option<&AggregationConfig> {
        match granularity {
            Granularity::Daily => Some(&self.daily),
            Granularity::Monthly => self.monthly.as_ref(),
        }
    }
}

fn validate_aggregation(cfg: &AggregationConfig, field: &str) -> Result<(), ConfigError> {
    if cfg.aggregates.is_empty() && cfg.peak.is_none() {
        return Err(invalid(field, "no aggregates configured"));
    }
    if let Some(pr) = &cfg.performance_ratio {
        if !pr.installed_capacity.is_finite() || pr.installed_capacity <= 0.0 {
            return Err(invalid(
                &format!("{}.performance_ratio.installed_capacity", field),
                "must be a positive number",
            ));
        }
    }
    Ok(())
}

fn delimiter_byte(delimiter: Option<&str>, field: &str) -> Result<u8, ConfigError> {
    match delimiter {
        None => Ok(b','),
        Some("\\t") | Some("tab") => Ok(b'\t'),
        Some(d) if d.len() == 1 => Ok(d.as_bytes()[0]),
        Some(d) => Err(invalid(field, &format!("delimiter must be a single byte, got '{}'", d))),
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn default_true() -> bool {
    true
}

fn default_plant_name() -> String {
    "plant".to_string()
}

fn default_pr_label() -> String {
    "RP".to_string()
}

fn default_preview_rows() -> usize {
    5
}

fn default_dashboard_title() -> String {
    "PV Dashboard".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_analysis_workbook() -> String {
    "Analyse_Centrale_PV_Complet.xlsx".to_string()
}

fn default_anomaly_workbook() -> String {
    "Jours_Anormaux_PV.xlsx".to_string()
}

fn default_hourly_sheet() -> String {
    "Horaire_Puissance".to_string()
}

fn default_daily_sheet() -> String {
    "Journalier_Resume".to_string()
}

fn default_monthly_sheet() -> String {
    "Mensuel_Resume".to_string()
}

fn default_low_performance_sheet() -> String {
    "RP_faible".to_string()
}

fn default_zero_output_sheet() -> String {
    "Puissance_zero".to_string()
}

// Function to load the configuration from the JSON file
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let reader = BufReader::new(file);

    let config: PipelineConfig = serde_json::from_reader(reader).map_err(|e| ConfigError::JsonParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    config.validate()?;
    Ok(config)
}
