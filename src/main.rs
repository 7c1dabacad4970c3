use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

use pv_diagnostics::metrics::METRICS;
use pv_diagnostics::{load_config, pipeline};

#[derive(Parser, Debug)]
#[command(name = "pv-diagnostics")]
#[command(about = "Performance diagnostics for photovoltaic plants", long_about = None)]
struct Cli {
    /// JSON pipeline configuration
    #[arg(long, env = "PV_DIAGNOSTICS_CONFIG")]
    config: PathBuf,

    /// Overrides the output directory of the configuration
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Days with a performance ratio below this value are flagged
    #[arg(long)]
    min_performance_ratio: Option<f64>,

    /// Zero-output days are flagged only above this irradiation
    #[arg(long)]
    min_irradiation: Option<f64>,

    /// Write workbooks only
    #[arg(long)]
    skip_charts: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    if let Some(dir) = cli.output_dir {
        config.output.dir = dir;
    }
    if cli.skip_charts {
        config.output.charts = None;
    }
    match config.anomalies.as_mut() {
        Some(anomalies) => {
            if let Some(v) = cli.min_performance_ratio {
                anomalies.thresholds.min_performance_ratio = v;
            }
            if let Some(v) = cli.min_irradiation {
                anomalies.thresholds.min_irradiation = v;
            }
        }
        None if cli.min_performance_ratio.is_some() || cli.min_irradiation.is_some() => {
            warn!("Anomaly thresholds given but no anomaly detection is configured; ignoring them");
        }
        None => {}
    }
    config.validate().context("Invalid configuration after command-line overrides")?;

    let output = pipeline::run(&config).context("Pipeline failed")?;
    pipeline::print_diagnostics(&config, &output);

    let written = pipeline::write_outputs(&config, &output)
        .with_context(|| format!("Failed to write outputs to {}", config.output.dir.display()))?;
    for path in &written {
        info!("Output: {}", path.display());
    }

    METRICS.lock().print_summary();
    Ok(())
}
