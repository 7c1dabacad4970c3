use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Global metrics instance
pub static METRICS: Lazy<Mutex<RunMetrics>> = Lazy::new(|| Mutex::new(RunMetrics::new()));

/// Counters of one pipeline run
#[derive(Debug, Default)]
pub struct RunMetrics {
    pub sources_loaded: u64,
    pub rows_loaded: u64,
    pub rows_merged: u64,
    pub values_clamped: u64,
    pub values_interpolated: u64,
    pub validation_issues: u64,
    pub summary_groups: u64,
    pub low_performance_days: u64,
    pub zero_output_days: u64,
    pub files_written: u64,
    /// Stage durations in execution order.
    pub stage_times: Vec<(String, Duration)>,
    pub start_time: Option<Instant>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_source(&mut self, rows: usize) {
        self.sources_loaded += 1;
        self.rows_loaded += rows as u64;
    }

    pub fn record_cleaning(&mut self, clamped: usize, interpolated: usize) {
        self.values_clamped += clamped as u64;
        self.values_interpolated += interpolated as u64;
    }

    pub fn record_validation_issues(&mut self, issues: usize) {
        self.validation_issues += issues as u64;
    }

    pub fn record_merge(&mut self, rows: usize) {
        self.rows_merged = rows as u64;
    }

    pub fn record_summary_groups(&mut self, groups: usize) {
        self.summary_groups += groups as u64;
    }

    pub fn record_anomalies(&mut self, low_performance: usize, zero_output: usize) {
        self.low_performance_days = low_performance as u64;
        self.zero_output_days = zero_output as u64;
    }

    pub fn record_file_written(&mut self) {
        self.files_written += 1;
    }

    pub fn record_stage_time(&mut self, stage: String, duration: Duration) {
        self.stage_times.push((stage, duration));
    }

    pub fn get_total_duration(&self) -> Duration {
        self.start_time.map(|start| start.elapsed()).unwrap_or_default()
    }

    pub fn print_summary(&self) {
        let duration = self.get_total_duration();
        println!("\n========== Pipeline Metrics Summary ==========");
        println!("Total Duration: {:.2?}", duration);
        println!("Sources Loaded: {}", self.sources_loaded);
        println!("Rows Loaded: {}", self.rows_loaded);
        println!("Rows Merged: {}", self.rows_merged);
        println!("Values Clamped: {}", self.values_clamped);
        println!("Values Interpolated: {}", self.values_interpolated);
        println!("Validation Issues: {}", self.validation_issues);
        println!("Summary Groups: {}", self.summary_groups);
        println!("Low Performance Days: {}", self.low_performance_days);
        println!("Zero Output Days: {}", self.zero_output_days);
        println!("Files Written: {}", self.files_written);

        if !self.stage_times.is_empty() {
            println!("\nStage Times:");
            for (stage, duration) in &self.stage_times {
                println!("  {}: {:.2?}", stage, duration);
            }
        }
        println!("=============================================\n");
    }
}

/// Helper macro to time a pipeline stage
#[macro_export]
macro_rules! time_stage {
    ($name:expr, $op:expr) => {{
        let start = std::time::Instant::now();
        let result = $op;
        let duration = start.elapsed();
        $crate::metrics::METRICS
            .lock()
            .record_stage_time($name.to_string(), duration);
        result
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut metrics = RunMetrics::new();
        metrics.record_source(10);
        metrics.record_source(5);
        metrics.record_cleaning(2, 3);
        metrics.record_stage_time("load".to_string(), Duration::from_millis(4));
        assert_eq!(metrics.sources_loaded, 2);
        assert_eq!(metrics.rows_loaded, 15);
        assert_eq!(metrics.values_interpolated, 3);
        assert_eq!(metrics.stage_times[0].0, "load");
    }
}
