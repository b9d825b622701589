//! Prometheus metrics
//!
//! The pipeline crates record through the `metrics` facade; this module
//! installs the exporter and registers descriptions.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder; `None` if one is already installed
pub fn init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;

    metrics::describe_gauge!("voice_fleet_sessions", "Live sessions");
    metrics::describe_counter!("voice_fleet_aborts_total", "Abort requests processed");
    metrics::describe_counter!("voice_fleet_tts_units_total", "Sentence units processed");
    metrics::describe_counter!(
        "voice_fleet_provider_errors_total",
        "Provider failures by stage"
    );
    metrics::describe_counter!("voice_fleet_tool_calls_total", "Tool executions by tool");
    metrics::describe_histogram!("voice_fleet_asr_seconds", "Segment finalize latency");
    metrics::describe_histogram!("voice_fleet_tts_seconds", "Sentence synthesis latency");
    metrics::describe_histogram!("voice_fleet_turn_seconds", "Full dialogue turn latency");

    Some(handle)
}
