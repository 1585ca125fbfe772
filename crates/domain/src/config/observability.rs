use serde::{Deserialize, Serialize};

/// OpenTelemetry export for the gateway's `tracing` spans.
///
/// With no `otlp_endpoint` the gateway only writes structured JSON logs.
/// Setting it forwards every span (one per turn, plus request spans) to
/// an OTLP/gRPC collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP gRPC endpoint (e.g. `http://localhost:4317`).
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// `service.name` resource attribute.
    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// `TraceIdRatioBased` sampling ratio in `[0.0, 1.0]`.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

impl ObservabilityConfig {
    /// Sampling ratio clamped into the range the sampler accepts.
    pub fn effective_sample_rate(&self) -> f64 {
        if self.sample_rate.is_nan() {
            return 1.0;
        }
        self.sample_rate.clamp(0.0, 1.0)
    }
}

fn d_service_name() -> String {
    "sessionbridge".into()
}

fn d_sample_rate() -> f64 {
    1.0
}
