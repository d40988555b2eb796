//! Tracing and OpenTelemetry setup for the kubecube processes
//!
//! Logs go to stdout as JSON by default (plain text for local runs). When
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set, spans and metrics are also pushed
//! over OTLP.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,cube=debug,kube=info,tower=warn,hyper=warn";

/// Pod placement attributes read from the downward API
const POD_ATTRIBUTES: [(&str, &str); 3] = [
    ("POD_NAME", "k8s.pod.name"),
    ("POD_NAMESPACE", "k8s.namespace.name"),
    ("NODE_NAME", "k8s.node.name"),
];

/// Telemetry setup failures
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// An OTLP exporter could not be built
    #[error("cannot build otlp {signal} exporter: {message}")]
    Exporter {
        /// "span" or "metric"
        signal: &'static str,
        /// Exporter error
        message: String,
    },

    /// A global subscriber was already installed
    #[error("tracing subscriber already installed: {0}")]
    Subscriber(String),
}

/// Output format of the stdout log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line, with the current span attached
    #[default]
    Json,
    /// Human readable lines
    Plain,
}

/// What to name this process and where to ship its signals
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Reported as `service.name` (e.g. "cube-operator")
    pub service_name: String,

    /// OTLP collector; stdout only when unset
    pub otlp_endpoint: Option<String>,

    /// Stdout log format
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "cube".to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|e| !e.is_empty()),
            log_format: LogFormat::Json,
        }
    }
}

/// Exporters installed by [`init_telemetry`]; flush them before exit
#[derive(Default)]
pub struct Telemetry {
    tracer: Option<TracerProvider>,
    meter: Option<SdkMeterProvider>,
}

impl Telemetry {
    /// Flush and stop the OTLP exporters, if any
    pub fn shutdown(self) {
        if let Some(tracer) = self.tracer {
            for result in tracer.force_flush() {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to flush spans");
                }
            }
            if let Err(e) = tracer.shutdown() {
                tracing::warn!(error = %e, "failed to stop span exporter");
            }
        }
        if let Some(meter) = self.meter {
            if let Err(e) = meter.shutdown() {
                tracing::warn!(error = %e, "failed to stop metric exporter");
            }
        }
    }
}

/// Install the global tracing subscriber and, if configured, OTLP exporters
pub fn init_telemetry(config: TelemetryConfig) -> Result<Telemetry, TelemetryError> {
    let mut telemetry = Telemetry::default();

    let spans = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
            let resource = resource_for(&config.service_name);

            let meter = otlp_meter_provider(endpoint, resource.clone())?;
            opentelemetry::global::set_meter_provider(meter.clone());
            telemetry.meter = Some(meter);

            let tracer = otlp_tracer_provider(endpoint, resource)?;
            opentelemetry::global::set_tracer_provider(tracer.clone());
            let layer = tracing_opentelemetry::layer()
                .with_tracer(tracer.tracer(config.service_name.clone()));
            telemetry.tracer = Some(tracer);
            Some(layer)
        }
        None => None,
    };

    let stdout = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Plain => fmt::layer().boxed(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(spans)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    Ok(telemetry)
}

/// `service.*` attributes plus pod placement when running in a pod
fn resource_for(service_name: &str) -> Resource {
    let placement = POD_ATTRIBUTES
        .iter()
        .filter_map(|(env, key)| std::env::var(env).ok().map(|v| KeyValue::new(*key, v)));

    Resource::new(
        [
            KeyValue::new(SERVICE_NAME, service_name.to_string()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ]
        .into_iter()
        .chain(placement),
    )
}

fn otlp_tracer_provider(endpoint: &str, resource: Resource) -> Result<TracerProvider, TelemetryError> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "span",
            message: e.to_string(),
        })?;

    Ok(TracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter, runtime::Tokio)
        .build())
}

fn otlp_meter_provider(endpoint: &str, resource: Resource) -> Result<SdkMeterProvider, TelemetryError> {
    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "metric",
            message: e.to_string(),
        })?;

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(PeriodicReader::builder(exporter, runtime::Tokio).build())
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_json_named_cube() {
        let config = TelemetryConfig {
            otlp_endpoint: None,
            ..Default::default()
        };
        assert_eq!(config.service_name, "cube");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn resource_carries_service_name() {
        let resource = resource_for("cube-operator");
        let name = resource
            .iter()
            .find(|(k, _)| k.as_str() == SERVICE_NAME)
            .map(|(_, v)| v.to_string());
        assert_eq!(name.as_deref(), Some("cube-operator"));
    }

    #[test]
    fn shutdown_without_exporters_is_a_no_op() {
        Telemetry::default().shutdown();
    }
}
