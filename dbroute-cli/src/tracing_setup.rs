//! Tracing and OpenTelemetry setup for the dbroute CLI
//!
//! One subscriber stack: env filter, compact console output on stderr (stdout
//! carries only query results) and, with `--otel` in a build with the
//! `telemetry` feature, an OTLP span exporter. The router's `debug!` routing
//! events then show up as span events on the exported trace.
//!
//! Usage:
//!   dbroute --debug read ...           # Debug logging to console
//!   dbroute --otel read ...            # Also export traces over OTLP
//!   RUST_LOG=dbroute_core=debug dbroute read ...
//!
//! Environment variables (also read from .env):
//!   RUST_LOG                          # Log filter (default: info)
//!   OTEL_EXPORTER_OTLP_ENDPOINT       # OTLP endpoint (default: http://localhost:4317)
//!   OTEL_SERVICE_NAME                 # Service name (default: dbroute)

use anyhow::{anyhow, Result};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";
const DEFAULT_SERVICE_NAME: &str = "dbroute";

/// Tracing configuration options
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Enable debug logging (sets RUST_LOG=debug if not already set)
    pub debug: bool,
    /// Enable OpenTelemetry OTLP export
    pub otel: bool,
}

/// Where exported spans go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtelSettings {
    pub endpoint: String,
    pub service_name: String,
}

impl OtelSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value: &String| !value.trim().is_empty());
        Self {
            endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string()),
            service_name: non_empty("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
        }
    }
}

fn default_level(config: &TracingConfig) -> &'static str {
    if config.debug {
        "debug"
    } else {
        "info"
    }
}

fn env_filter(config: &TracingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(config)))
}

/// Build the OTLP pipeline and register its provider globally
#[cfg(feature = "telemetry")]
fn install_tracer(settings: &OtelSettings) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::TracerProvider;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .build()
        .map_err(|e| anyhow!("failed to create OTLP exporter for {}: {}", settings.endpoint, e))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(opentelemetry_sdk::Resource::new(vec![
            KeyValue::new("service.name", settings.service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]))
        .build();

    let tracer = provider.tracer("dbroute");
    // shutdown_otel flushes through the global handle
    let _ = opentelemetry::global::set_tracer_provider(provider);
    Ok(tracer)
}

/// Flush pending spans
#[cfg(feature = "telemetry")]
pub fn shutdown_otel() {
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(not(feature = "telemetry"))]
pub fn shutdown_otel() {}

/// Install the global subscriber
pub fn init(config: &TracingConfig) -> Result<()> {
    let otel = config.otel.then(OtelSettings::from_env);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(config.debug)
        .with_writer(std::io::stderr)
        .compact();
    let registry = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt_layer);

    #[cfg(feature = "telemetry")]
    let registry = {
        let tracer = otel.as_ref().map(install_tracer).transpose()?;
        registry.with(tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer)))
    };

    registry.try_init().map_err(|err| anyhow!(err))?;

    if let Some(settings) = &otel {
        if cfg!(feature = "telemetry") {
            info!(
                endpoint = %settings.endpoint,
                service = %settings.service_name,
                "exporting traces over OTLP"
            );
        } else {
            warn!("--otel ignored: built without the telemetry feature");
        }
    }

    Ok(())
}
