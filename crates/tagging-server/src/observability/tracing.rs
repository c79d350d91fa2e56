//! Log and Trace Setup
//!
//! Console logging through `tracing-subscriber`, with optional OTLP span
//! export when a collector endpoint is configured.
//!
//! Environment variables:
//! - `OTEL_EXPORTER_OTLP_ENDPOINT` - OTLP endpoint (e.g., `http://otel-collector:4317`)
//! - `OTEL_SERVICE_NAME` - Service name (default: `tagging-server`)
//! - `LOG_FORMAT` - Set to `json` for JSON output (default: `text`)
//! - `RUST_LOG` - Filter directives (default: `info`)

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Global tracer provider for shutdown
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// OTLP endpoint for trace export (None = disabled)
    pub otlp_endpoint: Option<String>,
    /// Service name for traces
    pub service_name: String,
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "tagging-server".to_string()),
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        }
    }
}

impl TracingConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    fn is_json(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// Build the OTLP span pipeline.
fn otlp_provider(
    endpoint: &str,
    service_name: &str,
) -> Result<SdkTracerProvider, Box<dyn std::error::Error + Send + Sync>> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Ok(SdkTracerProvider::builder()
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

/// Initialize the tracing subscriber.
///
/// Filters through `RUST_LOG` (default `info`), writes text or JSON to stdout
/// and exports spans over OTLP when an endpoint is configured.
pub fn init_tracing(config: TracingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let provider = otlp_provider(endpoint, &config.service_name)?;
            let tracer = provider.tracer("tagging-server");
            // Kept for shutdown_tracing
            let _ = TRACER_PROVIDER.set(provider);
            Some(OpenTelemetryLayer::new(tracer))
        }
        None => None,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let subscriber = tracing_subscriber::registry().with(env_filter).with(otel_layer);

    if config.is_json() {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }

    match &config.otlp_endpoint {
        Some(endpoint) => tracing::info!(
            endpoint = %endpoint,
            service_name = %config.service_name,
            "OpenTelemetry tracing initialized"
        ),
        None => tracing::debug!("Tracing initialized (no OTLP export)"),
    }

    Ok(())
}

/// Shutdown the tracer provider gracefully.
///
/// This should be called during application shutdown to ensure
/// all pending traces are exported.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "Error shutting down tracer provider");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "tagging-server");
        assert_eq!(config.log_format, "text");
        assert!(!config.is_json());
    }

    #[test]
    fn test_json_format_is_case_insensitive() {
        let config = TracingConfig {
            otlp_endpoint: None,
            service_name: "tagging-server".to_string(),
            log_format: "JSON".to_string(),
        };
        assert!(config.is_json());
    }
}
