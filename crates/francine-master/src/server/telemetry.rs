//! Logging, tracing and metrics setup for the dispatcher.
//!
//! Console logging through `tracing-subscriber` is always installed, filtered
//! by `RUST_LOG` (default `info`) and printed either as pretty multi-line
//! records or as JSON lines.
//!
//! OpenTelemetry export is opt-in through cargo features:
//!
//! - `tracing`: one span per `Render` call, exported via
//!   `tracing-opentelemetry`. On by default.
//! - `metrics`: render count, in-flight renders, errors, render duration and
//!   artifact size.
//! - `stdout`: print exported spans and metrics to stdout.
//! - `honeycomb`: export over OTLP/gRPC. Reads `HONEYCOMB_API_KEY`,
//!   `HONEYCOMB_DATASET`, `HONEYCOMB_ENDPOINT` and `HONEYCOMB_COMPRESSION`.
//!
//! Exporters need at least one of `tracing` or `metrics`:
//!
//! ```bash
//! cargo run -p francine-master --features tracing,metrics,stdout
//! ```
//!
//! Events logged outside of a span only reach the console.

#[cfg(all(
    feature = "honeycomb",
    not(any(feature = "tracing", feature = "metrics"))
))]
compile_error!(
    "The 'honeycomb' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use clap::ValueEnum;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "honeycomb", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
use tonic::{metadata::MetadataMap, transport::ClientTlsConfig};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE_NAME: &str = "francine-master";

#[cfg(any(
    all(feature = "stdout", any(feature = "metrics", feature = "tracing")),
    all(feature = "honeycomb", feature = "tracing")
))]
const EXPORT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Console log layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Multi-line, human readable records.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Providers that must be flushed and shut down before exit.
pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes pending spans and metrics and stops the exporters.
    pub fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry(format: LogFormat) -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let console = match format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
            .with_file(true)
            .pretty()
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
            .json()
            .boxed(),
    };

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(console);

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// OTLP settings shared by the span and metric exporters.
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
struct Honeycomb {
    metadata: MetadataMap,
    endpoint: String,
    compression: Compression,
}

#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
impl Honeycomb {
    fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;
        use std::str::FromStr;

        let api_key = std::env::var("HONEYCOMB_API_KEY").context("missing `HONEYCOMB_API_KEY`")?;
        let dataset = std::env::var("HONEYCOMB_DATASET").context("missing `HONEYCOMB_DATASET`")?;
        let endpoint =
            std::env::var("HONEYCOMB_ENDPOINT").context("missing `HONEYCOMB_ENDPOINT`")?;
        let compression = std::env::var("HONEYCOMB_COMPRESSION")
            .context("missing `HONEYCOMB_COMPRESSION`")?
            .to_ascii_lowercase();

        let mut metadata = MetadataMap::new();
        metadata.insert(
            "x-honeycomb-team",
            api_key.parse().context("invalid API key")?,
        );
        metadata.insert(
            "x-honeycomb-dataset",
            dataset.parse().context("invalid dataset")?,
        );

        Ok(Self {
            metadata,
            endpoint,
            compression: Compression::from_str(&compression)?,
        })
    }
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        let reader =
            sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
                .with_interval(EXPORT_INTERVAL)
                .build();
        builder.with_reader(reader)
    };

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let honeycomb = Honeycomb::from_env()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(honeycomb.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(honeycomb.compression)
            .with_endpoint(honeycomb.endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(all(feature = "tracing", any(feature = "stdout", feature = "honeycomb")))]
fn batch_processor<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(EXPORT_INTERVAL)
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder =
        builder.with_span_processor(batch_processor(opentelemetry_stdout::SpanExporter::default()));

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let honeycomb = Honeycomb::from_env()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(honeycomb.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(honeycomb.compression)
            .with_endpoint(honeycomb.endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;
        builder.with_span_processor(batch_processor(exporter))
    };

    Ok(builder.build())
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static RENDERS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RENDERS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RENDER_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RENDER_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ARTIFACT_BYTES: OnceLock<Histogram<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = RENDERS.set(
        meter
            .u64_counter("renders")
            .with_description("Total render requests")
            .build(),
    );

    let _ = RENDERS_INFLIGHT.set(
        meter
            .i64_up_down_counter("renders_inflight")
            .with_description("Concurrent render requests")
            .build(),
    );

    let _ = RENDER_ERRORS.set(
        meter
            .u64_counter("errors")
            .with_description("Failed or refused render requests")
            .build(),
    );

    let _ = RENDER_DURATION_MS.set(
        meter
            .f64_histogram("render_duration")
            .with_unit("ms")
            .with_description("End-to-end render duration, submit and fetch included")
            .build(),
    );

    let _ = ARTIFACT_BYTES.set(
        meter
            .u64_histogram("artifact_bytes")
            .with_unit("By")
            .with_description("Size of artifacts returned to clients")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_renders() {
    if let Some(counter) = RENDERS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_renders() {}

#[cfg(feature = "metrics")]
pub fn increment_renders_inflight() {
    if let Some(counter) = RENDERS_INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_renders_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_renders_inflight() {
    if let Some(counter) = RENDERS_INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_renders_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_render_errors() {
    if let Some(counter) = RENDER_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_render_errors() {}

#[cfg(feature = "metrics")]
pub fn record_render_duration(duration_ms: f64) {
    if let Some(histogram) = RENDER_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_render_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn record_artifact_bytes(bytes: u64) {
    if let Some(histogram) = ARTIFACT_BYTES.get() {
        histogram.record(bytes, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_artifact_bytes(_bytes: u64) {}
