use std::path::PathBuf;

pub use crate::logging::error::LogError;
use crate::logging::opentelemetry::init_tracer;
pub use crate::logging::opentelemetry::{DEFAULT_OTLP_ENDPOINT, shutdown_tracer};
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

mod error;
mod opentelemetry;

pub struct LoggingConfig {
    pub log_file: Option<PathBuf>,
    pub stderr: bool,
    /// Default level for the stderr layer; `RUST_LOG` overrides it.
    pub level: LevelFilter,
    /// OTLP/HTTP trace endpoint; spans are exported only when set.
    pub otlp_endpoint: Option<String>,
}

impl LoggingConfig {
    pub fn new(log_file: Option<PathBuf>, stderr: bool, otlp_endpoint: Option<String>) -> Self {
        Self {
            log_file,
            stderr,
            level: LevelFilter::INFO,
            otlp_endpoint,
        }
    }

    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }
}

pub fn init(config: LoggingConfig) -> Result<(), LogError> {
    let subscriber = Registry::default();

    let file_layer = if let Some(log_file) = config.log_file {
        let log_file =
            std::fs::File::create(log_file).map_err(|e| LogError::InitError(e.to_string()))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(log_file)
                .with_filter(LevelFilter::DEBUG),
        )
    } else {
        None
    };
    let subscriber = subscriber.with(file_layer);

    let opentelemetry_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => Some(OpenTelemetryLayer::new(init_tracer(endpoint)?)),
        None => None,
    };
    let subscriber = subscriber.with(opentelemetry_layer);

    let stderr_layer = if config.stderr {
        let filter = EnvFilter::builder()
            .with_default_directive(config.level.into())
            .from_env_lossy();
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
    } else {
        None
    };
    let subscriber = subscriber.with(stderr_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LogError::InitError(e.to_string()))?;
    Ok(())
}
