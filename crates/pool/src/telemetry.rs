// Tracing initialization for binaries embedding the pool
//
// The library itself only emits `tracing` events; installing a subscriber is
// left to the host process. This helper covers the common case.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_LOG_FILTER: &str = "info,lumen_pool=info";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded in the startup event
    pub service_name: String,
    /// Whether to enable console logging
    pub enable_console: bool,
    /// Log filter (e.g., "info", "lumen_pool=debug")
    pub log_filter: Option<String>,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "lumen".to_string(),
            enable_console: true,
            log_filter: None,
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SERVICE_NAME`: Service name (default: "lumen")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `LOG_FORMAT`: "json" for JSON lines
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("SERVICE_NAME").unwrap_or_else(|_| "lumen".to_string()),
            enable_console: true,
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// The filter that will be installed; invalid directives fall back to the default
    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Install the global tracing subscriber
///
/// Returns false if a subscriber was already installed (e.g. by a test
/// harness); the existing one is left in place.
///
/// # Example
///
/// ```ignore
/// use lumen_pool::telemetry::{init_tracing, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     init_tracing(TelemetryConfig::from_env());
///     // ... build and run the pool
/// }
/// ```
pub fn init_tracing(config: TelemetryConfig) -> bool {
    let console_layer = if !config.enable_console {
        None
    } else if config.json {
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_filter(config.env_filter())
                .boxed(),
        )
    } else {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(config.env_filter())
                .boxed(),
        )
    };

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = %config.service_name, "Tracing initialized");
    }
    installed
}
