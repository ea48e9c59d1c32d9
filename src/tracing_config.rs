//! Tracing subscriber setup for the command-line tool
//!
//! The library only emits events and spans; installing a subscriber is left to
//! the binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Coloured compact console output (default for the CLI)
    Console,
    /// Plain compact output for CI logs
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level from repeated `-v` flags
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Explicit filter directive, takes precedence over `RUST_LOG` and verbosity
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter directive for the configured verbosity
    ///
    /// Dependencies stay at `warn` until `-vv`.
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "warn,segment_bgremove=info",
            1 => "warn,segment_bgremove=debug",
            _ => "trace",
        }
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        if let Some(directive) = &self.env_filter {
            return Ok(EnvFilter::try_new(directive)?);
        }
        if self.verbosity == 0 {
            if let Ok(from_env) = EnvFilter::try_from_default_env() {
                return Ok(from_env);
            }
        }
        Ok(EnvFilter::try_new(self.verbosity_to_filter())?)
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let registry = Registry::default().with(self.filter()?);

        match self.format {
            TracingFormat::Console => registry
                .with(
                    fmt::layer()
                        .with_ansi(true)
                        .with_target(false)
                        .with_writer(std::io::stderr)
                        .compact(),
                )
                .try_init()?,
            TracingFormat::Compact => registry
                .with(
                    fmt::layer()
                        .with_ansi(false)
                        .with_target(false)
                        .with_writer(std::io::stderr)
                        .compact(),
                )
                .try_init()?,
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_writer(std::io::stderr),
                )
                .try_init()?,
        }

        Ok(())
    }
}

/// Initialize tracing with CLI defaults
///
/// # Errors
/// - See [`TracingConfig::init`]
pub fn init_cli_tracing(verbosity: u8, json: bool) -> anyhow::Result<()> {
    let format = if json {
        #[cfg(feature = "tracing-json")]
        {
            TracingFormat::Json
        }
        #[cfg(not(feature = "tracing-json"))]
        {
            tracing::warn!("JSON logging requires the tracing-json feature, using console output");
            TracingFormat::Console
        }
    } else {
        TracingFormat::Console
    };

    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .init()
}

/// Span creation helpers for CLI operations
pub mod spans {
    use tracing::{Level, Span};

    /// Span for model loading
    pub fn model_loading(model_name: &str, device: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "model_loading",
            model_name = %model_name,
            device = %device
        )
    }

    /// Span for processing one input
    pub fn file_processing(file_path: &std::path::Path) -> Span {
        tracing::span!(
            Level::INFO,
            "file_processing",
            file_path = %file_path.display()
        )
    }

    /// Span for a model download
    pub fn download(url: &str) -> Span {
        tracing::span!(Level::INFO, "download", url = %url)
    }
}
