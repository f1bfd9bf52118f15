//! # Logging Initialization
//!
//! Sets up the `tracing` subscriber once per process.
//!
//! - **Environment filter**: `RUST_LOG` wins; otherwise `<level>` for all
//!   crates and `debug` for `action_launcher`.
//! - **Stderr (default)**: the host captures stderr as the action's
//!   diagnostic stream, so that is where logs go unless asked otherwise.
//!   The response descriptor never carries log output.
//! - **File (opt-in)**: a daily rolling file in the user cache directory
//!   (from the `directories` crate), without ANSI colors. Events are written
//!   synchronously, so log lines still precede the response they belong to.
//!   Falls back to stderr when the directory is missing or not writable.
//! - **OpenTelemetry (feature `opentelemetry`)**: an OTLP span exporter is
//!   layered on when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use anyhow::Result;
use directories::ProjectDirs;
#[cfg(feature = "opentelemetry")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "opentelemetry")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "opentelemetry")]
use opentelemetry_sdk::{
    Resource,
    trace::{self as sdktrace, SdkTracerProvider},
};
use std::{io::stderr, path::Path, sync::Once};
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

const LOG_FILE_NAME: &str = "action_launcher.log";

/// Default filter directive used when `RUST_LOG` is not set.
pub fn default_filter(log_level: &str) -> String {
    format!("{log_level},action_launcher=debug")
}

/// Initializes the global subscriber. Later calls are no-ops.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

        if log_to_file
            && let Some(proj_dirs) = ProjectDirs::from("org", "ActionLauncher", "action_launcher")
            && let Some(file_appender) = file_appender(proj_dirs.cache_dir())
        {
            // Written synchronously, so every line is on disk before the
            // dispatcher writes the response that follows it.
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(layer().with_writer(file_appender).with_ansi(false));

            #[cfg(feature = "opentelemetry")]
            let subscriber = subscriber.with(init_otel());

            subscriber.init();
            return;
        }

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(false));

        #[cfg(feature = "opentelemetry")]
        let subscriber = subscriber.with(init_otel());

        subscriber.init();
    });

    Ok(())
}

#[cfg(feature = "opentelemetry")]
fn init_otel<S>() -> Option<tracing_opentelemetry::OpenTelemetryLayer<S, sdktrace::Tracer>>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(format!("{}/v1/traces", endpoint.trim_end_matches('/')))
        .build()
        .ok()?;

    let resource = Resource::builder()
        .with_service_name("action_launcher")
        .build();

    let provider = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build();

    let tracer = provider.tracer("action_launcher");

    Some(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Daily rolling appender in `log_dir`, or `None` when the directory is unusable.
fn file_appender(log_dir: &Path) -> Option<RollingFileAppender> {
    if !can_write_to(log_dir) {
        return None;
    }
    // tracing_appender::rolling::daily panics on permission errors.
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME)
    }))
    .ok()
}

/// Creates `dir` if needed and checks a file can be written there.
fn can_write_to(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }

    let probe = dir.join(".action_launcher_log_probe");
    match std::fs::write(&probe, "probe") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter("info"), "info,action_launcher=debug");
        assert_eq!(default_filter("trace"), "trace,action_launcher=debug");
    }

    #[test]
    fn test_can_write_to_creates_missing_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/logs");

        assert!(can_write_to(&nested));
        assert!(nested.is_dir());
        assert!(!nested.join(".action_launcher_log_probe").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_can_write_to_rejects_file_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not_a_dir");
        std::fs::write(&file, "x").unwrap();

        assert!(!can_write_to(&file.join("logs")));
    }

    #[test]
    fn test_file_events_are_on_disk_when_the_call_returns() {
        let dir = TempDir::new().unwrap();
        let appender = file_appender(dir.path()).unwrap();
        let subscriber = tracing_subscriber::registry()
            .with(layer().with_writer(appender).with_ansi(false));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("handler diagnostics before response");
        });

        let written: String = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_FILE_NAME))
            .map(|entry| std::fs::read_to_string(entry.path()).unwrap())
            .collect();
        assert!(written.contains("handler diagnostics before response"));
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging("info", false).unwrap();
        init_logging("debug", false).unwrap();
    }
}
