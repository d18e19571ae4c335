use gpfixture_config::Environment;
use std::io::Error;
use std::io::Write;
use std::sync::RwLock;
use std::{
    backtrace::{Backtrace, BacktraceStatus},
    panic::PanicHookInfo,
    sync::Once,
};
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, InitError},
};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

/// JSON field carrying the name of the scenario a log line belongs to.
const SCENARIO_KEY_IN_LOG: &str = "scenario";

/// Errors that can occur during tracing initialization.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("an io error occurred: {0}")]
    Io(#[from] Error),
}

/// Keeps buffered file logs alive until the harness exits.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static INIT_TEST_TRACING: Once = Once::new();

/// Initializes tracing for tests when `ENABLE_TRACING` is set:
///
/// ```bash
/// ENABLE_TRACING=1 cargo test -p gpfixture wait_till
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            // Without an explicit environment we would default to prod and log to files.
            Environment::Dev.set();
            let _log_flusher =
                init_tracing("test").expect("Failed to initialize tracing for tests");
        }
    });
}

/// Scenario currently driving the harness, if any.
///
/// Unlike process-wide identifiers this changes between scenarios of one run,
/// hence a lock rather than a once-cell.
static SCENARIO: RwLock<Option<String>> = RwLock::new(None);

/// Tags every following JSON log line with `scenario`.
pub fn set_global_scenario(scenario: impl Into<String>) {
    if let Ok(mut current) = SCENARIO.write() {
        *current = Some(scenario.into());
    }
}

/// Stops tagging log lines with a scenario.
pub fn clear_global_scenario() {
    if let Ok(mut current) = SCENARIO.write() {
        *current = None;
    }
}

/// Returns the scenario currently tagged onto log lines.
pub fn get_global_scenario() -> Option<String> {
    SCENARIO.read().ok().and_then(|current| current.clone())
}

/// Adds the `scenario` field to one JSON log line.
///
/// Returns `None` when the line is not a JSON object or already has the field,
/// in which case it should be written unchanged.
fn inject_scenario(line: &str, scenario: &str) -> Option<String> {
    let serde_json::Value::Object(mut map) = serde_json::from_str(line).ok()? else {
        return None;
    };
    if map.contains_key(SCENARIO_KEY_IN_LOG) {
        return None;
    }

    map.insert(
        SCENARIO_KEY_IN_LOG.to_owned(),
        serde_json::Value::String(scenario.to_owned()),
    );
    let injected = serde_json::to_string(&map).ok()?;

    if line.ends_with('\n') {
        Some(format!("{injected}\n"))
    } else {
        Some(injected)
    }
}

/// Writer wrapper adding the current scenario to JSON log lines.
struct ScenarioInjectingWriter<W> {
    inner: W,
}

impl<W> ScenarioInjectingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W> Write for ScenarioInjectingWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let injected = get_global_scenario().and_then(|scenario| {
            std::str::from_utf8(buf)
                .ok()
                .and_then(|line| inject_scenario(line, &scenario))
        });

        match injected {
            // Report the original length so the formatter does not retry.
            Some(line) => self.inner.write_all(line.as_bytes()).map(|_| buf.len()),
            None => self.inner.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Initializes tracing for a harness binary.
///
/// Prod and staging write JSON to daily-rolling files under `logs/`,
/// dev writes pretty output to the terminal.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    // Route `log` records from dependencies into the subscriber.
    LogTracer::init()?;

    let is_prod = Environment::load()?.is_prod();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_flusher = if is_prod {
        configure_prod_tracing(filter, app_name)?
    } else {
        configure_dev_tracing(filter)?
    };

    set_tracing_panic_hook();

    Ok(log_flusher)
}

fn configure_prod_tracing(filter: EnvFilter, app_name: &str) -> Result<LogFlusher, TracingError> {
    let file_appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(5)
        .build("logs")?;

    let (file_appender, guard) = tracing_appender::non_blocking(file_appender);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .event_format(format)
            .with_writer(move || ScenarioInjectingWriter::new(file_appender.make_writer()))
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    set_global_default(subscriber)?;

    Ok(LogFlusher::Flusher(guard))
}

fn configure_dev_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}

/// Sends panics through `tracing` before running the previous hook, so a
/// failing fixture step shows up in the scenario's log file.
fn set_tracing_panic_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        panic_hook(info);
        prev_hook(info);
    }));
}

fn panic_hook(panic_info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (
            None,
            Some("run with RUST_BACKTRACE=1 to display backtraces"),
        ),
        BacktraceStatus::Unsupported => {
            (None, Some("backtraces are not supported on this platform"))
        }
        _ => (None, Some("backtrace status is unknown")),
    };

    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    };

    let location = panic_info.location().map(|location| location.to_string());

    tracing::error!(
        panic.payload = payload,
        payload.location = location,
        panic.backtrace = backtrace.map(tracing::field::display),
        panic.note = note,
        scenario = get_global_scenario(),
        "a panic occurred",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_is_injected_into_json_lines() {
        let line = "{\"level\":\"INFO\",\"fields\":{\"message\":\"polling\"}}\n";
        let injected = inject_scenario(line, "gprecoverseg full").unwrap();

        assert!(injected.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(injected.trim_end()).unwrap();
        assert_eq!(value["scenario"], "gprecoverseg full");
        assert_eq!(value["level"], "INFO");
    }

    #[test]
    fn non_json_and_tagged_lines_are_left_alone() {
        assert!(inject_scenario("plain text", "s1").is_none());
        assert!(inject_scenario("{\"scenario\":\"other\"}", "s1").is_none());
    }

    #[test]
    fn writer_passes_through_without_scenario() {
        clear_global_scenario();

        let mut out = Vec::new();
        let mut writer = ScenarioInjectingWriter::new(&mut out);
        let written = writer.write(b"{\"a\":1}").unwrap();

        assert_eq!(written, 7);
        assert_eq!(out, b"{\"a\":1}");
    }
}
