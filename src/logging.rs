//! Logging setup
//!
//! Console output goes to stderr as `! message` lines so it stays apart from the
//! form. A full debug log is appended to `debug.log` in the configuration
//! directory. `SQLSHELL_LOG` overrides the console filter with an
//! `EnvFilter` directive.
use crate::config::get_config_directory;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{Event, Subscriber, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_ENV_VAR: &str = "SQLSHELL_LOG";
const LOG_FILE_NAME: &str = "debug.log";

/// Keeps the file writer flushing until dropped
#[must_use]
pub struct LoggingGuard {
    log_file: Option<PathBuf>,
    _worker: Option<WorkerGuard>,
}

impl LoggingGuard {
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// Console lines: `! message`
struct BangFormat;

impl<S, N> FormatEvent<S, N> for BangFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "! ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Console filter for a `-v` count
fn console_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "sqlshell=info",
        1 => "sqlshell=debug",
        _ => "trace",
    }
}

fn console_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| console_directive(verbosity).into())
}

/// Install the global subscriber. Safe to call more than once; later calls only
/// return an empty guard.
pub fn init(verbosity: u8) -> LoggingGuard {
    let log_dir = get_config_directory();
    let file_writer = log_dir.as_deref().and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
        Some(tracing_appender::non_blocking(appender))
    });

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .event_format(BangFormat)
        .with_filter(console_filter(verbosity));

    let (file_layer, worker) = match file_writer {
        Some((writer, worker)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(EnvFilter::new("sqlshell=debug")),
            ),
            Some(worker),
        ),
        None => (None, None),
    };
    let has_file = file_layer.is_some();

    let installed = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .is_ok();

    if !installed {
        return LoggingGuard {
            log_file: None,
            _worker: None,
        };
    }
    if !has_file {
        warn!("Could not open {LOG_FILE_NAME}; logging to the console only");
    }

    LoggingGuard {
        log_file: log_dir
            .filter(|_| has_file)
            .map(|dir| dir.join(LOG_FILE_NAME)),
        _worker: worker,
    }
}
