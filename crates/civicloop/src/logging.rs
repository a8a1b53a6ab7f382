//! Logging setup for the civicloop binary.
//!
//! Logs go to stderr so command output on stdout stays pipeable. One-shot
//! commands get compact lines; the daemon gets timestamps and targets since
//! its log is read after the fact.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates on the HTTP push path whose warnings should reach the log.
const HTTP_STACK: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls"];

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Info and above.
    #[default]
    Normal,
    /// Debug and above.
    Verbose,
    /// Everything, including HTTP stack debug output.
    Trace,
}

impl Verbosity {
    /// Map `-q` and the `-v` count to a verbosity. `-q` wins.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// Level applied to civicloop's own events.
    fn directive(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "info",
            Self::Verbose => "debug",
            Self::Trace => "trace",
        }
    }
}

/// How log lines are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogStyle {
    /// Short-lived command: no timestamps, no targets.
    #[default]
    Command,
    /// Long-running background sync: timestamps and targets.
    Daemon,
}

/// Filter used when `RUST_LOG` is unset.
#[must_use]
pub fn default_directives(verbosity: Verbosity) -> String {
    let http_level = if verbosity == Verbosity::Trace {
        "debug"
    } else {
        "warn"
    };

    let mut directives = vec![format!("civicloop={}", verbosity.directive())];
    directives.extend(HTTP_STACK.iter().map(|krate| format!("{krate}={http_level}")));
    directives.join(",")
}

/// Install the stderr subscriber. `RUST_LOG` takes precedence over
/// `verbosity`; a second call is a no-op.
///
/// ```no_run
/// use civicloop::logging::{init_logging, LogStyle, Verbosity};
///
/// init_logging(Verbosity::Verbose, LogStyle::Daemon);
/// ```
pub fn init_logging(verbosity: Verbosity, style: LogStyle) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));

    let (compact, full) = match style {
        LogStyle::Command => (
            Some(
                fmt::layer()
                    .compact()
                    .without_time()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            ),
            None,
        ),
        LogStyle::Daemon => (
            None,
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(compact)
        .with(full)
        .try_init();
}

/// Initialize logging for tests.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
