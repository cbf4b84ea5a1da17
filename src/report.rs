//! Injected progress reporting.
//!
//! Components never log through a global handle; they receive a
//! [`SharedReporter`] at construction time. [`TracingReporter`] forwards to
//! `tracing`, and [`init_tracing`] installs the stderr subscriber used by the
//! binary.

use std::rc::Rc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the `tracing` filter directive.
pub const LOG_FILTER_ENV: &str = "LXDEV_LOG";

const GREEN: &str = "\u{1b}[32m";
const RESET: &str = "\u{1b}[0m";

/// Severity-aware sink for user-facing progress messages.
pub trait Reporter {
    /// Reports routine progress.
    fn info(&self, message: &str);
    /// Reports a notable step, such as an echoed command.
    fn highlight(&self, message: &str);
    /// Reports a failure line.
    fn error(&self, message: &str);
    /// Reports low-level detail, hidden by default.
    fn trace(&self, message: &str);
}

/// Reporter handle shared between the components of one run.
pub type SharedReporter = Rc<dyn Reporter>;

/// Formatting applied to highlighted messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReportStyle {
    /// Highlights are wrapped in ANSI colour codes.
    Coloured,
    /// Highlights are emitted verbatim.
    Plain,
}

impl ReportStyle {
    /// Picks the style matching a colour toggle.
    #[must_use]
    pub const fn from_colour(colour: bool) -> Self {
        if colour { Self::Coloured } else { Self::Plain }
    }

    /// Applies the style to `message`.
    #[must_use]
    pub fn paint(self, message: &str) -> String {
        match self {
            Self::Coloured => format!("{GREEN}{message}{RESET}"),
            Self::Plain => message.to_owned(),
        }
    }
}

/// Reporter that emits `tracing` events.
#[derive(Clone, Copy, Debug)]
pub struct TracingReporter {
    style: ReportStyle,
}

impl TracingReporter {
    /// Creates a reporter using the given highlight style.
    #[must_use]
    pub const fn new(style: ReportStyle) -> Self {
        Self { style }
    }

    /// Wraps the reporter in a [`SharedReporter`].
    #[must_use]
    pub fn shared(self) -> SharedReporter {
        Rc::new(self)
    }
}

impl Reporter for TracingReporter {
    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn highlight(&self, message: &str) {
        tracing::info!("{}", self.style.paint(message));
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }

    fn trace(&self, message: &str) {
        tracing::trace!("{message}");
    }
}

/// Errors raised while installing the log subscriber.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Raised when a global subscriber was already installed.
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Installs a stderr `tracing` subscriber filtered by [`LOG_FILTER_ENV`].
///
/// The filter defaults to `info` when the variable is unset or invalid.
///
/// # Errors
///
/// Returns [`ReportError::Install`] when a subscriber is already set.
pub fn init_tracing(colour: bool) -> Result<(), ReportError> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(colour)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| ReportError::Install(err.to_string()))
}
