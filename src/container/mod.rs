//! LXD container lifecycle management.
//!
//! Before any SSH session is opened the target container has to be running.
//! [`ContainerManager`] shells out to `lxc` to list containers, start the
//! stopped ones, and give them a fixed settling interval so systemd and the
//! container network come up. The warm-up is best-effort: a failed start is
//! logged, and the subsequent SSH connection reports the real problem.

use std::ffi::OsString;
use std::thread::sleep;
use std::time::Duration;

use thiserror::Error;

use crate::config::LxdevConfig;
use crate::report::SharedReporter;
use crate::runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError};

/// State label printed by `lxc list` for a stopped container.
pub const STOPPED_STATE: &str = "STOPPED";

const ONE_SECOND: Duration = Duration::from_secs(1);

/// Derives the container name from an SSH hostname by removing `prefix`.
///
/// Hostnames without the prefix are used verbatim.
///
/// # Examples
///
/// ```
/// # use lxdev::container::container_name_from_host;
/// assert_eq!(container_name_from_host("lxd_doc-dev", "lxd_"), "doc-dev");
/// assert_eq!(container_name_from_host("doc-dev", "lxd_"), "doc-dev");
/// ```
#[must_use]
pub fn container_name_from_host(host: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return host.to_owned();
    }
    host.strip_prefix(prefix).unwrap_or(host).to_owned()
}

/// Errors returned by the container lifecycle manager.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ContainerError {
    /// Raised when `lxc info` reports that the container does not exist.
    #[error("invalid lxd container name inferred: {container}")]
    NotFound {
        /// Container name that was looked up.
        container: String,
    },
    /// Raised when `lxc` returns a non-zero exit status for a query.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed (typically `lxc`).
        program: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when `lxc` cannot be started.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Starts stopped containers and validates container names via `lxc`.
#[derive(Clone)]
pub struct ContainerManager<R: CommandRunner> {
    lxc_bin: String,
    settle_seconds: u64,
    tick: Duration,
    runner: R,
    reporter: SharedReporter,
}

impl ContainerManager<ProcessCommandRunner> {
    /// Creates a manager wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(config: &LxdevConfig, reporter: SharedReporter) -> Self {
        Self::new(config, ProcessCommandRunner, reporter)
    }
}

impl<R: CommandRunner> ContainerManager<R> {
    /// Creates a manager using the provided configuration and runner.
    #[must_use]
    pub fn new(config: &LxdevConfig, runner: R, reporter: SharedReporter) -> Self {
        Self {
            lxc_bin: config.lxc_bin.clone(),
            settle_seconds: config.settle_seconds,
            tick: ONE_SECOND,
            runner,
            reporter,
        }
    }

    /// Overrides the length of one countdown step.
    ///
    /// This is primarily used by tests to keep settle waits instant.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Starts every listed container named `container` that is stopped.
    ///
    /// When anything was started, blocks for the settling interval and
    /// reports a countdown. Returns how many start commands were issued.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError`] when `lxc list` cannot run or fails. Start
    /// failures are logged and do not raise.
    pub fn ensure_running(&self, container: &str) -> Result<usize, ContainerError> {
        let listing = self.run_lxc(&[OsString::from("list")], "list")?;
        let text = listing.stdout_lossy();

        let started = text
            .lines()
            .filter(|line| is_stopped_entry(line, container))
            .count();
        for _ in 0..started {
            self.reporter
                .info(&format!("{container} was off, starting up"));
            self.start(container);
        }

        if started > 0 {
            self.settle();
        }
        Ok(started)
    }

    /// Checks that `lxc info` knows about `container`.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] when `lxc` reports the container
    /// as missing, or [`ContainerError::Runner`] when `lxc` cannot start.
    pub fn ensure_exists(&self, container: &str) -> Result<(), ContainerError> {
        let args = [OsString::from("info"), OsString::from(container)];
        let output = self.runner.run(&self.lxc_bin, &args)?;
        let combined = format!("{}{}", output.stdout_lossy(), output.stderr_lossy());
        if reports_not_found(&combined) {
            self.reporter.error(&format!(
                "invalid lxd container name inferred: {container}"
            ));
            return Err(ContainerError::NotFound {
                container: container.to_owned(),
            });
        }
        Ok(())
    }

    fn start(&self, container: &str) {
        let args = [OsString::from("start"), OsString::from(container)];
        match self.runner.run(&self.lxc_bin, &args) {
            Ok(output) if output.is_success() => {}
            Ok(output) => self.reporter.error(&format!(
                "{} start {container} exited with status {}: {}",
                self.lxc_bin,
                output.status_text(),
                output.stderr_lossy().trim_end()
            )),
            Err(err) => self.reporter.error(&err.to_string()),
        }
    }

    fn settle(&self) {
        self.reporter.info("waiting...");
        for elapsed in 0..self.settle_seconds {
            sleep(self.tick);
            self.reporter
                .info(&(self.settle_seconds - elapsed).to_string());
        }
    }

    fn run_lxc(&self, args: &[OsString], action: &str) -> Result<CommandOutput, ContainerError> {
        let output = self.runner.run(&self.lxc_bin, args)?;
        if output.is_success() {
            return Ok(output);
        }

        Err(ContainerError::CommandFailure {
            program: self.lxc_bin.clone(),
            status: output.code,
            status_text: output.status_text(),
            stderr: format!("{action}: {}", output.stderr_lossy()),
        })
    }
}

/// Returns `true` when a listing line names `container` in a stopped state.
///
/// Both the default table layout (`| name | STOPPED | ...`) and plain
/// whitespace-separated rows are accepted.
fn is_stopped_entry(line: &str, container: &str) -> bool {
    let mut names_container = false;
    let mut stopped = false;
    for token in line
        .split(|ch: char| ch == '|' || ch.is_whitespace())
        .filter(|token| !token.is_empty())
    {
        names_container |= token == container;
        stopped |= token == STOPPED_STATE;
    }
    names_container && stopped
}

fn reports_not_found(output: &str) -> bool {
    output.lines().any(|line| {
        let lowered = line.to_lowercase();
        lowered.contains("error:") && lowered.contains("not found")
    })
}
