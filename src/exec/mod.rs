//! Remote command batches and output classification.
//!
//! A [`CommandBatch`] is joined with `&&` and sent as one command over an open
//! [`Session`], so later commands only run when earlier ones succeed. The
//! verdict is derived from the error stream rather than the exit status: many
//! build tools (LaTeX in particular) print progress and warnings on stderr, so
//! lines carrying a [`BENIGN_MARKERS`] entry are informational and every other
//! stderr line fails the batch.

use thiserror::Error;

use crate::report::SharedReporter;
use crate::runner::CommandRunner;
use crate::session::{Session, SessionError};

/// Substrings that mark an error-stream line as informational.
pub const BENIGN_MARKERS: &[&str] = &["WARNING", "Latexmk: Run number"];

const COMMAND_SEPARATOR: &str = " && ";

/// Ordered shell commands executed in one round trip.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandBatch {
    commands: Vec<String>,
}

impl CommandBatch {
    /// Creates a batch from an ordered list of commands.
    #[must_use]
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a batch holding one command.
    #[must_use]
    pub fn single(command: impl Into<String>) -> Self {
        Self {
            commands: vec![command.into()],
        }
    }

    /// Appends `command`, which only runs if everything before it succeeds.
    #[must_use]
    pub fn then(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Appends every command of `other`.
    #[must_use]
    pub fn chain(mut self, other: Self) -> Self {
        self.commands.extend(other.commands);
        self
    }

    /// Returns the individual commands.
    #[must_use]
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Returns `true` when the batch holds no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Joins the commands into one short-circuiting shell command.
    #[must_use]
    pub fn compound(&self) -> String {
        self.commands.join(COMMAND_SEPARATOR)
    }
}

impl From<&str> for CommandBatch {
    fn from(command: &str) -> Self {
        Self::single(command)
    }
}

impl From<String> for CommandBatch {
    fn from(command: String) -> Self {
        Self::single(command)
    }
}

impl From<Vec<String>> for CommandBatch {
    fn from(commands: Vec<String>) -> Self {
        Self { commands }
    }
}

/// What to do when a batch is classified as failed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FailurePolicy {
    /// Return [`ExecError::CommandFailed`].
    #[default]
    Raise,
    /// Return the result with `success == false`.
    Tolerate,
}

/// Outcome of one batch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecutionResult {
    /// Standard output lines in order, newline-stripped.
    pub lines: Vec<String>,
    /// `false` when any non-benign error-stream line was seen.
    pub success: bool,
    /// Every error-stream line in order, benign ones included.
    pub error_lines: Vec<String>,
    /// Exit status of the compound command, when reported.
    pub exit_code: Option<i32>,
}

/// Errors returned by [`RemoteExecutor::execute`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// The batch wrote non-benign lines to its error stream.
    #[error("remote command failed: {command}: {}", .error_lines.join("; "))]
    CommandFailed {
        /// Compound command that was executed.
        command: String,
        /// Error-stream lines captured from the batch.
        error_lines: Vec<String>,
    },
    /// Raised when asked to execute a batch without commands.
    #[error("refusing to execute an empty command batch")]
    EmptyBatch,
    /// Raised when the transport fails.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Runs command batches over a session and classifies their output.
#[derive(Clone)]
pub struct RemoteExecutor {
    reporter: SharedReporter,
}

impl RemoteExecutor {
    /// Creates an executor reporting through `reporter`.
    #[must_use]
    pub const fn new(reporter: SharedReporter) -> Self {
        Self { reporter }
    }

    /// Executes `batch` and waits for it to finish.
    ///
    /// Error-stream lines without a benign marker are logged as errors and
    /// fail the batch. Output that is not valid UTF-8 is logged and the
    /// decodable prefix is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::CommandFailed`] when the batch failed and
    /// `policy` is [`FailurePolicy::Raise`], [`ExecError::EmptyBatch`] for an
    /// empty batch, or [`ExecError::Session`] for transport failures.
    pub fn execute<R: CommandRunner>(
        &self,
        session: &Session<R>,
        batch: &CommandBatch,
        policy: FailurePolicy,
    ) -> Result<ExecutionResult, ExecError> {
        if batch.is_empty() {
            return Err(ExecError::EmptyBatch);
        }
        let command = batch.compound();
        self.reporter.highlight(&format!(
            "{}@{} $ {command}",
            session.params().user,
            session.target().host()
        ));

        let output = session.run(&command)?;

        let mut success = true;
        let mut error_lines = Vec::new();
        for line in output.stderr_lossy().lines() {
            if is_benign(line) {
                self.reporter.info(line);
            } else {
                success = false;
                self.reporter.error(line);
            }
            error_lines.push(line.to_owned());
        }

        self.reporter.trace(&format!("INPUT: {command}"));
        let lines = match output.stdout_text() {
            Ok(text) => text.lines().map(str::to_owned).collect(),
            Err(err) => {
                self.reporter.error(&format!("INPUT: {command}"));
                self.reporter.error(&format!(
                    "failed to decode remote output as UTF-8 after {} bytes",
                    err.valid_up_to()
                ));
                complete_lines(output.stdout.get(..err.valid_up_to()).unwrap_or_default())
            }
        };
        for line in &lines {
            self.reporter.info(line);
        }

        if !success && policy == FailurePolicy::Raise {
            return Err(ExecError::CommandFailed {
                command,
                error_lines,
            });
        }

        Ok(ExecutionResult {
            lines,
            success,
            error_lines,
            exit_code: output.code,
        })
    }
}

/// Returns `true` for error-stream lines that must not fail a batch.
///
/// Only marker lines qualify; a blank line still fails the batch.
#[must_use]
pub fn is_benign(line: &str) -> bool {
    BENIGN_MARKERS.iter().any(|marker| line.contains(marker))
}

fn complete_lines(bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    text.rsplit_once('\n')
        .map(|(complete, _)| complete.lines().map(str::to_owned).collect())
        .unwrap_or_default()
}
