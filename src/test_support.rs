//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::rc::Rc;

use crate::report::{Reporter, SharedReporter};
use crate::runner::{CommandOutput, CommandRunner, RunnerError};
use crate::session::{RemoteTarget, Session, SessionError};

/// Host alias used by scripted sessions.
pub const TEST_HOST: &str = "lxd_doc-dev";

/// Container name matching [`TEST_HOST`].
pub const TEST_CONTAINER: &str = "doc-dev";

/// SSH config path that never exists, so no user overrides apply.
pub const MISSING_SSH_CONFIG: &str = "/nonexistent/lxdev/ssh_config";

/// Builds the target used by scripted sessions.
#[must_use]
pub fn test_target() -> RemoteTarget {
    RemoteTarget::new(TEST_HOST, TEST_CONTAINER, "ubuntu", MISSING_SSH_CONFIG)
}

/// Opens a session whose master start is answered immediately.
///
/// Call this before queueing responses for the commands under test; the
/// session consumes one more response when it is closed or dropped.
///
/// # Errors
///
/// Propagates any [`SessionError`] from [`Session::open`].
pub fn open_scripted_session(
    runner: &ScriptedRunner,
    reporter: SharedReporter,
) -> Result<Session<ScriptedRunner>, SessionError> {
    runner.push_success();
    Session::open("ssh", test_target(), runner.clone(), reporter)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the final argument, which carries the remote command for
    /// `ssh` invocations.
    #[must_use]
    pub fn last_arg(&self) -> Option<String> {
        self.args
            .last()
            .map(|arg| arg.to_string_lossy().into_owned())
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Returns the number of responses that have not been consumed yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.responses.borrow().len()
    }

    /// Pushes a successful exit status with no output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with the given stdout.
    pub fn push_stdout(&self, stdout: impl Into<Vec<u8>>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<Vec<u8>>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<Vec<u8>>,
        stderr: impl Into<Vec<u8>>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RunnerError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Severity recorded by [`RecordingReporter`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    /// Routine progress.
    Info,
    /// Highlighted progress.
    Highlight,
    /// Failure line.
    Error,
    /// Low-level detail.
    Trace,
}

/// Reporter that keeps every message for later assertions.
#[derive(Clone, Debug, Default)]
pub struct RecordingReporter {
    entries: Rc<RefCell<Vec<(Severity, String)>>>,
}

impl RecordingReporter {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle suitable for injecting into components while the
    /// recorder keeps access to the same log.
    #[must_use]
    pub fn shared(&self) -> SharedReporter {
        Rc::new(self.clone())
    }

    /// Returns all recorded entries in emission order.
    #[must_use]
    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.entries.borrow().clone()
    }

    /// Returns the messages recorded at `severity`.
    #[must_use]
    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .filter(|(level, _)| *level == severity)
            .map(|(_, message)| message.clone())
            .collect()
    }

    fn record(&self, severity: Severity, message: &str) {
        self.entries
            .borrow_mut()
            .push((severity, message.to_owned()));
    }
}

impl Reporter for RecordingReporter {
    fn info(&self, message: &str) {
        self.record(Severity::Info, message);
    }

    fn highlight(&self, message: &str) {
        self.record(Severity::Highlight, message);
    }

    fn error(&self, message: &str) {
        self.record(Severity::Error, message);
    }

    fn trace(&self, message: &str) {
        self.record(Severity::Trace, message);
    }
}
