//! Shared fixtures for execution BDD scenarios.

use std::cell::RefCell;

use lxdev::session::Session;
use lxdev::test_support::{RecordingReporter, ScriptedRunner, open_scripted_session};
use lxdev::{ExecError, ExecutionResult, SessionError};
use rstest::fixture;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

/// Scripted transport plus whatever the scenario has observed so far.
#[derive(Default)]
pub struct ExecContext {
    pub runner: ScriptedRunner,
    pub reporter: RecordingReporter,
    pub stderr: RefCell<String>,
    pub result: RefCell<Option<Result<ExecutionResult, ExecError>>>,
    pub outputs_listing: RefCell<String>,
    pub clean_commands: RefCell<Vec<Vec<String>>>,
}

impl ExecContext {
    /// Opens a session, lets `script` queue responses, and runs `work`.
    ///
    /// The close response is queued after `script`, and the remote commands
    /// issued inside the session are returned alongside the work result.
    pub fn in_session<T>(
        &self,
        script: impl FnOnce(&ScriptedRunner),
        work: impl FnOnce(&Session<ScriptedRunner>) -> T,
    ) -> Result<(T, Vec<String>), StepError> {
        let before = self.runner.invocations().len();
        let session = open_scripted_session(&self.runner, self.reporter.shared())?;
        script(&self.runner);
        self.runner.push_success();
        let value = work(&session);
        session.close()?;

        let invocations = self.runner.invocations();
        let inner = invocations
            .get(before + 1..invocations.len().saturating_sub(1))
            .unwrap_or_default();
        let commands = inner
            .iter()
            .filter_map(lxdev::test_support::CommandInvocation::last_arg)
            .collect();
        Ok((value, commands))
    }
}

#[fixture]
pub fn exec_context() -> ExecContext {
    ExecContext::default()
}
