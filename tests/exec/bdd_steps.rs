//! BDD step definitions for remote execution and cleanup.

use camino::Utf8Path;
use lxdev::test_support::Severity;
use lxdev::{CommandBatch, ExecError, FailurePolicy, RemoteExecutor, clean};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{ExecContext, StepError};

fn run_batch(exec_context: &ExecContext, command: &str, policy: FailurePolicy) -> Result<(), StepError> {
    let stderr = format!("{}\n", exec_context.stderr.borrow());
    let executor = RemoteExecutor::new(exec_context.reporter.shared());
    let (result, _) = exec_context.in_session(
        |runner| runner.push_output(Some(1), "", stderr),
        |session| executor.execute(session, &CommandBatch::single(command), policy),
    )?;
    *exec_context.result.borrow_mut() = Some(result);
    Ok(())
}

#[given("the remote batch writes \"{line}\" to its error stream")]
fn batch_writes_stderr(exec_context: &ExecContext, line: String) {
    *exec_context.stderr.borrow_mut() = line;
}

#[given("the outputs directory holds \"{name}\"")]
fn outputs_hold(exec_context: &ExecContext, name: String) {
    *exec_context.outputs_listing.borrow_mut() = format!("{name}\n");
}

#[when("I execute \"{command}\"")]
fn execute(exec_context: &ExecContext, command: String) -> Result<(), StepError> {
    run_batch(exec_context, &command, FailurePolicy::Raise)
}

#[when("I execute \"{command}\" tolerating failures")]
fn execute_tolerating(exec_context: &ExecContext, command: String) -> Result<(), StepError> {
    run_batch(exec_context, &command, FailurePolicy::Tolerate)
}

#[when("I clean the container twice")]
fn clean_twice(exec_context: &ExecContext) -> Result<(), StepError> {
    let executor = RemoteExecutor::new(exec_context.reporter.shared());
    for _ in 0..2 {
        // The listing reflects what the previous run left behind.
        let listing = exec_context.outputs_listing.replace(String::new());
        let (summary, commands) = exec_context.in_session(
            |runner| {
                runner.push_stdout(listing.clone());
                if !listing.is_empty() {
                    runner.push_success();
                }
                runner.push_success();
            },
            |session| clean(&executor, session, Utf8Path::new("/home/ubuntu/Documents")),
        )?;
        summary?;
        exec_context.clean_commands.borrow_mut().push(commands);
    }
    Ok(())
}

#[then("the batch succeeds")]
fn batch_succeeds(exec_context: &ExecContext) -> Result<(), StepError> {
    match exec_context.result.borrow().as_ref() {
        Some(Ok(result)) if result.success => Ok(()),
        other => Err(StepError::Assertion(format!("expected success, got {other:?}"))),
    }
}

#[then("no error line was logged")]
fn no_error_logged(exec_context: &ExecContext) -> Result<(), StepError> {
    let errors = exec_context.reporter.messages(Severity::Error);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected errors {errors:?}")))
    }
}

#[then("the batch fails with \"{line}\"")]
fn batch_fails_with(exec_context: &ExecContext, line: String) -> Result<(), StepError> {
    match exec_context.result.borrow().as_ref() {
        Some(Err(ExecError::CommandFailed { error_lines, .. })) if error_lines.contains(&line) => {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected failure carrying {line}, got {other:?}"
        ))),
    }
}

#[then("the result reports failure with {count} error line")]
fn result_reports_failure(exec_context: &ExecContext, count: usize) -> Result<(), StepError> {
    match exec_context.result.borrow().as_ref() {
        Some(Ok(result)) if !result.success && result.error_lines.len() == count => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a tolerated failure, got {other:?}"
        ))),
    }
}

#[then("only the first clean removed files")]
fn only_first_removed(exec_context: &ExecContext) -> Result<(), StepError> {
    let runs = exec_context.clean_commands.borrow();
    let removals: Vec<usize> = runs
        .iter()
        .map(|commands| commands.iter().filter(|command| command.starts_with("rm ")).count())
        .collect();
    if removals == [1, 0] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("removals per run: {removals:?}")))
    }
}
