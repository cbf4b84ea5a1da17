//! BDD step definitions for the container workflow.

use std::fs::remove_dir_all;

use camino::Utf8PathBuf;
use lxdev::test_support::Severity;
use lxdev::{ContainerError, WorkflowError};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{StepError, WorkflowContext, file_set, write_file};

fn deletes(mode: &str) -> Result<bool, StepError> {
    match mode {
        "delete" => Ok(true),
        "keep" => Ok(false),
        other => Err(StepError::Assertion(format!("unknown sync mode {other}"))),
    }
}

#[given("a project containing \"{first}\" and \"{second}\"")]
fn project_with_files(
    workflow_context: &WorkflowContext,
    first: String,
    second: String,
) -> Result<(), StepError> {
    for name in [first, second] {
        write_file(
            &workflow_context.project.join(&name),
            &format!("contents of {name}\n"),
        )?;
    }
    Ok(())
}

#[given("the container is stopped")]
fn container_stopped(workflow_context: &WorkflowContext) {
    workflow_context.container.set_stopped(true);
}

#[given("the container does not exist")]
fn container_missing(workflow_context: &WorkflowContext) {
    workflow_context.container.set_exists(false);
}

#[given("the working directory is outside the home directory")]
fn outside_home(workflow_context: &WorkflowContext) {
    *workflow_context.cwd.borrow_mut() = Utf8PathBuf::from("/srv/lxdev-elsewhere");
}

#[when("I push the project with \"{mode}\"")]
fn push_project(workflow_context: &WorkflowContext, mode: String) -> Result<(), StepError> {
    let delete = deletes(&mode)?;
    let outcome = workflow_context
        .workflow()
        .push(&workflow_context.host(), delete);
    workflow_context.record(outcome);
    Ok(())
}

#[when("I pull the project with \"{mode}\"")]
fn pull_project(workflow_context: &WorkflowContext, mode: String) -> Result<(), StepError> {
    let delete = deletes(&mode)?;
    let outcome = workflow_context
        .workflow()
        .pull(&workflow_context.host(), delete);
    workflow_context.record(outcome);
    Ok(())
}

#[when("the local project is replaced by \"{name}\"")]
fn replace_local_project(workflow_context: &WorkflowContext, name: String) -> Result<(), StepError> {
    remove_dir_all(&workflow_context.project)?;
    write_file(&workflow_context.project.join(name), "scratch\n")
}

#[then("the local project holds exactly \"{expected}\"")]
fn local_project_holds(workflow_context: &WorkflowContext, expected: String) -> Result<(), StepError> {
    if let Some(Err(err)) = workflow_context.outcome.borrow().as_ref() {
        return Err(StepError::Assertion(format!("last task failed: {err}")));
    }
    let actual = file_set(&workflow_context.project)?;
    let wanted: Vec<String> = expected.split(", ").map(str::to_owned).collect();
    if actual == wanted {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {wanted:?}, found {actual:?}"
        )))
    }
}

#[then("the container holds \"{name}\" in the remote working directory")]
fn container_holds(workflow_context: &WorkflowContext, name: String) -> Result<(), StepError> {
    let remote_dir = workflow_context.workflow().remote_dir()?;
    let backing = workflow_context
        .container
        .host_path(remote_dir.join(&name).as_str());
    if backing.is_file() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{name} missing at {backing}")))
    }
}

#[then("the container was started exactly once")]
fn started_once(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    let starts = workflow_context
        .container
        .commands()
        .iter()
        .filter(|command| command.as_str() == "lxc start doc-dev")
        .count();
    if starts == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected one start, saw {starts}")))
    }
}

#[then("the settle countdown was reported")]
fn countdown_reported(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    let info = workflow_context.reporter.messages(Severity::Info);
    let expected = ["doc-dev was off, starting up", "waiting...", "5", "4", "3", "2", "1"];
    let found = info
        .windows(expected.len())
        .any(|window| window.iter().zip(expected).all(|(line, want)| line == want));
    if found {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("countdown missing from {info:?}")))
    }
}

#[then("the task fails because the container is missing")]
fn fails_missing_container(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    match workflow_context.outcome.borrow().as_ref() {
        Some(Err(WorkflowError::Container(ContainerError::NotFound { container })))
            if container == "doc-dev" =>
        {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected a missing container, got {other:?}"
        ))),
    }
}

#[then("the task fails because the directory is outside home")]
fn fails_outside_home(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    match workflow_context.outcome.borrow().as_ref() {
        Some(Err(WorkflowError::OutsideHome { .. })) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected an outside-home failure, got {other:?}"
        ))),
    }
}

#[then("no SSH command was issued")]
fn no_ssh(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    let commands = workflow_context.container.commands();
    if commands.iter().any(|command| command.starts_with("ssh ")) {
        return Err(StepError::Assertion(format!("unexpected ssh in {commands:?}")));
    }
    Ok(())
}

#[then("no external command was issued")]
fn no_commands(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    let commands = workflow_context.container.commands();
    if commands.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected commands {commands:?}")))
    }
}
