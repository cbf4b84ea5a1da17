//! BDD scenarios for the container workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{WorkflowContext, workflow_context};

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Push then pull with delete round-trips the project files"
)]
fn scenario_round_trip(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Pulling without delete keeps local-only files"
)]
fn scenario_pull_keep(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "A stopped container is started before connecting"
)]
fn scenario_warm_up(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "An unknown container fails before connecting"
)]
fn scenario_unknown_container(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "A working directory outside home is rejected"
)]
fn scenario_outside_home(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}
