//! Core library for the lxdev container workflow tool.
//!
//! The crate mirrors a project directory from the host into an LXD container,
//! runs build commands there over SSH, and copies results back. External
//! programs (`lxc`, `ssh`, `rsync`) are driven through the
//! [`runner::CommandRunner`] seam so every component can be exercised with
//! scripted outputs.

pub mod cleanup;
pub mod config;
pub mod container;
pub mod exec;
pub mod report;
pub mod runner;
pub mod session;
pub mod sync;
pub mod test_support;
pub mod util;
pub mod workflow;

pub use cleanup::{CleanupSummary, SCRATCH_DIRS, clean};
pub use config::{ConfigError, LxdevConfig};
pub use container::{ContainerError, ContainerManager, container_name_from_host};
pub use exec::{
    BENIGN_MARKERS, CommandBatch, ExecError, ExecutionResult, FailurePolicy, RemoteExecutor,
};
pub use report::{
    LOG_FILTER_ENV, ReportError, ReportStyle, Reporter, SharedReporter, TracingReporter,
    init_tracing,
};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError};
pub use session::{ConnectionParams, RemoteTarget, Session, SessionError, with_session};
pub use sync::{Direction, OUTPUTS_DIR, SyncError, SyncSpec, Synchronizer};
pub use workflow::{WorkflowError, WorkingLocation, Workflow};
