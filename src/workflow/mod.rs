//! Orchestration of the user-facing tasks.
//!
//! Every task that touches a container follows the same order: check the
//! local preconditions, confirm the container exists, warm it up once, then
//! open a scoped session for the actual work. Nothing connects until the
//! preconditions hold.

use std::cell::RefCell;
use std::collections::HashSet;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;

use crate::cleanup::{self, CleanupSummary};
use crate::config::LxdevConfig;
use crate::container::{ContainerError, ContainerManager, container_name_from_host};
use crate::exec::{CommandBatch, ExecError, ExecutionResult, FailurePolicy, RemoteExecutor};
use crate::report::SharedReporter;
use crate::runner::{CommandRunner, ProcessCommandRunner};
use crate::session::{RemoteTarget, Session, SessionError, with_session};
use crate::sync::{OUTPUTS_DIR, SyncError, SyncSpec, Synchronizer};
use crate::util::home_dir;

/// Errors surfaced by [`Workflow`] tasks.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WorkflowError {
    /// The working directory is not inside the home directory.
    #[error("{cwd} is outside {home}; lxdev only works on folders within your home directory")]
    OutsideHome {
        /// Current working directory.
        cwd: Utf8PathBuf,
        /// Home directory of the invoking user.
        home: Utf8PathBuf,
    },
    /// `HOME` is unset or not valid UTF-8.
    #[error("cannot determine the home directory; set HOME")]
    MissingHome,
    /// Local filesystem access failed.
    #[error("local I/O failed: {message}")]
    Io {
        /// Description of the failure.
        message: String,
    },
    /// Container lookup or warm-up failed.
    #[error(transparent)]
    Container(#[from] ContainerError),
    /// The SSH session failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// A remote command failed.
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// A transfer failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// The directory a task was invoked from, relative to the user's home.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkingLocation {
    cwd: Utf8PathBuf,
    home: Utf8PathBuf,
}

impl WorkingLocation {
    /// Creates a location from explicit paths.
    #[must_use]
    pub fn new(cwd: impl Into<Utf8PathBuf>, home: impl Into<Utf8PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            home: home.into(),
        }
    }

    /// Reads the process working directory and `HOME`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::MissingHome`] or [`WorkflowError::Io`] when
    /// either path is unavailable or not UTF-8.
    pub fn from_env() -> Result<Self, WorkflowError> {
        let home = home_dir().ok_or(WorkflowError::MissingHome)?;
        let raw_cwd = std::env::current_dir().map_err(|err| WorkflowError::Io {
            message: err.to_string(),
        })?;
        let cwd = Utf8PathBuf::from_path_buf(raw_cwd).map_err(|path| WorkflowError::Io {
            message: format!("working directory is not valid UTF-8: {}", path.display()),
        })?;
        Ok(Self { cwd, home })
    }

    /// Returns the working directory.
    #[must_use]
    pub fn cwd(&self) -> &Utf8Path {
        &self.cwd
    }

    /// Returns the home directory.
    #[must_use]
    pub fn home(&self) -> &Utf8Path {
        &self.home
    }

    /// Returns the working directory relative to the home directory.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::OutsideHome`] when the working directory is
    /// not inside the home tree.
    pub fn relative(&self) -> Result<&Utf8Path, WorkflowError> {
        self.cwd
            .strip_prefix(&self.home)
            .map_err(|_| WorkflowError::OutsideHome {
                cwd: self.cwd.clone(),
                home: self.home.clone(),
            })
    }
}

/// Wires configuration, runner and reporter into the CLI tasks.
pub struct Workflow<R: CommandRunner + Clone> {
    config: LxdevConfig,
    location: WorkingLocation,
    runner: R,
    reporter: SharedReporter,
    containers: ContainerManager<R>,
    warmed: RefCell<HashSet<String>>,
}

impl Workflow<ProcessCommandRunner> {
    /// Creates a workflow that spawns real processes.
    #[must_use]
    pub fn with_process_runner(
        config: LxdevConfig,
        location: WorkingLocation,
        reporter: SharedReporter,
    ) -> Self {
        Self::new(config, location, ProcessCommandRunner, reporter)
    }
}

impl<R: CommandRunner + Clone> Workflow<R> {
    /// Creates a workflow using `runner` for every external command.
    #[must_use]
    pub fn new(
        config: LxdevConfig,
        location: WorkingLocation,
        runner: R,
        reporter: SharedReporter,
    ) -> Self {
        let containers = ContainerManager::new(&config, runner.clone(), reporter.clone());
        Self {
            config,
            location,
            runner,
            reporter,
            containers,
            warmed: RefCell::new(HashSet::new()),
        }
    }

    /// Overrides the length of one settling countdown step.
    #[must_use]
    pub fn with_settle_tick(mut self, tick: Duration) -> Self {
        self.containers = self.containers.with_tick(tick);
        self
    }

    /// Returns the remote directory mirroring the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::OutsideHome`] when the working directory is
    /// not inside the home tree.
    pub fn remote_dir(&self) -> Result<Utf8PathBuf, WorkflowError> {
        let relative = self.location.relative()?;
        Ok(self.config.remote_root_path().join(relative))
    }

    /// Copies the working directory and its `Outputs` folder into the
    /// container. A missing local `Outputs` folder is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when a precondition, the session or a
    /// transfer fails.
    pub fn push(&self, host: &str, delete: bool) -> Result<(), WorkflowError> {
        let remote_dir = self.remote_dir()?;
        let local_outputs = self.location.cwd().join(OUTPUTS_DIR);
        let mut transfers = vec![SyncSpec::push(self.location.cwd(), &remote_dir, delete)];
        if local_outputs.is_dir() {
            transfers.push(SyncSpec::push(local_outputs, self.outputs_dir(), delete));
        } else {
            self.reporter
                .trace(&format!("no local {OUTPUTS_DIR} folder; skipping"));
        }
        self.transfer(host, &transfers)
    }

    /// Copies the container's copy of the working directory and the shared
    /// `Outputs` folder back to the host.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when a precondition, the session or a
    /// transfer fails.
    pub fn pull(&self, host: &str, delete: bool) -> Result<(), WorkflowError> {
        let remote_dir = self.remote_dir()?;
        let local_outputs = self.location.cwd().join(OUTPUTS_DIR);
        let tree = SyncSpec::pull(self.location.cwd(), &remote_dir, delete);
        let outputs = SyncSpec::pull(&local_outputs, self.outputs_dir(), delete);
        self.within(host, |session| {
            let synchronizer = self.synchronizer();
            synchronizer.sync(session, &tree)?;
            std::fs::create_dir_all(&local_outputs).map_err(|err| WorkflowError::Io {
                message: format!("failed to create {local_outputs}: {err}"),
            })?;
            synchronizer.sync(session, &outputs)?;
            Ok(())
        })
    }

    /// Returns the remote working directory after checking the container is
    /// reachable.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when a precondition or the session fails.
    pub fn remote_working_directory(&self, host: &str) -> Result<Utf8PathBuf, WorkflowError> {
        let remote_dir = self.remote_dir()?;
        self.within(host, |_| Ok(()))?;
        Ok(remote_dir)
    }

    /// Runs `commands` inside the remote working directory.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Exec`] when the batch fails under
    /// [`FailurePolicy::Raise`], or another [`WorkflowError`] when a
    /// precondition or the session fails.
    pub fn exec(
        &self,
        host: &str,
        commands: CommandBatch,
        policy: FailurePolicy,
    ) -> Result<ExecutionResult, WorkflowError> {
        let remote_dir = self.remote_dir()?;
        let cd = format!("cd {}", escape(remote_dir.as_str().into()));
        let batch = CommandBatch::single(cd).chain(commands);
        self.within(host, |session| {
            Ok(self.executor().execute(session, &batch, policy)?)
        })
    }

    /// Empties the container's scratch directories.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when the container check, the session or a
    /// removal fails.
    pub fn clean(&self, host: &str) -> Result<CleanupSummary, WorkflowError> {
        let remote_root = self.config.remote_root_path();
        self.within(host, |session| {
            Ok(cleanup::clean(&self.executor(), session, &remote_root)?)
        })
    }

    fn transfer(&self, host: &str, transfers: &[SyncSpec]) -> Result<(), WorkflowError> {
        self.within(host, |session| {
            let synchronizer = self.synchronizer();
            for spec in transfers {
                synchronizer.sync(session, spec)?;
            }
            Ok(())
        })
    }

    fn within<T>(
        &self,
        host: &str,
        work: impl FnOnce(&Session<R>) -> Result<T, WorkflowError>,
    ) -> Result<T, WorkflowError> {
        let target = self.prepare(host)?;
        with_session(
            &self.config.ssh_bin,
            target,
            self.runner.clone(),
            self.reporter.clone(),
            work,
        )
    }

    fn prepare(&self, host: &str) -> Result<RemoteTarget, WorkflowError> {
        let container = container_name_from_host(host, &self.config.host_prefix);
        self.containers.ensure_exists(&container)?;
        if !self.warmed.borrow().contains(host) {
            self.containers.ensure_running(&container)?;
            self.warmed.borrow_mut().insert(host.to_owned());
        }
        Ok(RemoteTarget::new(
            host,
            container,
            self.config.remote_user.clone(),
            self.config.expanded_ssh_config_path(),
        ))
    }

    fn outputs_dir(&self) -> Utf8PathBuf {
        self.config.remote_root_path().join(OUTPUTS_DIR)
    }

    fn executor(&self) -> RemoteExecutor {
        RemoteExecutor::new(self.reporter.clone())
    }

    fn synchronizer(&self) -> Synchronizer<R> {
        Synchronizer::new(&self.config, self.runner.clone(), self.reporter.clone())
    }
}
