//! Directory synchronisation between the host and a container.
//!
//! Transfers run `rsync` locally with a remote-shell helper that enters the
//! container through `lxc exec`. The session is only used to prepare remote
//! directories before a push.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;

use crate::config::LxdevConfig;
use crate::exec::{CommandBatch, ExecError, FailurePolicy, RemoteExecutor};
use crate::report::SharedReporter;
use crate::runner::{CommandRunner, ProcessCommandRunner, RunnerError};
use crate::session::Session;

mod helper;

use helper::RemoteShellHelper;

/// Name of the results directory beside every project tree.
pub const OUTPUTS_DIR: &str = "Outputs";

/// Output substrings that mark a transfer as failed.
pub const FAILURE_MARKERS: &[&str] = &["rsync error", "failed"];

const RSYNC_FLAGS: &str = "-avPz";

/// Which side of the transfer is the source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Host to container.
    Push,
    /// Container to host.
    Pull,
}

/// A single directory transfer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncSpec {
    /// Transfer direction.
    pub direction: Direction,
    /// Directory on the host.
    pub local: Utf8PathBuf,
    /// Directory inside the container.
    pub remote: Utf8PathBuf,
    /// Remove destination files that are missing from the source.
    pub delete: bool,
}

impl SyncSpec {
    /// Describes a host-to-container transfer.
    #[must_use]
    pub fn push(
        local: impl Into<Utf8PathBuf>,
        remote: impl Into<Utf8PathBuf>,
        delete: bool,
    ) -> Self {
        Self {
            direction: Direction::Push,
            local: local.into(),
            remote: remote.into(),
            delete,
        }
    }

    /// Describes a container-to-host transfer.
    #[must_use]
    pub fn pull(
        local: impl Into<Utf8PathBuf>,
        remote: impl Into<Utf8PathBuf>,
        delete: bool,
    ) -> Self {
        Self {
            direction: Direction::Pull,
            local: local.into(),
            remote: remote.into(),
            delete,
        }
    }
}

/// Errors raised by [`Synchronizer::sync`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SyncError {
    /// rsync reported a failure or exited with a non-zero status.
    #[error("transfer failed: {}", .lines.join("; "))]
    TransferFailed {
        /// Output lines that flagged the failure.
        lines: Vec<String>,
    },
    /// The push source directory does not exist.
    #[error("sync source missing: {path}")]
    MissingSource {
        /// Local path that was expected to be a directory.
        path: Utf8PathBuf,
    },
    /// The remote-shell helper could not be prepared.
    #[error("failed to prepare rsync helper: {message}")]
    Helper {
        /// Underlying I/O failure.
        message: String,
    },
    /// Preparing remote directories failed.
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// rsync could not be started.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Runs rsync transfers against a container.
#[derive(Clone)]
pub struct Synchronizer<R: CommandRunner> {
    rsync_bin: String,
    lxc_bin: String,
    outputs_dir: Utf8PathBuf,
    runner: R,
    executor: RemoteExecutor,
    reporter: SharedReporter,
}

impl Synchronizer<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub fn with_process_runner(config: &LxdevConfig, reporter: SharedReporter) -> Self {
        Self::new(config, ProcessCommandRunner, reporter)
    }
}

impl<R: CommandRunner> Synchronizer<R> {
    /// Creates a synchroniser running rsync through `runner`.
    #[must_use]
    pub fn new(config: &LxdevConfig, runner: R, reporter: SharedReporter) -> Self {
        Self {
            rsync_bin: config.rsync_bin.clone(),
            lxc_bin: config.lxc_bin.clone(),
            outputs_dir: config.remote_root_path().join(OUTPUTS_DIR),
            runner,
            executor: RemoteExecutor::new(reporter.clone()),
            reporter,
        }
    }

    /// Transfers `spec` between the host and the container behind `session`.
    ///
    /// Pushes create the remote directory and the shared outputs directory
    /// first. Every output line carrying a [`FAILURE_MARKERS`] entry is
    /// logged as an error.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransferFailed`] when rsync reports a failure,
    /// [`SyncError::MissingSource`] when a push source is absent, or the
    /// wrapped error when preparation fails.
    pub fn sync<S: CommandRunner>(
        &self,
        session: &Session<S>,
        spec: &SyncSpec,
    ) -> Result<(), SyncError> {
        let container = session.target().container();
        if spec.direction == Direction::Push {
            if !spec.local.is_dir() {
                return Err(SyncError::MissingSource {
                    path: spec.local.clone(),
                });
            }
            self.prepare_remote(session, &spec.remote)?;
        }

        let helper = RemoteShellHelper::create(&self.lxc_bin)?;
        let (source, destination) = endpoints(container, spec);
        self.reporter
            .highlight(&format!("Used rsync to copy {source} to {destination}"));
        let args = build_rsync_args(&helper.remote_shell()?, source, destination, spec.delete);

        let output = self.runner.run(&self.rsync_bin, &args)?;
        drop(helper);

        let mut failed = Vec::new();
        let stdout = output.stdout_lossy();
        let stderr = output.stderr_lossy();
        for line in stdout.lines().chain(stderr.lines()) {
            if FAILURE_MARKERS.iter().any(|marker| line.contains(marker)) {
                self.reporter.error(line);
                failed.push(line.to_owned());
            } else {
                self.reporter.info(line);
            }
        }

        if !output.is_success() && failed.is_empty() {
            let line = format!(
                "{} exited with status {}",
                self.rsync_bin,
                output.status_text()
            );
            self.reporter.error(&line);
            failed.push(line);
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(SyncError::TransferFailed { lines: failed })
        }
    }

    fn prepare_remote<S: CommandRunner>(
        &self,
        session: &Session<S>,
        remote: &Utf8Path,
    ) -> Result<(), SyncError> {
        let batch = CommandBatch::single(mkdir(remote)).then(mkdir(&self.outputs_dir));
        self.executor.execute(session, &batch, FailurePolicy::Raise)?;
        Ok(())
    }
}

fn mkdir(path: &Utf8Path) -> String {
    format!("mkdir -p {}", escape(path.as_str().into()))
}

/// Trailing slashes make rsync copy directory contents rather than the
/// directory itself.
fn endpoints(container: &str, spec: &SyncSpec) -> (String, String) {
    let local = format!("{}/", spec.local);
    let remote = format!("{container}:{}/", spec.remote);
    match spec.direction {
        Direction::Push => (local, remote),
        Direction::Pull => (remote, local),
    }
}

fn build_rsync_args(
    remote_shell: &str,
    source: String,
    destination: String,
    delete: bool,
) -> Vec<OsString> {
    let mut args = vec![
        OsString::from(RSYNC_FLAGS),
        OsString::from("-e"),
        OsString::from(remote_shell),
        OsString::from(source),
        OsString::from(destination),
    ];
    if delete {
        args.push(OsString::from("--delete"));
    }
    args
}
