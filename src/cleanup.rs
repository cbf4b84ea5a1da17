//! Clearing of the container's scratch directories.

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;

use crate::exec::{CommandBatch, ExecError, FailurePolicy, RemoteExecutor};
use crate::runner::CommandRunner;
use crate::session::Session;
use crate::sync::OUTPUTS_DIR;

/// Directories under the remote root whose contents are disposable.
pub const SCRATCH_DIRS: &[&str] = &[OUTPUTS_DIR, "Uploads"];

/// Which scratch directories had contents removed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CleanupSummary {
    /// Directories that were emptied, in [`SCRATCH_DIRS`] order.
    pub cleared: Vec<Utf8PathBuf>,
}

/// Empties every scratch directory under `remote_root`.
///
/// Each directory is listed first; listing failures (for example a missing
/// directory) are tolerated and the directory is skipped. Only non-empty
/// directories receive an `rm`, and the directory itself is kept, so running
/// this twice issues no destructive command the second time.
///
/// # Errors
///
/// Returns [`ExecError`] when the removal fails or the transport drops.
pub fn clean<R: CommandRunner>(
    executor: &RemoteExecutor,
    session: &Session<R>,
    remote_root: &Utf8Path,
) -> Result<CleanupSummary, ExecError> {
    let mut summary = CleanupSummary::default();
    for name in SCRATCH_DIRS {
        let dir = remote_root.join(name);
        let quoted = escape(dir.as_str().into());
        let listing = executor.execute(
            session,
            &CommandBatch::single(format!("ls {quoted}/")),
            FailurePolicy::Tolerate,
        )?;
        if listing.lines.iter().all(|line| line.trim().is_empty()) {
            continue;
        }
        executor.execute(
            session,
            &CommandBatch::single(format!("rm -r {quoted}/*")),
            FailurePolicy::Raise,
        )?;
        summary.cleared.push(dir);
    }
    Ok(summary)
}
