//! Command-line interface definitions for the `lxdev` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `lxdev` binary.
#[derive(Debug, Parser)]
#[command(
    name = "lxdev",
    about = "Mirror a project into an LXD container and work on it there",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Print the executable path, home directory and working directory.
    #[command(name = "check-dirs", alias = "check_dirs")]
    CheckDirs,
    /// Copy the working directory into the container.
    #[command(name = "rsync-to-container", alias = "rsync_to_container")]
    RsyncToContainer(SyncCommand),
    /// Copy the container's copy of the working directory back.
    #[command(name = "rsync-from-container", alias = "rsync_from_container")]
    RsyncFromContainer(SyncCommand),
    /// Print the container path that mirrors the working directory.
    #[command(
        name = "get-remote-working-directory",
        alias = "get_remote_working_directory"
    )]
    GetRemoteWorkingDirectory(SyncCommand),
    /// Run commands inside the remote working directory.
    #[command(name = "exec")]
    Exec(ExecCommand),
    /// Empty the container's scratch directories.
    #[command(name = "clean")]
    Clean(HostCommand),
}

/// Arguments naming only the target host.
#[derive(Debug, Parser)]
pub(crate) struct HostCommand {
    /// SSH host alias of the container, for example `lxd_doc-dev`.
    pub(crate) host: String,
}

/// Arguments for the transfer subcommands.
#[derive(Debug, Parser)]
pub(crate) struct SyncCommand {
    /// SSH host alias of the container, for example `lxd_doc-dev`.
    pub(crate) host: String,
    /// Whether files missing from the source are removed at the destination.
    ///
    /// `get-remote-working-directory` accepts the token so shell wrappers can
    /// pass the same arguments to every task; it has no effect there.
    #[arg(value_enum)]
    pub(crate) mode: SyncMode,
}

/// Destination handling for a transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum SyncMode {
    /// Mirror the source exactly.
    Delete,
    /// Keep destination-only files.
    Keep,
}

impl SyncMode {
    /// Returns `true` when destination-only files are removed.
    pub(crate) const fn deletes(self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// Arguments for `lxdev exec`.
#[derive(Debug, Parser)]
pub(crate) struct ExecCommand {
    /// SSH host alias of the container, for example `lxd_doc-dev`.
    pub(crate) host: String,
    /// Report failures without exiting non-zero.
    #[arg(long)]
    pub(crate) ignore_failures: bool,
    /// Commands to run in order after `--`; each argument is one command.
    #[arg(required = true, last = true, value_name = "COMMAND")]
    pub(crate) commands: Vec<String>,
}
