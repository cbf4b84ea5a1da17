//! Authenticated SSH sessions with scoped lifetime.
//!
//! A [`Session`] owns one OpenSSH control-master connection to a container.
//! Opening the session writes a private client config that includes the
//! user's SSH config ahead of the target's fallback values, so `ssh` itself
//! applies every directive (`Match` and `Include` included) before falling
//! back to the target user. It then authenticates once with already-trusted
//! host keys and already-available identities and keeps the master socket in
//! the same private temporary directory. Every remote command runs over that
//! master; [`Session::close`] (or dropping the session) tears it down.
//! [`with_session`] pairs open and close around a unit of work.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tempfile::TempDir;
use thiserror::Error;

use crate::report::SharedReporter;
use crate::runner::{CommandOutput, CommandRunner, RunnerError};

pub mod ssh_config;

pub use ssh_config::{HostDirectives, SshConfig, SshConfigError};

/// Default SSH port used when neither the target nor the config sets one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Exit status `ssh` uses for its own failures.
const SSH_FAILURE_STATUS: i32 = 255;

const CONTROL_SOCKET_NAME: &str = "control";

const CLIENT_CONFIG_NAME: &str = "ssh_config";

const AUTHENTICATION_MARKERS: &[&str] = &[
    "Permission denied",
    "Too many authentication failures",
    "No more authentication methods",
    "Authentication failed",
];

const CONNECTIVITY_MARKERS: &[&str] = &[
    "Connection refused",
    "No route to host",
    "Could not resolve hostname",
    "Name or service not known",
    "Connection timed out",
    "Operation timed out",
    "Network is unreachable",
    "Connection closed by",
    "Connection reset by",
    "kex_exchange_identification",
];

/// Identifies where remote operations take place.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTarget {
    host: String,
    container: String,
    user: String,
    ssh_config_path: Utf8PathBuf,
}

impl RemoteTarget {
    /// Creates a target from its parts.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        container: impl Into<String>,
        user: impl Into<String>,
        ssh_config_path: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            user: user.into(),
            ssh_config_path: ssh_config_path.into(),
        }
    }

    /// SSH host alias, for example `lxd_doc-dev`.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// LXD container name, for example `doc-dev`.
    #[must_use]
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Login user requested by the caller.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// SSH config file consulted for overrides.
    #[must_use]
    pub fn ssh_config_path(&self) -> &Utf8Path {
        &self.ssh_config_path
    }
}

/// Connection parameters predicted from the SSH config's `Host` blocks.
///
/// Used for logging only; `ssh` performs the authoritative resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionParams {
    /// Hostname or address to connect to.
    pub hostname: String,
    /// Login user.
    pub user: String,
    /// TCP port.
    pub port: u16,
    /// Proxy command tunnelling the connection, if any.
    pub proxy_command: Option<String>,
}

impl ConnectionParams {
    /// Predicts parameters for `target`.
    ///
    /// Explicit target values are the baseline; matching `HostName`, `User`,
    /// `Port` and `ProxyCommand` directives override them. `%h`, `%p`, `%r`,
    /// `%n` and `%%` are expanded in the proxy command, and a proxy command
    /// of `none` disables proxying.
    #[must_use]
    pub fn resolve(target: &RemoteTarget, config: Option<&SshConfig>) -> Self {
        let directives = config
            .map(|cfg| cfg.lookup(target.host()))
            .unwrap_or_default();

        let hostname = directives.hostname.map_or_else(
            || target.host().to_owned(),
            |name| expand_tokens(&name, target.host(), target.host(), DEFAULT_SSH_PORT, target.user()),
        );
        let user = directives.user.unwrap_or_else(|| target.user().to_owned());
        let port = directives.port.unwrap_or(DEFAULT_SSH_PORT);
        let proxy_command = directives
            .proxy_command
            .filter(|command| !command.eq_ignore_ascii_case("none"))
            .map(|command| expand_tokens(&command, &hostname, target.host(), port, &user));

        Self {
            hostname,
            user,
            port,
            proxy_command,
        }
    }
}

fn expand_tokens(template: &str, hostname: &str, alias: &str, port: u16, user: &str) -> String {
    let mut expanded = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            expanded.push(ch);
            continue;
        }
        match chars.next() {
            Some('h') => expanded.push_str(hostname),
            Some('n') => expanded.push_str(alias),
            Some('p') => expanded.push_str(&port.to_string()),
            Some('r') => expanded.push_str(user),
            Some('%') => expanded.push('%'),
            Some(other) => {
                expanded.push('%');
                expanded.push(other);
            }
            None => expanded.push('%'),
        }
    }
    expanded
}

/// Renders the client config handed to `ssh` with `-F`.
///
/// `ssh` keeps the first value it obtains for each keyword, so everything the
/// included user config sets for the host wins and the trailing `Host *`
/// block only fills in what is still unset. Without a user config only the
/// fallback block is written, which keeps stray system config out.
#[must_use]
pub fn render_client_config(user_config: Option<&Utf8Path>, user: &str) -> String {
    let mut rendered = String::new();
    if let Some(path) = user_config {
        rendered.push_str(&format!("Include {}\n\n", quote_config_value(path.as_str())));
    }
    rendered.push_str(&format!("Host *\n    User {}\n", quote_config_value(user)));
    rendered
}

fn quote_config_value(value: &str) -> String {
    format!("\"{}\"", value.replace('"', ""))
}

/// Errors raised while opening, using, or closing a session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// Credentials were rejected or none were available.
    #[error("authentication to {host} failed: {message}")]
    Authentication {
        /// Host alias that was contacted.
        host: String,
        /// Diagnostic reported by the SSH client.
        message: String,
    },
    /// The host could not be reached.
    #[error("{host} is unreachable: {message}")]
    Connectivity {
        /// Host alias that was contacted.
        host: String,
        /// Diagnostic reported by the SSH client.
        message: String,
    },
    /// Any other transport failure, including host key rejection.
    #[error("ssh transport error for {host}: {message}")]
    Transport {
        /// Host alias that was contacted.
        host: String,
        /// Diagnostic reported by the SSH client.
        message: String,
    },
    /// Raised when the SSH config cannot be read.
    #[error(transparent)]
    Config(#[from] SshConfigError),
    /// Raised when the control socket directory or client config cannot be
    /// prepared.
    #[error("failed to prepare control socket: {message}")]
    Io {
        /// Operating system error string.
        message: String,
    },
    /// Raised when the SSH client cannot be started.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

impl SessionError {
    /// Classifies an SSH client diagnostic into a session error.
    #[must_use]
    pub fn classify(host: &str, stderr: &str) -> Self {
        let message = stderr.trim().to_owned();
        let host = host.to_owned();
        if AUTHENTICATION_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
        {
            Self::Authentication { host, message }
        } else if CONNECTIVITY_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
        {
            Self::Connectivity { host, message }
        } else {
            Self::Transport { host, message }
        }
    }

    fn log(&self, reporter: &SharedReporter) {
        let line = match self {
            Self::Authentication { message, .. } => format!(
                "authentication failed; did you remember to generate an SSH key? {message}"
            ),
            Self::Connectivity { host, message } => {
                format!("{host} is unreachable; is the container on? {message}")
            }
            other => format!("unexpected error occurred: {other}"),
        };
        reporter.error(&line);
    }
}

/// A live authenticated connection to a container.
pub struct Session<R: CommandRunner> {
    ssh_bin: String,
    target: RemoteTarget,
    params: ConnectionParams,
    client_config: Utf8PathBuf,
    control_dir: Option<TempDir>,
    control_path: Utf8PathBuf,
    runner: R,
    reporter: SharedReporter,
}

impl<R: CommandRunner> std::fmt::Debug for Session<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target)
            .field("params", &self.params)
            .field("control_path", &self.control_path)
            .field("open", &self.control_dir.is_some())
            .finish_non_exhaustive()
    }
}

impl<R: CommandRunner> Session<R> {
    /// Writes the private client config for `target` and authenticates a
    /// master connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Authentication`],
    /// [`SessionError::Connectivity`] or [`SessionError::Transport`] when the
    /// SSH client fails, after logging the failure. Config and spawn errors
    /// are logged and returned as their own variants.
    pub fn open(
        ssh_bin: &str,
        target: RemoteTarget,
        runner: R,
        reporter: SharedReporter,
    ) -> Result<Self, SessionError> {
        Self::connect(ssh_bin, target, runner, &reporter).inspect_err(|err| err.log(&reporter))
    }

    fn connect(
        ssh_bin: &str,
        target: RemoteTarget,
        runner: R,
        reporter: &SharedReporter,
    ) -> Result<Self, SessionError> {
        let config = SshConfig::load(target.ssh_config_path())?;
        let params = ConnectionParams::resolve(&target, config.as_ref());
        let user_config = config
            .map(|_| target.ssh_config_path().canonicalize_utf8())
            .transpose()
            .map_err(|err| io_error(&err))?;

        let control_dir = tempfile::Builder::new()
            .prefix("lxdev-")
            .tempdir()
            .map_err(|err| io_error(&err))?;
        let private_dir = Utf8Path::from_path(control_dir.path())
            .ok_or_else(|| SessionError::Io {
                message: String::from("temporary directory path is not valid UTF-8"),
            })?
            .to_path_buf();
        Dir::open_ambient_dir(&private_dir, ambient_authority())
            .and_then(|dir| {
                dir.write(
                    CLIENT_CONFIG_NAME,
                    render_client_config(user_config.as_deref(), target.user()),
                )
            })
            .map_err(|err| io_error(&err))?;
        let client_config = private_dir.join(CLIENT_CONFIG_NAME);
        let control_path = private_dir.join(CONTROL_SOCKET_NAME);

        reporter.trace(&format!(
            "connecting to {}@{}:{} as {}",
            params.user,
            params.hostname,
            params.port,
            target.host()
        ));

        let mut session = Self {
            ssh_bin: ssh_bin.to_owned(),
            target,
            params,
            client_config,
            control_dir: Some(control_dir),
            control_path,
            runner,
            reporter: reporter.clone(),
        };

        let args = session.build_args(&["-M", "-N", "-f"], None);
        let output = session.runner.run(&session.ssh_bin, &args)?;
        if !output.is_success() {
            // Nothing is listening on the socket, so there is no master to stop.
            session.control_dir = None;
            return Err(SessionError::classify(
                session.target.host(),
                &output.stderr_lossy(),
            ));
        }
        Ok(session)
    }

    /// Returns the target this session is bound to.
    #[must_use]
    pub const fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// Returns the resolved connection parameters.
    #[must_use]
    pub const fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Runs `command` through the remote login shell and waits for it to
    /// exit.
    ///
    /// # Errors
    ///
    /// Returns a classified [`SessionError`] when the SSH client itself
    /// fails, for example because the master connection dropped.
    pub fn run(&self, command: &str) -> Result<CommandOutput, SessionError> {
        let args = self.build_args(&["-o", "ControlMaster=no"], Some(command));
        let output = self.runner.run(&self.ssh_bin, &args)?;
        if output.code == Some(SSH_FAILURE_STATUS) {
            let stderr = output.stderr_lossy();
            let err = SessionError::classify(self.target.host(), &stderr);
            if !matches!(err, SessionError::Transport { .. }) {
                err.log(&self.reporter);
                return Err(err);
            }
        }
        Ok(output)
    }

    /// Stops the master connection and removes the control socket.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] when the SSH client reports a
    /// failure while stopping the master.
    pub fn close(mut self) -> Result<(), SessionError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), SessionError> {
        let Some(control_dir) = self.control_dir.take() else {
            return Ok(());
        };
        let args = self.build_args(&["-O", "exit"], None);
        let result = self.runner.run(&self.ssh_bin, &args);
        drop(control_dir);

        let output = result?;
        if output.is_success() {
            return Ok(());
        }
        Err(SessionError::Transport {
            host: self.target.host().to_owned(),
            message: output.stderr_lossy().trim().to_owned(),
        })
    }

    fn build_args(&self, mode: &[&str], command: Option<&str>) -> Vec<OsString> {
        let mut args = Vec::new();
        args.push(OsString::from("-F"));
        args.push(OsString::from(self.client_config.as_str()));
        for option in [
            String::from("BatchMode=yes"),
            String::from("StrictHostKeyChecking=yes"),
            String::from("PasswordAuthentication=no"),
            String::from("KbdInteractiveAuthentication=no"),
            format!("ControlPath={}", self.control_path),
        ] {
            args.push(OsString::from("-o"));
            args.push(OsString::from(option));
        }
        args.extend(mode.iter().map(OsString::from));
        args.push(OsString::from(self.target.host()));
        if let Some(remote) = command {
            args.push(OsString::from(remote));
        }
        args
    }
}

fn io_error(err: &std::io::Error) -> SessionError {
    SessionError::Io {
        message: err.to_string(),
    }
}

impl<R: CommandRunner> Drop for Session<R> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            self.reporter
                .error(&format!("failed to close session cleanly: {err}"));
        }
    }
}

/// Opens a session, runs `work` inside it, and closes it on every path.
///
/// An error from `work` takes precedence over an error while closing.
///
/// # Errors
///
/// Returns the error from opening the session, from `work`, or from closing
/// the session, converted into `E`.
pub fn with_session<R, T, E, F>(
    ssh_bin: &str,
    target: RemoteTarget,
    runner: R,
    reporter: SharedReporter,
    work: F,
) -> Result<T, E>
where
    R: CommandRunner,
    E: From<SessionError>,
    F: FnOnce(&Session<R>) -> Result<T, E>,
{
    let session = Session::open(ssh_bin, target, runner, reporter)?;
    let outcome = work(&session);
    let closed = session.close();
    match (outcome, closed) {
        (Err(err), _) => Err(err),
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err.into()),
    }
}
