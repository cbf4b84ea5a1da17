//! Temporary remote-shell wrapper handed to `rsync -e`.
//!
//! rsync invokes its remote shell as `<shell> <host> <command...>`. The
//! wrapper treats the host as a container name and forwards the command to
//! `lxc exec`, so transfers reuse the container runtime instead of opening a
//! second network connection.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use camino::Utf8Path;
use shell_escape::unix::escape;
use tempfile::TempPath;

use super::SyncError;

const HELPER_PREFIX: &str = "lxdev-rsh-";
const HELPER_MODE: u32 = 0o700;

/// Owner-executable script removed when dropped.
#[derive(Debug)]
pub(crate) struct RemoteShellHelper {
    path: TempPath,
}

impl RemoteShellHelper {
    /// Writes the wrapper for `lxc_bin` to a fresh temporary file.
    pub(crate) fn create(lxc_bin: &str) -> Result<Self, SyncError> {
        let mut file = tempfile::Builder::new()
            .prefix(HELPER_PREFIX)
            .suffix(".sh")
            .tempfile()
            .map_err(helper_error)?;
        file.write_all(script(lxc_bin).as_bytes())
            .map_err(helper_error)?;
        file.flush().map_err(helper_error)?;
        let path = file.into_temp_path();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(HELPER_MODE))
            .map_err(helper_error)?;
        Ok(Self { path })
    }

    /// Returns the script location as UTF-8.
    pub(crate) fn path(&self) -> Result<&Utf8Path, SyncError> {
        Utf8Path::from_path(&self.path).ok_or_else(|| SyncError::Helper {
            message: String::from("temporary helper path is not valid UTF-8"),
        })
    }

    /// Returns the value passed to `rsync -e`.
    pub(crate) fn remote_shell(&self) -> Result<String, SyncError> {
        remote_shell_arg(self.path()?)
    }
}

/// Single-quotes `path` so rsync keeps it as one word when it splits the
/// `-e` value on whitespace.
///
/// rsync does not unescape inside single quotes, so a path containing one is
/// rejected.
pub(crate) fn remote_shell_arg(path: &Utf8Path) -> Result<String, SyncError> {
    if path.as_str().contains('\'') {
        return Err(SyncError::Helper {
            message: format!("helper path {path} contains a single quote"),
        });
    }
    Ok(format!("'{path}'"))
}

fn helper_error(err: std::io::Error) -> SyncError {
    SyncError::Helper {
        message: err.to_string(),
    }
}

pub(crate) fn script(lxc_bin: &str) -> String {
    format!(
        "#!/bin/sh\nctn=\"$1\"\nshift\nexec {} exec \"$ctn\" -- \"$@\"\n",
        escape(lxc_bin.into())
    )
}
