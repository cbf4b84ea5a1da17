//! Path helpers shared by the configuration and CLI layers.

use camino::Utf8PathBuf;

/// Returns the invoking user's home directory from `HOME`.
#[must_use]
pub fn home_dir() -> Option<Utf8PathBuf> {
    let home = std::env::var_os("HOME")?;
    Utf8PathBuf::from_path_buf(home.into()).ok()
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If the `HOME` environment variable is not set, the function returns the
/// input string unchanged.
///
/// # Examples
///
/// ```
/// # use lxdev::util::expand_tilde;
/// let home = std::env::var("HOME").expect("HOME should be set");
/// assert_eq!(expand_tilde("~/.ssh/config"), format!("{home}/.ssh/config"));
/// assert_eq!(expand_tilde("/etc/ssh/ssh_config"), "/etc/ssh/ssh_config");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}
