//! Configuration loading via `ortho-config`.
//!
//! [`LxdevConfig`] merges defaults, `lxdev.toml` discovery and `LXDEV_*`
//! environment variables. Every field has a default, so the tool works
//! without any configuration on a stock LXD host.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::util::expand_tilde;

/// Remote directory that holds synchronised projects.
pub const DEFAULT_REMOTE_ROOT: &str = "/home/ubuntu/Documents";

/// Hostname prefix stripped to obtain the container name.
pub const DEFAULT_HOST_PREFIX: &str = "lxd_";

/// Seconds to wait after starting a stopped container.
pub const DEFAULT_SETTLE_SECONDS: u64 = 5;

/// Tool and connection settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "LXDEV",
    discovery(
        app_name = "lxdev",
        env_var = "LXDEV_CONFIG_PATH",
        config_file_name = "lxdev.toml",
        dotfile_name = ".lxdev.toml",
        project_file_name = "lxdev.toml"
    )
)]
pub struct LxdevConfig {
    /// Path to the `lxc` executable.
    #[ortho_config(default = "lxc".to_owned())]
    pub lxc_bin: String,
    /// Path to the `rsync` executable.
    #[ortho_config(default = "rsync".to_owned())]
    pub rsync_bin: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// User to log in as inside the container.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub remote_user: String,
    /// Remote directory mirroring the local home tree.
    #[ortho_config(default = DEFAULT_REMOTE_ROOT.to_owned())]
    pub remote_root: String,
    /// SSH client configuration consulted for per-host overrides. Supports
    /// tilde expansion.
    #[ortho_config(default = "~/.ssh/config".to_owned())]
    pub ssh_config_path: String,
    /// Prefix removed from hostnames to derive the container name.
    #[ortho_config(default = DEFAULT_HOST_PREFIX.to_owned())]
    pub host_prefix: String,
    /// Seconds to wait for a freshly started container to settle.
    #[ortho_config(default = DEFAULT_SETTLE_SECONDS)]
    pub settle_seconds: u64,
    /// Whether highlighted log lines use ANSI colour.
    #[ortho_config(default = true)]
    pub colour: bool,
}

/// Errors raised when loading or validating configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a required value is blank.
    #[error("missing {field}: set LXDEV_{env_suffix} or add {field} to lxdev.toml", env_suffix = field.to_uppercase())]
    MissingField {
        /// Configuration field that failed validation.
        field: String,
    },
}

impl Default for LxdevConfig {
    fn default() -> Self {
        Self {
            lxc_bin: String::from("lxc"),
            rsync_bin: String::from("rsync"),
            ssh_bin: String::from("ssh"),
            remote_user: String::from("ubuntu"),
            remote_root: String::from(DEFAULT_REMOTE_ROOT),
            ssh_config_path: String::from("~/.ssh/config"),
            host_prefix: String::from(DEFAULT_HOST_PREFIX),
            settle_seconds: DEFAULT_SETTLE_SECONDS,
            colour: true,
        }
    }
}

impl LxdevConfig {
    /// Loads configuration from defaults, configuration files, and
    /// environment variables without consulting process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails, or
    /// [`ConfigError::MissingField`] when a merged value is blank.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let config = Self::load_from_iter([std::ffi::OsString::from("lxdev")])
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first blank field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (&self.lxc_bin, "lxc_bin"),
            (&self.rsync_bin, "rsync_bin"),
            (&self.ssh_bin, "ssh_bin"),
            (&self.remote_user, "remote_user"),
            (&self.remote_root, "remote_root"),
            (&self.ssh_config_path, "ssh_config_path"),
        ];
        for (value, field) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: field.to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Returns the SSH config path with `~/` expanded.
    #[must_use]
    pub fn expanded_ssh_config_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(expand_tilde(&self.ssh_config_path))
    }

    /// Returns the remote root as a path.
    #[must_use]
    pub fn remote_root_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.remote_root)
    }
}
