//! Filesystem-backed stand-in for `lxc`, `ssh` and `rsync`.
//!
//! The container's filesystem is a temporary directory. `lxc` answers `info`,
//! `list` and `start` from in-memory state, `ssh` executes `mkdir -p` commands
//! against the container root, and `rsync` copies trees between the host and
//! that root, honouring `--delete`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{copy, create_dir_all, read_dir, remove_dir_all, remove_file};
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use lxdev::runner::{CommandOutput, CommandRunner, RunnerError};

#[derive(Debug)]
struct State {
    root: Utf8PathBuf,
    name: String,
    exists: bool,
    stopped: bool,
    commands: Vec<String>,
}

/// Runner that emulates one container.
#[derive(Clone, Debug)]
pub struct FakeContainer {
    state: Rc<RefCell<State>>,
}

impl FakeContainer {
    pub fn new(root: Utf8PathBuf, name: &str) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                root,
                name: name.to_owned(),
                exists: true,
                stopped: false,
                commands: Vec::new(),
            })),
        }
    }

    pub fn set_stopped(&self, stopped: bool) {
        self.state.borrow_mut().stopped = stopped;
    }

    pub fn set_exists(&self, exists: bool) {
        self.state.borrow_mut().exists = exists;
    }

    /// Every command line seen so far, program first.
    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    /// Maps an absolute container path onto the backing directory.
    pub fn host_path(&self, container_path: &str) -> Utf8PathBuf {
        self.state
            .borrow()
            .root
            .join(container_path.trim_start_matches('/'))
    }

    fn lxc(&self, args: &[String]) -> Result<CommandOutput, RunnerError> {
        let mut state = self.state.borrow_mut();
        match args.first().map(String::as_str) {
            Some("info") if state.exists => Ok(success(format!("Name: {}\n", state.name))),
            Some("info") => Ok(failure(1, "Error: Not Found\n")),
            Some("list") => {
                let status = if state.stopped { "STOPPED" } else { "RUNNING" };
                Ok(success(format!(
                    "| {} | {status} | 10.0.3.5 (eth0) | CONTAINER | 0 |\n",
                    state.name
                )))
            }
            Some("start") => {
                state.stopped = false;
                Ok(success(String::new()))
            }
            _ => Ok(failure(2, "unsupported lxc command\n")),
        }
    }

    fn ssh(&self, args: &[String]) -> Result<CommandOutput, RunnerError> {
        if args.iter().any(|arg| arg == "-M" || arg == "-O") {
            return Ok(success(String::new()));
        }
        let command = args.last().cloned().unwrap_or_default();
        for part in command.split(" && ") {
            if let Some(dir) = part.strip_prefix("mkdir -p ") {
                create_dir_all(self.host_path(dir.trim_matches('\''))).map_err(spawn_error)?;
            }
        }
        Ok(success(String::new()))
    }

    fn rsync(&self, args: &[String]) -> Result<CommandOutput, RunnerError> {
        let delete = args.iter().any(|arg| arg == "--delete");
        let endpoints: Vec<&String> = args
            .iter()
            .skip(3)
            .filter(|arg| !arg.starts_with("--"))
            .collect();
        let [source, destination] = endpoints.as_slice() else {
            return Ok(failure(1, "rsync error: syntax or usage error (code 1)\n"));
        };
        let source_path = self.resolve(source);
        let destination_path = self.resolve(destination);
        if !source_path.is_dir() {
            return Ok(failure(
                23,
                &format!("rsync: change_dir \"{source_path}\" failed: No such file or directory\n"),
            ));
        }
        create_dir_all(&destination_path).map_err(spawn_error)?;
        mirror(&source_path, &destination_path, delete).map_err(spawn_error)?;
        Ok(success(String::from("sending incremental file list\n")))
    }

    fn resolve(&self, endpoint: &str) -> Utf8PathBuf {
        let trimmed = endpoint.trim_end_matches('/');
        let prefix = format!("{}:", self.state.borrow().name);
        trimmed.strip_prefix(&prefix).map_or_else(
            || Utf8PathBuf::from(trimmed),
            |remote| self.host_path(remote),
        )
    }
}

impl CommandRunner for FakeContainer {
    fn run(&self, program: &str, raw_args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        let args: Vec<String> = raw_args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        self.state
            .borrow_mut()
            .commands
            .push(format!("{program} {}", args.join(" ")));
        match program {
            "lxc" => self.lxc(&args),
            "ssh" => self.ssh(&args),
            "rsync" => self.rsync(&args),
            other => Err(RunnerError::Spawn {
                program: other.to_owned(),
                message: String::from("not simulated"),
            }),
        }
    }
}

fn success(stdout: String) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: stdout.into_bytes(),
        stderr: Vec::new(),
    }
}

fn failure(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

fn spawn_error(err: std::io::Error) -> RunnerError {
    RunnerError::Spawn {
        program: String::from("simulator"),
        message: err.to_string(),
    }
}

fn mirror(source: &Utf8Path, destination: &Utf8Path, delete: bool) -> std::io::Result<()> {
    let mut seen = HashSet::new();
    for item in read_dir(source)? {
        let entry = item?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let from = source.join(&name);
        let to = destination.join(&name);
        if entry.file_type()?.is_dir() {
            create_dir_all(&to)?;
            mirror(&from, &to, delete)?;
        } else {
            copy(&from, &to)?;
        }
        seen.insert(name);
    }
    if !delete {
        return Ok(());
    }
    for item in read_dir(destination)? {
        let entry = item?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if seen.contains(&name) {
            continue;
        }
        let path = destination.join(&name);
        if entry.file_type()?.is_dir() {
            remove_dir_all(&path)?;
        } else {
            remove_file(&path)?;
        }
    }
    Ok(())
}
