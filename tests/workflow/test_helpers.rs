//! Shared fixtures for workflow BDD scenarios.

use std::cell::RefCell;
use std::fs::{create_dir_all, read_dir, write};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use lxdev::test_support::{MISSING_SSH_CONFIG, RecordingReporter};
use lxdev::{LxdevConfig, WorkflowError, WorkingLocation, Workflow};
use rstest::fixture;
use tempfile::TempDir;
use thiserror::Error;

use super::container_sim::FakeContainer;

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("fixture I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

/// A home directory with a project, plus a simulated container.
pub struct WorkflowContext {
    _home_tmp: TempDir,
    _container_tmp: TempDir,
    pub home: Utf8PathBuf,
    pub project: Utf8PathBuf,
    pub cwd: RefCell<Utf8PathBuf>,
    pub host: RefCell<String>,
    pub container: FakeContainer,
    pub reporter: RecordingReporter,
    pub outcome: RefCell<Option<Result<(), WorkflowError>>>,
}

impl WorkflowContext {
    pub fn workflow(&self) -> Workflow<FakeContainer> {
        let config = LxdevConfig {
            ssh_config_path: String::from(MISSING_SSH_CONFIG),
            ..LxdevConfig::default()
        };
        let location = WorkingLocation::new(self.cwd.borrow().clone(), &self.home);
        Workflow::new(
            config,
            location,
            self.container.clone(),
            self.reporter.shared(),
        )
        .with_settle_tick(Duration::ZERO)
    }

    pub fn record(&self, outcome: Result<(), WorkflowError>) {
        *self.outcome.borrow_mut() = Some(outcome);
    }

    pub fn host(&self) -> String {
        self.host.borrow().clone()
    }
}

#[fixture]
pub fn workflow_context() -> WorkflowContext {
    let home_tmp = TempDir::new().unwrap_or_else(|err| panic!("home tempdir: {err}"));
    let container_tmp = TempDir::new().unwrap_or_else(|err| panic!("container tempdir: {err}"));
    let home = utf8(home_tmp.path());
    let project = home.join("thesis");
    create_dir_all(&project).unwrap_or_else(|err| panic!("create project: {err}"));
    WorkflowContext {
        container: FakeContainer::new(utf8(container_tmp.path()), "doc-dev"),
        _home_tmp: home_tmp,
        _container_tmp: container_tmp,
        cwd: RefCell::new(project.clone()),
        home,
        project,
        host: RefCell::new(String::from("lxd_doc-dev")),
        reporter: RecordingReporter::new(),
        outcome: RefCell::new(None),
    }
}

fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .unwrap_or_else(|err| panic!("non-utf8 tempdir: {}", err.display()))
}

pub fn write_file(path: &Utf8Path, contents: &str) -> Result<(), StepError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    write(path, contents)?;
    Ok(())
}

/// Lists every regular file below `root` as sorted relative paths.
pub fn file_set(root: &Utf8Path) -> Result<Vec<String>, StepError> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files(root: &Utf8Path, dir: &Utf8Path, files: &mut Vec<String>) -> Result<(), StepError> {
    for item in read_dir(dir)? {
        let entry = item?;
        let path = dir.join(entry.file_name().to_string_lossy().as_ref());
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, files)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            files.push(relative.to_string());
        }
    }
    Ok(())
}
