//! Binary entry point for the lxdev CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;

use lxdev::{
    CommandBatch, ConfigError, FailurePolicy, LxdevConfig, ReportError, ReportStyle,
    TracingReporter, WorkflowError, WorkingLocation, Workflow, init_tracing, util::home_dir,
};

mod cli;

use cli::{Cli, ExecCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging setup failed: {0}")]
    Logging(#[from] ReportError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    if matches!(cli, Cli::CheckDirs) {
        return check_dirs(io::stdout());
    }

    let config = LxdevConfig::load_without_cli_args()?;
    init_tracing(config.colour)?;
    let reporter = TracingReporter::new(ReportStyle::from_colour(config.colour)).shared();
    let location = WorkingLocation::from_env()?;
    let workflow = Workflow::with_process_runner(config, location, reporter);

    match cli {
        Cli::CheckDirs => check_dirs(io::stdout()),
        Cli::RsyncToContainer(args) => Ok(workflow.push(&args.host, args.mode.deletes())?),
        Cli::RsyncFromContainer(args) => Ok(workflow.pull(&args.host, args.mode.deletes())?),
        Cli::GetRemoteWorkingDirectory(args) => {
            let remote_dir = workflow.remote_working_directory(&args.host)?;
            write_remote_dir(io::stdout(), &remote_dir)
        }
        Cli::Exec(args) => {
            let ExecCommand {
                host,
                ignore_failures,
                commands,
            } = args;
            let policy = if ignore_failures {
                FailurePolicy::Tolerate
            } else {
                FailurePolicy::Raise
            };
            workflow.exec(&host, CommandBatch::from(commands), policy)?;
            Ok(())
        }
        Cli::Clean(args) => {
            workflow.clean(&args.host)?;
            Ok(())
        }
    }
}

fn check_dirs(mut out: impl Write) -> Result<(), CliError> {
    let exe = std::env::current_exe()?;
    let cwd = std::env::current_dir()?;
    let home = home_dir().map_or_else(|| String::from("<unset>"), |path| path.to_string());
    writeln!(out, "This executable's path is: {}", exe.display())?;
    writeln!(out, "User dir is: {home}")?;
    writeln!(out, "Called from {}", cwd.display())?;
    Ok(())
}

/// Writes the directory without a trailing newline so shells can capture it
/// verbatim.
fn write_remote_dir(mut out: impl Write, remote_dir: &Utf8Path) -> Result<(), CliError> {
    write!(out, "{remote_dir}")?;
    out.flush()?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
