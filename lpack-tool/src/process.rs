use std::fmt;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};

use log::info;
use thiserror::Error;

use crate::config::Settings;

/// Where the working directory is mounted inside the build container.
pub const CONTAINER_TASK_ROOT: &str = "/var/task";

/// Why the dependency installer did not succeed.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read installer output: {0}")]
    Output(#[source] std::io::Error),

    #[error("command '{command}' returned non-zero exit status {code}")]
    ExitStatus { command: String, code: i32 },

    #[error("command '{command}' was terminated by a signal")]
    Terminated { command: String },
}

/// An external command as a program plus an argument vector. Arguments are
/// handed to the OS untouched; no host shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ContainerCommand {
    /// Builds the containerised `pip install` for the given settings: the
    /// working directory is mounted at [`CONTAINER_TASK_ROOT`], the platform
    /// is pinned and only prebuilt wheels are accepted.
    pub fn pip_install(settings: &Settings) -> Self {
        let manifest = format!("{CONTAINER_TASK_ROOT}/{}", settings.manifest);
        let target = format!("{CONTAINER_TASK_ROOT}/{}", settings.staging_name);
        let install = format!(
            "pip install -r {} -t {} --upgrade --only-binary=:all:",
            shell_quote(&manifest),
            shell_quote(&target)
        );

        ContainerCommand {
            program: settings.runtime.clone(),
            args: vec![
                "run".into(),
                "--rm".into(),
                "-v".into(),
                format!("{}:{CONTAINER_TASK_ROOT}", settings.workdir.display()),
                "-w".into(),
                CONTAINER_TASK_ROOT.into(),
                "--platform".into(),
                settings.platform.clone(),
                settings.image.clone(),
                "/bin/sh".into(),
                "-c".into(),
                install,
            ],
        }
    }
}

impl fmt::Display for ContainerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Quotes a word for POSIX `sh`. Words made only of safe characters are
/// returned as is.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Abstraction for running the dependency installer.
pub trait CommandRunner {
    /// Runs the command to completion. Any outcome other than a zero exit
    /// status is an error.
    fn run(&self, command: &ContainerCommand) -> Result<(), InstallError>;
}

/// Spawns the command on the host, echoing its stdout line by line as it
/// arrives. Stderr is inherited.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ContainerCommand) -> Result<(), InstallError> {
        info!("running {command}");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| InstallError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(l) => println!("{l}"),
                    Err(e) => {
                        // Reap the child before reporting.
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(InstallError::Output(e));
                    }
                }
            }
        }

        let status = child.wait().map_err(InstallError::Output)?;
        if status.success() {
            return Ok(());
        }

        match status.code() {
            Some(code) => Err(InstallError::ExitStatus {
                command: command.to_string(),
                code,
            }),
            None => Err(InstallError::Terminated {
                command: command.to_string(),
            }),
        }
    }
}
