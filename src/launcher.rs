//! Running the resolved client as a foreground child process
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Client executable '{executable}' was not found. Install it or set 'shell' in its configuration section.")]
    NotFound { executable: String },

    #[error("Failed to start '{executable}': {source}")]
    Spawn {
        executable: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed waiting for '{executable}': {source}")]
    Wait {
        executable: String,
        #[source]
        source: io::Error,
    },
}

/// A fully bound client command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchSpec {
    pub executable: String,
    /// Client options such as startup files and prompts
    pub options: Vec<String>,
    /// Connection arguments, after the options
    pub arguments: Vec<String>,
    /// Variables set for the client only, on top of the inherited environment
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Full argument vector, options first
    pub fn args(&self) -> Vec<String> {
        self.options
            .iter()
            .chain(self.arguments.iter())
            .cloned()
            .collect()
    }

    /// Apply extra variables beneath the ones the client needs
    pub fn with_base_env<I>(mut self, base: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in base {
            self.env.entry(key).or_insert(value);
        }
        self
    }
}

#[cfg(unix)]
const SIGINT: i32 = 2;

/// How the client session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Exited(Option<i32>),
    /// The client was ended by an interrupt
    Interrupted,
}

impl LaunchOutcome {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if status.signal() == Some(SIGINT) {
                return LaunchOutcome::Interrupted;
            }
        }
        LaunchOutcome::Exited(status.code())
    }
}

#[async_trait]
pub trait Launcher: Send + Sync {
    /// Run the client in the foreground and wait for it to exit
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchOutcome, LaunchError>;
}

/// Launches clients attached to the current terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchOutcome, LaunchError> {
        let mut command = Command::new(&spec.executable);
        command
            .args(spec.args())
            .envs(&spec.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        debug!(
            "[ProcessLauncher::launch] Starting {} with {} argument(s)",
            spec.executable,
            spec.options.len() + spec.arguments.len()
        );
        let mut child = command.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                LaunchError::NotFound {
                    executable: spec.executable.clone(),
                }
            } else {
                LaunchError::Spawn {
                    executable: spec.executable.clone(),
                    source,
                }
            }
        })?;

        // Ctrl-C belongs to the client while it runs
        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|source| LaunchError::Wait {
                        executable: spec.executable.clone(),
                        source,
                    })?;
                }
                _ = tokio::signal::ctrl_c() => {
                    debug!("[ProcessLauncher::launch] Interrupt left to the client");
                }
            }
        };

        let outcome = LaunchOutcome::from_status(status);
        debug!("[ProcessLauncher::launch] {} finished: {:?}", spec.executable, outcome);
        Ok(outcome)
    }
}
