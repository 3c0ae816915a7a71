//! Load-generator process seam
//!
//! The driver only sees [`Spawner`] and [`RunHandle`]; [`ProcessSpawner`] is
//! the implementation that actually launches the external tool.

use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::debug;

/// Process errors
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for load generator: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Failed to terminate load generator: {0}")]
    Terminate(#[source] std::io::Error),
}

/// One planned load-generator run against one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub request_count: u32,
    pub concurrency: u32,
    pub url: String,
}

impl Invocation {
    /// Arguments in `ab` order: `-n <requests> -c <concurrency> <url>`
    pub fn args(&self) -> Vec<String> {
        vec![
            "-n".to_string(),
            self.request_count.to_string(),
            "-c".to_string(),
            self.concurrency.to_string(),
            self.url.clone(),
        ]
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program, self.args().join(" "))
    }
}

/// Exit status of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
    /// Exit code, `None` when the process was killed by a signal
    pub code: Option<i32>,
}

impl RunStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for RunStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Handle to a running load generator
#[async_trait]
pub trait RunHandle: Send {
    /// OS process id, if the run is still known to the OS
    fn id(&self) -> Option<u32>;

    /// Wait for the run to exit
    async fn wait(&mut self) -> Result<RunStatus, SpawnError>;

    /// Kill the run and reap it
    async fn terminate(&mut self) -> Result<(), SpawnError>;
}

/// Launches load-generator runs
pub trait Spawner: Send + Sync {
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn RunHandle>, SpawnError>;
}

/// Spawns the configured tool as a child process.
///
/// Output goes straight to the driver's stdout/stderr. Children are killed if
/// their handle is dropped without being awaited.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpawner;

impl ProcessSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn RunHandle>, SpawnError> {
        let child = Command::new(&invocation.program)
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        debug!("Spawned `{}` as pid {:?}", invocation, child.id());
        Ok(Box::new(ChildHandle { child }))
    }
}

struct ChildHandle {
    child: Child,
}

#[async_trait]
impl RunHandle for ChildHandle {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<RunStatus, SpawnError> {
        self.child
            .wait()
            .await
            .map(RunStatus::from)
            .map_err(SpawnError::Wait)
    }

    async fn terminate(&mut self) -> Result<(), SpawnError> {
        // tokio refuses to kill a child it has already reaped
        if self
            .child
            .try_wait()
            .map_err(SpawnError::Terminate)?
            .is_some()
        {
            return Ok(());
        }
        self.child.kill().await.map_err(SpawnError::Terminate)
    }
}
