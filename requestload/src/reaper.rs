//! Background collection of load-generator runs

use crate::process::{RunHandle, RunStatus, SpawnError};
use metrics::counter;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How a run ended from the driver's point of view
#[derive(Debug)]
pub enum RunOutcome {
    /// The process exited on its own
    Exited(RunStatus),
    /// Waiting failed; the process state is unknown
    WaitFailed(SpawnError),
    /// The stop signal fired and the process was terminated
    Stopped,
}

impl RunOutcome {
    /// Non-zero exit or failed wait
    pub fn is_failure(&self) -> bool {
        match self {
            RunOutcome::Exited(status) => !status.success(),
            RunOutcome::WaitFailed(_) => true,
            RunOutcome::Stopped => false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, RunOutcome::Stopped)
    }
}

/// A spawned run together with its in-flight permit.
///
/// The permit is released once the run has been awaited or terminated.
pub struct Run {
    url: String,
    handle: Box<dyn RunHandle>,
    _permit: OwnedSemaphorePermit,
}

impl Run {
    pub fn new(url: String, handle: Box<dyn RunHandle>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            url,
            handle,
            _permit: permit,
        }
    }

    /// Wait for the run to exit, or terminate it once `stop` fires
    pub async fn settle(mut self, stop: &CancellationToken) -> RunOutcome {
        let pid = self.handle.id();
        let waited = tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            result = self.handle.wait() => Some(result),
        };

        match waited {
            Some(Ok(status)) => {
                if status.success() {
                    debug!("Load run for {} (pid {:?}) finished", self.url, pid);
                } else {
                    warn!(
                        "Load run for {} (pid {:?}) finished with {}",
                        self.url, pid, status
                    );
                    counter!("requestload_runs_failed_total", "url" => self.url.clone())
                        .increment(1);
                }
                RunOutcome::Exited(status)
            }
            Some(Err(e)) => {
                warn!("Lost track of load run for {}: {}", self.url, e);
                counter!("requestload_runs_failed_total", "url" => self.url.clone()).increment(1);
                RunOutcome::WaitFailed(e)
            }
            None => {
                debug!("Terminating load run for {} (pid {:?})", self.url, pid);
                if let Err(e) = self.handle.terminate().await {
                    warn!("Failed to terminate load run for {}: {}", self.url, e);
                }
                RunOutcome::Stopped
            }
        }
    }
}

/// Collects runs the driver does not wait on itself
pub struct Reaper {
    tasks: JoinSet<RunOutcome>,
    stop: CancellationToken,
}

impl Reaper {
    pub fn new(stop: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            stop,
        }
    }

    /// Hand a run over for background collection
    pub fn reap(&mut self, run: Run) {
        let stop = self.stop.clone();
        self.tasks.spawn(async move { run.settle(&stop).await });
    }

    /// Runs still being collected
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Outcomes of runs that have already been collected
    pub fn drain_finished(&mut self) -> Vec<RunOutcome> {
        let mut outcomes = Vec::new();
        while let Some(result) = self.tasks.try_join_next() {
            if let Some(outcome) = joined(result) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Wait for every pending run. Runs are terminated if the stop token fires.
    pub async fn shutdown(mut self) -> Vec<RunOutcome> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        while let Some(result) = self.tasks.join_next().await {
            if let Some(outcome) = joined(result) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }
}

fn joined(result: Result<RunOutcome, tokio::task::JoinError>) -> Option<RunOutcome> {
    match result {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!("Reaper task failed: {}", e);
            None
        }
    }
}
