//! Load driver: warm-up, then pass after pass over the target list

use crate::config::{Config, ConfigError, DispatchMode};
use crate::process::{Invocation, SpawnError, Spawner};
use crate::reaper::{Reaper, Run, RunOutcome};
use metrics::counter;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Driver errors
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("In-flight limiter was closed")]
    LimiterClosed,
}

/// Why [`LoadDriver::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured number of passes completed
    PassLimit,
    /// The stop token fired
    Signal,
}

/// Summary of a driver run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverReport {
    pub passes: u64,
    pub runs_spawned: u64,
    pub runs_failed: u64,
    pub stop: StopReason,
}

#[derive(Debug, Default)]
struct Tally {
    passes: u64,
    runs_spawned: u64,
    runs_failed: u64,
}

impl Tally {
    fn record(&mut self, outcome: &RunOutcome) {
        if outcome.is_failure() {
            self.runs_failed += 1;
        }
    }

    fn finish(self, stop: StopReason) -> DriverReport {
        DriverReport {
            passes: self.passes,
            runs_spawned: self.runs_spawned,
            runs_failed: self.runs_failed,
            stop,
        }
    }
}

enum PassEnd {
    Completed,
    Stopped,
}

/// Startup line listing the targets in order
pub fn startup_message(urls: &[String]) -> String {
    format!("initializing basic request load for {}", urls.join(", "))
}

/// Drives load-generator runs against the configured targets
pub struct LoadDriver<S> {
    config: Config,
    spawner: S,
    stop: CancellationToken,
    permits: Arc<Semaphore>,
}

impl<S: Spawner> LoadDriver<S> {
    pub fn new(config: Config, spawner: S, stop: CancellationToken) -> Result<Self, ConfigError> {
        config.validate()?;
        let permits = Arc::new(Semaphore::new(config.max_in_flight));
        Ok(Self {
            config,
            spawner,
            stop,
            permits,
        })
    }

    /// Run until the pass limit is reached or the stop token fires.
    ///
    /// Every child is awaited or terminated before this returns. A spawn
    /// failure terminates outstanding children and is returned as an error;
    /// unsuccessful runs are only counted.
    pub async fn run(&self) -> Result<DriverReport, DriverError> {
        info!("{}", startup_message(&self.config.urls));

        // cancelled on fatal errors without touching the caller's token
        let stop = self.stop.child_token();
        let mut tally = Tally::default();

        if !self.warm_up(&stop).await {
            info!("Stopped during warm-up");
            return Ok(tally.finish(StopReason::Signal));
        }

        let mut reaper = Reaper::new(stop.clone());
        let result = self.dispatch(&stop, &mut reaper, &mut tally).await;
        if result.is_err() {
            stop.cancel();
        }

        for outcome in reaper.shutdown().await {
            tally.record(&outcome);
        }

        let reason = result?;
        Ok(tally.finish(reason))
    }

    async fn warm_up(&self, stop: &CancellationToken) -> bool {
        let warmup = self.config.warmup;
        if warmup.is_zero() {
            return true;
        }
        debug!("Waiting {:?} for the gateway to come up", warmup);
        tokio::select! {
            biased;
            _ = stop.cancelled() => false,
            _ = tokio::time::sleep(warmup) => true,
        }
    }

    async fn dispatch(
        &self,
        stop: &CancellationToken,
        reaper: &mut Reaper,
        tally: &mut Tally,
    ) -> Result<StopReason, DriverError> {
        loop {
            if let Some(max) = self.config.max_passes
                && tally.passes >= max
            {
                debug!("Completed {} passes, stopping", tally.passes);
                return Ok(StopReason::PassLimit);
            }
            if stop.is_cancelled() {
                return Ok(StopReason::Signal);
            }

            let end = self.run_pass(stop, reaper, tally).await?;
            for outcome in reaper.drain_finished() {
                tally.record(&outcome);
            }

            match end {
                PassEnd::Completed => {
                    tally.passes += 1;
                    counter!("requestload_passes_total").increment(1);
                    debug!(
                        "Pass {} complete, {} runs still being collected",
                        tally.passes,
                        reaper.pending()
                    );
                }
                PassEnd::Stopped => return Ok(StopReason::Signal),
            }
        }
    }

    async fn run_pass(
        &self,
        stop: &CancellationToken,
        reaper: &mut Reaper,
        tally: &mut Tally,
    ) -> Result<PassEnd, DriverError> {
        let urls = &self.config.urls;

        match self.config.dispatch {
            DispatchMode::AwaitLast => {
                let last = urls.len() - 1;
                for (i, url) in urls.iter().enumerate() {
                    let Some(run) = self.launch(url, stop, tally).await? else {
                        return Ok(PassEnd::Stopped);
                    };
                    if i < last {
                        reaper.reap(run);
                    } else if self.settle(run, stop, tally).await.is_stopped() {
                        return Ok(PassEnd::Stopped);
                    }
                }
            }
            DispatchMode::Sequential => {
                for url in urls {
                    let Some(run) = self.launch(url, stop, tally).await? else {
                        return Ok(PassEnd::Stopped);
                    };
                    if self.settle(run, stop, tally).await.is_stopped() {
                        return Ok(PassEnd::Stopped);
                    }
                }
            }
            DispatchMode::FanOut => {
                let mut runs = Vec::with_capacity(urls.len());
                let mut stopped = false;
                for url in urls {
                    match self.launch(url, stop, tally).await {
                        Ok(Some(run)) => runs.push(run),
                        Ok(None) => {
                            stopped = true;
                            break;
                        }
                        Err(e) => {
                            // hand what was already started to the reaper
                            for run in runs {
                                reaper.reap(run);
                            }
                            return Err(e);
                        }
                    }
                }
                for run in runs {
                    if self.settle(run, stop, tally).await.is_stopped() {
                        stopped = true;
                    }
                }
                if stopped {
                    return Ok(PassEnd::Stopped);
                }
            }
        }

        Ok(PassEnd::Completed)
    }

    /// Spawn one run once a permit is free. `None` if stopped while waiting.
    async fn launch(
        &self,
        url: &str,
        stop: &CancellationToken,
        tally: &mut Tally,
    ) -> Result<Option<Run>, DriverError> {
        let permit = tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(None),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| DriverError::LimiterClosed)?
            }
        };

        let invocation = Invocation {
            program: self.config.tool.clone(),
            request_count: self.config.request_count,
            concurrency: self.config.concurrency,
            url: url.to_string(),
        };
        let handle = self.spawner.spawn(&invocation)?;

        tally.runs_spawned += 1;
        counter!("requestload_runs_spawned_total", "url" => url.to_string()).increment(1);
        debug!("Started `{}` (pid {:?})", invocation, handle.id());

        Ok(Some(Run::new(url.to_string(), handle, permit)))
    }

    async fn settle(&self, run: Run, stop: &CancellationToken, tally: &mut Tally) -> RunOutcome {
        let outcome = run.settle(stop).await;
        tally.record(&outcome);
        outcome
    }
}
