//! Common Test Utilities for Integration Tests
//!
//! A recording spawner that stands in for the load generator.

#![allow(dead_code)]

use async_trait::async_trait;
use requestload::config::Config;
use requestload::{Invocation, RunHandle, RunStatus, SpawnError, Spawner};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const GATEWAY_START: &str = "http://gateway:8080/startpage/";
pub const GATEWAY_CB: &str = "http://gateway:8080/startpage/cb";

/// Calls observed by the mock, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Spawn {
        id: u32,
        url: String,
        args: Vec<String>,
        at: Duration,
    },
    Wait {
        id: u32,
    },
    Terminate {
        id: u32,
    },
}

#[derive(Default)]
struct Shared {
    events: Mutex<Vec<Event>>,
    spawned: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl Shared {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// Mock spawner recording spawn, wait and terminate calls
#[derive(Clone)]
pub struct MockSpawner {
    shared: Arc<Shared>,
    started: Instant,
    runtime: Duration,
    url_runtimes: HashMap<String, Duration>,
    exit_code: i32,
    spawn_limit: Option<usize>,
}

impl MockSpawner {
    /// Runs finish immediately with exit code 0
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            started: Instant::now(),
            runtime: Duration::ZERO,
            url_runtimes: HashMap::new(),
            exit_code: 0,
            spawn_limit: None,
        }
    }

    pub fn with_runtime(mut self, runtime: Duration) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_url_runtime(mut self, url: &str, runtime: Duration) -> Self {
        self.url_runtimes.insert(url.to_string(), runtime);
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Fail every spawn after the first `limit`
    pub fn failing_after(mut self, limit: usize) -> Self {
        self.spawn_limit = Some(limit);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.shared.events.lock().unwrap().clone()
    }

    pub fn spawns(&self) -> Vec<(u32, String, Vec<String>, Duration)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Spawn { id, url, args, at } => Some((id, url, args, at)),
                _ => None,
            })
            .collect()
    }

    pub fn spawned_urls(&self) -> Vec<String> {
        self.spawns().into_iter().map(|(_, url, _, _)| url).collect()
    }

    pub fn waits_on(&self, id: u32) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Wait { id: w } if *w == id))
            .count()
    }

    pub fn terminations(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Terminate { id } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Runs spawned but not yet finished or terminated
    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Most runs alive at the same time
    pub fn peak(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }
}

impl Spawner for MockSpawner {
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn RunHandle>, SpawnError> {
        let index = self.shared.spawned.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.spawn_limit
            && index >= limit
        {
            return Err(SpawnError::Spawn {
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock spawn failure"),
            });
        }

        let id = index as u32 + 1;
        let now = Instant::now();
        self.shared.push(Event::Spawn {
            id,
            url: invocation.url.clone(),
            args: invocation.args(),
            at: now - self.started,
        });

        let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak.fetch_max(live, Ordering::SeqCst);

        let runtime = self
            .url_runtimes
            .get(&invocation.url)
            .copied()
            .unwrap_or(self.runtime);

        Ok(Box::new(MockHandle {
            id,
            finishes_at: now + runtime,
            exit_code: self.exit_code,
            done: false,
            shared: self.shared.clone(),
        }))
    }
}

struct MockHandle {
    id: u32,
    finishes_at: Instant,
    exit_code: i32,
    done: bool,
    shared: Arc<Shared>,
}

impl MockHandle {
    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.shared.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl RunHandle for MockHandle {
    fn id(&self) -> Option<u32> {
        (!self.done).then_some(self.id)
    }

    async fn wait(&mut self) -> Result<RunStatus, SpawnError> {
        self.shared.push(Event::Wait { id: self.id });
        tokio::time::sleep_until(self.finishes_at).await;
        self.finish();
        Ok(RunStatus {
            code: Some(self.exit_code),
        })
    }

    async fn terminate(&mut self) -> Result<(), SpawnError> {
        self.shared.push(Event::Terminate { id: self.id });
        self.finish();
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Default gateway configuration limited to `passes` passes
pub fn gateway_config(passes: u64) -> Config {
    Config {
        max_passes: Some(passes),
        ..Config::default()
    }
}
