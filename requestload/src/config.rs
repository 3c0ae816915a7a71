//! Driver configuration
//!
//! Defaults reproduce the stock gateway load profile. Every field can be
//! overridden from the environment, see [`Config::from_env`].

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default gateway targets
pub const DEFAULT_URLS: [&str; 2] = [
    "http://gateway:8080/startpage/",
    "http://gateway:8080/startpage/cb",
];

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No target URLs configured")]
    NoTargets,

    #[error("Request count must be at least 1")]
    ZeroRequests,

    #[error("Concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("Concurrency {concurrency} exceeds request count {requests}")]
    ConcurrencyExceedsRequests { concurrency: u32, requests: u32 },

    #[error("max_in_flight must be at least 1")]
    ZeroInFlight,

    #[error("fan-out dispatch needs max_in_flight >= {targets} (got {max_in_flight})")]
    InFlightBelowTargets { targets: usize, max_in_flight: usize },

    #[error("Load generator executable is empty")]
    EmptyTool,

    #[error("Unknown dispatch mode: {0}")]
    UnknownDispatch(String),
}

/// Which children of a pass the driver blocks on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Spawn every target, hand all but the last to the reaper, wait on the last
    #[default]
    AwaitLast,
    /// Spawn and wait one target at a time
    Sequential,
    /// Spawn every target, then wait for all of them in order
    FanOut,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::AwaitLast => "await-last",
            DispatchMode::Sequential => "sequential",
            DispatchMode::FanOut => "fan-out",
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "await-last" | "await_last" | "last" => Ok(DispatchMode::AwaitLast),
            "sequential" => Ok(DispatchMode::Sequential),
            "fan-out" | "fan_out" | "fanout" => Ok(DispatchMode::FanOut),
            other => Err(ConfigError::UnknownDispatch(other.to_string())),
        }
    }
}

/// Main driver configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Ordered target list, fixed for the life of the process
    pub urls: Vec<String>,
    /// Requests per load-generator run (`ab -n`)
    pub request_count: u32,
    /// Concurrent requests per run (`ab -c`)
    pub concurrency: u32,
    /// Delay before the first pass
    pub warmup: Duration,
    /// Load generator executable
    pub tool: String,
    /// Wait policy within a pass
    pub dispatch: DispatchMode,
    /// Upper bound on children alive at once
    pub max_in_flight: usize,
    /// Stop after this many passes (`None` runs until stopped)
    pub max_passes: Option<u64>,
    /// Prometheus listener address (optional)
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            urls: DEFAULT_URLS.iter().map(|u| u.to_string()).collect(),
            request_count: 20_000,
            concurrency: 2,
            warmup: Duration::from_secs(90),
            tool: "ab".to_string(),
            dispatch: DispatchMode::default(),
            max_in_flight: 8,
            max_passes: None,
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Unset keys keep their default; values that fail to parse are logged
    /// and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("REQUESTLOAD_URLS") {
            let urls: Vec<String> = val
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
            if urls.is_empty() {
                warn!("REQUESTLOAD_URLS is set but lists no URLs, keeping defaults");
            } else {
                config.urls = urls;
            }
        }
        if let Some(v) = parsed(&lookup, "REQUESTLOAD_REQUESTS") {
            config.request_count = v;
        }
        if let Some(v) = parsed(&lookup, "REQUESTLOAD_CONCURRENCY") {
            config.concurrency = v;
        }
        if let Some(secs) = parsed::<u64, _>(&lookup, "REQUESTLOAD_WARMUP_SECS") {
            config.warmup = Duration::from_secs(secs);
        }
        if let Some(tool) = lookup("REQUESTLOAD_TOOL")
            && !tool.trim().is_empty()
        {
            config.tool = tool.trim().to_string();
        }
        if let Some(v) = parsed(&lookup, "REQUESTLOAD_DISPATCH") {
            config.dispatch = v;
        }
        if let Some(v) = parsed(&lookup, "REQUESTLOAD_MAX_IN_FLIGHT") {
            config.max_in_flight = v;
        }
        if let Some(v) = parsed(&lookup, "REQUESTLOAD_MAX_PASSES") {
            config.max_passes = Some(v);
        }
        if let Some(v) = parsed(&lookup, "REQUESTLOAD_METRICS_ADDR") {
            config.metrics_addr = Some(v);
        }

        config
    }

    /// Reject configurations the driver or the load generator cannot run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if self.request_count == 0 {
            return Err(ConfigError::ZeroRequests);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.concurrency > self.request_count {
            return Err(ConfigError::ConcurrencyExceedsRequests {
                concurrency: self.concurrency,
                requests: self.request_count,
            });
        }
        if self.tool.is_empty() {
            return Err(ConfigError::EmptyTool);
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::ZeroInFlight);
        }
        // fan-out holds every permit of the pass until the pass ends
        if self.dispatch == DispatchMode::FanOut && self.max_in_flight < self.urls.len() {
            return Err(ConfigError::InFlightBelowTargets {
                targets: self.urls.len(),
                max_in_flight: self.max_in_flight,
            });
        }
        Ok(())
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
