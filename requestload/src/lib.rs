//! Request load driver
//!
//! Waits for the gateway to warm up, then keeps an external benchmarking tool
//! (`ab` by default) busy against a fixed list of target URLs.

pub mod config;
pub mod driver;
pub mod process;
pub mod reaper;
pub mod shutdown;

// Re-export commonly used types
pub use config::{Config, ConfigError, DispatchMode};
pub use driver::{DriverError, DriverReport, LoadDriver, StopReason, startup_message};
pub use process::{Invocation, ProcessSpawner, RunHandle, RunStatus, SpawnError, Spawner};
