//! Windowed runtime metrics for groups of concurrent workers.
//!
//! Begin/end notifications from an instrumentation hook are correlated
//! per (instance, operation) into running summaries and, optionally,
//! full latency distributions or per-event pushes to a statsd agent.
//! Each monitored group is owned by one actor that publishes a snapshot
//! every window.

pub mod config;
pub mod handlers;
pub mod monitor;
pub mod server;
pub mod simulator;
pub mod telemetry;

pub use config::{ConfigError, ConfigIssue, GroupOptions, GroupSpec, StatisticsMode, StatsRetention};
pub use monitor::{GroupHandle, InstanceId, Operation, Style, Subject, SubjectKind, Window, Worker};

/// Shared state for the reporting server.
pub struct AppState {
    /// Handles returned by `monitor::start`, one per monitored group.
    pub groups: Vec<GroupHandle>,
}
