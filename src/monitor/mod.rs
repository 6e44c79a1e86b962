pub mod clock;
pub mod correlator;
pub mod group;
pub mod registry;
pub mod sink;
pub mod stats;
pub mod window;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use clock::Nanos;
pub use correlator::{EventCorrelator, SummaryAccumulator};
pub use group::{start, start_with_sink, GroupHandle, WindowSubscription};
pub use registry::{Registration, SubjectRegistry};
pub use sink::{CompletedEvent, MetricSink, PushMetric, SinkMode, SinkRouter, StatsdSink};
pub use stats::Distribution;
pub use window::{StatsEntry, SummaryEntry, Window, WindowAggregator};

// ─── Identifiers ─────────────────────────────────────────────────

/// A class of monitored entity, e.g. one worker type in a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubjectKind(Arc<str>);

impl SubjectKind {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SubjectKind {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// One running instance of a subject kind. Opaque to the engine: it is
/// only compared, hashed and ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InstanceId(Arc<str>);

impl InstanceId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ─── Operations ──────────────────────────────────────────────────

/// Category of observed activity on an instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Call,
    Cast,
    Info,
    Demand,
    Events,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Cast => "cast",
            Self::Info => "info",
            Self::Demand => "demand",
            Self::Events => "events",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a subject: request/response servers or streaming stages.
/// Each style fixes the closed set of operations reported for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    Server,
    Stage,
}

impl Style {
    pub fn operations(self) -> &'static [Operation] {
        match self {
            Self::Server => &[Operation::Call, Operation::Cast, Operation::Info],
            Self::Stage => &[
                Operation::Demand,
                Operation::Events,
                Operation::Call,
                Operation::Cast,
            ],
        }
    }

    pub fn supports(self, operation: Operation) -> bool {
        self.operations().contains(&operation)
    }
}

/// Which accumulation track an open/close belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    /// Running count + total duration per key.
    Summary,
    /// Full duration list per key, or immediate external push.
    Stats,
}

/// Correlation slot: one pending open at most per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub instance: InstanceId,
    pub operation: Operation,
}

impl MetricKey {
    pub fn new(instance: InstanceId, operation: Operation) -> Self {
        Self {
            instance,
            operation,
        }
    }
}

// ─── Subject descriptors ─────────────────────────────────────────

/// Contract every monitored subject kind fulfils. Checked once when a
/// group is validated, never at event time.
pub trait Subject: Send + Sync + 'static {
    /// Stable name of the subject kind.
    fn kind(&self) -> SubjectKind;

    fn style(&self) -> Style;

    /// Operations the subject actually produces begin/end notifications
    /// for. Must cover every operation of its style.
    fn operations(&self) -> &[Operation] {
        self.style().operations()
    }
}

/// Plain descriptor for subjects that need no custom behaviour.
#[derive(Debug, Clone)]
pub struct Worker {
    kind: SubjectKind,
    style: Style,
}

impl Worker {
    pub fn server(kind: impl Into<SubjectKind>) -> Self {
        Self {
            kind: kind.into(),
            style: Style::Server,
        }
    }

    pub fn stage(kind: impl Into<SubjectKind>) -> Self {
        Self {
            kind: kind.into(),
            style: Style::Stage,
        }
    }
}

impl Subject for Worker {
    fn kind(&self) -> SubjectKind {
        self.kind.clone()
    }

    fn style(&self) -> Style {
        self.style
    }
}
