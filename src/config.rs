use std::collections::HashSet;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitor::{SinkMode, Style, Subject, SubjectKind};

// ─── Options ─────────────────────────────────────────────────────

/// Detailed statistics for the stats track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticsMode {
    /// Summary view only.
    #[default]
    Off,
    InMemory,
    Statsd,
    Tagged,
}

impl StatisticsMode {
    pub fn sink_mode(self) -> Option<SinkMode> {
        match self {
            Self::Off => None,
            Self::InMemory => Some(SinkMode::InMemory),
            Self::Statsd => Some(SinkMode::Statsd),
            Self::Tagged => Some(SinkMode::Tagged),
        }
    }
}

/// What happens to retained stats-track samples after a window is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsRetention {
    /// Samples accumulate for the whole session.
    #[default]
    Cumulative,
    /// Samples are dropped once a window has been built from them.
    PerWindow,
}

/// Per-group knobs, deserializable from JSON with every field optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupOptions {
    /// Window tick period (ms)
    #[serde(default = "default_window_interval")]
    pub window_interval_ms: u64,

    /// Fraction of real events the hook observes, in (0, 1]
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    #[serde(default)]
    pub statistics: StatisticsMode,

    /// statsd / Datadog agent, only used by the push modes
    #[serde(default = "default_agent")]
    pub agent: String,

    /// Extra `key:value` tags attached in tagged mode
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub retention: StatsRetention,

    /// Notifications buffered ahead of the group actor; hooks drop
    /// (and count) anything past this instead of blocking
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_window_interval() -> u64 {
    1000
}
fn default_sample_rate() -> f64 {
    1.0
}
fn default_agent() -> String {
    "127.0.0.1:8125".into()
}
fn default_queue_capacity() -> usize {
    65_536
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            window_interval_ms: default_window_interval(),
            sample_rate: default_sample_rate(),
            statistics: StatisticsMode::default(),
            agent: default_agent(),
            tags: Vec::new(),
            retention: StatsRetention::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

// ─── Group spec ──────────────────────────────────────────────────

/// Everything needed to start monitoring one cluster or pipeline.
#[derive(Clone)]
pub struct GroupSpec {
    pub name: String,
    pub style: Style,
    pub subjects: Vec<Arc<dyn Subject>>,
    pub options: GroupOptions,
}

impl GroupSpec {
    /// A cluster of request/response servers.
    pub fn cluster(name: impl Into<String>, subjects: Vec<Arc<dyn Subject>>) -> Self {
        Self {
            name: name.into(),
            style: Style::Server,
            subjects,
            options: GroupOptions::default(),
        }
    }

    /// A pipeline of streaming stages.
    pub fn pipeline(name: impl Into<String>, subjects: Vec<Arc<dyn Subject>>) -> Self {
        Self {
            name: name.into(),
            style: Style::Stage,
            subjects,
            options: GroupOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GroupOptions) -> Self {
        self.options = options;
        self
    }

    /// Check every entry and collect all problems at once.
    pub fn validate(&self) -> Result<ValidatedGroup, ConfigError> {
        let mut issues = Vec::new();
        let opts = &self.options;

        if self.name.trim().is_empty() {
            issues.push(ConfigIssue::EmptyName);
        }
        if self.subjects.is_empty() {
            issues.push(ConfigIssue::NoSubjects);
        }

        let mut seen = HashSet::new();
        let mut kinds = Vec::with_capacity(self.subjects.len());
        for subject in &self.subjects {
            let kind = subject.kind();
            if kind.as_str().trim().is_empty() {
                issues.push(ConfigIssue::EmptyKind);
                continue;
            }
            if !seen.insert(kind.clone()) {
                issues.push(ConfigIssue::DuplicateKind(kind));
                continue;
            }
            if subject.style() != self.style {
                issues.push(ConfigIssue::StyleMismatch {
                    kind,
                    expected: self.style,
                    found: subject.style(),
                });
                continue;
            }
            let missing: Vec<_> = self
                .style
                .operations()
                .iter()
                .copied()
                .filter(|op| !subject.operations().contains(op))
                .map(|op| op.as_str())
                .collect();
            if !missing.is_empty() {
                issues.push(ConfigIssue::MissingOperations {
                    kind,
                    missing: missing.join(", "),
                });
                continue;
            }
            kinds.push((kind, self.style));
        }

        if !(opts.sample_rate > 0.0 && opts.sample_rate <= 1.0) {
            issues.push(ConfigIssue::SampleRate(opts.sample_rate));
        }
        if opts.window_interval_ms == 0 {
            issues.push(ConfigIssue::ZeroInterval);
        }
        if opts.queue_capacity == 0 {
            issues.push(ConfigIssue::ZeroQueue);
        }

        let sink_mode = opts.statistics.sink_mode();
        let mut agent = None;
        if sink_mode.is_some_and(SinkMode::is_push) {
            match resolve_agent(&opts.agent) {
                Some(addr) => agent = Some(addr),
                None => issues.push(ConfigIssue::Agent(opts.agent.clone())),
            }
        }
        for tag in &opts.tags {
            if !is_valid_tag(tag) {
                issues.push(ConfigIssue::Tag(tag.clone()));
            }
        }

        if !issues.is_empty() {
            return Err(ConfigError::Invalid {
                group: self.name.clone(),
                issues: IssueList(issues),
            });
        }

        Ok(ValidatedGroup {
            name: self.name.clone(),
            kinds,
            window_interval: Duration::from_millis(opts.window_interval_ms),
            sample_rate: opts.sample_rate,
            sink_mode,
            agent,
            tags: opts.tags.clone(),
            retention: opts.retention,
            queue_capacity: opts.queue_capacity,
        })
    }
}

impl fmt::Debug for GroupSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<SubjectKind> = self.subjects.iter().map(|s| s.kind()).collect();
        f.debug_struct("GroupSpec")
            .field("name", &self.name)
            .field("style", &self.style)
            .field("subjects", &kinds)
            .field("options", &self.options)
            .finish()
    }
}

/// A spec that passed validation; the only input the group actor takes.
#[derive(Debug, Clone)]
pub struct ValidatedGroup {
    pub name: String,
    pub kinds: Vec<(SubjectKind, Style)>,
    pub window_interval: Duration,
    pub sample_rate: f64,
    /// `None` when detailed statistics are off.
    pub sink_mode: Option<SinkMode>,
    pub agent: Option<SocketAddr>,
    pub tags: Vec<String>,
    pub retention: StatsRetention,
    pub queue_capacity: usize,
}

fn resolve_agent(agent: &str) -> Option<SocketAddr> {
    agent.to_socket_addrs().ok()?.next()
}

fn is_valid_tag(tag: &str) -> bool {
    match tag.split_once(':') {
        Some((key, value)) => {
            !key.is_empty()
                && !value.is_empty()
                && !tag.contains(['|', '#', ',', '@'])
                && !tag.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid monitoring group `{group}`: {issues}")]
    Invalid { group: String, issues: IssueList },

    #[error("cannot open socket for metrics agent {agent}: {source}")]
    Agent {
        agent: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Every validation problem found, empty for transport errors.
    pub fn issues(&self) -> &[ConfigIssue] {
        match self {
            Self::Invalid { issues, .. } => &issues.0,
            Self::Agent { .. } => &[],
        }
    }
}

/// One offending configuration entry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigIssue {
    #[error("group name is empty")]
    EmptyName,
    #[error("no subjects to monitor")]
    NoSubjects,
    #[error("subject kind name is empty")]
    EmptyKind,
    #[error("subject kind `{0}` listed twice")]
    DuplicateKind(SubjectKind),
    #[error("subject `{kind}` is a {found:?} but the group monitors {expected:?}s")]
    StyleMismatch {
        kind: SubjectKind,
        expected: Style,
        found: Style,
    },
    #[error("subject `{kind}` does not handle: {missing}")]
    MissingOperations { kind: SubjectKind, missing: String },
    #[error("sample rate {0} outside (0, 1]")]
    SampleRate(f64),
    #[error("window interval must be positive")]
    ZeroInterval,
    #[error("queue capacity must be positive")]
    ZeroQueue,
    #[error("metrics agent address `{0}` does not resolve")]
    Agent(String),
    #[error("tag `{0}` is not a key:value pair")]
    Tag(String),
}

/// Display wrapper joining issues with `; `.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueList(pub Vec<ConfigIssue>);

impl fmt::Display for IssueList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}
