use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::clock::{Nanos, NANOS_PER_MILLI};
use super::correlator::EventCorrelator;
use super::stats::{self, Distribution};
use super::{InstanceId, Operation, SubjectKind};

// ─── Public types ────────────────────────────────────────────────

/// Summary view row: cumulative per-operation counts and time (ms).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryEntry {
    pub kind: SubjectKind,
    pub instance: InstanceId,
    pub counts: BTreeMap<Operation, u64>,
    pub times_ms: BTreeMap<Operation, u64>,
}

/// Stats view row: one distribution (µs) per operation of the style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsEntry {
    pub kind: SubjectKind,
    pub instance: InstanceId,
    pub operations: BTreeMap<Operation, Distribution>,
}

/// Immutable snapshot produced on every window tick or pull.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Window {
    pub group: String,
    /// Identifies the monitoring session; changes when a group restarts
    /// and its cumulative counters start over.
    pub session: Uuid,
    pub sequence: u64,
    pub produced_at: DateTime<Utc>,
    pub sample_rate: f64,
    pub summary: Vec<SummaryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Vec<StatsEntry>>,
}

impl Window {
    pub fn summary_for(&self, instance: &InstanceId) -> Option<&SummaryEntry> {
        self.summary.iter().find(|e| &e.instance == instance)
    }

    pub fn stats_for(&self, instance: &InstanceId) -> Option<&StatsEntry> {
        self.stats
            .as_deref()
            .and_then(|rows| rows.iter().find(|e| &e.instance == instance))
    }
}

// ─── Aggregator ──────────────────────────────────────────────────

/// Turns correlator state into window snapshots. Reading never mutates
/// the correlator; summary counters are cumulative since session start.
#[derive(Debug)]
pub struct WindowAggregator {
    group: String,
    session: Uuid,
    sample_rate: f64,
    stats_enabled: bool,
    sequence: u64,
}

impl WindowAggregator {
    pub fn new(
        group: impl Into<String>,
        session: Uuid,
        sample_rate: f64,
        stats_enabled: bool,
    ) -> Self {
        Self {
            group: group.into(),
            session,
            sample_rate,
            stats_enabled,
            sequence: 0,
        }
    }

    /// `1 / sample_rate`; 1.0 for a non-positive rate so a bad value can
    /// never inflate the figures.
    pub fn multiplier(&self) -> f64 {
        if self.sample_rate > 0.0 {
            1.0 / self.sample_rate
        } else {
            1.0
        }
    }

    pub fn build(&mut self, correlator: &EventCorrelator) -> Window {
        self.sequence += 1;
        let multiplier = self.multiplier();

        Window {
            group: self.group.clone(),
            session: self.session,
            sequence: self.sequence,
            produced_at: Utc::now(),
            sample_rate: self.sample_rate,
            summary: build_summary(correlator, multiplier),
            stats: self
                .stats_enabled
                .then(|| build_stats(correlator, multiplier)),
        }
    }
}

/// One row per registered instance, zero-filled for idle operations.
pub fn build_summary(correlator: &EventCorrelator, multiplier: f64) -> Vec<SummaryEntry> {
    let registry = correlator.registry();
    let mut rows = Vec::with_capacity(registry.instance_count());

    for (kind, style) in registry.kinds() {
        for instance in registry.instances_of(kind) {
            let mut counts = BTreeMap::new();
            let mut times_ms = BTreeMap::new();
            for &op in style.operations() {
                let acc = correlator.summary(instance, op);
                counts.insert(op, stats::round(acc.count as f64 * multiplier));
                times_ms.insert(op, scaled_millis(acc.total, multiplier));
            }
            rows.push(SummaryEntry {
                kind: kind.clone(),
                instance: instance.clone(),
                counts,
                times_ms,
            });
        }
    }
    rows
}

pub fn build_stats(correlator: &EventCorrelator, multiplier: f64) -> Vec<StatsEntry> {
    let registry = correlator.registry();
    let mut rows = Vec::with_capacity(registry.instance_count());

    for (kind, style) in registry.kinds() {
        for instance in registry.instances_of(kind) {
            let operations = style
                .operations()
                .iter()
                .map(|&op| {
                    let samples = correlator.samples(instance, op);
                    (op, Distribution::from_nanos(samples, multiplier))
                })
                .collect();
            rows.push(StatsEntry {
                kind: kind.clone(),
                instance: instance.clone(),
                operations,
            });
        }
    }
    rows
}

fn scaled_millis(total: Nanos, multiplier: f64) -> u64 {
    stats::round(total as f64 * multiplier / NANOS_PER_MILLI as f64)
}
