use std::collections::HashMap;

use super::clock::Nanos;
use super::registry::{Registration, SubjectRegistry};
use super::sink::{CompletedEvent, Dispatch, SinkRouter};
use super::{InstanceId, MetricKey, Operation, SubjectKind, Track};

/// Running `{count, total}` for one key on the summary track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryAccumulator {
    pub count: u64,
    pub total: Nanos,
}

/// Open/close matching state for one group.
///
/// Two independent tracks, each with its own pending-open map. Owned by
/// a single writer (the group actor), so plain maps suffice.
#[derive(Debug)]
pub struct EventCorrelator {
    registry: SubjectRegistry,

    summary_pending: HashMap<MetricKey, Nanos>,
    summary: HashMap<MetricKey, SummaryAccumulator>,

    stats_pending: HashMap<MetricKey, Nanos>,
    stats: HashMap<MetricKey, Vec<Nanos>>,
}

impl EventCorrelator {
    pub fn new(registry: SubjectRegistry) -> Self {
        Self {
            registry,
            summary_pending: HashMap::new(),
            summary: HashMap::new(),
            stats_pending: HashMap::new(),
            stats: HashMap::new(),
        }
    }

    /// Register `instance` under `kind` and record a pending open on
    /// `track`. A later open for the same key replaces an earlier one.
    ///
    /// Returns the registration outcome; nothing is recorded unless the
    /// instance was accepted and `operation` belongs to the kind's style.
    pub fn open(
        &mut self,
        track: Track,
        kind: &SubjectKind,
        instance: &InstanceId,
        operation: Operation,
        start: Nanos,
    ) -> Registration {
        match self.registry.style_of(kind) {
            Some(style) if style.supports(operation) => {}
            Some(_) => return Registration::Unsupported,
            None => return Registration::UnknownKind,
        }

        let outcome = self.registry.register(kind, instance);
        if !outcome.is_accepted() {
            return outcome;
        }

        let key = MetricKey::new(instance.clone(), operation);
        match track {
            Track::Summary => self.summary_pending.insert(key, start),
            Track::Stats => self.stats_pending.insert(key, start),
        };
        outcome
    }

    /// Match a close on the summary track. Returns the recorded duration,
    /// or `None` when there was no pending open.
    pub fn close_summary(
        &mut self,
        instance: &InstanceId,
        operation: Operation,
        end: Nanos,
    ) -> Option<Nanos> {
        let key = MetricKey::new(instance.clone(), operation);
        let start = self.summary_pending.remove(&key)?;
        let duration = end.saturating_sub(start);

        let acc = self.summary.entry(key).or_default();
        acc.count += 1;
        acc.total = acc.total.saturating_add(duration);
        Some(duration)
    }

    /// Match a close on the stats track and hand the completed event to
    /// `router`. The duration is only kept locally when the router says
    /// so.
    pub fn close_stats(
        &mut self,
        instance: &InstanceId,
        operation: Operation,
        end: Nanos,
        router: &SinkRouter,
    ) -> Option<Dispatch> {
        let key = MetricKey::new(instance.clone(), operation);
        let start = self.stats_pending.remove(&key)?;
        let kind = self.registry.kind_of(instance)?.clone();

        let event = CompletedEvent {
            kind,
            instance: key.instance.clone(),
            operation,
            duration: end.saturating_sub(start),
        };
        let dispatch = router.dispatch(&event);
        if dispatch == Dispatch::Retain {
            self.stats.entry(key).or_default().push(event.duration);
        }
        Some(dispatch)
    }

    pub fn registry(&self) -> &SubjectRegistry {
        &self.registry
    }

    pub fn summary(&self, instance: &InstanceId, operation: Operation) -> SummaryAccumulator {
        self.summary
            .get(&MetricKey::new(instance.clone(), operation))
            .copied()
            .unwrap_or_default()
    }

    /// Retained stats-track durations for one key, in completion order.
    pub fn samples(&self, instance: &InstanceId, operation: Operation) -> &[Nanos] {
        self.stats
            .get(&MetricKey::new(instance.clone(), operation))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Drop every retained stats-track duration. Pending opens and the
    /// summary track are untouched.
    pub fn clear_samples(&mut self) {
        self.stats.clear();
    }

    pub fn pending(&self, track: Track) -> usize {
        match track {
            Track::Summary => self.summary_pending.len(),
            Track::Stats => self.stats_pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::monitor::sink::{MetricSink, PushMetric, SinkMode};
    use crate::monitor::Style;

    fn correlator() -> EventCorrelator {
        EventCorrelator::new(SubjectRegistry::new([
            (SubjectKind::from("cache"), Style::Server),
            (SubjectKind::from("producer"), Style::Stage),
        ]))
    }

    fn kind() -> SubjectKind {
        "cache".into()
    }

    #[test]
    fn test_matched_pair_updates_summary() {
        let mut c = correlator();
        let w1 = InstanceId::from("w1");

        c.open(Track::Summary, &kind(), &w1, Operation::Call, 100);
        assert_eq!(c.close_summary(&w1, Operation::Call, 350), Some(250));

        let acc = c.summary(&w1, Operation::Call);
        assert_eq!(acc, SummaryAccumulator { count: 1, total: 250 });
        assert_eq!(c.pending(Track::Summary), 0);
    }

    #[test]
    fn test_unmatched_close_is_noop() {
        let mut c = correlator();
        let w1 = InstanceId::from("w1");

        assert_eq!(c.close_summary(&w1, Operation::Call, 10), None);
        assert_eq!(
            c.close_stats(&w1, Operation::Call, 10, &SinkRouter::in_memory()),
            None
        );
        assert_eq!(c.summary(&w1, Operation::Call), SummaryAccumulator::default());
        assert!(c.samples(&w1, Operation::Call).is_empty());
        assert_eq!(c.registry().instance_count(), 0);
    }

    #[test]
    fn test_last_open_wins() {
        let mut c = correlator();
        let w1 = InstanceId::from("w1");

        c.open(Track::Summary, &kind(), &w1, Operation::Cast, 10);
        c.open(Track::Summary, &kind(), &w1, Operation::Cast, 40);
        assert_eq!(c.close_summary(&w1, Operation::Cast, 100), Some(60));
        assert_eq!(c.close_summary(&w1, Operation::Cast, 200), None);
        assert_eq!(c.summary(&w1, Operation::Cast).count, 1);
    }

    #[test]
    fn test_tracks_are_independent() {
        let mut c = correlator();
        let w1 = InstanceId::from("w1");
        let router = SinkRouter::in_memory();

        c.open(Track::Summary, &kind(), &w1, Operation::Call, 0);
        assert_eq!(c.close_stats(&w1, Operation::Call, 5, &router), None);
        assert_eq!(c.close_summary(&w1, Operation::Call, 5), Some(5));

        c.open(Track::Stats, &kind(), &w1, Operation::Call, 10);
        assert_eq!(c.close_summary(&w1, Operation::Call, 15), None);
        assert_eq!(
            c.close_stats(&w1, Operation::Call, 15, &router),
            Some(Dispatch::Retain)
        );
        assert_eq!(c.samples(&w1, Operation::Call), &[5]);
    }

    #[test]
    fn test_stats_samples_keep_completion_order() {
        let mut c = correlator();
        let router = SinkRouter::in_memory();
        let w1 = InstanceId::from("w1");

        c.open(Track::Stats, &kind(), &w1, Operation::Info, 0);
        c.close_stats(&w1, Operation::Info, 90, &router);
        c.open(Track::Stats, &kind(), &w1, Operation::Info, 100);
        c.close_stats(&w1, Operation::Info, 110, &router);

        assert_eq!(c.samples(&w1, Operation::Info), &[90, 10]);
        c.clear_samples();
        assert!(c.samples(&w1, Operation::Info).is_empty());
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PushMetric>>);

    impl MetricSink for Recorder {
        fn push(&self, metric: &PushMetric) {
            self.0.lock().push(metric.clone());
        }
    }

    #[test]
    fn test_push_mode_keeps_nothing_locally() {
        let mut c = correlator();
        let rec = Arc::new(Recorder::default());
        let router = SinkRouter::push(SinkMode::Statsd, "g", 1.0, vec![], rec.clone());
        let w1 = InstanceId::from("w1");

        for i in 0..5u64 {
            c.open(Track::Stats, &kind(), &w1, Operation::Call, i * 10_000);
            let end = i * 10_000 + (i + 1) * 1_000;
            let dispatch = c.close_stats(&w1, Operation::Call, end, &router);
            assert_eq!(dispatch, Some(Dispatch::Forwarded));
        }

        assert!(c.samples(&w1, Operation::Call).is_empty());
        let pushed = rec.0.lock();
        let durations: Vec<u64> = pushed.iter().map(|m| m.duration_us).collect();
        assert_eq!(durations, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_operation_outside_style_is_ignored() {
        let mut c = correlator();
        let w1 = InstanceId::from("w1");

        let outcome = c.open(Track::Summary, &kind(), &w1, Operation::Demand, 0);
        assert_eq!(outcome, Registration::Unsupported);
        assert_eq!(c.pending(Track::Summary), 0);
        assert_eq!(c.registry().instance_count(), 0);
    }

    #[test]
    fn test_conflicting_kind_is_rejected() {
        let mut c = correlator();
        let w1 = InstanceId::from("w1");

        c.open(Track::Summary, &kind(), &w1, Operation::Call, 0);
        let outcome = c.open(Track::Summary, &"producer".into(), &w1, Operation::Cast, 5);
        assert_eq!(outcome, Registration::Conflict(kind()));
        assert_eq!(c.close_summary(&w1, Operation::Cast, 9), None);
    }

    #[test]
    fn test_clock_skew_saturates() {
        let mut c = correlator();
        let w1 = InstanceId::from("w1");

        c.open(Track::Summary, &kind(), &w1, Operation::Call, 500);
        assert_eq!(c.close_summary(&w1, Operation::Call, 100), Some(0));
    }
}
