use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::panic::RefUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence::{MetricError, StatsdClient, Timed, UdpMetricSink};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::clock::{Nanos, NANOS_PER_MICRO};
use super::{InstanceId, Operation, SubjectKind};

/// Minimum gap between two transport-failure warnings from one sink.
const WARN_EVERY: Duration = Duration::from_secs(10);

// ─── Public types ────────────────────────────────────────────────

/// Where completed stats-track events go. Fixed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkMode {
    /// Retain durations locally for windowed distributions.
    InMemory,
    /// Push each event as a plain statsd timer.
    Statsd,
    /// Push each event as a Datadog-style timer with tags.
    Tagged,
}

impl SinkMode {
    pub fn is_push(self) -> bool {
        !matches!(self, Self::InMemory)
    }
}

/// A matched open/close pair on the stats track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedEvent {
    pub kind: SubjectKind,
    pub instance: InstanceId,
    pub operation: Operation,
    pub duration: Nanos,
}

/// One observation handed to an external agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMetric {
    pub group: Arc<str>,
    pub kind: SubjectKind,
    pub instance: InstanceId,
    pub operation: Operation,
    pub duration_us: u64,
    pub sample_rate: f64,
    /// `key:value` dimensions; empty in plain statsd mode.
    pub tags: Vec<String>,
}

/// Best-effort destination for pushed observations. Implementations
/// must not block and must swallow their own transport errors.
pub trait MetricSink: Send + Sync {
    fn push(&self, metric: &PushMetric);
}

/// Result of routing one completed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Caller keeps the duration in its stats accumulator.
    Retain,
    /// Event left the process; nothing to keep.
    Forwarded,
}

// ─── Router ──────────────────────────────────────────────────────

/// Decides, per completed stats-track event, between local retention
/// and an immediate push.
#[derive(Clone)]
pub struct SinkRouter {
    mode: SinkMode,
    group: Arc<str>,
    sample_rate: f64,
    extra_tags: Arc<[String]>,
    sink: Option<Arc<dyn MetricSink>>,
}

impl SinkRouter {
    pub fn in_memory() -> Self {
        Self {
            mode: SinkMode::InMemory,
            group: Arc::from(""),
            sample_rate: 1.0,
            extra_tags: Arc::from(Vec::new()),
            sink: None,
        }
    }

    /// Router for a push mode. `InMemory` passed here behaves like
    /// [`SinkRouter::in_memory`].
    pub fn push(
        mode: SinkMode,
        group: impl Into<Arc<str>>,
        sample_rate: f64,
        extra_tags: Vec<String>,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        if !mode.is_push() {
            return Self::in_memory();
        }
        Self {
            mode,
            group: group.into(),
            sample_rate,
            extra_tags: extra_tags.into(),
            sink: Some(sink),
        }
    }

    pub fn mode(&self) -> SinkMode {
        self.mode
    }

    pub fn dispatch(&self, event: &CompletedEvent) -> Dispatch {
        let Some(sink) = &self.sink else {
            return Dispatch::Retain;
        };
        sink.push(&self.to_metric(event));
        Dispatch::Forwarded
    }

    fn to_metric(&self, event: &CompletedEvent) -> PushMetric {
        let tags = match self.mode {
            SinkMode::Tagged => {
                let mut tags = Vec::with_capacity(4 + self.extra_tags.len());
                tags.push(format!("group:{}", self.group));
                tags.push(format!("kind:{}", event.kind));
                tags.push(format!("instance:{}", event.instance));
                tags.push(format!("operation:{}", event.operation));
                tags.extend(self.extra_tags.iter().cloned());
                tags
            }
            _ => Vec::new(),
        };

        PushMetric {
            group: Arc::clone(&self.group),
            kind: event.kind.clone(),
            instance: event.instance.clone(),
            operation: event.operation,
            duration_us: nanos_to_micros(event.duration),
            sample_rate: self.sample_rate,
            tags,
        }
    }
}

impl std::fmt::Debug for SinkRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkRouter")
            .field("mode", &self.mode)
            .field("group", &self.group)
            .field("sample_rate", &self.sample_rate)
            .field("extra_tags", &self.extra_tags)
            .finish_non_exhaustive()
    }
}

/// Nanoseconds → microseconds, rounded half up.
pub fn nanos_to_micros(ns: Nanos) -> u64 {
    ns / NANOS_PER_MICRO + u64::from(ns % NANOS_PER_MICRO >= NANOS_PER_MICRO / 2)
}

// ─── statsd agent client ─────────────────────────────────────────

/// Fire-and-forget statsd / Datadog client built on `cadence`.
///
/// The UDP socket is non-blocking: a full send buffer or an unreachable
/// agent drops the metric, bumps a counter and (at most every ten
/// seconds) logs a warning.
pub struct StatsdSink {
    client: StatsdClient,
    target: String,
    mode: SinkMode,
    sent: AtomicU64,
    failed: AtomicU64,
    last_warning: Mutex<Option<Instant>>,
}

impl StatsdSink {
    pub fn connect(agent: SocketAddr, mode: SinkMode) -> io::Result<Self> {
        let local: SocketAddr = if agent.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        let udp = UdpMetricSink::from(agent, socket)
            .map_err(io::Error::other)?;
        Ok(Self::from_sink(agent.to_string(), udp, mode))
    }

    /// Wrap any `cadence` sink; metric names carry the group themselves,
    /// so the client has no prefix.
    pub fn from_sink<S>(target: impl Into<String>, sink: S, mode: SinkMode) -> Self
    where
        S: cadence::MetricSink + Send + Sync + RefUnwindSafe + 'static,
    {
        Self {
            client: StatsdClient::from_sink("", sink),
            target: target.into(),
            mode,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_warning: Mutex::new(None),
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn note_failure(&self, err: &MetricError) {
        let failed = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
        let mut last = self.last_warning.lock();
        if last.map_or(true, |at| at.elapsed() >= WARN_EVERY) {
            *last = Some(Instant::now());
            tracing::warn!(
                agent = %self.target,
                error = %err,
                failed,
                "metrics agent push failed, dropping metrics"
            );
        }
    }
}

impl MetricSink for StatsdSink {
    fn push(&self, metric: &PushMetric) {
        let key = metric_name(metric, self.mode);
        let tags: Vec<String> = match self.mode {
            SinkMode::Tagged => metric.tags.iter().map(|t| sanitize_tag(t)).collect(),
            _ => Vec::new(),
        };
        let rate = (metric.sample_rate < 1.0).then(|| metric.sample_rate.to_string());

        let mut builder = self.client.time_with_tags(&key, metric.duration_us);
        for tag in &tags {
            builder = match tag.split_once(':') {
                Some((name, value)) => builder.with_tag(name, value),
                None => builder.with_tag_value(tag),
            };
        }
        if let (SinkMode::Tagged, Some(rate)) = (self.mode, rate.as_deref()) {
            builder = builder.with_tag("sample_rate", rate);
        }

        match builder.try_send() {
            Ok(_) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.note_failure(&e),
        }
    }
}

impl std::fmt::Debug for StatsdSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsdSink")
            .field("target", &self.target)
            .field("mode", &self.mode)
            .field("sent", &self.sent())
            .field("failed", &self.failed())
            .finish_non_exhaustive()
    }
}

/// Timer name for one observation.
///
/// * statsd: `group.kind.instance.operation`
/// * tagged: `group.kind.operation`, the instance travels as a tag
pub fn metric_name(metric: &PushMetric, mode: SinkMode) -> String {
    let group = sanitize(&metric.group);
    let kind = sanitize(metric.kind.as_str());
    match mode {
        SinkMode::Tagged => format!("{group}.{kind}.{}", metric.operation),
        _ => {
            let instance = sanitize(metric.instance.as_str());
            format!("{group}.{kind}.{instance}.{}", metric.operation)
        }
    }
}

/// Metric name segments may not carry protocol separators.
fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            ':' | '|' | '@' | '#' | ',' | '.' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Tags keep their first `:` as the key/value separator.
fn sanitize_tag(tag: &str) -> String {
    tag.chars()
        .map(|c| match c {
            '|' | '@' | '#' | ',' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PushMetric>>);

    impl MetricSink for Recorder {
        fn push(&self, metric: &PushMetric) {
            self.0.lock().push(metric.clone());
        }
    }

    fn event(duration: Nanos) -> CompletedEvent {
        CompletedEvent {
            kind: "cache".into(),
            instance: "w1".into(),
            operation: Operation::Call,
            duration,
        }
    }

    #[test]
    fn test_in_memory_retains() {
        let router = SinkRouter::in_memory();
        assert_eq!(router.dispatch(&event(10)), Dispatch::Retain);
    }

    #[test]
    fn test_statsd_forwards_without_tags() {
        let rec = Arc::new(Recorder::default());
        let router = SinkRouter::push(SinkMode::Statsd, "web", 1.0, vec![], rec.clone());

        assert_eq!(router.dispatch(&event(2_500_000)), Dispatch::Forwarded);
        let pushed = rec.0.lock();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].duration_us, 2_500);
        assert!(pushed[0].tags.is_empty());
    }

    #[test]
    fn test_tagged_adds_dimensions() {
        let rec = Arc::new(Recorder::default());
        let router = SinkRouter::push(
            SinkMode::Tagged,
            "web",
            1.0,
            vec!["env:prod".into()],
            rec.clone(),
        );
        router.dispatch(&event(1_000));

        let pushed = rec.0.lock();
        assert_eq!(
            pushed[0].tags,
            vec![
                "group:web".to_string(),
                "kind:cache".to_string(),
                "instance:w1".to_string(),
                "operation:call".to_string(),
                "env:prod".to_string(),
            ]
        );
    }

    #[test]
    fn test_nanos_to_micros_rounds_half_up() {
        assert_eq!(nanos_to_micros(1_000_000), 1_000);
        assert_eq!(nanos_to_micros(1_499), 1);
        assert_eq!(nanos_to_micros(1_500), 2);
        assert_eq!(nanos_to_micros(0), 0);
    }

    fn metric(instance: &str, operation: Operation, duration_us: u64, rate: f64) -> PushMetric {
        PushMetric {
            group: Arc::from("web"),
            kind: "cache".into(),
            instance: instance.into(),
            operation,
            duration_us,
            sample_rate: rate,
            tags: vec![],
        }
    }

    #[test]
    fn test_metric_name_statsd() {
        let m = metric("<0.1.0>", Operation::Cast, 42, 1.0);
        assert_eq!(metric_name(&m, SinkMode::Statsd), "web.cache.<0_1_0>.cast");
    }

    #[test]
    fn test_metric_name_tagged_drops_instance() {
        let m = metric("w1", Operation::Info, 7, 1.0);
        assert_eq!(metric_name(&m, SinkMode::Tagged), "web.cache.info");
    }

    #[test]
    fn test_statsd_sink_writes_plain_timer() {
        let (rx, spy) = cadence::SpyMetricSink::new();
        let sink = StatsdSink::from_sink("spy", spy, SinkMode::Statsd);

        sink.push(&metric("w1", Operation::Cast, 42, 0.5));

        let line = String::from_utf8(rx.try_recv().unwrap()).unwrap();
        assert_eq!(line, "web.cache.w1.cast:42|ms");
        assert_eq!(sink.sent(), 1);
    }

    #[test]
    fn test_tagged_sink_writes_dimensions() {
        let (rx, spy) = cadence::SpyMetricSink::new();
        let sink = StatsdSink::from_sink("spy", spy, SinkMode::Tagged);
        let mut m = metric("w1", Operation::Info, 7, 0.25);
        m.tags = vec!["kind:cache".into(), "instance:w1".into(), "canary".into()];

        sink.push(&m);

        let line = String::from_utf8(rx.try_recv().unwrap()).unwrap();
        assert_eq!(
            line,
            "web.cache.info:7|ms|#kind:cache,instance:w1,canary,sample_rate:0.25"
        );
    }

    #[test]
    fn test_udp_round_trip() {
        let agent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sink = StatsdSink::connect(agent.local_addr().unwrap(), SinkMode::Statsd).unwrap();
        let mut m = metric("i", Operation::Call, 1, 1.0);
        m.group = Arc::from("g");
        m.kind = "k".into();
        sink.push(&m);

        let mut buf = [0u8; 128];
        let (n, _) = agent.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"g.k.i.call:1|ms");
        assert_eq!(sink.sent(), 1);
        assert_eq!(sink.failed(), 0);
    }
}
