//! Group actor: the single writer that owns one cluster's or pipeline's
//! correlation state.
//!
//! Hooks enqueue open/close notifications through a [`GroupHandle`]
//! without blocking. The actor applies them one at a time in arrival
//! order, ticks windows on a timer, and answers explicit window pulls
//! from the same queue, so a pulled window reflects every notification
//! submitted before it.
//!
//! The queue is bounded. A hook that finds it full drops the
//! notification and bumps [`GroupHandle::dropped`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use super::clock::Nanos;
use super::correlator::EventCorrelator;
use super::registry::{Registration, SubjectRegistry};
use super::sink::{MetricSink, SinkMode, SinkRouter, StatsdSink};
use super::window::{Window, WindowAggregator};
use super::{InstanceId, Operation, SubjectKind, Track};
use crate::config::{ConfigError, GroupSpec, StatsRetention, ValidatedGroup};

type Latest = Option<Arc<Window>>;

// ─── Messages ────────────────────────────────────────────────────

enum Command {
    Open {
        kind: SubjectKind,
        instance: InstanceId,
        operation: Operation,
        at: Nanos,
    },
    Close {
        instance: InstanceId,
        operation: Operation,
        at: Nanos,
    },
    Window {
        reply: oneshot::Sender<Window>,
    },
    Shutdown,
}

// ─── Entry points ────────────────────────────────────────────────

/// Validate `spec` and spawn its actor on the current tokio runtime.
///
/// Push modes get a [`StatsdSink`] aimed at the configured agent.
pub fn start(spec: GroupSpec) -> Result<GroupHandle, ConfigError> {
    let group = spec.validate()?;

    let sink: Option<Arc<dyn MetricSink>> = match (group.sink_mode, group.agent) {
        (Some(mode), Some(agent)) if mode.is_push() => {
            let sink = StatsdSink::connect(agent, mode)
                .map_err(|source| ConfigError::Agent { agent, source })?;
            Some(Arc::new(sink))
        }
        _ => None,
    };
    Ok(spawn(group, sink))
}

/// Like [`start`], but push modes deliver to `sink` instead of UDP.
pub fn start_with_sink(
    spec: GroupSpec,
    sink: Arc<dyn MetricSink>,
) -> Result<GroupHandle, ConfigError> {
    let group = spec.validate()?;
    Ok(spawn(group, Some(sink)))
}

fn spawn(group: ValidatedGroup, sink: Option<Arc<dyn MetricSink>>) -> GroupHandle {
    let session = Uuid::new_v4();
    let name: Arc<str> = Arc::from(group.name.as_str());

    let router = match (group.sink_mode, sink) {
        (Some(mode), Some(sink)) if mode.is_push() => SinkRouter::push(
            mode,
            Arc::clone(&name),
            group.sample_rate,
            group.tags.clone(),
            sink,
        ),
        _ => SinkRouter::in_memory(),
    };

    let (tx, rx) = mpsc::channel(group.queue_capacity);
    let (windows, _) = watch::channel(None);
    // the actor holds the only strong reference, so subscriptions end
    // when it stops
    let windows = Arc::new(windows);
    let subscriptions = Arc::downgrade(&windows);

    let actor = GroupActor {
        name: Arc::clone(&name),
        correlator: EventCorrelator::new(SubjectRegistry::new(group.kinds.iter().cloned())),
        aggregator: WindowAggregator::new(
            group.name.clone(),
            session,
            group.sample_rate,
            group.sink_mode == Some(SinkMode::InMemory),
        ),
        router,
        stats_track: group.sink_mode.is_some(),
        retention: group.retention,
        windows,
    };

    tracing::info!(
        group = %name,
        %session,
        kinds = group.kinds.len(),
        sample_rate = group.sample_rate,
        interval_ms = group.window_interval.as_millis() as u64,
        statistics = ?group.sink_mode,
        queue = group.queue_capacity,
        "monitoring group started"
    );

    let task = tokio::spawn(actor.run(rx, group.window_interval));

    GroupHandle {
        name,
        session,
        tx,
        windows: subscriptions,
        dropped: Arc::new(AtomicU64::new(0)),
        task: Arc::new(Mutex::new(Some(task))),
    }
}

// ─── Handle ──────────────────────────────────────────────────────

/// Caller-owned reference to a running group. Cheap to clone; every
/// clone feeds the same actor.
#[derive(Clone)]
pub struct GroupHandle {
    name: Arc<str>,
    session: Uuid,
    tx: mpsc::Sender<Command>,
    windows: Weak<watch::Sender<Latest>>,
    dropped: Arc<AtomicU64>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl GroupHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Begin notification from the instrumentation hook.
    pub fn open(
        &self,
        kind: impl Into<SubjectKind>,
        instance: impl Into<InstanceId>,
        operation: Operation,
        at: Nanos,
    ) {
        self.send(Command::Open {
            kind: kind.into(),
            instance: instance.into(),
            operation,
            at,
        });
    }

    /// End notification. The kind is implied by the instance's
    /// registration, so it is only accepted for symmetry with `open`.
    pub fn close(
        &self,
        _kind: impl Into<SubjectKind>,
        instance: impl Into<InstanceId>,
        operation: Operation,
        at: Nanos,
    ) {
        self.send(Command::Close {
            instance: instance.into(),
            operation,
            at,
        });
    }

    /// Build a window now, after everything already queued. `None` once
    /// the group has stopped.
    pub async fn window(&self) -> Option<Window> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Window { reply }).await.is_err() {
            return None;
        }
        rx.await.ok()
    }

    /// Follow ticked windows. Holds at most the latest undelivered one.
    /// Subscribing to a stopped group yields an already finished
    /// subscription.
    pub fn subscribe(&self) -> WindowSubscription {
        let rx = match self.windows.upgrade() {
            Some(windows) => windows.subscribe(),
            None => watch::channel(None).1,
        };
        WindowSubscription { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.windows
            .upgrade()
            .map_or(0, |windows| windows.receiver_count())
    }

    /// Notifications dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Stop the actor and wait for it. State is discarded.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
        let mut guard = self.task.lock().await;
        if let Some(task) = guard.take() {
            // JoinError only means the task already finished
            let _ = task.await;
        }
    }

    fn send(&self, cmd: Command) {
        match self.tx.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    tracing::warn!(
                        group = %self.name,
                        "command queue full, dropping notifications"
                    );
                }
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!(group = %self.name, "group stopped, notification dropped");
            }
        }
    }
}

impl std::fmt::Debug for GroupHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupHandle")
            .field("name", &self.name)
            .field("session", &self.session)
            .field("running", &self.is_running())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Latest-value view of a group's ticked windows. A slow reader skips
/// windows instead of queueing them; dropping it only stops delivery.
pub struct WindowSubscription {
    rx: watch::Receiver<Latest>,
}

impl WindowSubscription {
    /// Wait for the next window. `None` once the group has stopped.
    pub async fn next(&mut self) -> Option<Arc<Window>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(window) = self.rx.borrow_and_update().clone() {
                return Some(window);
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<Window>> {
        WatchStream::from_changes(self.rx).filter_map(|latest| latest)
    }
}

// ─── Actor ───────────────────────────────────────────────────────

struct GroupActor {
    name: Arc<str>,
    correlator: EventCorrelator,
    aggregator: WindowAggregator,
    router: SinkRouter,
    /// Whether opens/closes also feed the stats track.
    stats_track: bool,
    retention: StatsRetention,
    windows: Arc<watch::Sender<Latest>>,
}

impl GroupActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, interval: std::time::Duration) {
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle(cmd),
                },
                _ = ticker.tick() => self.publish(),
            }
        }

        tracing::info!(
            group = %self.name,
            instances = self.correlator.registry().instance_count(),
            "monitoring group stopped"
        );
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Open {
                kind,
                instance,
                operation,
                at,
            } => self.open(&kind, &instance, operation, at),
            Command::Close {
                instance,
                operation,
                at,
            } => {
                self.correlator.close_summary(&instance, operation, at);
                if self.stats_track {
                    self.correlator
                        .close_stats(&instance, operation, at, &self.router);
                }
            }
            Command::Window { reply } => {
                let window = self.build();
                let _ = reply.send(window);
            }
            Command::Shutdown => {}
        }
    }

    fn open(&mut self, kind: &SubjectKind, instance: &InstanceId, operation: Operation, at: Nanos) {
        let outcome = self
            .correlator
            .open(Track::Summary, kind, instance, operation, at);
        match outcome {
            Registration::New => {
                tracing::debug!(group = %self.name, %kind, %instance, "instance registered");
            }
            Registration::Known => {}
            rejected => {
                tracing::debug!(
                    group = %self.name,
                    %kind,
                    %instance,
                    %operation,
                    reason = ?rejected,
                    "open rejected"
                );
                return;
            }
        }
        if self.stats_track {
            self.correlator
                .open(Track::Stats, kind, instance, operation, at);
        }
    }

    fn build(&mut self) -> Window {
        let window = self.aggregator.build(&self.correlator);
        if self.retention == StatsRetention::PerWindow {
            self.correlator.clear_samples();
        }
        window
    }

    /// Hand a ticked window to subscribers, or discard it if there are
    /// none.
    fn publish(&mut self) {
        let window = self.build();
        let sequence = window.sequence;
        if self.windows.send(Some(Arc::new(window))).is_err() {
            tracing::trace!(group = %self.name, sequence, "no subscribers, window discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{GroupOptions, StatisticsMode};
    use crate::monitor::{Subject, Worker};

    fn cluster(options: GroupOptions) -> GroupSpec {
        let subjects: Vec<Arc<dyn Subject>> = vec![Arc::new(Worker::server("cache"))];
        GroupSpec::cluster("web", subjects).with_options(options)
    }

    #[tokio::test]
    async fn test_pull_sees_everything_queued_before_it() {
        let handle = start(cluster(GroupOptions::default())).unwrap();

        for i in 0..3u64 {
            handle.open("cache", "w1", Operation::Call, i * 100);
            handle.close("cache", "w1", Operation::Call, i * 100 + 50);
        }
        let window = handle.window().await.unwrap();
        let row = window.summary_for(&"w1".into()).unwrap();
        assert_eq!(row.counts[&Operation::Call], 3);
        assert!(window.stats.is_none());

        handle.shutdown().await;
        assert!(handle.window().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_reach_subscribers() {
        let handle = start(cluster(GroupOptions {
            window_interval_ms: 1000,
            statistics: StatisticsMode::InMemory,
            ..GroupOptions::default()
        }))
        .unwrap();
        let mut sub = handle.subscribe();

        handle.open("cache", "w1", Operation::Info, 0);
        handle.close("cache", "w1", Operation::Info, 2_000);

        let window = sub.next().await.unwrap();
        assert_eq!(window.sequence, 1);
        let stats = window.stats_for(&"w1".into()).unwrap();
        assert_eq!(stats.operations[&Operation::Info].sum, 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_without_subscribers_are_discarded() {
        let handle = start(cluster(GroupOptions::default())).unwrap();
        assert_eq!(handle.subscriber_count(), 0);

        time::sleep(Duration::from_millis(3_500)).await;
        // three ticks went nowhere; the pull is the fourth window
        let window = handle.window().await.unwrap();
        assert_eq!(window.sequence, 4);

        let sub = handle.subscribe();
        assert_eq!(handle.subscriber_count(), 1);
        drop(sub);
        assert_eq!(handle.subscriber_count(), 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subscriber_skips_to_latest_window() {
        let handle = start(cluster(GroupOptions::default())).unwrap();
        let mut sub = handle.subscribe();

        for i in 0..5u64 {
            handle.open("cache", "w1", Operation::Call, i * 10);
            handle.close("cache", "w1", Operation::Call, i * 10 + 5);
        }
        // three ticks pass without the subscriber reading
        time::sleep(Duration::from_millis(3_500)).await;

        let window = sub.next().await.unwrap();
        assert_eq!(window.sequence, 3);
        let row = window.summary_for(&"w1".into()).unwrap();
        assert_eq!(row.counts[&Operation::Call], 5);

        for i in 0..3u64 {
            handle.open("cache", "w1", Operation::Call, 1_000 + i * 10);
            handle.close("cache", "w1", Operation::Call, 1_000 + i * 10 + 5);
        }
        let pulled = handle.window().await.unwrap();
        assert_eq!(pulled.sequence, 4);
        let row = pulled.summary_for(&"w1".into()).unwrap();
        assert_eq!(row.counts[&Operation::Call], 8);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscription_ends_when_group_stops() {
        let handle = start(cluster(GroupOptions::default())).unwrap();
        let mut sub = handle.subscribe();
        let stream = handle.subscribe().into_stream();

        handle.shutdown().await;

        let wait = Duration::from_secs(1);
        let next = time::timeout(wait, sub.next()).await;
        assert!(matches!(next, Ok(None)));
        let rest: Vec<_> = time::timeout(wait, stream.collect()).await.unwrap();
        assert!(rest.is_empty());

        assert_eq!(handle.subscriber_count(), 0);
        let mut late = handle.subscribe();
        assert!(late.next().await.is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let handle = start(cluster(GroupOptions {
            queue_capacity: 4,
            ..GroupOptions::default()
        }))
        .unwrap();

        // the actor cannot run until this task yields
        for i in 0..5u64 {
            handle.open("cache", "w1", Operation::Info, i * 10);
            handle.close("cache", "w1", Operation::Info, i * 10 + 5);
        }
        assert_eq!(handle.dropped(), 6);

        let window = handle.window().await.unwrap();
        let row = window.summary_for(&"w1".into()).unwrap();
        assert_eq!(row.counts[&Operation::Info], 2);

        handle.shutdown().await;
    }
}
