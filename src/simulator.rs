use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::monitor::{clock, GroupHandle, Operation, Style, SubjectKind};

// ─── Public entry point ──────────────────────────────────────────

/// Synthetic workload for one group: `instances` worker tasks per kind,
/// each looping over begin/end pairs until `running` goes false.
#[derive(Debug, Clone)]
pub struct Workload {
    pub kinds: Vec<SubjectKind>,
    pub style: Style,
    pub instances: u32,
    /// Upper bound of a simulated operation latency (μs)
    pub max_latency_us: u64,
    /// Pause between two operations of one worker (μs)
    pub idle_us: u64,
}

/// Spawns the workers and waits for all of them to stop.
pub async fn run(handle: GroupHandle, workload: Workload, running: Arc<AtomicBool>) {
    let mut handles = Vec::with_capacity(workload.kinds.len() * workload.instances as usize);

    for (k, kind) in workload.kinds.iter().enumerate() {
        for n in 0..workload.instances {
            let seed = 1000 + (k as u64) * 100 + u64::from(n);
            let instance = format!("{}-{}-{:02}", handle.name(), kind, n);
            let worker = Worker {
                handle: handle.clone(),
                kind: kind.clone(),
                instance,
                style: workload.style,
                max_latency_us: workload.max_latency_us.max(1),
                idle_us: workload.idle_us,
            };
            let running = running.clone();
            handles.push(tokio::spawn(worker.run(seed, running)));
        }
    }

    tracing::info!(group = handle.name(), workers = handles.len(), "simulated workload started");

    for h in handles {
        let _ = h.await;
    }
}

// ─── Worker loop ─────────────────────────────────────────────────

struct Worker {
    handle: GroupHandle,
    kind: SubjectKind,
    instance: String,
    style: Style,
    max_latency_us: u64,
    idle_us: u64,
}

impl Worker {
    async fn run(self, seed: u64, running: Arc<AtomicBool>) {
        // Each worker gets its own deterministic RNG seeded uniquely.
        let mut rng = StdRng::seed_from_u64(seed);
        let ops = self.style.operations();

        while running.load(Ordering::Relaxed) {
            let op = pick(&mut rng, ops);
            let latency = rng.gen_range(1..=self.max_latency_us);

            self.handle
                .open(self.kind.clone(), self.instance.as_str(), op, clock::now());
            tokio::time::sleep(Duration::from_micros(latency)).await;
            self.handle
                .close(self.kind.clone(), self.instance.as_str(), op, clock::now());

            if self.idle_us > 0 {
                tokio::time::sleep(Duration::from_micros(self.idle_us)).await;
            }
        }
    }
}

/// Calls dominate, the remaining kinds share the rest evenly.
fn pick(rng: &mut StdRng, ops: &[Operation]) -> Operation {
    if rng.gen_bool(0.6) {
        return ops
            .iter()
            .copied()
            .find(|op| *op == Operation::Call || *op == Operation::Events)
            .unwrap_or(ops[0]);
    }
    ops[rng.gen_range(0..ops.len())]
}
