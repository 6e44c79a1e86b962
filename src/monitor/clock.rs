use std::sync::OnceLock;
use std::time::Instant;

/// Engine-internal time unit: nanoseconds on a monotonic clock.
pub type Nanos = u64;

pub const NANOS_PER_MICRO: u64 = 1_000;
pub const NANOS_PER_MILLI: u64 = 1_000_000;

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Monotonic timestamp for hook callers, relative to the first call in
/// this process.
pub fn now() -> Nanos {
    let anchor = *ANCHOR.get_or_init(Instant::now);
    u64::try_from(anchor.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
