use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Injectable time source. Production uses [`system_now_fn`]; tests substitute
/// a controlled clock so flush boundaries are deterministic.
pub type NowFn = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// Returns a `NowFn` backed by the system clock.
pub fn system_now_fn() -> NowFn {
    Arc::new(SystemTime::now)
}

/// Converts a timestamp to nanoseconds since the Unix epoch. Pre-epoch
/// instants map to negative values.
pub fn unix_nanos(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX),
    }
}

/// Computes the aligned flush boundary: `t` truncated down to a multiple of
/// `resolution`, in Unix nanoseconds. A zero resolution degenerates to the
/// raw timestamp.
pub fn truncate_to_resolution(t: SystemTime, resolution: Duration) -> i64 {
    let nanos = unix_nanos(t);
    let res = i64::try_from(resolution.as_nanos()).unwrap_or(i64::MAX);
    if res <= 0 {
        return nanos;
    }
    nanos - nanos.rem_euclid(res)
}

/// Process-wide happens-before fence between ingest and flush-boundary
/// observation.
///
/// This is a memory barrier disguised as a lock, not a mutex over shared
/// state. Ingest holds the read side around any action whose effect must be
/// visible at the next flush boundary; the flusher briefly takes the write
/// side to sample `now` only after all such readers have drained. It does not
/// serialize ingest with ingest.
pub struct TimeBarrier {
    inner: RwLock<()>,
}

impl TimeBarrier {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(()),
        }
    }

    /// Enters an ingest critical section. Hold the guard for the duration of
    /// the action that must be flushed at the next boundary.
    pub fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read()
    }

    /// Taken by the flusher immediately before observing `now`. Blocks until
    /// all in-flight ingest sections have released.
    pub fn observe(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write()
    }
}

impl Default for TimeBarrier {
    fn default() -> Self {
        Self::new()
    }
}
