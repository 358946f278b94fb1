use std::fmt;
use std::time::Duration;

/// An aggregated metric identity split into three chunks so callers can share
/// a common prefix/suffix (e.g. `stats.` / `.p99`) across many metrics
/// without concatenating strings on the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedId<'a> {
    pub prefix: &'a [u8],
    pub data: &'a [u8],
    pub suffix: &'a [u8],
}

impl fmt::Display for ChunkedId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            String::from_utf8_lossy(self.prefix),
            String::from_utf8_lossy(self.data),
            String::from_utf8_lossy(self.suffix),
        )
    }
}

/// Storage policy attached to every emitted sample: the resolution the value
/// was aggregated at and how long downstream should retain it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoragePolicy {
    pub resolution: Duration,
    pub retention: Duration,
}

impl StoragePolicy {
    pub const fn new(resolution: Duration, retention: Duration) -> Self {
        Self {
            resolution,
            retention,
        }
    }
}

impl fmt::Display for StoragePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{:?}", self.resolution, self.retention)
    }
}

/// One finished sample handed to the emit callback during a flush.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedSample<'a> {
    pub id: ChunkedId<'a>,
    /// Sample timestamp as nanoseconds since the Unix epoch.
    pub time_ns: i64,
    pub value: f64,
    pub policy: StoragePolicy,
}

/// Emit callback passed into [`MetricElem::consume`]. Single-threaded for the
/// duration of one element's consume; emission interleaves with size-based
/// frame splitting, which is why elements emit through a callback instead of
/// returning a materialized batch.
pub type EmitFn<'a> = &'a mut dyn FnMut(ChunkedSample<'_>);

/// An aggregation state machine for one `(id, policy, resolution)` tuple.
///
/// The engine treats elements as opaque: it drives them forward at aligned
/// boundaries and collects them once they report completion. The aggregation
/// math (counters, gauges, timers, quantiles) lives behind this trait.
pub trait MetricElem: Send {
    /// Emits all samples finished at or before `boundary_ns`. Returns `true`
    /// once the element is exhausted and may be collected from its list.
    fn consume(&mut self, boundary_ns: i64, emit: EmitFn<'_>) -> bool;

    /// Releases element-held resources. Called exactly once, after the
    /// consume that returned `true`.
    fn close(&mut self);
}
