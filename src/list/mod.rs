//! Per-resolution metric lists and their registry.
//!
//! A [`MetricList`] holds the in-flight aggregation elements of one
//! resolution and drains them at aligned boundaries; [`MetricLists`] maps
//! resolutions to lists and fans out shutdown.

mod chain;

pub use chain::ElementHandle;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::error;

use crate::clock::{truncate_to_resolution, NowFn, TimeBarrier};
use crate::codec::pool::{BufferedEncoder, BufferedEncoderPool};
use crate::codec::AggregatedEncoder;
use crate::config::Options;
use crate::flush::Flushable;
use crate::instrument::ListTelemetry;
use crate::metric::{ChunkedSample, MetricElem};
use crate::sink::FlushHandler;
use chain::ElementChain;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListError {
    #[error("metric list is closed")]
    ListClosed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("metric lists are closed")]
    ListsClosed,
}

struct ListCore {
    chain: ElementChain,
    closed: bool,
}

/// State owned solely by the flusher. The flush manager serializes flushes
/// per list, so this mutex is uncontended.
struct FlusherState {
    encoder: AggregatedEncoder,
    /// Scratch list of tombstoned slots, reused across flushes.
    to_collect: Vec<usize>,
}

/// Stores aggregation elements at a given resolution and flushes their
/// finished samples periodically.
///
/// Producers append with [`push_back`](MetricList::push_back); the flush
/// manager drives [`flush`](MetricList::flush) at the list's cadence. Records
/// emitted into one frame preserve element insertion order, and frames of
/// successive flushes reach the sink in flush order.
pub struct MetricList {
    resolution: Duration,
    flush_interval: Duration,
    max_flush_size: usize,
    now_fn: NowFn,
    time_barrier: Arc<TimeBarrier>,
    handler: Arc<dyn FlushHandler>,
    pool: Arc<BufferedEncoderPool>,
    telemetry: ListTelemetry,
    core: RwLock<ListCore>,
    flusher: Mutex<FlusherState>,
}

impl std::fmt::Debug for MetricList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricList")
            .field("resolution", &self.resolution)
            .field("flush_interval", &self.flush_interval)
            .field("max_flush_size", &self.max_flush_size)
            .finish_non_exhaustive()
    }
}

impl MetricList {
    /// Creates a list and registers it with the flush manager.
    ///
    /// The flush interval is the resolution floored at
    /// `opts.min_flush_interval`, so very fine resolutions do not burn CPU on
    /// near-empty flushes.
    pub fn new(resolution: Duration, opts: &Options) -> Arc<Self> {
        let flush_interval = resolution.max(opts.min_flush_interval);
        let mut buffer = opts.encoder_pool.get();
        buffer.clear();

        let list = Arc::new(Self {
            resolution,
            flush_interval,
            max_flush_size: opts.max_flush_size,
            now_fn: Arc::clone(&opts.now_fn),
            time_barrier: Arc::clone(&opts.time_barrier),
            handler: Arc::clone(&opts.flush_handler),
            pool: Arc::clone(&opts.encoder_pool),
            telemetry: opts.metrics.for_resolution(resolution),
            core: RwLock::new(ListCore {
                chain: ElementChain::new(),
                closed: false,
            }),
            flusher: Mutex::new(FlusherState {
                encoder: AggregatedEncoder::new(buffer),
                to_collect: Vec::new(),
            }),
        });

        opts.flush_manager
            .register(Arc::clone(&list) as Arc<dyn Flushable>);
        list
    }

    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Number of elements in the list, including tombstoned handles not yet
    /// collected (those are transient within a flush).
    pub fn len(&self) -> usize {
        self.core.read().chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends an element at the tail. Holds the write lock only for the
    /// insertion itself.
    pub fn push_back(&self, elem: Box<dyn MetricElem>) -> Result<ElementHandle, ListError> {
        let mut core = self.core.write();
        if core.closed {
            return Err(ListError::ListClosed);
        }
        Ok(core.chain.push_back(elem))
    }

    /// Closes the list. Idempotent; subsequent `push_back`s fail. Does not
    /// drain: an already-scheduled flush is permitted to complete.
    pub fn close(&self) {
        let mut core = self.core.write();
        if core.closed {
            return;
        }
        core.closed = true;
    }

    /// Drains every element due at the current aligned boundary.
    ///
    /// The boundary is sampled under the time barrier's write side, so any
    /// ingest action that held the read side has fully drained before it is
    /// observed. Consumption runs under the list's read lock; tombstoned
    /// elements are physically removed under the write lock afterwards.
    pub fn flush(&self) {
        // Phase A: boundary sampling. Observing `now` inside the barrier
        // orders this flush after all ingest sections that must be visible at
        // the boundary.
        let start = {
            let _fence = self.time_barrier.observe();
            (self.now_fn)()
        };
        let boundary_ns = truncate_to_resolution(start, self.resolution);

        let mut flusher = self.flusher.lock();
        let FlusherState {
            encoder,
            to_collect,
        } = &mut *flusher;
        to_collect.clear();

        // Phase B: consume under the read lock. Payload tombstoning goes
        // through the per-node mutex; links are untouched until Phase D.
        {
            let core = self.core.read();
            let mut cursor = core.chain.head();
            while let Some(index) = cursor {
                cursor = core.chain.next(index);
                let Some(slot) = core.chain.payload(index) else {
                    continue;
                };
                let mut payload = slot.lock();
                if let Some(elem) = payload.as_mut() {
                    let done =
                        elem.consume(boundary_ns, &mut |sample| self.write_sample(encoder, sample));
                    if done {
                        elem.close();
                        *payload = None;
                        to_collect.push(index);
                    }
                }
            }
        }

        // Phase C: flush remaining bytes in the frame.
        if !encoder.is_empty() {
            let mut fresh = self.pool.get();
            fresh.clear();
            let full = encoder.reset_with(fresh);
            self.hand_off(full);
        }

        // Phase D: collect tombstoned elements.
        let collected = {
            let mut core = self.core.write();
            for &index in to_collect.iter() {
                core.chain.remove(index);
            }
            to_collect.len()
        };
        self.telemetry.flush_collected.inc_by(collected as u64);

        let elapsed = (self.now_fn)().duration_since(start).unwrap_or_default();
        self.telemetry.flush_duration.observe(elapsed.as_secs_f64());
    }

    /// Emission callback: frames one sample, splitting the frame once it
    /// crosses the size threshold so no emitted frame ever splits a record.
    fn write_sample(&self, encoder: &mut AggregatedEncoder, sample: ChunkedSample<'_>) {
        let size_before = encoder.len();
        if let Err(e) = encoder.encode_record(&sample) {
            error!(
                id_prefix = %String::from_utf8_lossy(sample.id.prefix),
                id = %String::from_utf8_lossy(sample.id.data),
                id_suffix = %String::from_utf8_lossy(sample.id.suffix),
                timestamp_ns = sample.time_ns,
                value = sample.value,
                policy = %sample.policy,
                error = %e,
                "encoding aggregated sample failed, dropping it"
            );
            self.telemetry.encode_errors.inc();
            encoder.truncate(size_before);
            encoder.reset();
            return;
        }

        let size_after = encoder.len();
        if size_after < self.max_flush_size {
            return;
        }

        // Split: carry the whole tail record into a fresh buffer and hand the
        // full frame to the sink.
        let mut fresh = self.pool.get();
        fresh.clear();
        let mut full = encoder.reset_with(fresh);
        encoder.write_framed(&full.bytes()[size_before..size_after]);
        full.truncate(size_before);
        self.hand_off(full);
    }

    fn hand_off(&self, mut buffer: BufferedEncoder) {
        match self.handler.handle(buffer.bytes()) {
            Ok(()) => self.telemetry.flush_success.inc(),
            Err(e) => {
                error!(
                    handler = self.handler.name(),
                    frame_len = buffer.len(),
                    error = %e,
                    "flushing frame failed, dropping it"
                );
                self.telemetry.flush_errors.inc();
            }
        }
        buffer.clear();
        self.pool.put(buffer);
    }
}

impl Flushable for MetricList {
    fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    fn flush(&self) {
        MetricList::flush(self);
    }
}

struct ListsInner {
    closed: bool,
    lists: HashMap<Duration, Arc<MetricList>>,
}

/// Registry mapping resolutions to their lists. Lists are created lazily on
/// first use and only destroyed by a registry-wide close.
pub struct MetricLists {
    opts: Options,
    inner: RwLock<ListsInner>,
}

impl MetricLists {
    pub fn new(opts: Options) -> Self {
        Self {
            opts,
            inner: RwLock::new(ListsInner {
                closed: false,
                lists: HashMap::new(),
            }),
        }
    }

    /// Number of lists.
    pub fn len(&self) -> usize {
        self.inner.read().lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up the list for `resolution`, creating it if absent.
    /// Double-checked so the common hit path only takes the read lock.
    pub fn find_or_create(&self, resolution: Duration) -> Result<Arc<MetricList>, RegistryError> {
        {
            let inner = self.inner.read();
            if inner.closed {
                return Err(RegistryError::ListsClosed);
            }
            if let Some(list) = inner.lists.get(&resolution) {
                return Ok(Arc::clone(list));
            }
        }

        let mut inner = self.inner.write();
        if inner.closed {
            return Err(RegistryError::ListsClosed);
        }
        let list = inner
            .lists
            .entry(resolution)
            .or_insert_with(|| MetricList::new(resolution, &self.opts));
        Ok(Arc::clone(list))
    }

    /// Snapshot of each list's size, keyed by resolution.
    pub fn tick(&self) -> HashMap<Duration, usize> {
        let inner = self.inner.read();
        inner
            .lists
            .values()
            .map(|list| (list.resolution(), list.len()))
            .collect()
    }

    /// Closes the registry and every list. Idempotent. Does not wait for
    /// in-flight flushes; the flush manager owns their lifecycle.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        if inner.closed {
            return;
        }
        inner.closed = true;
        for list in inner.lists.values() {
            list.close();
        }
    }
}
