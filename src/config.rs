use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::Registry;
use serde::Deserialize;

use crate::clock::{system_now_fn, NowFn, TimeBarrier};
use crate::codec::pool::BufferedEncoderPool;
use crate::flush::FlushManager;
use crate::instrument::EngineMetrics;
use crate::sink::FlushHandler;

/// Deserializable engine tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Lower bound on a list's flush interval regardless of resolution.
    /// Prevents CPU overhead from flushing very fine resolutions. Default: 1s.
    #[serde(default = "default_min_flush_interval", with = "humantime_serde")]
    pub min_flush_interval: Duration,

    /// Threshold above which the current frame is split and handed to the
    /// sink. Default: 1440 (fits a common MTU with headroom).
    #[serde(default = "default_max_flush_size")]
    pub max_flush_size: usize,

    /// How many idle buffers the shared encoder pool retains. Default: 64.
    #[serde(default = "default_pool_capacity")]
    pub encoder_pool_capacity: usize,

    /// Initial capacity of freshly allocated frame buffers. Default: 2048.
    #[serde(default = "default_buffer_capacity")]
    pub initial_buffer_capacity: usize,
}

fn default_min_flush_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_flush_size() -> usize {
    1440
}

fn default_pool_capacity() -> usize {
    64
}

fn default_buffer_capacity() -> usize {
    2048
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_flush_interval: default_min_flush_interval(),
            max_flush_size: default_max_flush_size(),
            encoder_pool_capacity: default_pool_capacity(),
            initial_buffer_capacity: default_buffer_capacity(),
        }
    }
}

/// Runtime assembly consumed by lists and the registry: tuning knobs plus the
/// shared collaborators (pool, sink, scheduler, time fence, clock,
/// telemetry).
#[derive(Clone)]
pub struct Options {
    pub min_flush_interval: Duration,
    pub max_flush_size: usize,
    pub encoder_pool: Arc<BufferedEncoderPool>,
    pub flush_handler: Arc<dyn FlushHandler>,
    pub flush_manager: Arc<dyn FlushManager>,
    pub time_barrier: Arc<TimeBarrier>,
    pub now_fn: NowFn,
    pub metrics: Arc<EngineMetrics>,
}

impl Options {
    /// Builds options with a fresh pool and time barrier, registering
    /// telemetry against `registry`.
    pub fn new(
        config: &EngineConfig,
        flush_handler: Arc<dyn FlushHandler>,
        flush_manager: Arc<dyn FlushManager>,
        registry: &Registry,
    ) -> Result<Self> {
        Ok(Self {
            min_flush_interval: config.min_flush_interval,
            max_flush_size: config.max_flush_size,
            encoder_pool: Arc::new(BufferedEncoderPool::new(
                config.encoder_pool_capacity,
                config.initial_buffer_capacity,
            )),
            flush_handler,
            flush_manager,
            time_barrier: Arc::new(TimeBarrier::new()),
            now_fn: system_now_fn(),
            metrics: EngineMetrics::new(registry)?,
        })
    }

    /// Like [`Options::new`] but with telemetry bound to a private registry.
    pub fn detached(
        config: &EngineConfig,
        flush_handler: Arc<dyn FlushHandler>,
        flush_manager: Arc<dyn FlushManager>,
    ) -> Self {
        Self {
            min_flush_interval: config.min_flush_interval,
            max_flush_size: config.max_flush_size,
            encoder_pool: Arc::new(BufferedEncoderPool::new(
                config.encoder_pool_capacity,
                config.initial_buffer_capacity,
            )),
            flush_handler,
            flush_manager,
            time_barrier: Arc::new(TimeBarrier::new()),
            now_fn: system_now_fn(),
            metrics: EngineMetrics::detached(),
        }
    }

    /// Replaces the time source; tests use this for deterministic boundaries.
    pub fn with_now_fn(mut self, now_fn: NowFn) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// Shares an existing process-wide time barrier.
    pub fn with_time_barrier(mut self, barrier: Arc<TimeBarrier>) -> Self {
        self.time_barrier = barrier;
        self
    }

    /// Shares an existing encoder pool across engines.
    pub fn with_encoder_pool(mut self, pool: Arc<BufferedEncoderPool>) -> Self {
        self.encoder_pool = pool;
        self
    }
}
