use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

/// Something the flush manager drives: one metric list per resolution.
pub trait Flushable: Send + Sync {
    /// Cadence at which `flush` should be invoked.
    fn flush_interval(&self) -> Duration;

    /// Drains everything due at the current aligned boundary.
    fn flush(&self);
}

/// Owns flush scheduling. Implementations must invoke `flush` no more often
/// than once per `flush_interval` and must serialize concurrent invocations
/// on the same flushable.
pub trait FlushManager: Send + Sync {
    fn register(&self, flushable: Arc<dyn Flushable>);
}

struct Shutdown {
    closed: Mutex<bool>,
    cv: Condvar,
}

/// Thread-per-list periodic scheduler.
///
/// Each registration spawns a worker that invokes `flush` every
/// `flush_interval`; one worker per flushable makes the per-list
/// serialization requirement structural. `close` stops scheduling promptly
/// and joins the workers; it does not drain pending aggregations (run one
/// final `flush` first if a clean shutdown is required).
pub struct PeriodicFlushManager {
    shutdown: Arc<Shutdown>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PeriodicFlushManager {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(Shutdown {
                closed: Mutex::new(false),
                cv: Condvar::new(),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Stops scheduling and joins all workers. Idempotent.
    pub fn close(&self) {
        {
            let mut closed = self.shutdown.closed.lock();
            if *closed {
                return;
            }
            *closed = true;
        }
        self.shutdown.cv.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                error!("flush worker panicked");
            }
        }
    }
}

impl Default for PeriodicFlushManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FlushManager for PeriodicFlushManager {
    fn register(&self, flushable: Arc<dyn Flushable>) {
        if *self.shutdown.closed.lock() {
            warn!("flush manager closed, ignoring registration");
            return;
        }

        let interval = flushable.flush_interval();
        let shutdown = Arc::clone(&self.shutdown);
        let spawned = std::thread::Builder::new()
            .name(format!("fluxagg-flush-{interval:?}"))
            .spawn(move || {
                debug!(?interval, "flush worker started");
                loop {
                    let mut closed = shutdown.closed.lock();
                    if *closed {
                        break;
                    }
                    let timed_out = shutdown.cv.wait_for(&mut closed, interval).timed_out();
                    if *closed {
                        break;
                    }
                    drop(closed);
                    if timed_out {
                        flushable.flush();
                    }
                }
                debug!(?interval, "flush worker stopped");
            });

        match spawned {
            Ok(handle) => self.workers.lock().push(handle),
            Err(e) => error!(error = %e, "spawning flush worker failed"),
        }
    }
}

impl Drop for PeriodicFlushManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingFlushable {
        interval: Duration,
        flushes: AtomicUsize,
    }

    impl Flushable for CountingFlushable {
        fn flush_interval(&self) -> Duration {
            self.interval
        }

        fn flush(&self) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_periodic_manager_flushes_on_cadence() {
        let manager = PeriodicFlushManager::new();
        let flushable = Arc::new(CountingFlushable {
            interval: Duration::from_millis(10),
            flushes: AtomicUsize::new(0),
        });
        manager.register(Arc::clone(&flushable) as Arc<dyn Flushable>);

        std::thread::sleep(Duration::from_millis(120));
        manager.close();

        let flushes = flushable.flushes.load(Ordering::SeqCst);
        assert!(flushes >= 3, "expected several flushes, got {flushes}");
    }

    #[test]
    fn test_close_is_prompt_and_idempotent() {
        let manager = PeriodicFlushManager::new();
        let flushable = Arc::new(CountingFlushable {
            interval: Duration::from_secs(3600),
            flushes: AtomicUsize::new(0),
        });
        manager.register(Arc::clone(&flushable) as Arc<dyn Flushable>);

        // The worker is parked on an hour-long wait; close must not wait it out.
        let start = std::time::Instant::now();
        manager.close();
        manager.close();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(flushable.flushes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_register_after_close_is_ignored() {
        let manager = PeriodicFlushManager::new();
        manager.close();

        let flushable = Arc::new(CountingFlushable {
            interval: Duration::from_millis(5),
            flushes: AtomicUsize::new(0),
        });
        manager.register(Arc::clone(&flushable) as Arc<dyn Flushable>);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(flushable.flushes.load(Ordering::SeqCst), 0);
    }
}
