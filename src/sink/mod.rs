use std::collections::VecDeque;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tracing::debug;

/// Downstream consumer of finished frames.
///
/// `handle` is synchronous and borrows the frame for the duration of the
/// call; once it returns the engine reclaims the underlying buffer. This call
/// is the dominant latency contributor of a flush — implementations that talk
/// to a network should buffer internally rather than block here.
///
/// The engine never retries a frame: a failed handoff is counted and the
/// frame is dropped. Durability beyond at-most-once is the handler's job.
pub trait FlushHandler: Send + Sync {
    /// Returns the handler's name for logging.
    fn name(&self) -> &str;

    /// Accepts one frame of whole records in emission order.
    fn handle(&self, frame: &[u8]) -> Result<()>;
}

/// Accepts and discards every frame.
pub struct BlackholeHandler;

impl FlushHandler for BlackholeHandler {
    fn name(&self) -> &str {
        "blackhole"
    }

    fn handle(&self, _frame: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Logs frame sizes at debug level before delegating to an inner handler.
pub struct LoggingHandler<H> {
    inner: H,
}

impl<H: FlushHandler> LoggingHandler<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: FlushHandler> FlushHandler for LoggingHandler<H> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn handle(&self, frame: &[u8]) -> Result<()> {
        debug!(handler = self.inner.name(), frame_len = frame.len(), "handling frame");
        self.inner.handle(frame)
    }
}

/// Retains every handed frame and can be scripted to fail. Drives the
/// integration suite and benchmarks; also useful as an in-memory sink for
/// embedders' own tests.
#[derive(Default)]
pub struct CapturingHandler {
    frames: Mutex<Vec<Vec<u8>>>,
    failures: Mutex<VecDeque<String>>,
}

impl CapturingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error to be returned by the next `handle` call. Queued
    /// failures are consumed in order before any frame is captured.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.failures.lock().push_back(reason.into());
    }

    /// All frames accepted so far, in handoff order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    /// Concatenation of all accepted frames, in handoff order.
    pub fn concatenated(&self) -> Vec<u8> {
        self.frames.lock().iter().flatten().copied().collect()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl FlushHandler for CapturingHandler {
    fn name(&self) -> &str {
        "capturing"
    }

    fn handle(&self, frame: &[u8]) -> Result<()> {
        if let Some(reason) = self.failures.lock().pop_front() {
            bail!("{reason}");
        }
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capturing_handler_records_in_order() {
        let handler = CapturingHandler::new();
        handler.handle(b"one").expect("first frame");
        handler.handle(b"two").expect("second frame");

        assert_eq!(handler.frame_count(), 2);
        assert_eq!(handler.frames()[0], b"one");
        assert_eq!(handler.concatenated(), b"onetwo");
    }

    #[test]
    fn test_capturing_handler_scripted_failure() {
        let handler = CapturingHandler::new();
        handler.fail_next("downstream unavailable");

        let err = handler.handle(b"dropped").expect_err("scripted failure");
        assert!(err.to_string().contains("downstream unavailable"));

        // Failure queue is consumed; the next frame lands.
        handler.handle(b"kept").expect("after failure");
        assert_eq!(handler.frames(), vec![b"kept".to_vec()]);
    }

    #[test]
    fn test_logging_handler_delegates() {
        let handler = LoggingHandler::new(BlackholeHandler);
        assert_eq!(handler.name(), "blackhole");
        handler.handle(b"frame").expect("delegated");
    }
}
