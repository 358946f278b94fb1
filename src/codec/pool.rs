use parking_lot::Mutex;

/// A recyclable byte buffer that aggregated records are framed into. One
/// buffer backs one outbound frame; after the sink has consumed it the buffer
/// is cleared and returned to the pool.
#[derive(Debug)]
pub struct BufferedEncoder {
    buf: Vec<u8>,
}

impl BufferedEncoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drops all bytes past `len`. No-op if the buffer is already shorter.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub(crate) fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }
}

impl Default for BufferedEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bounded, process-wide cache of [`BufferedEncoder`]s shared across lists.
///
/// `get` hands out a possibly-dirty buffer; callers clear it before use, which
/// keeps `put` off the flush hot path. No ordering guarantees: the pool is a
/// stack, not a queue.
pub struct BufferedEncoderPool {
    idle: Mutex<Vec<BufferedEncoder>>,
    max_idle: usize,
    buffer_capacity: usize,
}

impl BufferedEncoderPool {
    /// `max_idle` bounds how many buffers the pool retains; `buffer_capacity`
    /// pre-sizes freshly allocated buffers.
    pub fn new(max_idle: usize, buffer_capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle.min(64))),
            max_idle,
            buffer_capacity,
        }
    }

    /// Returns a ready buffer, allocating when the pool is empty. The buffer
    /// may contain stale bytes from a previous use; clear it before encoding.
    pub fn get(&self) -> BufferedEncoder {
        if let Some(enc) = self.idle.lock().pop() {
            return enc;
        }
        BufferedEncoder::with_capacity(self.buffer_capacity)
    }

    /// Returns a buffer to the pool. Buffers beyond the idle bound are
    /// dropped.
    pub fn put(&self, encoder: BufferedEncoder) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(encoder);
        }
    }

    /// Number of buffers currently idle in the pool.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_allocates_when_empty() {
        let pool = BufferedEncoderPool::new(4, 128);
        assert_eq!(pool.idle_len(), 0);
        let enc = pool.get();
        assert!(enc.is_empty());
        assert!(enc.buf.capacity() >= 128);
    }

    #[test]
    fn test_put_then_get_reuses() {
        let pool = BufferedEncoderPool::new(4, 128);
        let mut enc = pool.get();
        enc.write(b"hello");
        pool.put(enc);
        assert_eq!(pool.idle_len(), 1);

        // Reused buffer keeps its bytes until the caller clears it.
        let enc = pool.get();
        assert_eq!(enc.bytes(), b"hello");
        assert_eq!(pool.idle_len(), 0);
    }

    #[test]
    fn test_put_beyond_bound_drops() {
        let pool = BufferedEncoderPool::new(2, 16);
        for _ in 0..5 {
            pool.put(BufferedEncoder::new());
        }
        assert_eq!(pool.idle_len(), 2);
    }

    #[test]
    fn test_truncate_and_clear() {
        let mut enc = BufferedEncoder::new();
        enc.write(b"abcdef");
        enc.truncate(3);
        assert_eq!(enc.bytes(), b"abc");
        enc.truncate(10);
        assert_eq!(enc.bytes(), b"abc");
        enc.clear();
        assert!(enc.is_empty());
    }
}
