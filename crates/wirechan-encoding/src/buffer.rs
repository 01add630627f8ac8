use std::sync::Mutex;

use tracing::trace;

/// A pool of reusable byte buffers shared by encode paths.
///
/// Buffers taken from the pool must be returned via
/// [`recycle`](Self::recycle) once the encoded bytes (or the message
/// decoded out of them) are released; dropping a buffer instead is safe
/// but defeats the pooling.
pub struct BufferManager {
    pool: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
    max_buffer_capacity: usize,
}

impl BufferManager {
    /// Pool retaining up to `max_pooled` buffers, each capped at
    /// `max_buffer_capacity` bytes of capacity when recycled.
    pub fn new(max_pooled: usize, max_buffer_capacity: usize) -> Self {
        Self {
            pool: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
            max_buffer_capacity,
        }
    }

    /// Take a cleared buffer from the pool, or allocate a new one.
    pub fn take(&self) -> Vec<u8> {
        let mut pool = self.pool.lock().expect("buffer pool poisoned");
        match pool.pop() {
            Some(buf) => buf,
            None => Vec::new(),
        }
    }

    /// Return a buffer to the pool for reuse.
    pub fn recycle(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.max_buffer_capacity {
            trace!(capacity = buf.capacity(), "dropping oversized buffer");
            return;
        }
        buf.clear();
        let mut pool = self.pool.lock().expect("buffer pool poisoned");
        if pool.len() < self.max_pooled {
            pool.push(buf);
        }
    }

    /// Number of buffers currently pooled.
    pub fn pooled(&self) -> usize {
        self.pool.lock().expect("buffer pool poisoned").len()
    }
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::new(32, 1024 * 1024)
    }
}

/// An encoded message placed inside a pooled buffer, with reserved
/// headroom for transport framing bytes ahead of the message bytes.
///
/// Lets a transport prefix its framing without copying the message.
pub struct EncodedRegion {
    buf: Vec<u8>,
    offset: usize,
}

impl EncodedRegion {
    pub(crate) fn new(buf: Vec<u8>, offset: usize) -> Self {
        debug_assert!(offset <= buf.len());
        Self { buf, offset }
    }

    /// The reserved headroom, for the transport to fill in.
    pub fn prefix_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.offset]
    }

    /// The encoded message bytes.
    pub fn message_bytes(&self) -> &[u8] {
        &self.buf[self.offset..]
    }

    /// Prefix and message as one contiguous run.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Hand the underlying buffer back to its pool.
    pub fn recycle(self, manager: &BufferManager) {
        manager.recycle(self.buf);
    }
}
