//! Pooled read buffers.
//!
//! Reads hand out [`PooledBuffer`]s so that the bytes of an encoded entry can
//! be recycled as soon as the caller has decoded them. Dropping the buffer
//! returns its storage to the pool.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Default number of idle buffers kept by a pool.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Buffers larger than this are freed instead of pooled.
pub const DEFAULT_MAX_POOLED_SIZE: usize = 1024 * 1024;

/// A bounded free-list of byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    max_pooled_size: usize,
}

impl BufferPool {
    /// Creates a pool with the default limits.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_limits(DEFAULT_POOL_CAPACITY, DEFAULT_MAX_POOLED_SIZE)
    }

    /// Creates a pool holding at most `capacity` idle buffers of at most
    /// `max_pooled_size` bytes each.
    #[must_use]
    pub fn with_limits(capacity: usize, max_pooled_size: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            max_pooled_size,
        })
    }

    /// Takes a zeroed buffer of exactly `len` bytes.
    #[must_use]
    pub fn get(self: &Arc<Self>, len: usize) -> PooledBuffer {
        let mut buf = self.free.lock().pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        PooledBuffer {
            buf,
            pool: Some(Arc::clone(self)),
        }
    }

    /// Returns the number of idle buffers.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn put(&self, buf: Vec<u8>) {
        if buf.capacity() > self.max_pooled_size {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buf);
        }
    }
}

/// Encoded entry bytes borrowed from a [`BufferPool`].
///
/// Dereferences to the bytes. Dropping the buffer releases its storage back
/// to the pool it came from.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Option<Arc<BufferPool>>,
}

impl PooledBuffer {
    /// Wraps a buffer that does not belong to any pool.
    #[must_use]
    pub fn unpooled(buf: Vec<u8>) -> Self {
        Self { buf, pool: None }
    }

    /// Detaches the bytes from the pool.
    #[must_use]
    pub fn into_vec(mut self) -> Vec<u8> {
        self.pool = None;
        std::mem::take(&mut self.buf)
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.put(std::mem::take(&mut self.buf));
        }
    }
}
