use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use crate::util::lock_unpoisoned;

/// Request bodies shorter than this are sent directly instead of through a pooled buffer.
pub const POOLED_BODY_THRESHOLD: usize = 1024;

const DEFAULT_MAX_IDLE_BUFFERS: usize = 64;
const DEFAULT_MAX_RETAINED_CAPACITY: usize = 4 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub idle: usize,
    pub checked_out: usize,
    pub allocated: usize,
}

/// Concurrent pool of reusable byte buffers.
///
/// Each [`PooledBuffer`] is owned by exactly one holder and goes back to the
/// pool when dropped. Buffers are cleared on acquire, so a recycled buffer
/// never exposes its previous content.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    idle: Mutex<Vec<BytesMut>>,
    max_idle: usize,
    max_retained_capacity: usize,
    checked_out: AtomicUsize,
    allocated: AtomicUsize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_IDLE_BUFFERS, DEFAULT_MAX_RETAINED_CAPACITY)
    }

    pub fn with_limits(max_idle: usize, max_retained_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                idle: Mutex::new(Vec::new()),
                max_idle,
                max_retained_capacity,
                checked_out: AtomicUsize::new(0),
                allocated: AtomicUsize::new(0),
            }),
        }
    }

    pub fn acquire(&self) -> PooledBuffer {
        let recycled = lock_unpoisoned(&self.inner.idle).pop();
        let mut buffer = match recycled {
            Some(buffer) => buffer,
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                BytesMut::new()
            }
        };
        buffer.clear();
        self.inner.checked_out.fetch_add(1, Ordering::AcqRel);
        PooledBuffer {
            pool: self.clone(),
            state: Some(BufferState::Writable(buffer)),
        }
    }

    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            idle: lock_unpoisoned(&self.inner.idle).len(),
            checked_out: self.inner.checked_out.load(Ordering::Acquire),
            allocated: self.inner.allocated.load(Ordering::Relaxed),
        }
    }

    fn release(&self, state: BufferState) {
        self.inner.checked_out.fetch_sub(1, Ordering::AcqRel);
        let buffer = match state {
            BufferState::Writable(buffer) => buffer,
            // Still shared with a request body that outlived the attempt.
            BufferState::Frozen(bytes) => match bytes.try_into_mut() {
                Ok(buffer) => buffer,
                Err(_) => return,
            },
        };
        if buffer.capacity() > self.inner.max_retained_capacity {
            return;
        }
        let mut idle = lock_unpoisoned(&self.inner.idle);
        if idle.len() < self.inner.max_idle {
            idle.push(buffer);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BufferPool")
            .field("max_idle", &self.inner.max_idle)
            .field("max_retained_capacity", &self.inner.max_retained_capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

enum BufferState {
    Writable(BytesMut),
    Frozen(Bytes),
}

/// A buffer checked out of a [`BufferPool`].
pub struct PooledBuffer {
    pool: BufferPool,
    state: Option<BufferState>,
}

impl PooledBuffer {
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.state {
            Some(BufferState::Writable(buffer)) => buffer,
            Some(BufferState::Frozen(bytes)) => bytes,
            None => &[],
        }
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.writable().extend_from_slice(data);
    }

    /// Returns a shared view of the written bytes, usable as a request body.
    ///
    /// The buffer stays checked out; it is reclaimed on release once every
    /// view has been dropped.
    pub fn freeze(&mut self) -> Bytes {
        let bytes = match self.state.take() {
            Some(BufferState::Writable(buffer)) => buffer.freeze(),
            Some(BufferState::Frozen(bytes)) => bytes,
            None => Bytes::new(),
        };
        self.state = Some(BufferState::Frozen(bytes.clone()));
        bytes
    }

    pub fn release(self) {
        drop(self);
    }

    fn writable(&mut self) -> &mut BytesMut {
        let buffer = match self.state.take() {
            Some(BufferState::Writable(buffer)) => buffer,
            Some(BufferState::Frozen(bytes)) => match bytes.try_into_mut() {
                Ok(buffer) => buffer,
                Err(shared) => BytesMut::from(shared.as_ref()),
            },
            None => BytesMut::new(),
        };
        let state = self.state.insert(BufferState::Writable(buffer));
        match state {
            BufferState::Writable(buffer) => buffer,
            BufferState::Frozen(_) => unreachable!("state was just set to writable"),
        }
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PooledBuffer")
            .field("len", &self.len())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            self.pool.release(state);
        }
    }
}
