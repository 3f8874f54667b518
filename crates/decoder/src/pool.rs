//! Buffer pools.
//!
//! - [`PicturePool`]: the fixed set of decoded-picture buffers handed to the
//!   engine once the stream resolution is known. Sized exactly once.
//! - [`BufPool`]: the input (bitstream) buffers the reader fills. Can be
//!   decommitted to unblock waiters during teardown.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use vcu_common::{DecodeError, DecodeResult, Dimension, FourCC};

use crate::allocator::BufferAllocator;
use crate::buffer::{HwBuffer, PixMapMeta, PlaneDesc};

// ---------------------------------------------------------------------------
// Picture pool
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PicturePoolState {
    dim: Dimension,
    fourcc: FourCC,
    planes: Vec<PlaneDesc>,
    chunk_size: usize,
    buffers: Vec<Arc<HwBuffer>>,
    initialized: bool,
}

/// Pool of decoded-picture buffers sharing one pixel format.
pub struct PicturePool {
    state: Mutex<PicturePoolState>,
}

impl PicturePool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PicturePoolState::default()),
        }
    }

    /// Set the picture dimension and format of every buffer. Ignored once
    /// the pool is initialized.
    pub fn set_format(&self, dim: Dimension, fourcc: FourCC) {
        let mut state = self.state.lock();
        if state.initialized {
            return;
        }
        state.dim = dim;
        state.fourcc = fourcc;
    }

    /// Set the memory chunk of every buffer: its size and plane layout.
    pub fn add_chunk(&self, size: usize, planes: Vec<PlaneDesc>) {
        let mut state = self.state.lock();
        if state.initialized {
            return;
        }
        state.chunk_size = size;
        state.planes = planes;
    }

    pub fn is_init(&self) -> bool {
        self.state.lock().initialized
    }

    /// Allocate `count` buffers and attach the pixmap record to each.
    pub fn init(&self, allocator: &dyn BufferAllocator, count: usize, name: &str) -> DecodeResult<()> {
        let mut state = self.state.lock();
        if state.initialized {
            return Ok(());
        }
        if state.fourcc.is_null() || state.chunk_size == 0 {
            return Err(DecodeError::PoolInit {
                name: name.to_string(),
                reason: "format not set".to_string(),
            });
        }

        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            let buffer = allocator
                .allocate(state.chunk_size, name)
                .map_err(|e| DecodeError::PoolInit {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            let added = buffer.add_pixmap_meta(PixMapMeta {
                dim: state.dim,
                fourcc: state.fourcc,
                planes: state.planes.clone(),
                compressed: false,
            });
            if !added {
                return Err(DecodeError::PoolInit {
                    name: name.to_string(),
                    reason: "pixmap metadata already attached".to_string(),
                });
            }
            buffers.push(buffer);
        }

        debug!(
            pool = name,
            count,
            size = state.chunk_size,
            fourcc = %state.fourcc,
            "Picture pool initialized"
        );
        state.buffers = buffers;
        state.initialized = true;
        Ok(())
    }

    /// A buffer nobody else currently holds, if any. Never blocks.
    pub fn get_shared_buffer(&self) -> Option<Arc<HwBuffer>> {
        let state = self.state.lock();
        state
            .buffers
            .iter()
            .find(|b| Arc::strong_count(b) == 1)
            .map(Arc::clone)
    }

    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.state.lock().chunk_size
    }

    pub fn dimension(&self) -> Dimension {
        self.state.lock().dim
    }

    pub fn fourcc(&self) -> FourCC {
        self.state.lock().fourcc
    }
}

impl Default for PicturePool {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Input buffer pool
// ---------------------------------------------------------------------------

struct BufPoolState {
    free: Vec<Arc<HwBuffer>>,
    committed: bool,
}

/// Pool of bitstream buffers with blocking acquisition.
pub struct BufPool {
    name: String,
    total: usize,
    state: Mutex<BufPoolState>,
    changed: Condvar,
}

/// Error returned by [`BufPool::get`] while the pool is decommitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("buffer pool is decommitted")]
pub struct Decommitted;

impl BufPool {
    /// Allocate `count` buffers of `size` bytes. The pool starts decommitted.
    pub fn new(
        allocator: &dyn BufferAllocator,
        count: usize,
        size: usize,
        name: &str,
    ) -> DecodeResult<Arc<Self>> {
        let free = (0..count)
            .map(|_| allocator.allocate(size, name))
            .collect::<DecodeResult<Vec<_>>>()
            .map_err(|e| DecodeError::PoolInit {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Arc::new(Self {
            name: name.to_string(),
            total: count,
            state: Mutex::new(BufPoolState {
                free,
                committed: false,
            }),
            changed: Condvar::new(),
        }))
    }

    pub fn commit(&self) {
        self.state.lock().committed = true;
        self.changed.notify_all();
    }

    /// Wake every waiter; [`get`](Self::get) fails until the next commit.
    pub fn decommit(&self) {
        self.state.lock().committed = false;
        self.changed.notify_all();
    }

    pub fn is_committed(&self) -> bool {
        self.state.lock().committed
    }

    /// Block until a buffer is free. Fails while the pool is decommitted.
    pub fn get(self: &Arc<Self>) -> Result<StreamBuffer, Decommitted> {
        let mut state = self.state.lock();
        loop {
            if !state.committed {
                return Err(Decommitted);
            }
            if let Some(buffer) = state.free.pop() {
                return Ok(StreamBuffer {
                    buffer,
                    pool: Arc::clone(self),
                });
            }
            self.changed.wait(&mut state);
        }
    }

    /// Wait up to `timeout` for the pool to be committed.
    pub fn wait_committed(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.committed {
            self.changed.wait_for(&mut state, timeout);
        }
        state.committed
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn release(&self, buffer: Arc<HwBuffer>) {
        self.state.lock().free.push(buffer);
        self.changed.notify_all();
    }
}

/// An input buffer on loan from a [`BufPool`]; returned on drop.
pub struct StreamBuffer {
    buffer: Arc<HwBuffer>,
    pool: Arc<BufPool>,
}

impl std::ops::Deref for StreamBuffer {
    type Target = HwBuffer;

    fn deref(&self) -> &HwBuffer {
        &self.buffer
    }
}

impl Drop for StreamBuffer {
    fn drop(&mut self) {
        self.pool.release(Arc::clone(&self.buffer));
    }
}
