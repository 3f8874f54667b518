//! Buffer allocation.
//!
//! The device layer hands the pipeline a [`BufferAllocator`]; every pool
//! buffer, stream buffer and conversion buffer comes from one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vcu_common::{DecodeError, DecodeResult, HwStatus};

use crate::buffer::{HwBuffer, PixelMemory};

/// Produces fixed-size hardware buffers.
pub trait BufferAllocator: Send + Sync {
    fn allocate(&self, size: usize, name: &str) -> DecodeResult<Arc<HwBuffer>>;

    /// Bytes currently allocated and not yet released.
    fn allocated_bytes(&self) -> usize;
}

/// Allocator backed by process heap memory, with an optional byte budget.
pub struct HeapAllocator {
    live: Arc<AtomicUsize>,
    limit: Option<usize>,
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            limit: None,
        }
    }

    /// Fail allocations that would push live memory above `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            limit: Some(limit),
        }
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, size: usize, name: &str) -> DecodeResult<Arc<HwBuffer>> {
        if let Some(limit) = self.limit {
            if self.live.load(Ordering::Relaxed) + size > limit {
                return Err(DecodeError::HardwareError(HwStatus::NoMemory));
            }
        }
        let memory = PixelMemory::tracked(size, Arc::clone(&self.live));
        Ok(Arc::new(HwBuffer::new(memory, name)))
    }

    fn allocated_bytes(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_live_bytes() {
        let alloc = HeapAllocator::new();
        let a = alloc.allocate(1000, "a").unwrap();
        let b = alloc.allocate(24, "b").unwrap();
        assert_eq!(alloc.allocated_bytes(), 1024);
        drop(a);
        assert_eq!(alloc.allocated_bytes(), 24);
        drop(b);
        assert_eq!(alloc.allocated_bytes(), 0);
    }

    #[test]
    fn limit_reports_no_memory() {
        let alloc = HeapAllocator::with_limit(100);
        let _a = alloc.allocate(80, "a").unwrap();
        let err = alloc.allocate(40, "b").unwrap_err();
        assert!(matches!(err, DecodeError::HardwareError(HwStatus::NoMemory)));
    }
}
