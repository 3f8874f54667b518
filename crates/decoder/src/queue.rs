//! Hand-off queue between the engine callback thread and the consumer.
//!
//! Frames removed from the queue are always dropped after the queue lock is
//! released: dropping a frame may run its completion callback, which takes
//! the decoder's display lock. The two locks are never held together.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::frame::Frame;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Arc<Frame>>,
    /// Recently dequeued frames kept alive for consumers holding references.
    returned: VecDeque<Arc<Frame>>,
    return_queue_size: usize,
}

impl QueueState {
    /// Leave room for one more returned frame.
    fn trim_returned(&mut self, evicted: &mut Vec<Arc<Frame>>) {
        while !self.returned.is_empty() && self.returned.len() >= self.return_queue_size {
            if let Some(frame) = self.returned.pop_front() {
                evicted.push(frame);
            }
        }
    }
}

/// Unbounded FIFO of frames with blocking, time-limited dequeue.
#[derive(Default)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the last `size` dequeued frames alive (0 disables).
    pub fn set_return_queue_size(&self, size: usize) {
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            state.return_queue_size = size;
            state.trim_returned(&mut evicted);
        }
        drop(evicted);
    }

    pub fn enqueue(&self, frame: Arc<Frame>) {
        self.state.lock().queue.push_back(frame);
        self.available.notify_one();
    }

    /// Oldest frame, or `None` once `timeout` has elapsed with nothing queued.
    pub fn dequeue(&self, timeout: Duration) -> Option<Arc<Frame>> {
        // A timeout too large to express as an instant waits forever.
        let deadline = Instant::now().checked_add(timeout);
        let mut evicted = Vec::new();
        let frame = {
            let mut state = self.state.lock();
            state.trim_returned(&mut evicted);
            while state.queue.is_empty() {
                match deadline {
                    Some(deadline) => {
                        if self.available.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                    None => self.available.wait(&mut state),
                }
            }
            let frame = state.queue.pop_front();
            if let Some(frame) = &frame {
                if state.return_queue_size > 0 {
                    state.returned.push_back(Arc::clone(frame));
                }
            }
            frame
        };
        drop(evicted);
        frame
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Drop every queued and returned frame.
    pub fn clear(&self) {
        let (queued, returned) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.queue),
                std::mem::take(&mut state.returned),
            )
        };
        drop(returned);
        drop(queued);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{HwBuffer, PixelMemory};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use vcu_common::InfoDecode;

    fn frame(done: &Arc<AtomicUsize>) -> Arc<Frame> {
        let done = Arc::clone(done);
        let buffer = Arc::new(HwBuffer::new(PixelMemory::new(8), "test"));
        Frame::create(
            buffer,
            &InfoDecode::default(),
            Some(Box::new(move |_: &Frame| {
                done.fetch_add(1, Ordering::SeqCst);
            })),
        )
    }

    #[test]
    fn fifo_order() {
        let done = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new();
        let a = frame(&done);
        let b = frame(&done);
        let (ida, idb) = (a.buffer().id(), b.buffer().id());
        queue.enqueue(a);
        queue.enqueue(b);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(Duration::ZERO).unwrap().buffer().id(), ida);
        assert_eq!(queue.dequeue(Duration::ZERO).unwrap().buffer().id(), idb);
        assert!(queue.is_empty());
    }

    #[test]
    fn dequeue_times_out() {
        let queue = FrameQueue::new();
        let start = Instant::now();
        assert!(queue.dequeue(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn enqueue_wakes_waiter() {
        let done = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(FrameQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue(Duration::from_secs(5)).is_some())
        };
        thread::sleep(Duration::from_millis(20));
        queue.enqueue(frame(&done));
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn huge_timeout_waits_for_a_frame() {
        let done = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(FrameQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue(Duration::MAX).is_some())
        };
        thread::sleep(Duration::from_millis(20));
        queue.enqueue(frame(&done));
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn return_queue_keeps_recent_frames() {
        let done = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new();
        queue.set_return_queue_size(2);
        for _ in 0..4 {
            queue.enqueue(frame(&done));
        }

        drop(queue.dequeue(Duration::ZERO));
        drop(queue.dequeue(Duration::ZERO));
        assert_eq!(done.load(Ordering::SeqCst), 0);

        // Third dequeue makes room by releasing the oldest returned frame.
        drop(queue.dequeue(Duration::ZERO));
        assert_eq!(done.load(Ordering::SeqCst), 1);

        queue.clear();
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn clear_releases_frames() {
        let done = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new();
        queue.enqueue(frame(&done));
        queue.enqueue(frame(&done));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }
}
