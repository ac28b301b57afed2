use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::frame::FrameBuffer;

/// Bounded hand-off between the capture thread and the compositor worker.
///
/// When full, pushing drops the oldest undelivered frame so that the
/// consumer always sees the freshest image and capture never blocks.
pub struct FrameQueue {
    inner: Mutex<QueueState>,
    ready: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

struct QueueState {
    frames: VecDeque<FrameBuffer>,
    closed: bool,
}

/// Result of waiting on the queue.
#[derive(Debug)]
pub enum Pop {
    Frame(FrameBuffer),
    Timeout,
    Closed,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame. Returns `true` when an older frame was evicted.
    ///
    /// Frames pushed after `close` are discarded.
    pub fn push(&self, frame: FrameBuffer) -> bool {
        let mut state = self.inner.lock();
        if state.closed {
            return false;
        }
        let mut evicted = false;
        while state.frames.len() >= self.capacity {
            state.frames.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            evicted = true;
        }
        state.frames.push_back(frame);
        drop(state);
        self.ready.notify_one();
        evicted
    }

    /// Wait up to `timeout` for the next frame.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        loop {
            if let Some(frame) = state.frames.pop_front() {
                return Pop::Frame(frame);
            }
            if state.closed {
                return Pop::Closed;
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return match state.frames.pop_front() {
                    Some(frame) => Pop::Frame(frame),
                    None if state.closed => Pop::Closed,
                    None => Pop::Timeout,
                };
            }
        }
    }

    /// Discard all queued frames; returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.inner.lock();
        let n = state.frames.len();
        state.frames.clear();
        self.dropped.fetch_add(n as u64, Ordering::Relaxed);
        n
    }

    /// Close the queue and wake any waiting consumer. Queued frames are
    /// discarded.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        state.closed = true;
        let n = state.frames.len();
        state.frames.clear();
        self.dropped.fetch_add(n as u64, Ordering::Relaxed);
        drop(state);
        self.ready.notify_all();
    }

    /// Reopen after `close` so the queue can be reused by a restarted source.
    pub fn reopen(&self) {
        self.inner.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames evicted or discarded since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rgba;
    use std::sync::Arc;

    fn frame(ts: u64) -> FrameBuffer {
        FrameBuffer::solid(2, 2, Rgba::default(), ts)
    }

    fn expect_frame(pop: Pop) -> FrameBuffer {
        match pop {
            Pop::Frame(f) => f,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = FrameQueue::new(2);
        assert!(!queue.push(frame(1)));
        assert!(!queue.push(frame(2)));
        assert!(queue.push(frame(3)));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 2);

        let first = expect_frame(queue.pop_timeout(Duration::from_millis(10)));
        assert_eq!(first.timestamp_us, 2);
    }

    #[test]
    fn pop_times_out_on_empty_queue() {
        let queue = FrameQueue::new(1);
        let start = Instant::now();
        assert!(matches!(
            queue.pop_timeout(Duration::from_millis(20)),
            Pop::Timeout
        ));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn close_wakes_waiting_consumer() {
        let queue = Arc::new(FrameQueue::new(1));
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(matches!(consumer.join().unwrap(), Pop::Closed));
    }

    #[test]
    fn closed_queue_discards_pushes_until_reopened() {
        let queue = FrameQueue::new(2);
        queue.push(frame(1));
        queue.close();
        assert!(queue.is_empty());
        assert_eq!(queue.dropped(), 1);
        queue.push(frame(2));
        assert!(queue.is_empty());

        queue.reopen();
        queue.push(frame(3));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn clear_counts_discarded_frames() {
        let queue = FrameQueue::new(3);
        queue.push(frame(1));
        queue.push(frame(2));
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.dropped(), 2);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(FrameQueue::new(0).capacity(), 1);
    }
}
