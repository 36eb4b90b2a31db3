use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Bounded FIFO of encoded frames between the render loop and a
/// channel's sender task.
///
/// Single producer, single consumer. `push` never blocks: when the
/// queue is at capacity the newest frame is refused and the producer
/// learns via the return value. Depth is tracked in an atomic so
/// observers never disturb the queue itself.
pub struct FrameQueue {
    frames: Mutex<VecDeque<Bytes>>,
    capacity: usize,
    depth: AtomicUsize,
    ready: Notify,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            depth: AtomicUsize::new(0),
            ready: Notify::new(),
        }
    }

    /// Enqueues a frame; returns false (dropping the frame) when full.
    pub fn push(&self, frame: Bytes) -> bool {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() >= self.capacity {
            return false;
        }
        frames.push_back(frame);
        self.depth.store(frames.len(), Ordering::Release);
        drop(frames);

        self.ready.notify_one();
        true
    }

    pub fn pop(&self) -> Option<Bytes> {
        let mut frames = self.frames.lock().unwrap();
        let frame = frames.pop_front();
        self.depth.store(frames.len(), Ordering::Release);
        frame
    }

    /// Parks the consumer until a producer pushes. A push that races
    /// ahead of this call leaves a stored permit, so the wakeup is
    /// never lost.
    pub async fn ready(&self) {
        self.ready.notified().await;
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_newest_and_reports_it() {
        let queue = FrameQueue::new(2);

        assert!(queue.push(Bytes::from_static(b"a")));
        assert!(queue.push(Bytes::from_static(b"b")));
        assert!(!queue.push(Bytes::from_static(b"c")));
        assert_eq!(queue.depth(), 2);

        assert_eq!(queue.pop().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(queue.depth(), 1);
        assert!(queue.push(Bytes::from_static(b"d")));
    }

    #[test]
    fn pops_preserve_fifo_order() {
        let queue = FrameQueue::new(8);
        for i in 0u8..5 {
            assert!(queue.push(Bytes::copy_from_slice(&[i])));
        }

        for i in 0u8..5 {
            assert_eq!(queue.pop().unwrap()[0], i);
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn depth_never_exceeds_capacity() {
        let queue = FrameQueue::new(3);
        for _ in 0..10 {
            queue.push(Bytes::from_static(b"x"));
            assert!(queue.depth() <= queue.capacity());
        }
        assert_eq!(queue.depth(), 3);
    }

    #[tokio::test]
    async fn ready_wakes_after_push() {
        use std::sync::Arc;

        let queue = Arc::new(FrameQueue::new(4));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.ready().await;
                queue.pop()
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.push(Bytes::from_static(b"wake"));

        let frame = waiter.await.unwrap();
        assert_eq!(frame.unwrap(), Bytes::from_static(b"wake"));
    }
}
