// crates/mediacut-media/src/queue.rs
//
// Single-producer / single-consumer FIFO with a *soft* maximum length.
// Stages poll it with a short cooperative sleep instead of blocking on a
// condvar - every stage loop also has to watch the cancellation flag, so a
// parked thread would only complicate shutdown.
//
// The cap is advisory: `push` ignores it (the demuxer must never deadlock on
// a full audio queue while video packets are wanted), `push_if_room` honours
// it, and the audio path resizes it from the measured frame duration.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// The cooperative sleep used by every polling stage loop.
pub const IDLE_POLL: Duration = Duration::from_millis(5);

pub struct BoundedQueue<T> {
    items:   Mutex<VecDeque<T>>,
    max_len: AtomicUsize,
    closed:  AtomicBool,
}

impl<T> BoundedQueue<T> {
    pub fn new(max_len: usize) -> Self {
        Self {
            items:   Mutex::new(VecDeque::new()),
            max_len: AtomicUsize::new(max_len),
            closed:  AtomicBool::new(false),
        }
    }

    /// Enqueue if below the cap; hands the item back when full so the
    /// producer can hold it across its idle sleep.
    pub fn push_if_room(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock().unwrap();
        if items.len() >= self.max_len.load(Ordering::Relaxed) {
            return Err(item);
        }
        items.push_back(item);
        Ok(())
    }

    /// Enqueue unconditionally (cap-exempt paths only).
    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push_back(item);
    }

    pub fn pop_if_available(&self) -> Option<T> {
        self.items.lock().unwrap().pop_front()
    }

    /// Pop the head only when `pred` accepts it. Lets the render stage take
    /// a frame exactly when its presentation time is due.
    pub fn pop_if<F: FnOnce(&T) -> bool>(&self, pred: F) -> Option<T> {
        let mut items = self.items.lock().unwrap();
        match items.front() {
            Some(head) if pred(head) => items.pop_front(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    pub fn has_room(&self) -> bool {
        self.len() < self.max_len.load(Ordering::Relaxed)
    }

    pub fn max_len(&self) -> usize {
        self.max_len.load(Ordering::Relaxed)
    }

    /// Resize the soft cap; queued items above the new cap stay queued.
    pub fn set_max_len(&self, max_len: usize) {
        self.max_len.store(max_len, Ordering::Relaxed);
    }

    /// Signal that no more items will be produced.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drop everything queued and reopen. Items release on drop - the queue
    /// is the sole owner of whatever is in flight.
    pub fn flush(&self) {
        self.items.lock().unwrap().clear();
        self.closed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_if_room_respects_the_cap() {
        let q = BoundedQueue::new(2);
        assert!(q.push_if_room(1).is_ok());
        assert!(q.push_if_room(2).is_ok());
        assert_eq!(q.push_if_room(3), Err(3));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn push_ignores_the_cap() {
        let q = BoundedQueue::new(1);
        q.push(1);
        q.push(2);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn fifo_order_preserved() {
        let q = BoundedQueue::new(8);
        for i in 0..4 {
            q.push(i);
        }
        assert_eq!(q.pop_if_available(), Some(0));
        assert_eq!(q.pop_if_available(), Some(1));
    }

    #[test]
    fn pop_if_only_takes_matching_head() {
        let q = BoundedQueue::new(8);
        q.push(10);
        assert_eq!(q.pop_if(|&v| v > 50), None);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_if(|&v| v == 10), Some(10));
    }

    #[test]
    fn resizing_the_cap_unblocks_producers() {
        let q = BoundedQueue::new(1);
        q.push_if_room(1).unwrap();
        assert!(q.push_if_room(2).is_err());
        q.set_max_len(4);
        assert!(q.push_if_room(2).is_ok());
    }

    #[test]
    fn flush_clears_and_reopens() {
        let q = BoundedQueue::new(4);
        q.push(1);
        q.close();
        assert!(q.is_closed());
        q.flush();
        assert!(q.is_empty());
        assert!(!q.is_closed());
    }
}
