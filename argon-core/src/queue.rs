//! Bounded inter-stage queue with a drop-newest overflow policy.
//!
//! Both hand-offs in the pipeline (render→encoder and encoder→transmitter)
//! use this queue. Dropping the incoming item rather than an older queued
//! one preserves the temporal ordering of whatever is delivered downstream.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Push an item unless the queue is full.
    ///
    /// Returns `false` when the item was rejected (queue full). The caller
    /// accounts for the drop.
    pub fn push(&self, item: T) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(item);
        drop(items);
        self.available.notify_one();
        true
    }

    /// Pop the oldest item, waiting up to `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let mut items = self.items.lock();
        if items.is_empty() {
            self.available.wait_for(&mut items, timeout);
        }
        items.pop_front()
    }

    /// Pop the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all queued items.
    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Wake any worker blocked in [`pop`](Self::pop), e.g. on shutdown.
    pub fn notify_all(&self) {
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_when_full() {
        let q = BoundedQueue::new(2);
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(!q.push(3));
        assert_eq!(q.len(), 2);
        // FIFO order, and the rejected item never entered the queue
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn pop_times_out_when_empty() {
        let q: BoundedQueue<u32> = BoundedQueue::new(1);
        assert_eq!(q.pop(Duration::from_millis(10)), None);
    }

    #[test]
    fn push_wakes_waiting_pop() {
        use std::sync::Arc;
        let q = Arc::new(BoundedQueue::new(4));
        let q2 = Arc::clone(&q);
        let waiter = std::thread::spawn(move || q2.pop(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(q.push(7));
        assert_eq!(waiter.join().unwrap(), Some(7));
    }
}
