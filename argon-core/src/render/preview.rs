//! Preview tap.
//!
//! A single-slot most-recent-wins channel between the render loop and one
//! observer (UI widget, file writer, test harness). The observer callback
//! runs on the render-loop thread: a slow observer throttles rendering, so
//! callbacks must return quickly.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::types::Frame;

pub type PreviewCallback = Arc<dyn Fn(&Arc<Frame>) + Send + Sync>;

#[derive(Default)]
pub struct PreviewTap {
    slot: Mutex<Option<Arc<Frame>>>,
    callback: Mutex<Option<PreviewCallback>>,
}

impl PreviewTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a canvas frame, overwriting any unread one, and invoke the
    /// observer callback synchronously.
    pub fn publish(&self, frame: Arc<Frame>) {
        *self.slot.lock() = Some(Arc::clone(&frame));
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(&frame);
        }
    }

    /// The most recently rendered canvas frame
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.lock().clone()
    }

    pub fn set_callback(&self, callback: PreviewCallback) {
        *self.callback.lock() = Some(callback);
    }

    pub fn clear_callback(&self) {
        *self.callback.lock() = None;
    }

    /// Drop the stored frame
    pub fn reset(&self) {
        *self.slot.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn slot_keeps_only_newest() {
        let tap = PreviewTap::new();
        tap.publish(Arc::new(Frame {
            sequence: 1,
            ..Frame::solid(2, 2, Color::BLACK)
        }));
        tap.publish(Arc::new(Frame {
            sequence: 2,
            ..Frame::solid(2, 2, Color::BLACK)
        }));
        assert_eq!(tap.latest().unwrap().sequence, 2);
    }

    #[test]
    fn callback_runs_synchronously() {
        let tap = PreviewTap::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = Arc::clone(&seen);
        tap.set_callback(Arc::new(move |_| {
            seen_cb.fetch_add(1, Ordering::SeqCst);
        }));
        tap.publish(Arc::new(Frame::solid(2, 2, Color::BLACK)));
        tap.publish(Arc::new(Frame::solid(2, 2, Color::BLACK)));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        tap.clear_callback();
        tap.publish(Arc::new(Frame::solid(2, 2, Color::BLACK)));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
