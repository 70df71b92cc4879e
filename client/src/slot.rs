use facecall_common::frame::Frame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Single-slot handoff of the newest remote frame from the receive loop to
/// the render tick.
///
/// Intentionally lossy: a frame published before the previous one was shown
/// replaces it, and a tick with nothing new re-shows the last frame. The swap
/// happens under a lock so a reader never sees a half-written frame.
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Option<Arc<Frame>>>,
    published: AtomicU64,
    overwritten: AtomicU64,
    unseen: AtomicBool,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        *self.slot.lock() = Some(frame);
        self.published.fetch_add(1, Ordering::Relaxed);
        if self.unseen.swap(true, Ordering::AcqRel) {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// The newest frame, if any has arrived. Does not empty the slot.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        let frame = self.slot.lock().clone();
        if frame.is_some() {
            self.unseen.store(false, Ordering::Release);
        }
        frame
    }

    pub fn take(&self) -> Option<Arc<Frame>> {
        self.unseen.store(false, Ordering::Release);
        self.slot.lock().take()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frames replaced before any reader looked at them.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn frame(seq: u64) -> Frame {
        Frame::new(RgbImage::new(4, 4), 0, seq)
    }

    #[test]
    fn empty_until_published() {
        let slot = LatestFrame::new();
        assert!(slot.latest().is_none());
        slot.publish(frame(1));
        assert_eq!(slot.latest().unwrap().seq, 1);
    }

    #[test]
    fn newer_frame_wins_and_old_one_is_counted_as_dropped() {
        let slot = LatestFrame::new();
        slot.publish(frame(1));
        slot.publish(frame(2));
        assert_eq!(slot.latest().unwrap().seq, 2);
        assert_eq!(slot.published(), 2);
        assert_eq!(slot.overwritten(), 1);

        // Seen frame replaced: not an overwrite.
        slot.publish(frame(3));
        assert_eq!(slot.overwritten(), 1);
    }

    #[test]
    fn latest_redisplays_and_take_empties() {
        let slot = LatestFrame::new();
        slot.publish(frame(5));
        assert_eq!(slot.latest().unwrap().seq, 5);
        assert_eq!(slot.latest().unwrap().seq, 5);
        assert_eq!(slot.take().unwrap().seq, 5);
        assert!(slot.latest().is_none());
    }

    #[test]
    fn concurrent_publish_and_read() {
        let slot = Arc::new(LatestFrame::new());
        let writer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for seq in 0..1000 {
                    slot.publish(frame(seq));
                }
            })
        };
        let mut last = 0;
        for _ in 0..1000 {
            if let Some(f) = slot.latest() {
                assert!(f.seq >= last);
                assert_eq!(f.image.dimensions(), (4, 4));
                last = f.seq;
            }
        }
        writer.join().unwrap();
        assert_eq!(slot.latest().unwrap().seq, 999);
    }
}
