//! Single-slot overwrite buffer for the frame pipeline.
//!
//! The slot is the only synchronization surface between the capture thread
//! and the UI thread. One producer publishes, any number of readers poll;
//! a stalled reader never blocks the producer and never accumulates memory,
//! because each publish unconditionally drops the previous frame.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;

use crate::source::Frame;

/// Overwrite-on-write buffer holding at most one frame.
///
/// Readers never observe a torn frame: the slot swaps an `Arc` pointer, so a
/// frame is fully built before it becomes visible, and the sequence a reader
/// gets can only grow across successive reads.
pub struct FrameSlot {
    latest: ArcSwapOption<StoredFrame>,
    sequence: AtomicU64,
    stats: CachePadded<Stats>,
}

struct StoredFrame {
    frame: Frame,
    sequence: u64,
    taken: AtomicBool,
}

#[derive(Default)]
struct Stats {
    frames_published: AtomicUsize,
    frames_dropped_unread: AtomicUsize,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            latest: ArcSwapOption::const_empty(),
            sequence: AtomicU64::new(0),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: publish a frame, replacing any unread previous one.
    ///
    /// Returns the sequence number assigned to the frame.
    pub fn publish(&self, frame: Frame) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let prev = self.latest.swap(Some(Arc::new(StoredFrame {
            frame,
            sequence,
            taken: AtomicBool::new(false),
        })));

        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        if let Some(prev) = prev {
            if !prev.taken.load(Ordering::Relaxed) {
                self.stats
                    .frames_dropped_unread
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
        sequence
    }

    /// Consumer: fetch the newest frame and its sequence, if any.
    ///
    /// Non-blocking. Frames are cheap to clone (shared byte buffer), so the
    /// slot keeps its copy for later readers such as snapshot requests.
    pub fn latest(&self) -> Option<(Frame, u64)> {
        let stored = self.latest.load_full()?;
        stored.taken.store(true, Ordering::Relaxed);
        Some((stored.frame.clone(), stored.sequence))
    }

    /// Empty the slot without resetting the sequence counter, so sequence
    /// numbers stay monotonic across sessions.
    pub fn clear(&self) {
        self.latest.store(None);
    }

    /// Highest sequence number assigned so far.
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// (published, dropped-before-read)
    pub fn stats(&self) -> (usize, usize) {
        (
            self.stats.frames_published.load(Ordering::Relaxed),
            self.stats.frames_dropped_unread.load(Ordering::Relaxed),
        )
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PixelFormat;
    use bytes::Bytes;

    fn frame(tag: u8) -> Frame {
        Frame::from_packed(Bytes::from(vec![tag; 12]), 2, 2, PixelFormat::Rgb24)
    }

    #[test]
    fn empty_slot_reads_none() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());
    }

    #[test]
    fn read_returns_newest_frame() {
        let slot = FrameSlot::new();
        slot.publish(frame(1));
        slot.publish(frame(2));
        slot.publish(frame(3));

        let (frame, seq) = slot.latest().unwrap();
        assert_eq!(frame.data[0], 3);
        assert_eq!(seq, 3);
    }

    #[test]
    fn unread_frames_count_as_dropped() {
        let slot = FrameSlot::new();
        slot.publish(frame(1));
        slot.publish(frame(2));
        slot.latest();
        slot.publish(frame(3));

        let (published, dropped) = slot.stats();
        assert_eq!(published, 3);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn clear_keeps_sequence_monotonic() {
        let slot = FrameSlot::new();
        slot.publish(frame(1));
        slot.clear();
        assert!(slot.latest().is_none());

        let seq = slot.publish(frame(2));
        assert_eq!(seq, 2);
    }

    #[test]
    fn reader_never_observes_decreasing_sequence() {
        let slot = Arc::new(FrameSlot::new());

        let writer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for i in 0..1000u32 {
                    slot.publish(frame(i as u8));
                }
            })
        };

        let mut last = 0u64;
        while last < 1000 {
            if let Some((_, seq)) = slot.latest() {
                assert!(seq >= last, "sequence went backwards: {last} -> {seq}");
                last = seq;
            }
        }
        writer.join().unwrap();
    }
}
