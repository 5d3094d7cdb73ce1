//! Bounded pool of in-flight frame slots.
//!
//! Each slot owns one region of the per-frame shared rings. A frame takes a slot before it
//! writes anything and the device gives it back when the frame's command buffer completes, so
//! at most `N` frames are ever outstanding and the CPU never overwrites a region the device
//! may still read.

use flume::{Receiver, Sender};

#[derive(Debug)]
pub struct InFlightFrames {
    capacity: usize,
    sender: Sender<usize>,
    receiver: Receiver<usize>,
}

/// Ownership of one slot. Dropping it (normally from a command buffer's completion handler)
/// returns the slot to the pool.
#[derive(Debug)]
pub struct FrameSlot {
    index: usize,
    release: Sender<usize>,
}

impl FrameSlot {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        // The pool outlives its slots except during teardown, where the send has nowhere to go.
        let _ = self.release.send(self.index);
    }
}

impl InFlightFrames {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded(capacity);
        for index in 0..capacity {
            // Capacity matches the slot count, the channel cannot be full here.
            let _ = sender.send(index);
        }
        Self {
            capacity,
            sender,
            receiver,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently not owned by a frame.
    pub fn available(&self) -> usize {
        self.receiver.len()
    }

    /// Number of slots owned by frames that have not completed yet.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    /// Blocks until a slot is free.
    pub fn acquire(&self) -> FrameSlot {
        // `self` holds a sender, so the channel never disconnects while we wait.
        let index = self
            .receiver
            .recv()
            .unwrap_or_else(|_| unreachable!("in-flight pool lost its sender"));
        FrameSlot {
            index,
            release: self.sender.clone(),
        }
    }

    pub fn try_acquire(&self) -> Option<FrameSlot> {
        let index = self.receiver.try_recv().ok()?;
        Some(FrameSlot {
            index,
            release: self.sender.clone(),
        })
    }

    /// Waits for every outstanding frame to complete.
    pub fn drain(&self) {
        let mut slots: Vec<FrameSlot> = (0..self.capacity).map(|_| self.acquire()).collect();
        log::debug!("drained {} in-flight frames", slots.len());
        // Returned in index order so the next frame starts from slot 0 again.
        slots.sort_by_key(FrameSlot::index);
        drop(slots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn slots_rotate_in_order() {
        let frames = InFlightFrames::new(3);
        let order: Vec<usize> = (0..7).map(|_| frames.acquire().index()).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn acquire_blocks_until_a_slot_is_released() {
        let frames = InFlightFrames::new(2);
        let a = frames.acquire();
        let _b = frames.acquire();
        assert_eq!(frames.available(), 0);
        assert_eq!(frames.in_flight(), 2);
        assert!(frames.try_acquire().is_none());

        let (tx, rx) = flume::bounded(1);
        std::thread::scope(|s| {
            s.spawn(|| tx.send(frames.acquire().index()).unwrap());
            assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
            drop(a);
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
        });
    }

    #[test]
    fn drain_waits_for_outstanding_slots() {
        let frames = InFlightFrames::new(3);
        let held = frames.acquire();
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(held);
        });
        frames.drain();
        releaser.join().unwrap();
        assert_eq!(frames.available(), 3);
    }
}
