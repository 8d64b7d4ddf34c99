//! Fixed-capacity frame queue
//!
//! The queue is an index-based arena of frame slots with an explicit
//! three-state tag per slot (free, in use, ready) and a FIFO order ring.
//! The assigned worker claims a free slot through a [`DecodeLease`]
//! that moves the slot's pixel buffer out for the duration of the
//! decode, so no slot is ever read and written concurrently; the
//! consumer sees the front slot through a short-lived lock guard.
//!
//! Running out of free slots is the engine's sole back-pressure
//! mechanism: `request_empty` returns `None` and the decode call does
//! nothing.

use super::frame::VideoFrame;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::collections::VecDeque;

/// Slot lifecycle tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Available for a decode to claim
    Free,
    /// Claimed by an in-flight decode, buffer checked out
    InUse,
    /// Decoded, awaiting consumption
    Ready,
}

struct Slot {
    state: SlotState,
    frame: VideoFrame,
}

struct QueueInner {
    slots: Vec<Slot>,
    /// Slot indices in FIFO order; the front is the oldest
    order: VecDeque<usize>,
    buffer_len: usize,
}

impl QueueInner {
    fn with_capacity(capacity: usize, buffer_len: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                state: SlotState::Free,
                frame: VideoFrame::with_buffer_len(buffer_len),
            })
            .collect();
        Self {
            slots,
            order: (0..capacity).collect(),
            buffer_len,
        }
    }
}

/// A claimed frame slot with its pixel buffer checked out
///
/// Produced by [`FrameQueue::request_empty`]; finish with
/// [`FrameQueue::commit`] once decoded, or [`FrameQueue::abandon`] if
/// the decode produced nothing.
pub struct DecodeLease {
    slot: usize,
    buffer: Vec<u8>,
}

impl DecodeLease {
    /// The checked-out pixel buffer to decode into
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

/// Display metadata of a queued frame, copied out without holding the
/// queue lock
#[derive(Debug, Clone, Copy)]
pub struct FrameMeta {
    pub display_time: f64,
    pub iteration: bool,
    pub frame_number: u64,
}

/// Read guard over the front ready frame
pub struct FrontFrame<'a> {
    guard: MappedMutexGuard<'a, VideoFrame>,
}

impl std::ops::Deref for FrontFrame<'_> {
    type Target = VideoFrame;

    fn deref(&self) -> &VideoFrame {
        &self.guard
    }
}

/// Mutual-exclusion-guarded ring of reusable frame slots
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
}

impl FrameQueue {
    /// Create a queue of `capacity` slots with `buffer_len`-byte pixel
    /// buffers
    pub fn new(capacity: usize, buffer_len: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::with_capacity(capacity, buffer_len)),
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Pixel buffer length per slot
    pub fn buffer_len(&self) -> usize {
        self.inner.lock().buffer_len
    }

    /// Number of decoded frames awaiting consumption
    pub fn ready_count(&self) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Ready)
            .count()
    }

    /// Number of slots available for a decode to claim
    pub fn free_count(&self) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Free)
            .count()
    }

    /// Claim the oldest free slot for a decode
    ///
    /// Returns `None` when every slot is in use or ready — the
    /// back-pressure signal.
    pub fn request_empty(&self) -> Option<DecodeLease> {
        let mut inner = self.inner.lock();
        let slot = inner
            .order
            .iter()
            .copied()
            .find(|&i| inner.slots[i].state == SlotState::Free)?;
        inner.slots[slot].state = SlotState::InUse;
        let buffer = std::mem::take(&mut inner.slots[slot].frame.data);
        Some(DecodeLease { slot, buffer })
    }

    /// Return a decoded lease, marking its slot ready
    pub fn commit(&self, lease: DecodeLease, display_time: f64, iteration: bool, frame_number: u64) {
        let mut inner = self.inner.lock();
        let slot = &mut inner.slots[lease.slot];
        debug_assert_eq!(slot.state, SlotState::InUse);
        slot.frame.data = lease.buffer;
        slot.frame.display_time = display_time;
        slot.frame.iteration = iteration;
        slot.frame.frame_number = frame_number;
        slot.state = SlotState::Ready;
    }

    /// Return an unused lease, freeing its slot
    pub fn abandon(&self, lease: DecodeLease) {
        let mut inner = self.inner.lock();
        let slot = &mut inner.slots[lease.slot];
        debug_assert_eq!(slot.state, SlotState::InUse);
        slot.frame.data = lease.buffer;
        slot.state = SlotState::Free;
    }

    /// Display metadata of the front frame, if it is ready
    ///
    /// Idempotent; repeated calls before a pop describe the same frame.
    pub fn front_meta(&self) -> Option<FrameMeta> {
        let inner = self.inner.lock();
        let &front = inner.order.front()?;
        let slot = &inner.slots[front];
        if slot.state != SlotState::Ready {
            return None;
        }
        Some(FrameMeta {
            display_time: slot.frame.display_time,
            iteration: slot.frame.iteration,
            frame_number: slot.frame.frame_number,
        })
    }

    /// Borrow the front frame for reading, if it is ready
    ///
    /// The guard holds the queue lock; copy the pixels out and drop it
    /// promptly.
    pub fn front(&self) -> Option<FrontFrame<'_>> {
        let inner = self.inner.lock();
        let front = *inner.order.front()?;
        if inner.slots[front].state != SlotState::Ready {
            return None;
        }
        let guard = MutexGuard::map(inner, |inner: &mut QueueInner| {
            &mut inner.slots[front].frame
        });
        Some(FrontFrame { guard })
    }

    /// Free the front slot and rotate it to the back of the ring
    ///
    /// Returns false if the front slot was not ready.
    pub fn pop(&self) -> bool {
        let mut inner = self.inner.lock();
        let Some(&front) = inner.order.front() else {
            return false;
        };
        if inner.slots[front].state != SlotState::Ready {
            return false;
        }
        inner.slots[front].state = SlotState::Free;
        inner.slots[front].frame.display_time = 0.0;
        inner.slots[front].frame.frame_number = 0;
        inner.order.rotate_left(1);
        true
    }

    /// Mark every slot free, discarding ready frames
    ///
    /// Precondition: no decode lease is outstanding (the caller either
    /// is the assigned worker itself or has waited for release).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for slot in &mut inner.slots {
            debug_assert_ne!(slot.state, SlotState::InUse);
            slot.state = SlotState::Free;
            slot.frame.display_time = 0.0;
            slot.frame.frame_number = 0;
        }
    }

    /// Discard all slots and reallocate
    ///
    /// Ready frames are lost. Precondition: no decode lease is
    /// outstanding.
    pub fn resize(&self, capacity: usize, buffer_len: usize) {
        let mut inner = self.inner.lock();
        *inner = QueueInner::with_capacity(capacity, buffer_len);
    }
}
