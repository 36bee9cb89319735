// SPDX-License-Identifier: GPL-3.0-only

//! Bounded hand-off of captured frames from the capture callback to the
//! render thread, plus the sample-request backpressure counter.
//!
//! The queue is a fixed ring of [`SAMPLE_QUEUE_CAPACITY`] slots. Once full,
//! new arrivals are dropped (drop-newest): the producer is never blocked and
//! never sees an error. Frames already queued stay in FIFO order.
//!
//! Backpressure is tracked next to the ring because `discard()` must reset
//! both atomically from the caller's point of view. Every request handed to
//! the capture source is stamped with the current epoch; `discard()` advances
//! the epoch so completions for requests issued before a flush are ignored.

use crate::backends::camera::{FrameBuffer, SampleRequest};
use crate::constants::{MAX_OUTSTANDING_REQUESTS, SAMPLE_QUEUE_CAPACITY};
use std::sync::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::trace;

/// Outcome of handing a captured frame back to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Request accounted for and frame queued
    Enqueued,
    /// Request accounted for, frame dropped because the queue was full
    Dropped,
    /// Request from an earlier epoch; nothing changed
    Stale,
}

struct Ring {
    slots: [Option<FrameBuffer>; SAMPLE_QUEUE_CAPACITY],
    head: usize,
    len: usize,
}

impl Ring {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            head: 0,
            len: 0,
        }
    }

    fn clear(&mut self) -> usize {
        let dropped = self.len;
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
        dropped
    }
}

/// Fixed-capacity frame queue with producer backpressure accounting
pub struct SampleQueue {
    ring: Mutex<Ring>,
    outstanding: AtomicUsize,
    epoch: AtomicU64,
    next_request_id: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl Default for SampleQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleQueue {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(Ring::new()),
            outstanding: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            next_request_id: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a frame.
    ///
    /// Returns `false` when the queue was full and the frame was dropped.
    /// That is not an error for the producer.
    pub fn enqueue(&self, frame: FrameBuffer) -> bool {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        self.push(ring, frame)
    }

    fn push(&self, mut ring: MutexGuard<'_, Ring>, frame: FrameBuffer) -> bool {
        if ring.len == SAMPLE_QUEUE_CAPACITY {
            drop(ring);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(sequence = frame.sequence, "Sample queue full, dropping newest frame");
            // The frame and its lease are released here
            return false;
        }
        let tail = (ring.head + ring.len) % SAMPLE_QUEUE_CAPACITY;
        ring.slots[tail] = Some(frame);
        ring.len += 1;
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Account for the arrival of `request` and queue its frame.
    ///
    /// The epoch check, the outstanding decrement and the enqueue happen under
    /// the ring lock, so a concurrent `discard()` either sees all of them or
    /// none.
    pub fn complete(&self, request: SampleRequest, frame: FrameBuffer) -> Completion {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        if !self.complete_request(request) {
            return Completion::Stale;
        }
        if self.push(ring, frame) {
            Completion::Enqueued
        } else {
            Completion::Dropped
        }
    }

    /// Take the oldest frame, if any. Never blocks.
    pub fn dequeue(&self) -> Option<FrameBuffer> {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        if ring.len == 0 {
            return None;
        }
        let head = ring.head;
        let frame = ring.slots[head].take();
        ring.head = (head + 1) % SAMPLE_QUEUE_CAPACITY;
        ring.len -= 1;
        frame
    }

    /// Drop every pending frame and reset backpressure.
    ///
    /// Afterwards the queue behaves like a freshly constructed one, except
    /// that requests issued before the call are no longer recognised.
    pub fn discard(&self) {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = ring.clear();
        self.outstanding.store(0, Ordering::SeqCst);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        drop(ring);
        trace!(dropped, epoch, "Sample queue discarded");
    }

    /// Reserve a slot for one more sample request in the current epoch.
    ///
    /// Returns `None` when [`MAX_OUTSTANDING_REQUESTS`] are already in flight.
    pub fn try_reserve_request(&self) -> Option<SampleRequest> {
        self.reserve(None)
    }

    /// Like [`try_reserve_request`](Self::try_reserve_request), but only while
    /// `epoch` is still current. A completion that raced a `discard()` uses
    /// this so it cannot issue requests on behalf of a stopped pipeline.
    pub fn try_reserve_request_in(&self, epoch: u64) -> Option<SampleRequest> {
        self.reserve(Some(epoch))
    }

    fn reserve(&self, expected_epoch: Option<u64>) -> Option<SampleRequest> {
        // Same lock as discard(): the epoch read and the increment see either
        // the state before the flush or after it, never a mix
        let _ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let epoch = self.epoch.load(Ordering::SeqCst);
        if expected_epoch.is_some_and(|expected| expected != epoch) {
            trace!(epoch, "Queue flushed since completion, not reserving");
            return None;
        }
        self.outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < MAX_OUTSTANDING_REQUESTS).then_some(n + 1)
            })
            .ok()?;
        Some(SampleRequest {
            epoch,
            id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Give back a reservation the capture source refused
    pub fn cancel_request(&self, request: SampleRequest) {
        self.complete_request(request);
    }

    /// Account for an arrived sample.
    ///
    /// Returns `false` if the request belongs to an earlier epoch, in which
    /// case nothing changes.
    pub fn complete_request(&self, request: SampleRequest) -> bool {
        if request.epoch != self.epoch.load(Ordering::SeqCst) {
            trace!(
                request_epoch = request.epoch,
                request_id = request.id,
                "Ignoring completion from earlier epoch"
            );
            return false;
        }
        let _ = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        true
    }

    pub fn len(&self) -> usize {
        self.ring.lock().unwrap_or_else(|e| e.into_inner()).len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Frames accepted since construction
    pub fn enqueued_total(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Frames dropped on overflow since construction
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::FrameSize;
    use std::sync::Arc;

    fn frame(sequence: u64) -> FrameBuffer {
        FrameBuffer::cpu(sequence, FrameSize::new(1, 1), Arc::from(vec![0u8; 4]), 4)
    }

    #[test]
    fn test_fifo_order() {
        let queue = SampleQueue::new();
        for seq in 0..3 {
            assert!(queue.enqueue(frame(seq)));
        }
        let order: Vec<u64> = std::iter::from_fn(|| queue.dequeue().map(|f| f.sequence)).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_overflow_drops_newest() {
        let queue = SampleQueue::new();
        for seq in 0..8 {
            queue.enqueue(frame(seq));
            assert!(queue.len() <= SAMPLE_QUEUE_CAPACITY);
        }
        assert_eq!(queue.len(), SAMPLE_QUEUE_CAPACITY);
        assert_eq!(queue.dropped_total(), 3);

        let order: Vec<u64> = std::iter::from_fn(|| queue.dequeue().map(|f| f.sequence)).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_wraps_around() {
        let queue = SampleQueue::new();
        let mut expected = Vec::new();
        let mut got = Vec::new();
        for seq in 0..20 {
            queue.enqueue(frame(seq));
            expected.push(seq);
            if seq % 2 == 1 {
                got.extend(queue.dequeue().map(|f| f.sequence));
                got.extend(queue.dequeue().map(|f| f.sequence));
            }
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn test_outstanding_cap() {
        let queue = SampleQueue::new();
        let requests: Vec<_> = std::iter::from_fn(|| queue.try_reserve_request()).collect();
        assert_eq!(requests.len(), MAX_OUTSTANDING_REQUESTS);
        assert_eq!(queue.outstanding(), MAX_OUTSTANDING_REQUESTS);

        assert!(queue.complete_request(requests[0]));
        assert_eq!(queue.outstanding(), MAX_OUTSTANDING_REQUESTS - 1);
        assert!(queue.try_reserve_request().is_some());
        assert!(queue.try_reserve_request().is_none());
    }

    #[test]
    fn test_discard_resets_everything() {
        let queue = SampleQueue::new();
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        let stale = queue.try_reserve_request().expect("request");
        queue.try_reserve_request().expect("request");

        queue.discard();
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.outstanding(), 0);

        // Late completion from before the flush is ignored
        assert!(!queue.complete_request(stale));
        assert_eq!(queue.outstanding(), 0);

        // Same behaviour as a fresh queue
        let fresh: Vec<_> = std::iter::from_fn(|| queue.try_reserve_request()).collect();
        assert_eq!(fresh.len(), MAX_OUTSTANDING_REQUESTS);
        for seq in 0..SAMPLE_QUEUE_CAPACITY as u64 {
            assert!(queue.enqueue(frame(seq)));
        }
        assert!(!queue.enqueue(frame(99)));
    }

    #[test]
    fn test_complete_checks_epoch() {
        let queue = SampleQueue::new();
        let current = queue.try_reserve_request().expect("request");
        assert_eq!(queue.complete(current, frame(1)), Completion::Enqueued);
        assert_eq!(queue.outstanding(), 0);

        let stale = queue.try_reserve_request().expect("request");
        queue.discard();
        assert_eq!(queue.complete(stale, frame(2)), Completion::Stale);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reserve_in_stale_epoch_is_refused() {
        let queue = SampleQueue::new();
        let request = queue.try_reserve_request().expect("request");
        assert_eq!(queue.complete(request, frame(1)), Completion::Enqueued);

        // Flushed between the completion and its top-up
        queue.discard();
        assert!(queue.try_reserve_request_in(request.epoch).is_none());
        assert_eq!(queue.outstanding(), 0);

        let current = queue.epoch();
        assert!(queue.try_reserve_request_in(current).is_some());
        assert_eq!(queue.outstanding(), 1);
    }

    #[test]
    fn test_complete_full_queue_still_counts_arrival() {
        let queue = SampleQueue::new();
        for seq in 0..SAMPLE_QUEUE_CAPACITY as u64 {
            queue.enqueue(frame(seq));
        }
        let request = queue.try_reserve_request().expect("request");
        assert_eq!(queue.complete(request, frame(9)), Completion::Dropped);
        assert_eq!(queue.outstanding(), 0);
        assert_eq!(queue.len(), SAMPLE_QUEUE_CAPACITY);
    }

    #[test]
    fn test_cancel_request_returns_slot() {
        let queue = SampleQueue::new();
        let request = queue.try_reserve_request().expect("request");
        queue.cancel_request(request);
        assert_eq!(queue.outstanding(), 0);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_cap() {
        let queue = Arc::new(SampleQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Some(request) = queue.try_reserve_request() {
                            assert!(queue.outstanding() <= MAX_OUTSTANDING_REQUESTS);
                            queue.complete_request(request);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker");
        }
        assert_eq!(queue.outstanding(), 0);
    }
}
