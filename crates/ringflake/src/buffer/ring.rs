use core::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError, Weak};

use crossbeam_utils::CachePadded;
use tracing::debug;

use crate::{
    DiscardPutHandler, Error, ExhaustedTakeHandler, RejectedPutHandler, RejectedTakeHandler, Result,
};

/// Receives asynchronous refill requests from the ring.
///
/// Implemented by the padding executor; the ring holds only a weak
/// reference so the executor's lifetime stays with its owner.
pub trait BufferPadder: Send + Sync {
    /// Requests one padding cycle without blocking the caller. Duplicate
    /// requests while a cycle is in flight coalesce.
    fn async_padding(&self);
}

/// Cursor origin before any put or take.
const START_POINT: i64 = -1;
/// Slot flag: free to be filled by the producer.
const EMPTY: i64 = 0;
/// Slot flag: holds a uid awaiting consumption.
const FULL: i64 = 1;

/// Bounded ring of pre-minted uids with one batching producer and many
/// lock-free consumers.
///
/// Each slot pairs a uid payload with a flag atomic; the flags are the
/// synchronization medium between the producer and consumers. `tail` (last
/// published) and `cursor` (last consumed) advance monotonically from −1.
/// The flag atomics and both counters sit on their own cache lines so
/// independently-mutated hot words never share one.
///
/// Publication order on put is payload, then flag (release), then tail
/// (release); consumers pair with acquire loads, so a consumer that
/// observes a tail position also observes that slot's flag and payload.
pub struct RingBuffer {
    buffer_size: i64,
    index_mask: i64,
    slots: Box<[AtomicI64]>,
    flags: Box<[CachePadded<AtomicI64>]>,
    tail: CachePadded<AtomicI64>,
    cursor: CachePadded<AtomicI64>,
    padding_threshold: i64,
    put_lock: Mutex<()>,
    put_handler: Box<dyn RejectedPutHandler>,
    take_handler: Box<dyn RejectedTakeHandler>,
    padder: OnceLock<Weak<dyn BufferPadder>>,
}

impl RingBuffer {
    /// Builds a ring of `buffer_size` slots with the given refill threshold
    /// percentage.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] unless `buffer_size` is a positive power of
    /// two and `padding_factor` lies in `(0, 100)`.
    pub fn new(buffer_size: i64, padding_factor: u32) -> Result<Self> {
        if buffer_size <= 0 {
            return Err(Error::InvalidConfig {
                reason: format!("ring buffer size must be positive, got {buffer_size}"),
            });
        }
        if buffer_size.count_ones() != 1 {
            return Err(Error::InvalidConfig {
                reason: format!("ring buffer size must be a power of two, got {buffer_size}"),
            });
        }
        if padding_factor == 0 || padding_factor >= 100 {
            return Err(Error::InvalidConfig {
                reason: format!("padding_factor must be within (0, 100), got {padding_factor}"),
            });
        }

        let slots = (0..buffer_size)
            .map(|_| AtomicI64::new(0))
            .collect::<Box<[_]>>();
        let flags = (0..buffer_size)
            .map(|_| CachePadded::new(AtomicI64::new(EMPTY)))
            .collect::<Box<[_]>>();

        Ok(Self {
            buffer_size,
            index_mask: buffer_size - 1,
            slots,
            flags,
            tail: CachePadded::new(AtomicI64::new(START_POINT)),
            cursor: CachePadded::new(AtomicI64::new(START_POINT)),
            padding_threshold: buffer_size * i64::from(padding_factor) / 100,
            put_lock: Mutex::new(()),
            put_handler: Box::new(DiscardPutHandler),
            take_handler: Box::new(ExhaustedTakeHandler),
            padder: OnceLock::new(),
        })
    }

    /// Replaces the rejected-put policy.
    pub fn set_rejected_put_handler(&mut self, handler: Box<dyn RejectedPutHandler>) {
        self.put_handler = handler;
    }

    /// Replaces the rejected-take policy.
    pub fn set_rejected_take_handler(&mut self, handler: Box<dyn RejectedTakeHandler>) {
        self.take_handler = handler;
    }

    /// Wires the padding executor the ring pings when its fill level drops
    /// below the threshold. Only the first registration takes effect.
    pub fn set_padding_executor(&self, padder: Weak<dyn BufferPadder>) {
        let _ = self.padder.set(padder);
    }

    /// Publishes one uid into the next slot.
    ///
    /// Put is designed for a single batching producer; the internal mutex
    /// additionally serializes accidental concurrent callers. Returns
    /// `false` after invoking the rejected-put handler when the ring is
    /// full (by tail-to-cursor distance or by a still-occupied slot flag).
    pub fn put(&self, uid: i64) -> bool {
        debug_assert!(uid > 0, "uid must be positive");
        let _guard = self.put_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current_tail = self.tail.load(Ordering::Acquire);
        let current_cursor = self.cursor.load(Ordering::Acquire);

        // Tail caught the cursor from behind: every slot holds an
        // unconsumed uid.
        let distance = current_tail
            - if current_cursor == START_POINT {
                0
            } else {
                current_cursor
            };
        if distance == self.buffer_size - 1 {
            self.put_handler.on_rejected_put(self, uid);
            return false;
        }

        let next_tail_index = self.slot_index(current_tail + 1);
        if self.flags[next_tail_index].load(Ordering::Acquire) != EMPTY {
            self.put_handler.on_rejected_put(self, uid);
            return false;
        }

        self.slots[next_tail_index].store(uid, Ordering::Relaxed);
        self.flags[next_tail_index].store(FULL, Ordering::Release);
        self.tail.store(current_tail + 1, Ordering::Release);
        true
    }

    /// Takes the uid at the next cursor position.
    ///
    /// Lock-free: concurrent consumers race to advance the cursor with a
    /// CAS, so each claims a distinct position. Dropping below the padding
    /// threshold pings the registered executor for an asynchronous refill.
    ///
    /// # Errors
    ///
    /// Whatever the rejected-take handler reports when the ring is empty —
    /// [`Error::BufferExhausted`] under the default policy.
    pub fn take(&self) -> Result<i64> {
        let mut observed = self.cursor.load(Ordering::Acquire);
        let claimed = loop {
            if observed == self.tail.load(Ordering::Acquire) {
                break None;
            }
            match self.cursor.compare_exchange_weak(
                observed,
                observed + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break Some(observed + 1),
                Err(actual) => observed = actual,
            }
        };

        // Trigger padding before rejecting, so even an empty-handed
        // consumer leaves a refill in flight.
        let current_tail = self.tail.load(Ordering::Acquire);
        let position = claimed.unwrap_or(observed);
        if current_tail - position < self.padding_threshold {
            debug!(
                padding_threshold = self.padding_threshold,
                tail = current_tail,
                cursor = position,
                rest = current_tail - position,
                "reached padding threshold"
            );
            if let Some(padder) = self.padder.get().and_then(Weak::upgrade) {
                padder.async_padding();
            }
        }

        let Some(next_cursor) = claimed else {
            return Err(self.take_handler.on_rejected_take(self));
        };

        let next_cursor_index = self.slot_index(next_cursor);
        debug_assert_eq!(
            self.flags[next_cursor_index].load(Ordering::Acquire),
            FULL,
            "cursor not in takeable state"
        );

        // Read the payload before releasing the slot; flipping the flag
        // first would let the producer overwrite it after a full ring
        // traversal and this consumer could observe the newer uid.
        let uid = self.slots[next_cursor_index].load(Ordering::Relaxed);
        self.flags[next_cursor_index].store(EMPTY, Ordering::Release);
        Ok(uid)
    }

    /// Number of slots.
    pub fn buffer_size(&self) -> i64 {
        self.buffer_size
    }

    /// Last published producer position; −1 before the first put.
    pub fn tail(&self) -> i64 {
        self.tail.load(Ordering::Acquire)
    }

    /// Last consumed position; −1 before the first take.
    pub fn cursor(&self) -> i64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Fill level below which a take requests an asynchronous refill.
    pub fn padding_threshold(&self) -> i64 {
        self.padding_threshold
    }

    fn slot_index(&self, sequence: i64) -> usize {
        (sequence & self.index_mask) as usize
    }
}

impl fmt::Display for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RingBuffer {{ buffer_size: {}, tail: {}, cursor: {}, padding_threshold: {} }}",
            self.buffer_size,
            self.tail(),
            self.cursor(),
            self.padding_threshold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct CountingPutHandler {
        rejections: Arc<AtomicUsize>,
    }

    impl RejectedPutHandler for CountingPutHandler {
        fn on_rejected_put(&self, _ring: &RingBuffer, _uid: i64) {
            self.rejections.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct CountingPadder {
        requests: AtomicUsize,
    }

    impl BufferPadder for CountingPadder {
        fn async_padding(&self) {
            self.requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn rejects_invalid_construction() {
        assert!(matches!(
            RingBuffer::new(0, 50),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(matches!(
            RingBuffer::new(-8, 50),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(matches!(
            RingBuffer::new(6, 50),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(matches!(
            RingBuffer::new(8, 0),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(matches!(
            RingBuffer::new(8, 100),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn takes_in_fifo_order_then_rejects() {
        let ring = RingBuffer::new(4, 50).unwrap();
        assert!(ring.put(10));
        assert!(ring.put(20));
        assert!(ring.put(30));

        assert_eq!(ring.take().unwrap(), 10);
        assert_eq!(ring.take().unwrap(), 20);
        assert_eq!(ring.take().unwrap(), 30);
        assert!(matches!(ring.take(), Err(Error::BufferExhausted)));
    }

    #[test]
    fn full_ring_invokes_put_handler() {
        let rejections = Arc::new(AtomicUsize::new(0));
        let mut ring = RingBuffer::new(4, 50).unwrap();
        ring.set_rejected_put_handler(Box::new(CountingPutHandler {
            rejections: Arc::clone(&rejections),
        }));

        for uid in 1..=4 {
            assert!(ring.put(uid), "put {uid} into an unfilled ring");
        }
        assert!(!ring.put(5));
        assert_eq!(rejections.load(Ordering::Relaxed), 1);
        assert_eq!(ring.tail(), 3);
    }

    #[test]
    fn ring_reuses_slots_after_consumption() {
        let ring = RingBuffer::new(4, 50).unwrap();
        for round in 0..10 {
            for offset in 0..4 {
                assert!(ring.put(1 + round * 4 + offset));
            }
            assert!(!ring.put(999));
            for offset in 0..4 {
                assert_eq!(ring.take().unwrap(), 1 + round * 4 + offset);
            }
        }
    }

    #[test]
    fn concurrent_takes_return_distinct_uids() {
        const PREFILL: i64 = 512;
        const THREADS: usize = 8;

        let ring = RingBuffer::new(1024, 50).unwrap();
        for uid in 1..=PREFILL {
            assert!(ring.put(uid));
        }

        let mut taken = Vec::new();
        thread::scope(|scope| {
            let mut handles = Vec::new();
            for _ in 0..THREADS {
                handles.push(scope.spawn(|| {
                    let mut local = Vec::new();
                    for _ in 0..(PREFILL as usize / THREADS) {
                        local.push(ring.take().unwrap());
                    }
                    local
                }));
            }
            for handle in handles {
                taken.extend(handle.join().unwrap());
            }
        });

        let unique: HashSet<i64> = taken.iter().copied().collect();
        assert_eq!(unique.len(), PREFILL as usize);
        assert!(unique.iter().all(|uid| (1..=PREFILL).contains(uid)));
        assert!(matches!(ring.take(), Err(Error::BufferExhausted)));
    }

    #[test]
    fn low_fill_triggers_async_padding() {
        let ring = RingBuffer::new(8, 50).unwrap();
        let padder = Arc::new(CountingPadder {
            requests: AtomicUsize::new(0),
        });
        let dyn_padder: Arc<dyn BufferPadder> = Arc::clone(&padder) as Arc<dyn BufferPadder>;
        ring.set_padding_executor(Arc::downgrade(&dyn_padder));

        for uid in 1..=8 {
            assert!(ring.put(uid));
        }
        // Seven uids left after the first take; threshold is four, so the
        // first few takes stay quiet.
        for _ in 0..4 {
            ring.take().unwrap();
        }
        assert_eq!(padder.requests.load(Ordering::Relaxed), 0);
        ring.take().unwrap();
        assert_eq!(padder.requests.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn empty_ring_still_requests_padding() {
        let ring = RingBuffer::new(8, 50).unwrap();
        let padder = Arc::new(CountingPadder {
            requests: AtomicUsize::new(0),
        });
        let dyn_padder: Arc<dyn BufferPadder> = Arc::clone(&padder) as Arc<dyn BufferPadder>;
        ring.set_padding_executor(Arc::downgrade(&dyn_padder));

        assert!(matches!(ring.take(), Err(Error::BufferExhausted)));
        assert_eq!(padder.requests.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn dropped_padder_is_ignored() {
        let ring = RingBuffer::new(8, 50).unwrap();
        {
            let padder = Arc::new(CountingPadder {
                requests: AtomicUsize::new(0),
            });
            let dyn_padder: Arc<dyn BufferPadder> = Arc::clone(&padder) as Arc<dyn BufferPadder>;
            ring.set_padding_executor(Arc::downgrade(&dyn_padder));
        }
        // The executor is gone; a take below threshold must not panic.
        assert!(matches!(ring.take(), Err(Error::BufferExhausted)));
    }

    #[test]
    fn display_reports_counters() {
        let ring = RingBuffer::new(8, 50).unwrap();
        ring.put(7);
        let rendered = ring.to_string();
        assert!(rendered.contains("buffer_size: 8"));
        assert!(rendered.contains("tail: 0"));
        assert!(rendered.contains("cursor: -1"));
        assert!(rendered.contains("padding_threshold: 4"));
    }
}
