//! Fixed-capacity circular store of interleaved PCM samples.
//!
//! This is the hand-off between the capture context and the writer thread.
//! The buffer holds `nmemb` elements of `size` bytes. Callers never copy
//! across the wrap point: they ask for the *linear* capacity (the run up to
//! the end of storage or up to the other cursor), touch at most that many
//! elements, then commit.
//!
//! Cursors and sample bytes are locked separately. [`RingCursors`] sits
//! behind the mutex the recorder pairs with its condvar and is held only
//! for capacity queries and commits. The bytes live in fixed slots, each
//! behind its own lock, which [`RingBuffer::store`] and [`RingBuffer::load`]
//! take while copying. One producer and one consumer are assumed.

use parking_lot::Mutex;

use crate::error::{Result, VoxError};

/// Number of 100 ms read periods the recorder's ring can hold.
pub const RING_PERIODS: usize = 8;

/// Head, tail and fill count of a ring of `nmemb` elements.
#[derive(Debug)]
pub struct RingCursors {
    /// Capacity in elements.
    nmemb: usize,
    /// Next element to read.
    head: usize,
    /// Next element to write.
    tail: usize,
    /// Filled elements; disambiguates empty from full when `head == tail`.
    used: usize,
}

impl RingCursors {
    pub fn new(nmemb: usize) -> Self {
        Self {
            nmemb,
            head: 0,
            tail: 0,
            used: 0,
        }
    }

    /// Capacity in elements.
    pub fn capacity(&self) -> usize {
        self.nmemb
    }

    /// Filled elements.
    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn is_full(&self) -> bool {
        self.used == self.nmemb
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Elements readable from `head` without wrapping.
    pub fn read_linear_capacity(&self) -> usize {
        if self.used == 0 {
            0
        } else if self.head < self.tail {
            self.tail - self.head
        } else {
            self.nmemb - self.head
        }
    }

    /// Elements writable at `tail` without wrapping.
    pub fn write_linear_capacity(&self) -> usize {
        if self.used == self.nmemb {
            0
        } else if self.tail < self.head {
            self.head - self.tail
        } else {
            self.nmemb - self.tail
        }
    }

    /// Release `n` elements read from `head`.
    ///
    /// # Panics
    /// If `n` exceeds the current read linear capacity.
    pub fn commit_read(&mut self, n: usize) {
        let capacity = self.read_linear_capacity();
        assert!(
            n <= capacity,
            "commit_read({n}) exceeds linear capacity {capacity}"
        );
        self.used -= n;
        if self.used == 0 {
            // Canonical empty state: the next write gets the longest run.
            self.head = 0;
            self.tail = 0;
            return;
        }
        self.head += n;
        if self.head == self.nmemb {
            self.head = 0;
        }
    }

    /// Publish `n` elements written at `tail`.
    ///
    /// # Panics
    /// If `n` exceeds the current write linear capacity.
    pub fn commit_write(&mut self, n: usize) {
        let capacity = self.write_linear_capacity();
        assert!(
            n <= capacity,
            "commit_write({n}) exceeds linear capacity {capacity}"
        );
        self.used += n;
        self.tail += n;
        if self.tail == self.nmemb {
            self.tail = 0;
        }
    }

    /// Publish `n` elements copied at `start`, the tail observed before the
    /// copy with the lock released.
    ///
    /// The consumer may have drained the ring in the meantime, which moves
    /// both cursors back to zero; the empty ring is then re-anchored at
    /// `start`.
    ///
    /// # Panics
    /// If the tail moved while elements were still queued, or if `n`
    /// exceeds the write linear capacity at `start`.
    pub fn commit_write_at(&mut self, start: usize, n: usize) {
        if self.tail != start {
            assert!(
                self.used == 0,
                "tail moved from {start} to {} with {} elements queued",
                self.tail,
                self.used
            );
            self.head = start;
            self.tail = start;
        }
        self.commit_write(n);
    }
}

/// Sample storage split into independently locked slots.
struct Slots {
    slot_bytes: usize,
    slots: Box<[Mutex<Box<[u8]>>]>,
}

impl Slots {
    fn allocate(bytes: usize, slot_bytes: usize) -> Result<Self> {
        let count = bytes.div_ceil(slot_bytes);
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(count)
            .map_err(|_| VoxError::Allocation { bytes })?;
        let mut left = bytes;
        while left > 0 {
            let len = left.min(slot_bytes);
            let mut slot = Vec::new();
            slot.try_reserve_exact(len)
                .map_err(|_| VoxError::Allocation { bytes })?;
            slot.resize(len, 0);
            slots.push(Mutex::new(slot.into_boxed_slice()));
            left -= len;
        }
        Ok(Self {
            slot_bytes,
            slots: slots.into_boxed_slice(),
        })
    }

    fn write_at(&self, mut offset: usize, mut data: &[u8]) {
        while !data.is_empty() {
            let mut slot = self.slots[offset / self.slot_bytes].lock();
            let within = offset % self.slot_bytes;
            let n = data.len().min(slot.len() - within);
            slot[within..within + n].copy_from_slice(&data[..n]);
            data = &data[n..];
            offset += n;
        }
    }

    fn read_at(&self, mut offset: usize, mut len: usize, out: &mut Vec<u8>) {
        while len > 0 {
            let slot = self.slots[offset / self.slot_bytes].lock();
            let within = offset % self.slot_bytes;
            let n = len.min(slot.len() - within);
            out.extend_from_slice(&slot[within..within + n]);
            len -= n;
            offset += n;
        }
    }
}

pub struct RingBuffer {
    cursors: Mutex<RingCursors>,
    slots: Slots,
    /// Element size in bytes.
    size: usize,
}

impl RingBuffer {
    /// Allocate a buffer of `nmemb` elements, `size` bytes each, stored in
    /// a single slot.
    ///
    /// # Errors
    /// `InvalidParameter` for a zero dimension, `Allocation` when the
    /// backing storage cannot be reserved.
    pub fn new(nmemb: usize, size: usize) -> Result<Self> {
        Self::with_slot_elements(nmemb, size, nmemb)
    }

    /// Like [`new`](Self::new) with storage split into slots of
    /// `slot_elements` elements, so a copy into one slot never waits on a
    /// copy out of another.
    pub fn with_slot_elements(nmemb: usize, size: usize, slot_elements: usize) -> Result<Self> {
        if nmemb == 0 || size == 0 || slot_elements == 0 {
            return Err(VoxError::InvalidParameter(format!(
                "ring buffer needs non-zero dimensions \
                 (nmemb={nmemb}, size={size}, slot={slot_elements})"
            )));
        }
        let bytes = nmemb
            .checked_mul(size)
            .ok_or(VoxError::Allocation { bytes: usize::MAX })?;
        let slot_bytes = slot_elements.min(nmemb) * size;

        Ok(Self {
            cursors: Mutex::new(RingCursors::new(nmemb)),
            slots: Slots::allocate(bytes, slot_bytes)?,
            size,
        })
    }

    /// The cursor lock. Hold it for queries and commits only.
    pub fn cursors(&self) -> &Mutex<RingCursors> {
        &self.cursors
    }

    /// Capacity in elements.
    pub fn capacity(&self) -> usize {
        self.cursors.lock().capacity()
    }

    pub fn element_size(&self) -> usize {
        self.size
    }

    /// Copy whole elements into storage starting at element `at`.
    ///
    /// The range must come from a write linear capacity query and must not
    /// be committed yet.
    pub fn store(&self, at: usize, data: &[u8]) {
        debug_assert_eq!(data.len() % self.size, 0);
        self.slots.write_at(at * self.size, data);
    }

    /// Append `n` elements starting at element `at` to `out`.
    ///
    /// The range must come from a read linear capacity query and must not
    /// be released yet.
    pub fn load(&self, at: usize, n: usize, out: &mut Vec<u8>) {
        self.slots.read_at(at * self.size, n * self.size, out);
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("cursors", &*self.cursors.lock())
            .field("size", &self.size)
            .field("slots", &self.slots.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_zero_dimensions() {
        assert!(matches!(
            RingBuffer::new(0, 2),
            Err(VoxError::InvalidParameter(_))
        ));
        assert!(matches!(
            RingBuffer::new(16, 0),
            Err(VoxError::InvalidParameter(_))
        ));
        assert!(matches!(
            RingBuffer::with_slot_elements(16, 2, 0),
            Err(VoxError::InvalidParameter(_))
        ));
    }

    #[test]
    fn oversized_request_is_an_allocation_error() {
        assert!(matches!(
            RingBuffer::new(usize::MAX, 2),
            Err(VoxError::Allocation { .. })
        ));
    }

    #[test]
    fn fresh_buffer_is_empty() {
        let rb = RingBuffer::new(1024, 2).unwrap();
        let cursors = rb.cursors().lock();
        assert!(cursors.is_empty());
        assert_eq!(cursors.read_linear_capacity(), 0);
        assert_eq!(cursors.write_linear_capacity(), 1024);
        assert_eq!(cursors.head(), cursors.tail());
    }

    #[test]
    fn write_then_read_returns_to_begin() {
        let mut rb = RingCursors::new(1024);

        rb.commit_write(512);
        rb.commit_write(256);
        assert_eq!(rb.len(), 768);
        assert_eq!(rb.read_linear_capacity(), 768);
        assert_eq!(rb.write_linear_capacity(), 256);

        rb.commit_read(512);
        assert_eq!(rb.read_linear_capacity(), 256);
        rb.commit_read(256);

        assert!(rb.is_empty());
        assert_eq!(rb.head(), 0);
        assert_eq!(rb.tail(), 0);
    }

    #[test]
    fn full_buffer_reports_no_write_capacity() {
        let mut rb = RingCursors::new(8);
        rb.commit_write(8);
        assert!(rb.is_full());
        assert_eq!(rb.head(), rb.tail());
        assert_eq!(rb.write_linear_capacity(), 0);
        assert_eq!(rb.read_linear_capacity(), 8);
    }

    #[test]
    fn wrapped_data_is_read_in_two_runs() {
        let rb = RingBuffer::with_slot_elements(10, 1, 4).unwrap();
        let mut out = Vec::new();
        {
            let mut c = rb.cursors().lock();
            c.commit_write(8);
            c.commit_read(6);
            // tail=8, head=6: two slots before the end, six after wrap.
            assert_eq!(c.write_linear_capacity(), 2);
        }
        rb.store(8, &[1, 2]);
        rb.cursors().lock().commit_write(2);
        assert_eq!(rb.cursors().lock().tail(), 0);
        assert_eq!(rb.cursors().lock().write_linear_capacity(), 6);
        rb.store(0, &[3, 4, 5]);
        rb.cursors().lock().commit_write(3);

        assert_eq!(rb.cursors().lock().read_linear_capacity(), 4);
        rb.cursors().lock().commit_read(2);
        rb.load(8, 2, &mut out);
        assert_eq!(out, [1, 2]);
        rb.cursors().lock().commit_read(2);
        assert_eq!(rb.cursors().lock().head(), 0);
        out.clear();
        rb.load(0, 3, &mut out);
        assert_eq!(out, [3, 4, 5]);
    }

    #[test]
    fn copies_span_slot_boundaries() {
        let rb = RingBuffer::with_slot_elements(10, 2, 3).unwrap();
        let data: Vec<u8> = (0..14).collect();
        rb.store(1, &data);
        let mut out = Vec::new();
        rb.load(1, 7, &mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn drained_ring_is_reanchored_at_the_copy_start() {
        let mut rb = RingCursors::new(10);
        rb.commit_write(4);
        // Producer observes tail=4 and copies without the lock while the
        // consumer drains everything.
        let start = rb.tail();
        rb.commit_read(4);
        assert_eq!(rb.tail(), 0);

        rb.commit_write_at(start, 3);
        assert_eq!(rb.head(), 4);
        assert_eq!(rb.tail(), 7);
        assert_eq!(rb.read_linear_capacity(), 3);
    }

    #[test]
    #[should_panic(expected = "exceeds linear capacity")]
    fn commit_write_beyond_capacity_panics() {
        let mut rb = RingCursors::new(4);
        rb.commit_write(5);
    }

    #[test]
    #[should_panic(expected = "exceeds linear capacity")]
    fn commit_read_beyond_capacity_panics() {
        let mut rb = RingCursors::new(4);
        rb.commit_write(2);
        rb.commit_read(3);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Write(usize),
        Read(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(1usize..48).prop_map(Op::Write), (1usize..48).prop_map(Op::Read)]
    }

    proptest! {
        #[test]
        fn cursors_and_content_stay_consistent(
            nmemb in 1usize..40,
            slot in 1usize..12,
            ops in proptest::collection::vec(op(), 1..200),
        ) {
            let rb = RingBuffer::with_slot_elements(nmemb, 2, slot).unwrap();
            let mut expected = std::collections::VecDeque::<u16>::new();
            let mut next = 0u16;
            let mut out = Vec::new();

            for op in ops {
                match op {
                    Op::Write(want) => {
                        let mut remaining = want;
                        // Two linear runs always cover the free space.
                        for _ in 0..2 {
                            let (at, capacity) = {
                                let c = rb.cursors().lock();
                                (c.tail(), c.write_linear_capacity())
                            };
                            let n = remaining.min(capacity);
                            if n == 0 {
                                break;
                            }
                            let mut bytes = Vec::with_capacity(n * 2);
                            for _ in 0..n {
                                bytes.extend_from_slice(&next.to_le_bytes());
                                expected.push_back(next);
                                next = next.wrapping_add(1);
                            }
                            rb.store(at, &bytes);
                            rb.cursors().lock().commit_write_at(at, n);
                            remaining -= n;
                        }
                        prop_assert!(remaining == 0 || rb.cursors().lock().is_full());
                    }
                    Op::Read(want) => {
                        let mut remaining = want;
                        for _ in 0..2 {
                            let (at, capacity) = {
                                let c = rb.cursors().lock();
                                (c.head(), c.read_linear_capacity())
                            };
                            let n = remaining.min(capacity);
                            if n == 0 {
                                break;
                            }
                            out.clear();
                            rb.load(at, n, &mut out);
                            for sample in out.chunks_exact(2) {
                                let got = u16::from_le_bytes([sample[0], sample[1]]);
                                prop_assert_eq!(Some(got), expected.pop_front());
                            }
                            rb.cursors().lock().commit_read(n);
                            remaining -= n;
                        }
                        prop_assert!(remaining == 0 || rb.cursors().lock().is_empty());
                    }
                }

                let c = rb.cursors().lock();
                prop_assert_eq!(c.len(), expected.len());
                prop_assert!(c.read_linear_capacity() <= c.len());
                prop_assert!(c.write_linear_capacity() <= nmemb - c.len());
                prop_assert!(c.head() < nmemb && c.tail() < nmemb);
                if c.is_empty() {
                    prop_assert_eq!(c.head(), c.tail());
                }
            }
        }
    }
}
