use crate::{Error, Result};

/// Field layout of a 64-bit uid.
///
/// The sign bit is fixed at zero so every id is a positive `i64`; the
/// remaining 63 bits are split into three fields, most significant first:
///
/// ```text
/// +------+----------------------+----------------+-----------+
/// | sign |     delta seconds    |   worker id    | sequence  |
/// +------+----------------------+----------------+-----------+
///   1bit        time_bits          worker_bits     seq_bits
/// ```
///
/// `delta seconds` counts whole seconds since a configured epoch,
/// `worker id` identifies the producing process instance, and `sequence`
/// disambiguates ids minted within the same second. The triple is fixed at
/// construction; changing it invalidates every previously issued id.
///
/// # Example
///
/// ```
/// use ringflake::BitAllocator;
///
/// let allocator = BitAllocator::new(28, 22, 13)?;
/// let uid = allocator.allocate(1, 0, 0);
/// assert_eq!(uid, 1 << 35);
/// assert_eq!(allocator.split(uid), (1, 0, 0));
/// # Ok::<(), ringflake::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitAllocator {
    time_bits: u32,
    worker_bits: u32,
    seq_bits: u32,
    max_delta_seconds: i64,
    max_worker_id: i64,
    max_sequence: i64,
    timestamp_shift: u32,
    worker_shift: u32,
}

impl BitAllocator {
    /// Total width of an id, including the sign bit.
    pub const TOTAL_BITS: u32 = 64;

    /// Width of the fixed sign bit.
    pub const SIGN_BITS: u32 = 1;

    /// Builds an allocator for the given bit triple.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] when any field is zero or the triple
    /// plus the sign bit exceeds 64 bits.
    pub fn new(time_bits: u32, worker_bits: u32, seq_bits: u32) -> Result<Self> {
        if time_bits == 0
            || worker_bits == 0
            || seq_bits == 0
            || Self::SIGN_BITS + time_bits + worker_bits + seq_bits > Self::TOTAL_BITS
        {
            return Err(Error::InvalidLayout {
                time_bits,
                worker_bits,
                seq_bits,
            });
        }

        Ok(Self {
            time_bits,
            worker_bits,
            seq_bits,
            max_delta_seconds: !(-1_i64 << time_bits),
            max_worker_id: !(-1_i64 << worker_bits),
            max_sequence: !(-1_i64 << seq_bits),
            timestamp_shift: worker_bits + seq_bits,
            worker_shift: seq_bits,
        })
    }

    /// Packs the three fields into a single positive id.
    ///
    /// Callers must keep each field within its maximum; this is checked only
    /// in debug builds, matching the hot-path contract of the minter.
    pub fn allocate(&self, delta_seconds: i64, worker_id: i64, sequence: i64) -> i64 {
        debug_assert!(
            (0..=self.max_delta_seconds).contains(&delta_seconds),
            "delta seconds overflow"
        );
        debug_assert!(
            (0..=self.max_worker_id).contains(&worker_id),
            "worker id overflow"
        );
        debug_assert!(
            (0..=self.max_sequence).contains(&sequence),
            "sequence overflow"
        );
        (delta_seconds << self.timestamp_shift) | (worker_id << self.worker_shift) | sequence
    }

    /// Recovers `(delta_seconds, worker_id, sequence)` from a packed id.
    ///
    /// The inverse of [`Self::allocate`] for any id produced under the same
    /// layout. The id must be positive; negative or zero words are not ids.
    pub fn split(&self, uid: i64) -> (i64, i64, i64) {
        let total = u64::from(Self::TOTAL_BITS);
        let worker_bits = u64::from(self.worker_bits);
        let seq_bits = u64::from(self.seq_bits);
        let word = uid as u64;

        let delta_seconds = (word >> (worker_bits + seq_bits)) as i64;
        let worker_id = ((word << (total - worker_bits - seq_bits)) >> (total - worker_bits)) as i64;
        let sequence = ((word << (total - seq_bits)) >> (total - seq_bits)) as i64;
        (delta_seconds, worker_id, sequence)
    }

    /// Width of the delta-seconds field.
    pub const fn time_bits(&self) -> u32 {
        self.time_bits
    }

    /// Width of the worker-id field.
    pub const fn worker_bits(&self) -> u32 {
        self.worker_bits
    }

    /// Width of the sequence field.
    pub const fn seq_bits(&self) -> u32 {
        self.seq_bits
    }

    /// Largest representable delta in seconds.
    pub const fn max_delta_seconds(&self) -> i64 {
        self.max_delta_seconds
    }

    /// Largest representable worker id.
    pub const fn max_worker_id(&self) -> i64 {
        self.max_worker_id
    }

    /// Largest representable intra-second sequence.
    pub const fn max_sequence(&self) -> i64 {
        self.max_sequence
    }

    /// Left shift applied to the delta-seconds field.
    pub const fn timestamp_shift(&self) -> u32 {
        self.timestamp_shift
    }

    /// Left shift applied to the worker-id field.
    pub const fn worker_shift(&self) -> u32 {
        self.worker_shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_maxima() {
        let allocator = BitAllocator::new(33, 20, 10).unwrap();
        assert_eq!(allocator.max_delta_seconds(), (1 << 33) - 1);
        assert_eq!(allocator.max_worker_id(), (1 << 20) - 1);
        assert_eq!(allocator.max_sequence(), 1023);
        assert_eq!(allocator.timestamp_shift(), 30);
        assert_eq!(allocator.worker_shift(), 10);
    }

    #[test]
    fn reference_layout_first_second() {
        // Layout (28, 22, 13), worker 0, sequence 0, one second past the
        // epoch: the id is exactly 1 << 35.
        let allocator = BitAllocator::new(28, 22, 13).unwrap();
        let uid = allocator.allocate(1, 0, 0);
        assert_eq!(uid, 34_359_738_368);
        assert_eq!(allocator.split(uid), (1, 0, 0));
    }

    #[test]
    fn split_inverts_allocate_at_field_maxima() {
        for (t, w, s) in [(33, 20, 10), (28, 22, 13), (41, 10, 12), (31, 30, 2)] {
            let allocator = BitAllocator::new(t, w, s).unwrap();
            let cases = [
                (0, 0, 0),
                (1, 1, 1),
                (
                    allocator.max_delta_seconds(),
                    allocator.max_worker_id(),
                    allocator.max_sequence(),
                ),
                (allocator.max_delta_seconds(), 0, allocator.max_sequence()),
                (0, allocator.max_worker_id(), 0),
            ];
            for (delta, worker, seq) in cases {
                let uid = allocator.allocate(delta, worker, seq);
                assert!(uid > 0, "uid must be positive for ({t},{w},{s})");
                assert_eq!(allocator.split(uid), (delta, worker, seq));
            }
        }
    }

    #[test]
    fn full_width_id_keeps_sign_bit_clear() {
        let allocator = BitAllocator::new(33, 20, 10).unwrap();
        let uid = allocator.allocate(
            allocator.max_delta_seconds(),
            allocator.max_worker_id(),
            allocator.max_sequence(),
        );
        assert_eq!(uid, i64::MAX);
    }

    #[test]
    fn rejects_zero_width_fields() {
        assert!(matches!(
            BitAllocator::new(0, 22, 13),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(matches!(
            BitAllocator::new(28, 0, 13),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(matches!(
            BitAllocator::new(28, 22, 0),
            Err(Error::InvalidLayout { .. })
        ));
    }

    #[test]
    fn rejects_oversized_triple() {
        assert!(matches!(
            BitAllocator::new(34, 20, 10),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(BitAllocator::new(33, 20, 10).is_ok());
    }

    #[test]
    #[should_panic(expected = "sequence overflow")]
    #[cfg(debug_assertions)]
    fn allocate_panics_on_sequence_overflow_in_debug() {
        let allocator = BitAllocator::new(33, 20, 10).unwrap();
        allocator.allocate(0, 0, allocator.max_sequence() + 1);
    }
}
