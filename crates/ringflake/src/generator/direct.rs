use core::hint;
use std::sync::Mutex;

use tracing::{debug, error, warn};

use crate::{
    BitAllocator, Error, ParsedUid, Result, TimeSource, UidConfig, UidGenerator, WorkerIdAssigner,
};

/// Minting state, owned exclusively by the generator mutex.
///
/// `last_second` is non-decreasing across successful mints except through
/// the worker-reassignment path, which pairs every rewind with a fresh
/// worker identity.
struct MinterState {
    last_second: i64,
    sequence: i64,
    worker_id: i64,
}

/// Synchronized uid minter.
///
/// Every mint runs under one critical section: read the clock, apply the
/// regression policy, advance the intra-second sequence (spinning into the
/// next second when it wraps), and pack the fields. Ids from a single
/// generator are strictly increasing; throughput tops out at
/// `max_sequence + 1` ids per second, after which minting blocks until the
/// clock advances.
///
/// For higher burst throughput, wrap one of these in a
/// [`CachedUidGenerator`], which pre-mints whole seconds into a ring
/// buffer.
///
/// # Example
///
/// ```
/// use ringflake::{
///     DirectUidGenerator, FixedWorkerIdAssigner, SystemClock, UidConfig, UidGenerator,
/// };
///
/// let generator =
///     DirectUidGenerator::new(&UidConfig::default(), FixedWorkerIdAssigner(42), SystemClock)?;
/// let uid = generator.get_unique_id()?;
/// assert_eq!(generator.parse_unique_id(uid).unwrap().worker_id, 42);
/// # Ok::<(), ringflake::Error>(())
/// ```
///
/// [`CachedUidGenerator`]: crate::CachedUidGenerator
pub struct DirectUidGenerator<T: TimeSource> {
    allocator: BitAllocator,
    epoch_seconds: i64,
    backward_enabled: bool,
    max_backward_seconds: i64,
    assigner: Box<dyn WorkerIdAssigner + Send + Sync>,
    clock: T,
    state: Mutex<MinterState>,
}

impl<T: TimeSource> DirectUidGenerator<T> {
    /// Builds a minter from a validated config, a worker-id assigner, and a
    /// clock.
    ///
    /// # Errors
    ///
    /// [`Error::Disabled`] when the config switches the subsystem off,
    /// otherwise any validation error from the config or bit layout.
    pub fn new(
        config: &UidConfig,
        assigner: impl WorkerIdAssigner + Send + Sync + 'static,
        clock: T,
    ) -> Result<Self> {
        if !config.enabled {
            return Err(Error::Disabled);
        }
        config.validate()?;

        let allocator = BitAllocator::new(config.time_bits, config.worker_bits, config.seq_bits)?;
        let epoch_seconds = config.epoch_seconds()?;

        let mut worker_id = assigner.assign_worker_id();
        if worker_id > allocator.max_worker_id() {
            warn!(
                worker_id,
                max_worker_id = allocator.max_worker_id(),
                "worker id exceeds field maximum, truncating"
            );
            worker_id %= allocator.max_worker_id();
        }
        debug!(
            time_bits = allocator.time_bits(),
            worker_bits = allocator.worker_bits(),
            seq_bits = allocator.seq_bits(),
            worker_id,
            "initialized uid generator"
        );

        Ok(Self {
            allocator,
            epoch_seconds,
            backward_enabled: config.backward_enabled,
            max_backward_seconds: config.max_backward_seconds,
            assigner: Box::new(assigner),
            clock,
            state: Mutex::new(MinterState {
                last_second: -1,
                sequence: 0,
                worker_id,
            }),
        })
    }

    /// Mints the next id.
    ///
    /// # Errors
    ///
    /// - [`Error::TimestampExhausted`] once the delta-seconds field can no
    ///   longer represent the current time; fatal.
    /// - [`Error::ClockRegression`] when the clock moved backwards and the
    ///   strict policy is configured; retryable.
    pub fn next_unique_id(&self) -> Result<i64> {
        let mut state = self.state.lock()?;
        let mut current_second = self.checked_current_second()?;

        if current_second < state.last_second {
            let refused_seconds = state.last_second - current_second;
            if !self.backward_enabled {
                return Err(Error::ClockRegression { refused_seconds });
            }
            if refused_seconds <= self.max_backward_seconds {
                error!(refused_seconds, "clock moved backwards, waiting to catch up");
                while current_second < state.last_second {
                    hint::spin_loop();
                    current_second = self.checked_current_second()?;
                }
            } else {
                let mut worker_id = self.assigner.assign_worker_id();
                if worker_id > self.allocator.max_worker_id() {
                    warn!(
                        worker_id,
                        max_worker_id = self.allocator.max_worker_id(),
                        "worker id exceeds field maximum, truncating"
                    );
                    worker_id %= self.allocator.max_worker_id();
                }
                warn!(
                    refused_seconds,
                    worker_id, "clock moved backwards, adopting fresh worker id"
                );
                state.worker_id = worker_id;
                // The fresh identity owns the regressed clock; minting
                // resumes at the current second rather than blocking until
                // the old last_second is reached again.
                state.last_second = current_second;
            }
        }

        if current_second == state.last_second {
            state.sequence = (state.sequence + 1) & self.allocator.max_sequence();
            // Sequence wrapped: this second is spent, spin into the next.
            if state.sequence == 0 {
                current_second = self.next_second(state.last_second)?;
            }
        } else {
            state.sequence = 0;
        }
        state.last_second = current_second;

        Ok(self.allocator.allocate(
            current_second - self.epoch_seconds,
            state.worker_id,
            state.sequence,
        ))
    }

    /// Mints the full `[0 ..= max_sequence]` block for one second.
    ///
    /// The block is contiguous: the first id carries sequence zero and the
    /// rest follow at unit offsets. Used by the padding executor to refill
    /// the ring buffer a whole second at a time.
    ///
    /// # Errors
    ///
    /// [`Error::TimestampExhausted`] when `second` lies beyond the capacity
    /// of the delta-seconds field.
    pub fn ids_for_second(&self, second: i64) -> Result<Vec<i64>> {
        if second - self.epoch_seconds > self.allocator.max_delta_seconds() {
            return Err(Error::TimestampExhausted {
                current_second: second,
            });
        }
        let worker_id = self.state.lock()?.worker_id;
        let first = self
            .allocator
            .allocate(second - self.epoch_seconds, worker_id, 0);
        Ok((0..=self.allocator.max_sequence())
            .map(|offset| first + offset)
            .collect())
    }

    /// The bit layout in force.
    pub fn allocator(&self) -> &BitAllocator {
        &self.allocator
    }

    /// Seconds since the Unix epoch of the configured epoch date.
    pub fn epoch_seconds(&self) -> i64 {
        self.epoch_seconds
    }

    /// The worker id currently encoded into minted ids.
    pub fn worker_id(&self) -> Result<i64> {
        Ok(self.state.lock()?.worker_id)
    }

    /// Current clock second, checked against timestamp-field capacity.
    pub(crate) fn checked_current_second(&self) -> Result<i64> {
        let current_second = self.clock.current_second();
        if current_second - self.epoch_seconds > self.allocator.max_delta_seconds() {
            return Err(Error::TimestampExhausted { current_second });
        }
        Ok(current_second)
    }

    // Spin until the clock passes `last_second`.
    fn next_second(&self, last_second: i64) -> Result<i64> {
        loop {
            let current_second = self.checked_current_second()?;
            if current_second > last_second {
                return Ok(current_second);
            }
            hint::spin_loop();
        }
    }

    fn parse(&self, uid: i64) -> Option<ParsedUid> {
        if uid <= 0 {
            return None;
        }
        let (delta_seconds, worker_id, sequence) = self.allocator.split(uid);
        Some(ParsedUid::new(
            uid,
            worker_id,
            sequence,
            self.epoch_seconds,
            delta_seconds,
        ))
    }
}

impl<T: TimeSource> UidGenerator for DirectUidGenerator<T> {
    fn get_unique_id(&self) -> Result<i64> {
        self.next_unique_id()
    }

    fn parse_unique_id(&self, uid: i64) -> Option<ParsedUid> {
        self.parse(uid)
    }
}
