use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::{
    DirectUidGenerator, InetWorkerIdAssigner, PaddingExecutor, ParsedUid, RejectedPutHandler,
    RejectedTakeHandler, Result, RingBuffer, SystemClock, TimeSource, UidConfig, UidGenerator,
    WorkerIdAssigner,
};

/// Ring-buffered uid generator.
///
/// Wraps a [`DirectUidGenerator`] behind a pre-minted cache: a padding
/// executor repeatedly asks the minter for whole seconds of ids and pushes
/// them into a lock-free ring, so the common fetch path is a single
/// `take()` with no mutex and no clock read. Consumers may observe ids
/// slightly out of order relative to each other, but every id is unique
/// and drawn from a contiguous band of recently minted seconds.
///
/// Construction resolves the worker id, builds the ring at
/// `(max_sequence + 1) << boost_power` slots, warms it with one synchronous
/// padding cycle, and starts the periodic scheduler when configured. Call
/// [`Self::shutdown`] (or drop the generator) to stop the padding threads;
/// takes issued afterwards drain the ring and then report exhaustion.
pub struct CachedUidGenerator<T: TimeSource> {
    generator: Arc<DirectUidGenerator<T>>,
    ring: Arc<RingBuffer>,
    executor: Arc<PaddingExecutor<T>>,
}

impl CachedUidGenerator<SystemClock> {
    /// Builds a cached generator on the system clock with the default
    /// inet-derived worker id.
    pub fn from_config(config: &UidConfig) -> Result<Self> {
        Self::new(
            config,
            InetWorkerIdAssigner::new(config.worker_bits, 0),
            SystemClock,
        )
    }
}

impl<T> CachedUidGenerator<T>
where
    T: TimeSource + Send + Sync + 'static,
{
    /// Builds a cached generator with the default rejection policies.
    pub fn new(
        config: &UidConfig,
        assigner: impl WorkerIdAssigner + Send + Sync + 'static,
        clock: T,
    ) -> Result<Self> {
        Self::with_handlers(config, assigner, clock, None, None)
    }

    /// Builds a cached generator, optionally overriding the rejected-put
    /// and rejected-take policies.
    ///
    /// # Errors
    ///
    /// [`Error::Disabled`] when the config switches the subsystem off, any
    /// config or layout validation error, or [`Error::ThreadSpawn`] when a
    /// padding thread cannot be created.
    ///
    /// [`Error::Disabled`]: crate::Error::Disabled
    /// [`Error::ThreadSpawn`]: crate::Error::ThreadSpawn
    pub fn with_handlers(
        config: &UidConfig,
        assigner: impl WorkerIdAssigner + Send + Sync + 'static,
        clock: T,
        put_handler: Option<Box<dyn RejectedPutHandler>>,
        take_handler: Option<Box<dyn RejectedTakeHandler>>,
    ) -> Result<Self> {
        let generator = Arc::new(DirectUidGenerator::new(config, assigner, clock)?);

        let buffer_size = (generator.allocator().max_sequence() + 1) << config.boost_power;
        let mut ring = RingBuffer::new(buffer_size, config.padding_factor)?;
        if let Some(handler) = put_handler {
            ring.set_rejected_put_handler(handler);
        }
        if let Some(handler) = take_handler {
            ring.set_rejected_take_handler(handler);
        }
        let ring = Arc::new(ring);
        info!(
            buffer_size,
            padding_factor = config.padding_factor,
            "initialized ring buffer"
        );

        let schedule_interval = config
            .schedule_interval
            .filter(|&seconds| seconds > 0)
            .map(Duration::from_secs);
        let executor = PaddingExecutor::new(
            Arc::clone(&ring),
            Arc::clone(&generator),
            schedule_interval,
        )?;
        let padder: Arc<dyn crate::BufferPadder> = Arc::clone(&executor) as Arc<dyn crate::BufferPadder>;
        ring.set_padding_executor(Arc::downgrade(&padder));

        // Warm the ring before serving, then start the scheduler.
        executor.padding_buffer();
        executor.start()?;

        Ok(Self {
            generator,
            ring,
            executor,
        })
    }
}

impl<T: TimeSource> CachedUidGenerator<T> {
    /// Stops the padding threads. Ids already in the ring remain takeable;
    /// once drained, further fetches report exhaustion. Idempotent.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }

    #[cfg(test)]
    pub(crate) fn ring(&self) -> &RingBuffer {
        &self.ring
    }
}

impl<T> UidGenerator for CachedUidGenerator<T>
where
    T: TimeSource + Send + Sync + 'static,
{
    fn get_unique_id(&self) -> Result<i64> {
        self.ring.take()
    }

    fn parse_unique_id(&self, uid: i64) -> Option<ParsedUid> {
        self.generator.parse_unique_id(uid)
    }
}

impl<T: TimeSource> Drop for CachedUidGenerator<T> {
    fn drop(&mut self) {
        self.executor.shutdown();
    }
}
