use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use tracing::{debug, error, info, trace};

use crate::{BufferPadder, DirectUidGenerator, Result, RingBuffer, TimeSource};

/// Shared state of a padding cycle, split out so the worker and scheduler
/// threads can run cycles without holding the executor itself.
struct PaddingCore<T: TimeSource> {
    ring: Arc<RingBuffer>,
    generator: Arc<DirectUidGenerator<T>>,
    /// Guards the cycle: only one padding pass runs at a time, concurrent
    /// requests return immediately.
    running: CachePadded<AtomicBool>,
    /// Last second already handed to the ring. Pre-incremented per batch so
    /// consecutive cycles never re-mint a second.
    last_second: CachePadded<AtomicI64>,
}

impl<T: TimeSource> PaddingCore<T> {
    fn padding_buffer(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("padding cycle already in flight");
            return;
        }

        let mut padded = 0_u64;
        loop {
            let second = self.last_second.fetch_add(1, Ordering::Relaxed) + 1;
            let batch = match self.generator.ids_for_second(second) {
                Ok(batch) => batch,
                Err(err) => {
                    error!(%err, "padding halted, cannot mint any further second");
                    break;
                }
            };

            let mut buffer_full = false;
            for uid in batch {
                if self.ring.put(uid) {
                    padded += 1;
                } else {
                    buffer_full = true;
                    break;
                }
            }
            if buffer_full {
                break;
            }
        }
        debug!(padded, "padding cycle finished");

        self.running.store(false, Ordering::Release);
    }
}

/// Feeds the ring buffer with batches of pre-minted uids.
///
/// Three entry points share one coalesced cycle:
///
/// - a synchronous call to [`Self::padding_buffer`] (used once at startup
///   to warm the ring),
/// - on-demand requests from ring consumers via
///   [`BufferPadder::async_padding`], queued to a dedicated worker thread
///   through a bounded channel whose `try_send` drops duplicates,
/// - an optional scheduler thread running the cycle every
///   `schedule_interval` (started by [`Self::start`]).
///
/// The worker thread is the sole producer for the ring in steady state;
/// its serialization plus the `running` flag keeps the put side
/// single-writer.
pub struct PaddingExecutor<T: TimeSource> {
    core: Arc<PaddingCore<T>>,
    schedule_interval: Option<Duration>,
    job_tx: Mutex<Option<SyncSender<()>>>,
    schedule_tx: Mutex<Option<SyncSender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl<T> PaddingExecutor<T>
where
    T: TimeSource + Send + Sync + 'static,
{
    /// Creates the executor and spawns its on-demand worker thread. The
    /// periodic scheduler, when configured, starts only with
    /// [`Self::start`].
    ///
    /// # Errors
    ///
    /// [`Error::ThreadSpawn`] when the worker thread cannot be created, or
    /// a timestamp-capacity error while seeding the batch cursor.
    ///
    /// [`Error::ThreadSpawn`]: crate::Error::ThreadSpawn
    pub fn new(
        ring: Arc<RingBuffer>,
        generator: Arc<DirectUidGenerator<T>>,
        schedule_interval: Option<Duration>,
    ) -> Result<Arc<Self>> {
        let core = Arc::new(PaddingCore {
            last_second: CachePadded::new(AtomicI64::new(generator.checked_current_second()?)),
            ring,
            generator,
            running: CachePadded::new(AtomicBool::new(false)),
        });

        let (job_tx, job_rx) = mpsc::sync_channel::<()>(1);
        let worker = thread::Builder::new()
            .name(String::from("ringflake-padding-worker"))
            .spawn({
                let core = Arc::clone(&core);
                move || {
                    while job_rx.recv().is_ok() {
                        core.padding_buffer();
                    }
                }
            })?;

        Ok(Arc::new(Self {
            core,
            schedule_interval: schedule_interval.filter(|interval| !interval.is_zero()),
            job_tx: Mutex::new(Some(job_tx)),
            schedule_tx: Mutex::new(None),
            worker: Mutex::new(Some(worker)),
            scheduler: Mutex::new(None),
        }))
    }

    /// Starts the periodic scheduler when an interval is configured.
    /// Idempotent; a second call is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::ThreadSpawn`] when the scheduler thread cannot be created.
    ///
    /// [`Error::ThreadSpawn`]: crate::Error::ThreadSpawn
    pub fn start(&self) -> Result<()> {
        let Some(interval) = self.schedule_interval else {
            return Ok(());
        };
        let mut scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if scheduler.is_some() {
            return Ok(());
        }

        let (schedule_tx, schedule_rx) = mpsc::sync_channel::<()>(0);
        let handle = thread::Builder::new()
            .name(String::from("ringflake-padding-schedule"))
            .spawn({
                let core = Arc::clone(&self.core);
                move || Self::schedule_loop(&core, &schedule_rx, interval)
            })?;

        *scheduler = Some(handle);
        *self
            .schedule_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(schedule_tx);
        info!(interval_secs = interval.as_secs(), "started padding scheduler");
        Ok(())
    }

    // Runs until the shutdown side of the channel is dropped.
    fn schedule_loop(core: &PaddingCore<T>, schedule_rx: &Receiver<()>, interval: Duration) {
        loop {
            match schedule_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => core.padding_buffer(),
                _ => break,
            }
        }
    }
}

impl<T: TimeSource> PaddingExecutor<T> {
    /// Runs one padding cycle on the calling thread, filling the ring
    /// until it reports full. Returns immediately when a cycle is already
    /// in flight.
    pub fn padding_buffer(&self) {
        self.core.padding_buffer();
    }

    /// Stops accepting new padding requests, halts the scheduler, and
    /// joins both threads. An in-flight cycle completes its current fill
    /// first. Idempotent.
    pub fn shutdown(&self) {
        let job_tx = self
            .job_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let schedule_tx = self
            .schedule_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if job_tx.is_none() && schedule_tx.is_none() {
            return;
        }
        info!("shutting down padding executor");
        drop(job_tx);
        drop(schedule_tx);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = scheduler {
            let _ = handle.join();
        }
    }
}

impl<T> BufferPadder for PaddingExecutor<T>
where
    T: TimeSource + Send + Sync + 'static,
{
    fn async_padding(&self) {
        let guard = self.job_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(job_tx) = guard.as_ref() {
            // A full queue means a request is already pending; a closed one
            // means shutdown. Both are fine to drop.
            let _ = job_tx.try_send(());
        }
    }
}

impl<T: TimeSource> Drop for PaddingExecutor<T> {
    fn drop(&mut self) {
        // Threads hold only the core, not the executor, so their channels
        // must be closed here even when `shutdown` was never called.
        self.job_tx
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.schedule_tx
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FixedWorkerIdAssigner, SystemClock, UidConfig};
    use std::time::Instant;

    fn small_generator() -> Arc<DirectUidGenerator<SystemClock>> {
        let config = UidConfig {
            time_bits: 53,
            worker_bits: 8,
            seq_bits: 2,
            epoch_point: String::from("2024-01-01"),
            ..UidConfig::default()
        };
        Arc::new(DirectUidGenerator::new(&config, FixedWorkerIdAssigner(3), SystemClock).unwrap())
    }

    #[test]
    fn warm_fill_stops_at_full_ring() {
        let ring = Arc::new(RingBuffer::new(8, 50).unwrap());
        let executor = PaddingExecutor::new(Arc::clone(&ring), small_generator(), None).unwrap();

        executor.padding_buffer();
        // Eight slots, batches of four: two whole batches land, the third
        // is rejected on its first put.
        assert_eq!(ring.tail(), 7);
        executor.shutdown();
    }

    #[test]
    fn batches_are_contiguous_and_unique_across_cycles() {
        let ring = Arc::new(RingBuffer::new(8, 50).unwrap());
        let executor = PaddingExecutor::new(Arc::clone(&ring), small_generator(), None).unwrap();

        executor.padding_buffer();
        let mut first_fill = Vec::new();
        for _ in 0..8 {
            first_fill.push(ring.take().unwrap());
        }

        executor.padding_buffer();
        let mut second_fill = Vec::new();
        for _ in 0..8 {
            second_fill.push(ring.take().unwrap());
        }

        let mut all = first_fill.clone();
        all.extend(&second_fill);
        let unique: std::collections::HashSet<i64> = all.iter().copied().collect();
        assert_eq!(unique.len(), 16, "cycles must never re-mint a second");
        assert!(all.windows(2).all(|pair| pair[0] < pair[1]));
        executor.shutdown();
    }

    #[test]
    fn async_padding_refills_in_background() {
        let ring = Arc::new(RingBuffer::new(8, 50).unwrap());
        let executor = PaddingExecutor::new(Arc::clone(&ring), small_generator(), None).unwrap();

        executor.async_padding();
        let deadline = Instant::now() + Duration::from_secs(5);
        while ring.tail() < 7 {
            assert!(Instant::now() < deadline, "background padding never ran");
            thread::yield_now();
        }
        executor.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent_and_stops_async_requests() {
        let ring = Arc::new(RingBuffer::new(8, 50).unwrap());
        let executor = PaddingExecutor::new(Arc::clone(&ring), small_generator(), None).unwrap();

        executor.shutdown();
        executor.shutdown();
        // Must not panic or hang once the worker is gone.
        executor.async_padding();
        assert_eq!(ring.tail(), -1);
    }

    #[test]
    fn scheduler_lifecycle_is_clean() {
        let ring = Arc::new(RingBuffer::new(8, 50).unwrap());
        let executor = PaddingExecutor::new(
            Arc::clone(&ring),
            small_generator(),
            Some(Duration::from_secs(60)),
        )
        .unwrap();

        executor.start().unwrap();
        executor.start().unwrap();
        executor.shutdown();
    }

    #[test]
    fn start_without_interval_is_a_no_op() {
        let ring = Arc::new(RingBuffer::new(8, 50).unwrap());
        let executor = PaddingExecutor::new(Arc::clone(&ring), small_generator(), None).unwrap();
        executor.start().unwrap();
        executor.shutdown();
    }
}
