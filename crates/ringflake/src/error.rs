use std::sync::{MutexGuard, PoisonError};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for uid generation.
///
/// Fatal conditions surface through this enum; soft conditions (a full ring
/// on put) are absorbed by the rejected-buffer handlers and never reach the
/// caller as an error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The bit triple does not fit a signed 64-bit id or has an empty field.
    #[error(
        "invalid bit layout: sign(1) + time({time_bits}) + worker({worker_bits}) + seq({seq_bits}) must total 64 with every field positive"
    )]
    InvalidLayout {
        time_bits: u32,
        worker_bits: u32,
        seq_bits: u32,
    },

    /// A configuration value is out of range or unparseable.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The subsystem is turned off by configuration.
    #[error("uid generation is disabled by configuration")]
    Disabled,

    /// The current time no longer fits the timestamp field. Unrecoverable
    /// without a new layout or epoch.
    #[error("timestamp bits exhausted, refusing uid generation at second {current_second}")]
    TimestampExhausted { current_second: i64 },

    /// The clock regressed further than the tolerant policy allows, or
    /// regressed at all under the strict policy.
    #[error("clock moved backwards, refusing for {refused_seconds} seconds")]
    ClockRegression { refused_seconds: i64 },

    /// The ring buffer is empty: consumers outran the padding executor.
    /// Retryable once the ring has been refilled.
    #[error("ring buffer exhausted, no cached uid available")]
    BufferExhausted,

    /// A background padding thread could not be spawned.
    #[error("failed to spawn padding thread")]
    ThreadSpawn(#[from] std::io::Error),

    /// The minter state mutex was poisoned by a panicking holder.
    #[error("generator state lock poisoned")]
    LockPoisoned,
}

// Convert all poisoned lock errors to a simplified `LockPoisoned`
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Error::LockPoisoned
    }
}
