use tracing::warn;

use crate::{Error, RingBuffer};

/// Policy applied when a put finds the ring full.
///
/// A full ring is a soft condition: ids are plentiful, so the default
/// policy simply drops the excess id. Handlers must not call back into the
/// ring's put path.
pub trait RejectedPutHandler: Send + Sync {
    fn on_rejected_put(&self, ring: &RingBuffer, uid: i64);
}

/// Policy applied when a take finds the ring empty.
///
/// The returned error is surfaced to the caller of `take`; the default
/// policy reports [`Error::BufferExhausted`], which callers may retry once
/// the padding executor has caught up.
pub trait RejectedTakeHandler: Send + Sync {
    fn on_rejected_take(&self, ring: &RingBuffer) -> Error;
}

/// Default put policy: log and discard.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardPutHandler;

impl RejectedPutHandler for DiscardPutHandler {
    fn on_rejected_put(&self, ring: &RingBuffer, uid: i64) {
        warn!(%ring, uid, "ring buffer full, discarding uid");
    }
}

/// Default take policy: log and report exhaustion.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExhaustedTakeHandler;

impl RejectedTakeHandler for ExhaustedTakeHandler {
    fn on_rejected_take(&self, ring: &RingBuffer) -> Error {
        warn!(%ring, "ring buffer empty, rejecting take");
        Error::BufferExhausted
    }
}
