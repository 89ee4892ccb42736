mod cached;
mod direct;

pub use cached::*;
pub use direct::*;

use core::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::Result;

/// Common surface of the direct and cached uid generators.
pub trait UidGenerator {
    /// Returns the next unique, positive 64-bit id.
    ///
    /// # Errors
    ///
    /// Direct generation fails on timestamp exhaustion or (under the strict
    /// policy) clock regression; cached generation fails when the ring
    /// buffer is drained faster than it can be padded.
    fn get_unique_id(&self) -> Result<i64>;

    /// Decomposes a previously issued id into its fields.
    ///
    /// Pure with respect to generator state: parsing never mints and two
    /// parses of the same id return equal records. Returns `None` when
    /// `uid` is not positive and therefore cannot be an id.
    fn parse_unique_id(&self, uid: i64) -> Option<ParsedUid>;
}

/// The decomposed fields of a uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParsedUid {
    /// The packed id itself.
    pub uid: i64,
    /// Worker that minted the id.
    pub worker_id: i64,
    /// Intra-second sequence of the id.
    pub sequence: i64,
    /// Wall-clock instant of the minting second.
    pub timestamp: SystemTime,
}

impl ParsedUid {
    pub(crate) fn new(
        uid: i64,
        worker_id: i64,
        sequence: i64,
        epoch_seconds: i64,
        delta_seconds: i64,
    ) -> Self {
        let timestamp = UNIX_EPOCH + Duration::from_secs((epoch_seconds + delta_seconds) as u64);
        Self {
            uid,
            worker_id,
            sequence,
            timestamp,
        }
    }
}

impl fmt::Display for ParsedUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unix_seconds = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        write!(
            f,
            "ParsedUid {{ uid: {}, worker_id: {}, sequence: {}, timestamp: {}s }}",
            self.uid, self.worker_id, self.sequence, unix_seconds
        )
    }
}
