use chrono::{NaiveDate, NaiveTime};

use crate::{BitAllocator, Error, Result, SystemClock, TimeSource};

/// Tunables for uid generation.
///
/// Field defaults mirror the recognized options of the original property
/// surface; a config constructed with [`UidConfig::default`] is valid and
/// production-ready. The cached generator reads every field; the direct
/// generator ignores the ring-buffer knobs (`boost_power`,
/// `padding_factor`, `schedule_interval`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct UidConfig {
    /// Master switch. When `false`, generator construction fails with
    /// [`Error::Disabled`].
    pub enabled: bool,

    /// Width of the delta-seconds field.
    pub time_bits: u32,

    /// Width of the worker-id field.
    pub worker_bits: u32,

    /// Width of the intra-second sequence field.
    pub seq_bits: u32,

    /// Epoch base date, `YYYY-MM-DD`, interpreted at UTC midnight. Delta
    /// seconds count from this instant.
    pub epoch_point: String,

    /// Clock-regression policy: `true` tolerates bounded regressions,
    /// `false` fails every regression with [`Error::ClockRegression`].
    pub backward_enabled: bool,

    /// Largest regression, in seconds, absorbed by spin-waiting when
    /// `backward_enabled` is set. Larger regressions reassign the worker id.
    pub max_backward_seconds: i64,

    /// Ring capacity boost exponent: `buffer_size = (max_sequence + 1) <<
    /// boost_power`. Larger rings tolerate longer consumer bursts.
    pub boost_power: u32,

    /// Refill threshold as a percentage of `buffer_size`, in `(0, 100)`.
    /// A take that leaves fewer cached uids than the threshold triggers an
    /// asynchronous padding cycle.
    pub padding_factor: u32,

    /// Optional periodic padding interval in seconds. Unset (or zero)
    /// disables the scheduler thread; on-demand padding still runs.
    pub schedule_interval: Option<u64>,
}

impl Default for UidConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time_bits: 33,
            worker_bits: 20,
            seq_bits: 10,
            epoch_point: String::from("2024-01-01"),
            backward_enabled: true,
            max_backward_seconds: 1,
            boost_power: 3,
            padding_factor: 50,
            schedule_interval: None,
        }
    }
}

impl UidConfig {
    /// Checks every field for internal consistency.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidLayout`] for a bad bit triple, otherwise
    /// [`Error::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        BitAllocator::new(self.time_bits, self.worker_bits, self.seq_bits)?;

        if self.padding_factor == 0 || self.padding_factor >= 100 {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "padding_factor must be within (0, 100), got {}",
                    self.padding_factor
                ),
            });
        }
        // The ring holds (max_sequence + 1) << boost_power slots; keep the
        // shifted size well inside i32 range like the original buffer.
        if self.seq_bits + self.boost_power > 30 {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "seq_bits ({}) + boost_power ({}) produce an oversized ring buffer",
                    self.seq_bits, self.boost_power
                ),
            });
        }
        if self.max_backward_seconds < 0 {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "max_backward_seconds must be non-negative, got {}",
                    self.max_backward_seconds
                ),
            });
        }

        let epoch_seconds = self.epoch_seconds()?;
        if epoch_seconds > SystemClock.current_second() {
            return Err(Error::InvalidConfig {
                reason: format!("epoch_point '{}' lies in the future", self.epoch_point),
            });
        }
        Ok(())
    }

    /// Seconds since the Unix epoch of `epoch_point` at UTC midnight.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] when the date does not parse as
    /// `YYYY-MM-DD`.
    pub fn epoch_seconds(&self) -> Result<i64> {
        let date =
            NaiveDate::parse_from_str(&self.epoch_point, "%Y-%m-%d").map_err(|parse_err| {
                Error::InvalidConfig {
                    reason: format!(
                        "epoch_point '{}' is not a YYYY-MM-DD date: {parse_err}",
                        self.epoch_point
                    ),
                }
            })?;
        Ok(date.and_time(NaiveTime::MIN).and_utc().timestamp())
    }
}
