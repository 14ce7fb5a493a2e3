//! Frame synchronization of calibrated chips
//!
//! Once the taps are set, each chip's deserializer may still be framing words at the wrong bit.
//! With the chips sending the sync pattern, we bitslip each chip until the first sample matches.

use super::{
    chip::{ChipId, ChipSelect},
    config::CalibrationOptions,
    controller::{Adc16Controller, Error},
    hmcad1511::TestPattern,
};
use crate::transport::Transport;
use tracing::{debug, trace, warn};

/// Whether a chip ended up frame aligned
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Aligned after this many bitslips
    Synced { bitslips: u8 },
    /// Never matched within the retry budget
    Unsynced,
}

impl SyncStatus {
    #[must_use]
    pub fn is_synced(self) -> bool {
        matches!(self, SyncStatus::Synced { .. })
    }
}

impl<T> Adc16Controller<T>
where
    T: Transport,
{
    fn frame_aligned(&self, chip: ChipId, expected: i8) -> Result<bool, Error> {
        let sample = self.capture(chip, 1)?.channel(0).first().copied();
        trace!(%chip, ?sample, expected, "Sync sample");
        Ok(sample == Some(expected))
    }

    /// Bitslips `chip` until its first sample is `expected`, giving up after `retries` slips.
    /// The chip must already be sending the sync pattern.
    /// # Errors
    /// Returns an error on transport errors. Failing to align is not an error.
    pub fn sync_chip(&self, chip: ChipId, expected: i8, retries: u8) -> Result<SyncStatus, Error> {
        for bitslips in 0..retries {
            if self.frame_aligned(chip, expected)? {
                return Ok(SyncStatus::Synced { bitslips });
            }
            debug!(%chip, bitslips, "Not frame aligned, slipping");
            self.bitslip(ChipSelect::single(chip))?;
        }
        Ok(if self.frame_aligned(chip, expected)? {
            SyncStatus::Synced { bitslips: retries }
        } else {
            SyncStatus::Unsynced
        })
    }

    /// Switches `chips` to the sync pattern and aligns each of them independently
    /// # Errors
    /// Returns an error on transport errors
    pub fn verify_sync(
        &self,
        chips: ChipSelect,
        options: &CalibrationOptions,
    ) -> Result<Vec<(ChipId, SyncStatus)>, Error> {
        self.select_test_pattern_on(chips, TestPattern::Sync)?;
        let expected = options.sync_sample();
        let mut statuses = vec![];
        for chip in chips.chips() {
            let status = self.sync_chip(chip, expected, options.sync_retries)?;
            if !status.is_synced() {
                warn!(%chip, retries = options.sync_retries, "Chip never frame aligned");
            }
            statuses.push((chip, status));
        }
        Ok(statuses)
    }
}
