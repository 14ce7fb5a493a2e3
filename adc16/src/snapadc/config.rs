//! Knobs for tap calibration and frame synchronization

use super::chip::{ChipId, ChipSelect};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Depth of the per-chip snapshot BRAM, in 32-bit words
pub const SNAP_DEPTH: usize = 1024;

/// How much the calibration tells the user while it runs
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Only `tracing` events
    #[default]
    Quiet,
    /// A progress bar over the tap sweep
    Progress,
}

/// Every option the calibration recognizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationOptions {
    /// Byte the deskew pattern produces when a lane is sampled cleanly
    pub deskew_expected: u8,
    /// Byte the sync pattern produces when a chip is frame aligned
    pub sync_expected: u8,
    /// Snapshots per tap, errors are summed across them
    pub iterations: usize,
    /// Words read from each snapshot during the sweep
    pub snap_length: usize,
    /// Bitslip attempts per chip before it's reported unsynchronized
    pub sync_retries: u8,
    /// Wait after latching a delay tap
    pub settle: Duration,
    pub verbosity: Verbosity,
    /// Chips to calibrate, all supported chips if `None`
    pub chips: Option<ChipSelect>,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            deskew_expected: 0x2A,
            sync_expected: 0x70,
            iterations: 1,
            snap_length: SNAP_DEPTH,
            sync_retries: 8,
            settle: Duration::from_millis(100),
            verbosity: Verbosity::Quiet,
            chips: None,
        }
    }
}

impl CalibrationOptions {
    #[must_use]
    pub fn with_deskew_expected(mut self, byte: u8) -> Self {
        self.deskew_expected = byte;
        self
    }

    #[must_use]
    pub fn with_sync_expected(mut self, byte: u8) -> Self {
        self.sync_expected = byte;
        self
    }

    /// Zero is treated as one
    #[must_use]
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    /// Clamped to the snapshot BRAM depth
    #[must_use]
    pub fn with_snap_length(mut self, words: usize) -> Self {
        self.snap_length = words.clamp(1, SNAP_DEPTH);
        self
    }

    #[must_use]
    pub fn with_sync_retries(mut self, retries: u8) -> Self {
        self.sync_retries = retries;
        self
    }

    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Restrict the calibration to `chips`
    #[must_use]
    pub fn with_chips(mut self, chips: impl IntoIterator<Item = ChipId>) -> Self {
        self.chips = Some(chips.into_iter().collect());
        self
    }

    /// The deskew byte as the signed sample it shows up as
    #[must_use]
    pub fn deskew_sample(&self) -> i8 {
        i8::from_ne_bytes([self.deskew_expected])
    }

    /// The sync byte as the signed sample it shows up as
    #[must_use]
    pub fn sync_sample(&self) -> i8 {
        i8::from_ne_bytes([self.sync_expected])
    }

    /// A progress bar for `len` steps, hidden unless the verbosity asks for one
    pub(crate) fn progress(&self, len: u64) -> ProgressBar {
        match self.verbosity {
            Verbosity::Quiet => ProgressBar::hidden(),
            Verbosity::Progress => {
                let bar = ProgressBar::new(len);
                if let Ok(style) =
                    ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} taps")
                {
                    bar.set_style(style);
                }
                bar
            }
        }
    }
}
