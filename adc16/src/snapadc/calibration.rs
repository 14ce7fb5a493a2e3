//! Delay tap calibration
//!
//! Every lane of a chip is swept through all 32 delay taps while the chip outputs the deskew
//! pattern. The taps that sample the pattern without a single error form the lane's data eye, and
//! the lane is parked in the middle of it.

use super::{
    chip::{ChipId, ChipSelect, LaneChannel, LaneMask, LANES},
    config::CalibrationOptions,
    controller::{Adc16Controller, Error},
    hmcad1511::TestPattern,
    layout::MAX_TAP,
};
use crate::transport::Transport;
use indicatif::ProgressBar;
use tracing::{debug, info, warn};

/// Number of delay taps
pub const TAPS: usize = MAX_TAP as usize + 1;

/// Good windows wider than this are only trusted if they have no holes
pub const WRAP_SPAN: u8 = 16;

/// What the sweep concluded for one lane
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TapDecision {
    /// The center of the lane's eye
    Tap(u8),
    /// No tap sampled the lane cleanly
    NoGoodTaps,
    /// The good taps are scattered over more than half the tap range, so there is no single eye to
    /// center on
    Wrapped { min: u8, max: u8 },
}

impl TapDecision {
    /// The calibrated tap, if there is one
    #[must_use]
    pub fn tap(self) -> Option<u8> {
        match self {
            TapDecision::Tap(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_determinate(self) -> bool {
        matches!(self, TapDecision::Tap(_))
    }
}

/// Picks the tap for a lane given the taps that had no errors
#[must_use]
pub fn decide(good: &[u8]) -> TapDecision {
    let mut good = good.to_vec();
    good.sort_unstable();
    good.dedup();
    let (Some(&min), Some(&max)) = (good.first(), good.last()) else {
        return TapDecision::NoGoodTaps;
    };
    let contiguous = good.windows(2).all(|w| w[1] == w[0] + 1);
    if max - min > WRAP_SPAN && !contiguous {
        TapDecision::Wrapped { min, max }
    } else {
        TapDecision::Tap(good[good.len() / 2])
    }
}

/// Error counts of every lane at every tap from one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapScan {
    errors: [[u32; LANES]; TAPS],
}

impl TapScan {
    /// Adds `errors` (indexed by [`LaneChannel::index`]) to the counts for `tap`
    pub fn record(&mut self, tap: u8, errors: [u32; LANES]) {
        let row = &mut self.errors[usize::from(tap) % TAPS];
        for (acc, e) in row.iter_mut().zip(errors) {
            *acc += e;
        }
    }

    /// # Panics
    /// Panics if `tap` is past [`MAX_TAP`]
    #[must_use]
    pub fn errors(&self, tap: u8, lane: LaneChannel) -> u32 {
        self.errors[usize::from(tap)][lane.index()]
    }

    /// The taps that sampled `lane` without error, ascending
    #[must_use]
    pub fn good_taps(&self, lane: LaneChannel) -> Vec<u8> {
        (0..=MAX_TAP)
            .filter(|&tap| self.errors(tap, lane) == 0)
            .collect()
    }

    /// The decision for every lane, indexed by [`LaneChannel::index`]
    #[must_use]
    pub fn decisions(&self) -> [TapDecision; LANES] {
        let mut decisions = [TapDecision::NoGoodTaps; LANES];
        for lane in LaneChannel::all() {
            decisions[lane.index()] = decide(&self.good_taps(lane));
        }
        decisions
    }
}

/// The outcome of calibrating the delay taps of one chip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipCalibration {
    pub chip: ChipId,
    /// A clean lane at either end of the tap range meant the eye wasn't bracketed by the sweep, so
    /// the chip was slipped one bit before sweeping. This is a best-effort fix.
    pub straddled: bool,
    pub scan: TapScan,
    pub decisions: [TapDecision; LANES],
}

impl ChipCalibration {
    #[must_use]
    pub fn tap(&self, lane: LaneChannel) -> Option<u8> {
        self.decisions[lane.index()].tap()
    }

    /// Lanes left without a calibrated tap
    #[must_use]
    pub fn indeterminate(&self) -> Vec<LaneChannel> {
        LaneChannel::all()
            .filter(|l| !self.decisions[l.index()].is_determinate())
            .collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.decisions.iter().all(|d| d.is_determinate())
    }
}

impl<T> Adc16Controller<T>
where
    T: Transport,
{
    /// Total deskew errors per lane of `chip` at whatever taps are latched now
    fn deskew_errors(
        &self,
        chip: ChipId,
        options: &CalibrationOptions,
    ) -> Result<[u32; LANES], Error> {
        let expected = options.deskew_sample();
        let mut total = [0u32; LANES];
        for _ in 0..options.iterations.max(1) {
            let errors = self.capture(chip, options.snap_length)?.lane_errors(expected);
            for (acc, e) in total.iter_mut().zip(errors) {
                *acc += e;
            }
        }
        Ok(total)
    }

    /// Finds and latches the best delay tap for every lane of `chip`. The chip is left outputting
    /// the deskew pattern. Lanes without a good tap are reported, not raised, and keep the last
    /// swept tap.
    /// # Errors
    /// Returns an error on transport errors, in which case no lane has been decided
    pub fn calibrate_taps(
        &self,
        chip: ChipId,
        options: &CalibrationOptions,
        progress: &ProgressBar,
    ) -> Result<ChipCalibration, Error> {
        let cs = ChipSelect::single(chip);
        self.select_test_pattern_on(cs, TestPattern::Deskew)?;

        // Probe the ends of the range
        self.set_delay_tap(chip, 0, LaneMask::ALL)?;
        let low = self.deskew_errors(chip, options)?;
        self.set_delay_tap(chip, MAX_TAP, LaneMask::ALL)?;
        let high = self.deskew_errors(chip, options)?;
        let straddled = low.contains(&0) || high.contains(&0);
        if straddled {
            info!(%chip, "Eye reaches the end of the tap range, slipping one bit");
            self.bitslip(cs)?;
        }

        let mut scan = TapScan::default();
        for tap in 0..=MAX_TAP {
            self.set_delay_tap(chip, tap, LaneMask::ALL)?;
            scan.record(tap, self.deskew_errors(chip, options)?);
            progress.inc(1);
        }

        let decisions = scan.decisions();
        for lane in LaneChannel::all() {
            match decisions[lane.index()] {
                TapDecision::Tap(tap) => {
                    debug!(%chip, %lane, tap, "Setting delay tap");
                    self.set_delay_tap(chip, tap, lane.mask())?;
                }
                decision => warn!(%chip, %lane, ?decision, "No safe delay tap"),
            }
        }

        Ok(ChipCalibration {
            chip,
            straddled,
            scan,
            decisions,
        })
    }
}
