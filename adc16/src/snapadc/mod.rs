//! Interface to the HMCAD1511 ADCs behind an ADC16 controller, and their bring-up and calibration
pub mod calibration;
pub mod chip;
pub mod config;
pub mod controller;
pub mod hmcad1511;
pub mod layout;
pub mod snapshot;
pub mod sync;

use self::{
    calibration::ChipCalibration,
    chip::{ChipId, ChipSelect, LaneChannel},
    config::CalibrationOptions,
    controller::{Adc16Controller, DemuxMode, Error},
    hmcad1511::{register_value, Address, ChanNumClkDiv, ChannelNum, TestPattern},
    layout::BoardLayout,
    sync::SyncStatus,
};
use crate::transport::Transport;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Valid modes for each HMCAD1511 ADC
pub enum AdcMode {
    /// Single channel mode - Fsmax = 1000 Msps
    Single,
    /// Dual channel mode - Fsmax = 500 Msps
    Dual,
    /// Quad channel mode - Fsmax = 250 Msps
    Quad,
}

impl AdcMode {
    fn channel_num(self) -> ChannelNum {
        match self {
            AdcMode::Single => ChannelNum::Single,
            AdcMode::Dual => ChannelNum::Dual,
            AdcMode::Quad => ChannelNum::Quad,
        }
    }

    fn demux(self) -> DemuxMode {
        match self {
            AdcMode::Single => DemuxMode::SingleChannel,
            AdcMode::Dual => DemuxMode::DualChannel,
            AdcMode::Quad => DemuxMode::QuadChannel,
        }
    }
}

/// Everything a calibration run found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationReport {
    /// Tap calibration of each chip, in chip order
    pub chips: Vec<ChipCalibration>,
    /// Frame alignment of each chip, in chip order
    pub sync: Vec<(ChipId, SyncStatus)>,
}

impl CalibrationReport {
    /// Every lane that didn't get a tap
    #[must_use]
    pub fn indeterminate(&self) -> Vec<(ChipId, LaneChannel)> {
        self.chips
            .iter()
            .flat_map(|c| c.indeterminate().into_iter().map(move |l| (c.chip, l)))
            .collect()
    }

    /// Every chip that never frame aligned
    #[must_use]
    pub fn unsynced(&self) -> Vec<ChipId> {
        self.sync
            .iter()
            .filter(|(_, s)| !s.is_synced())
            .map(|(c, _)| *c)
            .collect()
    }

    /// True if every lane got a tap and every chip aligned
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.indeterminate().is_empty() && self.unsynced().is_empty()
    }

    #[must_use]
    pub fn chip(&self, chip: ChipId) -> Option<&ChipCalibration> {
        self.chips.iter().find(|c| c.chip == chip)
    }

    #[must_use]
    pub fn sync_status(&self, chip: ChipId) -> Option<SyncStatus> {
        self.sync.iter().find(|(c, _)| *c == chip).map(|(_, s)| *s)
    }
}

/// The HMCAD1511 ADCs on a SNAP style board
#[derive(Debug)]
pub struct SnapAdc<T> {
    /// Channel mode for each chip
    pub mode: AdcMode,
    /// ADC Controller
    pub controller: Adc16Controller<T>,
}

impl<T> SnapAdc<T>
where
    T: Transport,
{
    #[must_use]
    pub fn new(transport: &Arc<Mutex<T>>, layout: BoardLayout, mode: AdcMode) -> Self {
        Self {
            mode,
            controller: Adc16Controller::new(Arc::downgrade(transport), layout),
        }
    }

    /// Resets and power cycles the selected chips into this board's [`AdcMode`], applying
    /// `overrides` on the way. The gateware demux is matched to the mode when it supports one.
    /// # Errors
    /// Returns [`Error::NotProgrammed`] if the FPGA isn't running, or an error on transport errors
    pub fn initialize(&self, overrides: &[(u8, u16)]) -> Result<(), Error> {
        let mode = ChanNumClkDiv {
            channel_num: self.mode.channel_num(),
            ..Default::default()
        };
        let mut writes = vec![(ChanNumClkDiv::ADDR, register_value(&mode)?)];
        writes.extend_from_slice(overrides);
        self.controller.initialize(&writes)?;
        if self.controller.supports_demux()? {
            self.controller.set_demux(self.mode.demux())?;
        }
        Ok(())
    }

    /// Calibrates the delay taps of every chip in `options`, then frame aligns them. The chips
    /// are switched back to real data afterwards.
    ///
    /// Lanes without a good tap and chips that never align are collected in the report rather
    /// than aborting the run.
    /// # Errors
    /// Returns [`Error::NotProgrammed`] or [`Error::ClockNotLocked`] before any calibration
    /// starts, or an error on transport errors
    pub fn calibrate(&mut self, options: &CalibrationOptions) -> Result<CalibrationReport, Error> {
        let ctl = &mut self.controller;
        ctl.ensure_programmed()?;
        ctl.set_settle(options.settle);

        let lock = ctl.line_lock()?;
        if !lock.primary {
            return Err(Error::ClockNotLocked);
        }
        let supported = ctl.supported_chips()?;
        if supported > 4 && !lock.secondary {
            warn!(supported, "Secondary line clock isn't locked");
        }

        let requested = options
            .chips
            .unwrap_or_else(|| ChipSelect::all(ctl.layout().max_chips));
        let mut chips = vec![];
        for chip in requested.chips() {
            match ctl.check_supported(chip, supported) {
                Ok(()) => chips.push(chip),
                Err(e) => warn!("{e}, skipping"),
            }
        }
        let cs: ChipSelect = chips.iter().copied().collect();
        if cs.is_empty() {
            return Ok(CalibrationReport {
                chips: vec![],
                sync: vec![],
            });
        }

        let progress = options.progress((calibration::TAPS * chips.len()) as u64);
        progress.set_message("Sweeping delay taps");
        let mut calibrations = vec![];
        for &chip in &chips {
            calibrations.push(ctl.calibrate_taps(chip, options, &progress)?);
        }
        progress.finish_and_clear();

        let sync = ctl.verify_sync(cs, options)?;
        ctl.select_test_pattern_on(cs, TestPattern::Data)?;

        let report = CalibrationReport {
            chips: calibrations,
            sync,
        };
        info!(
            chips = chips.len(),
            indeterminate = report.indeterminate().len(),
            unsynced = report.unsynced().len(),
            "Calibration finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::{calibration::TapDecision, *};

    #[test]
    fn test_report_summaries() {
        let id = |i| ChipId::new(i, 8).unwrap();
        let mut decisions = [TapDecision::Tap(12); chip::LANES];
        decisions[5] = TapDecision::Wrapped { min: 0, max: 31 };
        let report = CalibrationReport {
            chips: vec![
                ChipCalibration {
                    chip: id(0),
                    straddled: false,
                    scan: Default::default(),
                    decisions: [TapDecision::Tap(12); chip::LANES],
                },
                ChipCalibration {
                    chip: id(1),
                    straddled: true,
                    scan: Default::default(),
                    decisions,
                },
            ],
            sync: vec![
                (id(0), SyncStatus::Synced { bitslips: 2 }),
                (id(1), SyncStatus::Unsynced),
            ],
        };
        assert_eq!(
            report.indeterminate(),
            vec![(id(1), LaneChannel::from_index(5))]
        );
        assert_eq!(report.unsynced(), vec![id(1)]);
        assert!(!report.is_complete());
        assert!(report.chip(id(1)).unwrap().straddled);
        assert_eq!(
            report.sync_status(id(0)),
            Some(SyncStatus::Synced { bitslips: 2 })
        );
        assert!(report.chip(id(2)).is_none());
    }
}
