//! Prelude (helpful reexports) for this package

pub use crate::{
    snapadc::{
        calibration::{ChipCalibration, TapDecision},
        chip::{canonicalize, ChipId, ChipSelect, Lane, LaneChannel, LaneMask},
        config::{CalibrationOptions, Verbosity},
        controller::{Adc16Controller, DemuxMode},
        hmcad1511::{CustomSlot, OutputFormat, TestPattern},
        layout::{BoardLayout, LineLock},
        sync::SyncStatus,
        AdcMode, CalibrationReport, SnapAdc,
    },
    transport::{emulator::Adc16Emulator, mock::Mock, Transport},
};
