//! Full calibration runs against the emulated board

use adc16::{prelude::*, snapadc::controller::Error};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

fn chip(i: usize) -> ChipId {
    ChipId::new(i, 8).unwrap()
}

fn board(
    layout: BoardLayout,
    chips: u8,
) -> (Arc<Mutex<Adc16Emulator>>, SnapAdc<Adc16Emulator>) {
    let emu = Arc::new(Mutex::new(Adc16Emulator::new(layout, chips)));
    let mut adc = SnapAdc::new(&emu, layout, AdcMode::Quad);
    adc.controller.set_settle(Duration::ZERO);
    (emu, adc)
}

fn options() -> CalibrationOptions {
    CalibrationOptions::default()
        .with_settle(Duration::ZERO)
        .with_snap_length(64)
}

#[test]
fn centers_every_lane_in_its_eye() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 8);
    {
        let mut emu = emu.lock().unwrap();
        for c in ChipId::all(8) {
            emu.set_chip_eye(c, 5..=25);
        }
    }
    let report = adc.calibrate(&options()).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.chips.len(), 8);
    let emu = emu.lock().unwrap();
    for cal in &report.chips {
        assert!(!cal.straddled);
        for lane in LaneChannel::all() {
            assert_eq!(cal.tap(lane), Some(15));
            assert_eq!(emu.chip(cal.chip).unwrap().tap(lane), 15);
        }
        assert_eq!(
            report.sync_status(cal.chip),
            Some(SyncStatus::Synced { bitslips: 0 })
        );
    }
}

#[test]
fn lanes_are_latched_independently() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 2);
    let skewed = LaneChannel::new(1, Lane::B);
    emu.lock().unwrap().set_eye(chip(1), skewed, 2..=10);
    let report = adc.calibrate(&options()).unwrap();
    let emu = emu.lock().unwrap();
    let chip1 = emu.chip(chip(1)).unwrap();
    assert_eq!(chip1.tap(skewed), 6);
    for lane in LaneChannel::all().filter(|l| *l != skewed) {
        assert_eq!(chip1.tap(lane), 14);
    }
    assert_eq!(report.chip(chip(1)).unwrap().tap(skewed), Some(6));
}

#[test]
fn empty_eye_is_indeterminate() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 2);
    let dead = LaneChannel::new(3, Lane::A);
    emu.lock().unwrap().set_eye(chip(0), dead, []);
    let report = adc.calibrate(&options()).unwrap();
    let cal = report.chip(chip(0)).unwrap();
    assert_eq!(cal.decisions[dead.index()], TapDecision::NoGoodTaps);
    assert_eq!(cal.tap(dead), None);
    assert_eq!(report.indeterminate(), vec![(chip(0), dead)]);
    // The rest of the chip and the other chip are still calibrated and aligned
    assert_eq!(cal.indeterminate().len(), 1);
    assert!(report.chip(chip(1)).unwrap().is_complete());
    assert!(report.unsynced().is_empty());
    // Never defaulted to tap 0, the last swept tap stays latched
    assert_eq!(emu.lock().unwrap().chip(chip(0)).unwrap().tap(dead), 31);
}

#[test]
fn wrapped_eye_is_indeterminate() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 1);
    let lane = LaneChannel::new(0, Lane::A);
    emu.lock()
        .unwrap()
        .set_eye(chip(0), lane, [0, 1, 2, 29, 30, 31]);
    let report = adc.calibrate(&options()).unwrap();
    let cal = report.chip(chip(0)).unwrap();
    assert_eq!(
        cal.decisions[lane.index()],
        TapDecision::Wrapped { min: 0, max: 31 }
    );
    assert!(cal.straddled);
}

#[test]
fn straddled_eye_slips_once_before_sweeping() {
    let (emu, adc) = board(BoardLayout::ADC16, 1);
    emu.lock().unwrap().set_chip_eye(chip(0), 0..=31);
    let progress = indicatif::ProgressBar::hidden();
    let cal = adc
        .controller
        .calibrate_taps(chip(0), &options(), &progress)
        .unwrap();
    assert!(cal.straddled);
    let emu = emu.lock().unwrap();
    assert_eq!(emu.chip(chip(0)).unwrap().bitslips(), 1);
    // Two probes and 32 sweep points, one snapshot each
    assert_eq!(emu.snapshots(), 34);
    assert_eq!(progress.position(), 32);
}

#[test]
fn bracketed_eye_never_slips() {
    let (emu, adc) = board(BoardLayout::ADC16, 1);
    let cal = adc
        .controller
        .calibrate_taps(chip(0), &options(), &indicatif::ProgressBar::hidden())
        .unwrap();
    assert!(!cal.straddled);
    assert_eq!(emu.lock().unwrap().chip(chip(0)).unwrap().bitslips(), 0);
    // Default eye is 8..=20
    assert_eq!(cal.tap(LaneChannel::new(2, Lane::A)), Some(14));
}

#[test]
fn straddle_slip_counts_toward_frame_alignment() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 1);
    {
        let mut emu = emu.lock().unwrap();
        emu.set_chip_eye(chip(0), 0..=20);
        emu.set_frame_slip(chip(0), Some(1));
    }
    let report = adc.calibrate(&options()).unwrap();
    assert!(report.chip(chip(0)).unwrap().straddled);
    assert_eq!(
        report.sync_status(chip(0)),
        Some(SyncStatus::Synced { bitslips: 0 })
    );
    assert_eq!(emu.lock().unwrap().chip(chip(0)).unwrap().bitslips(), 1);
}

#[test]
fn sync_takes_exactly_the_needed_bitslips() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 2);
    emu.lock().unwrap().set_frame_slip(chip(1), Some(3));
    let report = adc.calibrate(&options()).unwrap();
    assert_eq!(
        report.sync_status(chip(1)),
        Some(SyncStatus::Synced { bitslips: 3 })
    );
    let emu = emu.lock().unwrap();
    assert_eq!(emu.chip(chip(1)).unwrap().bitslips(), 3);
    assert_eq!(emu.chip(chip(0)).unwrap().bitslips(), 0);
}

#[test]
fn unsyncable_chip_does_not_stop_the_others() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 3);
    emu.lock().unwrap().set_frame_slip(chip(1), None);
    emu.lock().unwrap().set_frame_slip(chip(2), Some(5));
    let report = adc.calibrate(&options()).unwrap();
    assert_eq!(report.sync_status(chip(1)), Some(SyncStatus::Unsynced));
    assert_eq!(
        report.sync_status(chip(2)),
        Some(SyncStatus::Synced { bitslips: 5 })
    );
    assert_eq!(report.unsynced(), vec![chip(1)]);
    assert!(report.indeterminate().is_empty());
    assert_eq!(emu.lock().unwrap().chip(chip(1)).unwrap().bitslips(), 8);
}

#[test]
fn sync_is_verified_after_all_taps() {
    let (emu, adc) = board(BoardLayout::ADC16, 1);
    emu.lock().unwrap().set_frame_slip(chip(0), Some(3));
    let status = adc
        .controller
        .verify_sync(ChipSelect::single(chip(0)), &options())
        .unwrap();
    assert_eq!(status, vec![(chip(0), SyncStatus::Synced { bitslips: 3 })]);
    // A budget that's too small gives up after re-checking once
    let (emu, adc) = board(BoardLayout::ADC16, 1);
    emu.lock().unwrap().set_frame_slip(chip(0), Some(3));
    let status = adc
        .controller
        .verify_sync(
            ChipSelect::single(chip(0)),
            &options().with_sync_retries(2),
        )
        .unwrap();
    assert_eq!(status, vec![(chip(0), SyncStatus::Unsynced)]);
    assert_eq!(emu.lock().unwrap().chip(chip(0)).unwrap().bitslips(), 2);
}

#[test]
fn unlocked_clock_aborts_before_any_write() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 8);
    emu.lock().unwrap().set_line_lock(LineLock {
        primary: false,
        secondary: true,
    });
    assert!(matches!(
        adc.calibrate(&options()),
        Err(Error::ClockNotLocked)
    ));
    assert!(emu.lock().unwrap().controller_writes().is_empty());
}

#[test]
fn unlocked_secondary_is_only_a_warning() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 8);
    emu.lock().unwrap().set_line_lock(LineLock {
        primary: true,
        secondary: false,
    });
    let report = adc
        .calibrate(&options().with_chips([chip(0), chip(7)]))
        .unwrap();
    assert_eq!(report.chips.len(), 2);
    assert!(report.is_complete());
}

#[test]
fn unprogrammed_fpga_aborts() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 8);
    emu.lock().unwrap().deprogram().unwrap();
    assert!(matches!(
        adc.calibrate(&options()),
        Err(Error::NotProgrammed)
    ));
    assert!(matches!(adc.initialize(&[]), Err(Error::NotProgrammed)));
    assert!(emu.lock().unwrap().controller_writes().is_empty());
}

#[test]
fn only_compiled_chips_are_calibrated() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 8);
    emu.lock().unwrap().set_supported_chips(2);
    let report = adc.calibrate(&options()).unwrap();
    let calibrated: Vec<_> = report.chips.iter().map(|c| c.chip).collect();
    assert_eq!(calibrated, vec![chip(0), chip(1)]);
    assert_eq!(report.sync.len(), 2);
    let emu = emu.lock().unwrap();
    assert_eq!(emu.chip(chip(5)).unwrap().tap(LaneChannel::new(0, Lane::A)), 0);
}

#[test]
fn chips_go_back_to_data_and_selection_is_untouched() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 4);
    let cs = ChipSelect::single(chip(2));
    adc.controller.chip_select(cs);
    adc.calibrate(&options()).unwrap();
    assert_eq!(adc.controller.chip_selection(), cs);
    let emu = emu.lock().unwrap();
    for c in ChipId::all(4) {
        let c = emu.chip(c).unwrap();
        // Deskew/sync and pattern generators off
        assert_eq!(c.register(0x45), 0);
        assert_eq!(c.register(0x25), 0);
    }
}

#[test]
fn iterations_accumulate_errors() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 1);
    emu.lock().unwrap().set_chip_eye(chip(0), 5..=25);
    let report = adc.calibrate(&options().with_iterations(3)).unwrap();
    let cal = report.chip(chip(0)).unwrap();
    let lane = LaneChannel::new(0, Lane::B);
    // 64 words, half of them on each lane, three snapshots
    assert_eq!(cal.scan.errors(0, lane), 3 * 32);
    assert_eq!(cal.scan.errors(15, lane), 0);
    assert_eq!(cal.tap(lane), Some(15));
}

#[test]
fn custom_pattern_bytes_are_compared_signed() {
    let (emu, mut adc) = board(BoardLayout::ADC16, 1);
    {
        let mut emu = emu.lock().unwrap();
        emu.set_patterns(0xD5, 0x8F);
        emu.set_frame_slip(chip(0), Some(2));
    }
    let opts = options().with_deskew_expected(0xD5).with_sync_expected(0x8F);
    let report = adc.calibrate(&opts).unwrap();
    assert!(report.is_complete());
    assert_eq!(
        report.sync_status(chip(0)),
        Some(SyncStatus::Synced { bitslips: 2 })
    );
}

#[test]
fn test_board_calibrates() {
    let (emu, mut adc) = board(BoardLayout::ADC16_TEST, 4);
    {
        let mut emu = emu.lock().unwrap();
        emu.set_chip_eye(chip(3), 11..=27);
        emu.set_frame_slip(chip(2), Some(6));
    }
    let report = adc.calibrate(&options()).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.chips.len(), 4);
    assert_eq!(
        report.chip(chip(3)).unwrap().tap(LaneChannel::new(1, Lane::B)),
        Some(19)
    );
    assert_eq!(
        report.sync_status(chip(2)),
        Some(SyncStatus::Synced { bitslips: 6 })
    );
    assert!(!adc.controller.supports_demux().unwrap());
}

#[test]
fn initialize_programs_mode_and_overrides() {
    let (emu, adc) = board(BoardLayout::ADC16, 2);
    adc.initialize(&[(0x46, 0x0004), (0x60, 0xFFFF)]).unwrap();
    let emu = emu.lock().unwrap();
    for c in ChipId::all(2) {
        let c = emu.chip(c).unwrap();
        assert_eq!(c.register(0x31), 0x0004);
        assert_eq!(c.register(0x46), 0x0004);
        assert_eq!(c.register(0x60), 0);
        assert!(!c.powered_down());
        // Reset, mode, one override, power down, power up
        let addrs: Vec<_> = c.writes().iter().map(|(a, _)| *a).collect();
        assert_eq!(addrs, vec![0x00, 0x31, 0x46, 0x0F, 0x0F]);
    }
    assert_eq!(emu.demux_mode(), Some(DemuxMode::QuadChannel as u32));
}

#[test]
fn canonicalized_chips_drive_the_same_lanes() {
    let (emu, adc) = board(BoardLayout::ADC16, 8);
    for spec in ["d", "D", "3"] {
        let c = canonicalize(spec, 8).unwrap();
        adc.controller
            .set_delay_tap(c, 9, LaneMask::ALL)
            .unwrap();
    }
    adc.controller
        .set_delay_tap(canonicalize(3usize, 8).unwrap(), 9, LaneMask::ALL)
        .unwrap();
    assert!(canonicalize("j", 8).is_err());
    let emu = emu.lock().unwrap();
    assert_eq!(emu.chip(chip(3)).unwrap().tap(LaneChannel::new(0, Lane::A)), 9);
    assert_eq!(emu.chip(chip(2)).unwrap().tap(LaneChannel::new(0, Lane::A)), 0);
}

#[test]
fn chips_past_the_board_are_never_touched() {
    let (emu, mut adc) = board(BoardLayout::ADC16_TEST, 4);
    // Gateware claiming more chips than the board carries
    emu.lock().unwrap().set_supported_chips(8);
    let e = chip(4);
    let report = adc
        .calibrate(&options().with_chips([chip(1), e]))
        .unwrap();
    assert_eq!(report.chips.len(), 1);
    assert_eq!(report.chips[0].chip, chip(1));
    assert!(report.chip(e).is_none());
    assert!(matches!(
        adc.controller.set_delay_tap(e, 3, LaneMask::ALL),
        Err(Error::ChipNotOnBoard { .. })
    ));
    assert!(matches!(
        adc.controller.capture(e, 1),
        Err(Error::ChipNotOnBoard { .. })
    ));
}
