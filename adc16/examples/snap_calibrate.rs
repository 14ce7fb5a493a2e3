//! In this example, we bring up the ADCs of an emulated SNAP, calibrate the delay taps and frame
//! alignment, and print what the calibration found.

use adc16::prelude::*;
use anyhow::bail;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

fn main() -> anyhow::Result<()> {
    // An 8-chip board with one late lane and one chip that needs slipping
    let board = Arc::new(Mutex::new(Adc16Emulator::new(BoardLayout::ADC16, 8)));
    {
        let mut board = board.lock().unwrap();
        let chip = canonicalize("c", 8)?;
        board.set_eye(chip, LaneChannel::new(1, Lane::B), 14..=29);
        board.set_frame_slip(canonicalize(5usize, 8)?, Some(3));
    }

    let mut adc = SnapAdc::new(&board, BoardLayout::ADC16, AdcMode::Quad);
    if !adc.controller.locked()? {
        bail!("ADC line clocks aren't locked");
    }

    // Reset and power cycle, with a two's complement, MSB first output format
    adc.initialize(&[(0x46, 0x000C)])?;

    let options = CalibrationOptions::default()
        .with_settle(Duration::from_millis(1))
        .with_verbosity(Verbosity::Progress);
    let report = adc.calibrate(&options)?;

    for cal in &report.chips {
        let taps: Vec<_> = LaneChannel::all()
            .map(|lane| cal.tap(lane).map_or("--".to_owned(), |t| t.to_string()))
            .collect();
        println!(
            "chip {}: taps [{}]{}",
            cal.chip,
            taps.join(" "),
            if cal.straddled { " (slipped)" } else { "" }
        );
    }
    for (chip, status) in &report.sync {
        println!("chip {chip}: {status:?}");
    }
    if !report.is_complete() {
        bail!("Calibration incomplete");
    }
    Ok(())
}
