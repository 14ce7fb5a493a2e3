//! Captures from the per-chip snapshot BRAMs of the ADC16 controller
//!
//! Each 32-bit word of a snapshot holds one sample from each of the four channels of a chip, with
//! channel 0 in the most significant byte. Within a channel, samples alternate between the A and B
//! lanes starting with A.

use super::{
    chip::{ChipId, ChipSelect, Lane, LaneChannel, CHANNELS, LANES},
    config::SNAP_DEPTH,
    controller::{Adc16Controller, Error},
    layout::{BoardLayout, CONTROL_WORD},
};
use crate::transport::Transport;

/// The samples captured from one chip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipSnapshot {
    pub chip: ChipId,
    words: Vec<u32>,
}

/// Reinterpret a raw wire byte as the signed sample it encodes
#[must_use]
pub fn signed(byte: u8) -> i8 {
    i8::from_ne_bytes([byte])
}

impl ChipSnapshot {
    #[must_use]
    pub fn new(chip: ChipId, words: Vec<u32>) -> Self {
        Self { chip, words }
    }

    /// The raw BRAM words
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Samples per channel
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// The unsigned bytes of `channel` as they came off the wire
    /// # Panics
    /// Panics if `channel` is not less than 4
    #[must_use]
    pub fn raw_channel(&self, channel: usize) -> Vec<u8> {
        assert!(channel < CHANNELS, "channel out of range");
        let shift = 8 * (CHANNELS - 1 - channel);
        self.words.iter().map(|w| (w >> shift) as u8).collect()
    }

    /// The signed samples of `channel`, both lanes interleaved
    /// # Panics
    /// Panics if `channel` is not less than 4
    #[must_use]
    pub fn channel(&self, channel: usize) -> Vec<i8> {
        self.raw_channel(channel).into_iter().map(signed).collect()
    }

    /// The signed samples that came through one lane of `channel`
    /// # Panics
    /// Panics if `channel` is not less than 4
    #[must_use]
    pub fn lane(&self, channel: usize, lane: Lane) -> Vec<i8> {
        let skip = match lane {
            Lane::A => 0,
            Lane::B => 1,
        };
        self.channel(channel).into_iter().skip(skip).step_by(2).collect()
    }

    /// Number of samples per lane that differ from `expected`, indexed by [`LaneChannel::index`]
    #[must_use]
    pub fn lane_errors(&self, expected: i8) -> [u32; LANES] {
        let mut errors = [0u32; LANES];
        for channel in 0..CHANNELS {
            for (i, sample) in self.channel(channel).into_iter().enumerate() {
                if sample != expected {
                    let lane = if i % 2 == 0 { Lane::A } else { Lane::B };
                    let lc = LaneChannel {
                        // Bounded by CHANNELS
                        channel: channel as u8,
                        lane,
                    };
                    errors[lc.index()] += 1;
                }
            }
        }
        errors
    }
}

impl<T> Adc16Controller<T>
where
    T: Transport,
{
    /// Triggers one snapshot of every chip and reads back `length` words from each chip in `chips`
    /// # Errors
    /// Returns [`Error::SnapLength`] if `length` is zero or deeper than the BRAM,
    /// [`Error::ChipNotOnBoard`] for chips this board doesn't have, or an error on transport
    /// errors. A short read is an error, never a partial snapshot.
    pub fn snap(&self, chips: ChipSelect, length: usize) -> Result<Vec<ChipSnapshot>, Error> {
        check_length(length)?;
        for chip in chips.chips() {
            self.check_on_board(chip)?;
        }
        let layout = *self.layout();
        self.with_transport(|t| {
            trigger(t, &layout)?;
            chips
                .chips()
                .map(|chip| -> Result<ChipSnapshot, Error> {
                    let words = t.read_words(&layout.snap_device(chip), 0, length)?;
                    Ok(ChipSnapshot::new(chip, words))
                })
                .collect()
        })
    }

    /// Captures the last `length` samples of every channel of `chip`
    /// # Errors
    /// Same as [`Adc16Controller::snap`]
    pub fn capture(&self, chip: ChipId, length: usize) -> Result<ChipSnapshot, Error> {
        check_length(length)?;
        self.check_on_board(chip)?;
        let layout = *self.layout();
        self.with_transport(|t| {
            trigger(t, &layout)?;
            let words = t.read_words(&layout.snap_device(chip), 0, length)?;
            Ok(ChipSnapshot::new(chip, words))
        })
    }
}

fn check_length(length: usize) -> Result<(), Error> {
    if length == 0 || length > SNAP_DEPTH {
        Err(Error::SnapLength {
            len: length,
            max: SNAP_DEPTH,
        })
    } else {
        Ok(())
    }
}

/// Pulses the snap request so every chip's BRAM refills
fn trigger<T: Transport>(t: &mut T, layout: &BoardLayout) -> Result<(), Error> {
    t.write_word(Adc16Controller::<T>::NAME, CONTROL_WORD, 0)?;
    t.write_word(Adc16Controller::<T>::NAME, CONTROL_WORD, layout.snap_request())?;
    t.write_word(Adc16Controller::<T>::NAME, CONTROL_WORD, 0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::Register,
        transport::mock::Mock,
    };
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::Duration,
    };

    fn chip(i: usize) -> ChipId {
        ChipId::new(i, 8).unwrap()
    }

    fn setup() -> (Arc<Mutex<Mock>>, Adc16Controller<Mock>) {
        let mut regs = HashMap::from([(
            "adc16_controller".into(),
            Register {
                addr: 0,
                length: 16,
            },
        )]);
        for i in 0..2 {
            regs.insert(
                format!("adc16_wb_ram{i}").into(),
                Register {
                    addr: 0x1000 * (i + 1),
                    length: 4 * SNAP_DEPTH,
                },
            );
        }
        let mock = Arc::new(Mutex::new(Mock::new(regs)));
        let mut ctl = Adc16Controller::new(Arc::downgrade(&mock), BoardLayout::ADC16);
        ctl.set_settle(Duration::ZERO);
        (mock, ctl)
    }

    #[test]
    fn test_deinterleave() {
        let snap = ChipSnapshot::new(chip(0), vec![0x0102_03FF, 0x1112_1380, 0x2122_2370]);
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.raw_channel(0), vec![0x01, 0x11, 0x21]);
        assert_eq!(snap.channel(3), vec![-1, -128, 0x70]);
        assert_eq!(snap.lane(1, Lane::A), vec![0x02, 0x22]);
        assert_eq!(snap.lane(1, Lane::B), vec![0x12]);
    }

    #[test]
    fn test_signed() {
        assert_eq!(signed(0x2A), 42);
        assert_eq!(signed(0x7F), 127);
        assert_eq!(signed(0x80), -128);
        assert_eq!(signed(0xD6), -42);
    }

    #[test]
    fn test_lane_errors() {
        // Channel 2's B lane is off by one bit, everything else reads 0x2A
        let good = 0x2A2A_2A2A;
        let bad = 0x2A2A_2B2A;
        let snap = ChipSnapshot::new(chip(1), vec![good, bad, good, bad]);
        let errors = snap.lane_errors(0x2A);
        let b2 = LaneChannel::new(2, Lane::B);
        for (i, e) in errors.iter().enumerate() {
            if i == b2.index() {
                assert_eq!(*e, 2);
            } else {
                assert_eq!(*e, 0);
            }
        }
    }

    #[test]
    fn test_snap_sequence() {
        let (mock, ctl) = setup();
        {
            let mut mock = mock.lock().unwrap();
            mock.write_word("adc16_wb_ram1", 0, 0xDEAD_BEEF).unwrap();
            mock.write_word("adc16_wb_ram1", 1, 0x0102_0304).unwrap();
        }
        let snap = ctl.capture(chip(1), 2).unwrap();
        assert_eq!(snap.chip, chip(1));
        assert_eq!(snap.words(), &[0xDEAD_BEEF, 0x0102_0304]);
        assert_eq!(
            mock.lock().unwrap().word_writes("adc16_controller", 1),
            vec![0, 1 << 16, 0]
        );
    }

    #[test]
    fn test_snap_reads_every_chip_from_one_trigger() {
        let (mock, ctl) = setup();
        {
            let mut mock = mock.lock().unwrap();
            mock.write_word("adc16_wb_ram0", 0, 0x2A2A_2A2A).unwrap();
            mock.write_word("adc16_wb_ram1", 0, 0x7070_7070).unwrap();
            mock.clear_history();
        }
        let snaps = ctl
            .snap([chip(0), chip(1)].into_iter().collect(), 1)
            .unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].chip, chip(0));
        assert_eq!(snaps[0].channel(2), vec![0x2A]);
        assert_eq!(snaps[1].chip, chip(1));
        assert_eq!(snaps[1].words(), &[0x7070_7070]);
        let mock = mock.lock().unwrap();
        // A single snap request, and nothing else written
        assert_eq!(mock.word_writes("adc16_controller", 1), vec![0, 1 << 16, 0]);
        assert_eq!(mock.history().len(), 3);
    }

    #[test]
    fn test_snap_length_bounds() {
        let (_mock, ctl) = setup();
        assert!(matches!(
            ctl.capture(chip(0), 0),
            Err(Error::SnapLength { .. })
        ));
        assert!(matches!(
            ctl.capture(chip(0), SNAP_DEPTH + 1),
            Err(Error::SnapLength { .. })
        ));
        assert_eq!(ctl.capture(chip(0), SNAP_DEPTH).unwrap().len(), SNAP_DEPTH);
        // No BRAM for chip 2
        assert!(ctl.capture(chip(2), 1).is_err());
        assert!(matches!(
            ctl.snap([chip(0), chip(2)].into_iter().collect(), 1),
            Err(Error::Transport(_))
        ));
    }
}
