//! The CASPER `adc16_controller` gateware, which drives the HMCAD1511 3-wire bus, delay taps,
//! bitslips, and snapshot triggers through a handful of 32-bit words.
//!
//! This device controls and manages multiple HMCAD1511 ADCs. It owns the chip select state of the
//! shared 3-wire bus, so one controller must only ever be driven by one caller at a time.

use super::{
    chip::{self, ChipId, ChipSelect, LaneMask},
    hmcad1511::{
        register_value, valid_address, Address, CustomPattern1, CustomPattern2, CustomSlot,
        OutputFormat, OutputMode, Reset, SleepPd, TestPattern,
    },
    layout::{BoardLayout, LineLock, CONTROL_WORD, THREE_WIRE_WORD},
};
use crate::transport::Transport;
use packed_struct::prelude::*;
use std::{
    sync::{Mutex, Weak},
    thread,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] crate::transport::Error),
    #[error(transparent)]
    Chip(#[from] chip::Error),
    #[error("Failed to pack an ADC register")]
    Packing(#[from] PackingError),
    #[error("The FPGA isn't programmed")]
    NotProgrammed,
    #[error("The primary ADC line clock isn't locked")]
    ClockNotLocked,
    #[error("Chip {chip} isn't in the gateware, which was compiled for {supported} chips")]
    UnsupportedChip { chip: ChipId, supported: u8 },
    #[error("Chip {chip} doesn't exist on a {max_chips} chip board")]
    ChipNotOnBoard { chip: ChipId, max_chips: u8 },
    #[error("Current gateware doesn't support demux modes")]
    NoDemux,
    #[error("Snapshot length must be between 1 and {max} words, got {len}")]
    SnapLength { len: usize, max: usize },
    #[error("The transport this controller was built with has been dropped")]
    TransportGone,
    #[error("The transport lock was poisoned")]
    Poisoned,
}

/// Demultiplexing of the deserialized ADC data before it's presented to the FPGA fabric
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum DemuxMode {
    #[default]
    SingleChannel = 0,
    DualChannel = 1,
    QuadChannel = 2,
}

impl DemuxMode {
    fn from_bits(bits: u32) -> Option<Self> {
        match bits & 0b11 {
            0 => Some(Self::SingleChannel),
            1 => Some(Self::DualChannel),
            2 => Some(Self::QuadChannel),
            _ => None,
        }
    }
}

/// Controller for the ADC chips themselves
#[derive(Debug)]
pub struct Adc16Controller<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
    /// Bit positions of this board variant
    layout: BoardLayout,
    /// Holds the current chip select state
    cs: ChipSelect,
    /// Wait after latching a delay tap
    settle: Duration,
}

impl<T> Adc16Controller<T>
where
    T: Transport,
{
    pub(crate) const NAME: &'static str = "adc16_controller";

    /// Builds a controller for a board laid out as `layout`, with every chip selected
    #[must_use]
    pub fn new(transport: Weak<Mutex<T>>, layout: BoardLayout) -> Self {
        Self {
            transport,
            layout,
            cs: ChipSelect::all(layout.max_chips),
            settle: Duration::from_millis(100),
        }
    }

    #[must_use]
    pub fn layout(&self) -> &BoardLayout {
        &self.layout
    }

    /// Sets how long to wait for the delay lines after a tap is latched
    pub fn set_settle(&mut self, settle: Duration) {
        self.settle = settle;
    }

    /// Runs `f` with exclusive access to the transport. Everything `f` writes reaches the
    /// hardware in order and without interleaving from other users of the transport.
    pub(crate) fn with_transport<R>(
        &self,
        f: impl FnOnce(&mut T) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let tarc = self.transport.upgrade().ok_or(Error::TransportGone)?;
        let mut transport = tarc.lock().map_err(|_| Error::Poisoned)?;
        f(&mut *transport)
    }

    /// Checks that the FPGA is programmed and running a design
    /// # Errors
    /// Returns [`Error::NotProgrammed`] if it isn't, or an error on transport errors
    pub fn ensure_programmed(&self) -> Result<(), Error> {
        if self.with_transport(|t| Ok(t.is_running()?))? {
            Ok(())
        } else {
            Err(Error::NotProgrammed)
        }
    }

    fn status(&self) -> Result<u32, Error> {
        self.with_transport(|t| Ok(t.read_word(Self::NAME, THREE_WIRE_WORD)?))
    }

    /// Gets the number of ADC chips this controller supports
    /// # Errors
    /// Returns an error on transport errors
    pub fn supported_chips(&self) -> Result<u8, Error> {
        Ok(self.layout.supported_chips(self.status()?))
    }

    /// Gets the controller revision
    /// # Errors
    /// Returns an error on transport errors
    pub fn revision(&self) -> Result<u8, Error> {
        Ok(self.layout.revision(self.status()?))
    }

    /// Gets the raw state of the two line clock lock bits
    /// # Errors
    /// Returns an error on transport errors
    pub fn line_lock(&self) -> Result<LineLock, Error> {
        Ok(self.layout.line_lock(self.status()?))
    }

    /// Checks to see if the ADCs are locked. The secondary lock only matters for gateware compiled
    /// with more than four chips.
    /// # Errors
    /// Returns an error on transport errors
    pub fn locked(&self) -> Result<bool, Error> {
        let status = self.status()?;
        let lock = self.layout.line_lock(status);
        Ok(lock.primary && (lock.secondary || self.layout.supported_chips(status) <= 4))
    }

    /// Sets the chip select state of the controller. It sticks until the next call.
    pub fn chip_select(&mut self, cs: ChipSelect) {
        self.cs = cs;
    }

    /// Gets the current chip select state
    #[must_use]
    pub fn chip_selection(&self) -> ChipSelect {
        self.cs
    }

    /// Cursed bit-banging to send an address and value over the 3 wire to the chips in `cs`
    pub(crate) fn write_register_on(
        &self,
        cs: ChipSelect,
        addr: u8,
        value: u16,
    ) -> Result<(), Error> {
        trace!(addr, value, cs = cs.bits(), "3-wire write");
        let layout = self.layout;
        let bits = (0..8)
            .rev()
            .map(|i| (addr >> i) & 1 == 1)
            .chain((0..16).rev().map(|i| (value >> i) & 1 == 1));
        self.with_transport(|t| {
            t.write_word(Self::NAME, THREE_WIRE_WORD, layout.idle())?;
            for bit in bits {
                // Data settles with the clock low, the chips latch on the rising edge
                t.write_word(Self::NAME, THREE_WIRE_WORD, layout.three_wire(false, bit, cs))?;
                t.write_word(Self::NAME, THREE_WIRE_WORD, layout.three_wire(true, bit, cs))?;
            }
            t.write_word(Self::NAME, THREE_WIRE_WORD, layout.idle())?;
            Ok(())
        })
    }

    /// Writes `value` to register `addr` of every currently selected chip.
    /// Nothing is read back, and `addr` is sent as is.
    /// # Errors
    /// Returns an error on transport errors
    pub fn write_register(&self, addr: u8, value: u16) -> Result<(), Error> {
        self.write_register_on(self.cs, addr, value)
    }

    pub(crate) fn send_reg_on<R>(&self, cs: ChipSelect, reg: &R) -> Result<(), Error>
    where
        R: Address + PackedStruct<ByteArray = [u8; 2]>,
    {
        self.write_register_on(cs, R::ADDR, register_value(reg)?)
    }

    /// Sends a typed HMCAD1511 register to every currently selected chip
    /// # Errors
    /// Returns an error if the register can't be packed or on transport errors
    pub fn send_reg<R>(&self, reg: &R) -> Result<(), Error>
    where
        R: Address + PackedStruct<ByteArray = [u8; 2]>,
    {
        self.send_reg_on(self.cs, reg)
    }

    /// Resets all the chips selected by the current chip select
    /// # Errors
    /// Returns an error on transport errors
    pub fn reset(&self) -> Result<(), Error> {
        self.send_reg(&Reset { reset: true })
    }

    /// Power cycles all the ADCs selected by the current chip select. They are powered back up
    /// one chip at a time.
    /// # Errors
    /// Returns an error on transport errors
    pub fn power_cycle(&self) -> Result<(), Error> {
        self.send_reg(&SleepPd {
            pd: true,
            ..Default::default()
        })?;
        for chip in self.cs.chips() {
            self.send_reg_on(ChipSelect::single(chip), &SleepPd::default())?;
        }
        Ok(())
    }

    /// Resets the selected chips, applies `overrides` as raw (address, value) writes, then power
    /// cycles them. Overrides outside the documented register space are skipped.
    /// # Errors
    /// Returns [`Error::NotProgrammed`] before touching anything if the FPGA isn't running, or an
    /// error on transport errors
    pub fn initialize(&self, overrides: &[(u8, u16)]) -> Result<(), Error> {
        self.ensure_programmed()?;
        self.reset()?;
        for &(addr, value) in overrides {
            if valid_address(addr) {
                self.write_register(addr, value)?;
            } else {
                warn!(addr, value, "Skipping write to invalid ADC register");
            }
        }
        self.power_cycle()
    }

    pub(crate) fn select_test_pattern_on(
        &self,
        cs: ChipSelect,
        pattern: TestPattern,
    ) -> Result<(), Error> {
        debug!(?pattern, cs = cs.bits(), "Selecting test pattern");
        let (ctl, deskew_sync) = pattern.registers();
        self.send_reg_on(cs, &ctl)?;
        self.send_reg_on(cs, &deskew_sync)
    }

    /// Switches the output of the selected chips to `pattern`
    /// # Errors
    /// Returns an error on transport errors
    pub fn select_test_pattern(&self, pattern: TestPattern) -> Result<(), Error> {
        self.select_test_pattern_on(self.cs, pattern)
    }

    /// Loads `byte` into one of the custom pattern registers of the selected chips
    /// # Errors
    /// Returns an error on transport errors
    pub fn set_custom_pattern(&self, slot: CustomSlot, byte: u8) -> Result<(), Error> {
        match slot {
            CustomSlot::One => self.send_reg(&CustomPattern1 { bits_custom1: byte }),
            CustomSlot::Two => self.send_reg(&CustomPattern2 { bits_custom2: byte }),
        }
    }

    /// Sets the sample encoding of the selected chips
    /// # Errors
    /// Returns an error on transport errors
    pub fn set_output_format(&self, format: OutputFormat) -> Result<(), Error> {
        self.send_reg(&OutputMode {
            btc_mode: format.twos_complement,
            msb_first: format.msb_first,
        })
    }

    /// Latches `tap` into the delay lines of the lanes of `chip` picked by `lanes`.
    /// Taps wider than 5 bits are masked.
    /// # Errors
    /// Returns an error on transport errors
    pub fn set_delay_tap(&self, chip: ChipId, tap: u8, lanes: LaneMask) -> Result<(), Error> {
        self.check_on_board(chip)?;
        let layout = self.layout;
        let strobes = layout.strobe_bits(chip, lanes);
        self.with_transport(|t| {
            for &word in layout.strobe_words() {
                t.write_word(Self::NAME, word, 0)?;
            }
            // The tap has to be stable on the bus before any strobe goes high
            t.write_word(Self::NAME, CONTROL_WORD, layout.tap_bits(tap))?;
            for &(word, bits) in &strobes {
                t.write_word(Self::NAME, word, bits)?;
            }
            for &word in layout.strobe_words() {
                t.write_word(Self::NAME, word, 0)?;
            }
            Ok(())
        })?;
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        Ok(())
    }

    /// Slips the deserializer of each chip in `chips` by one bit
    /// # Errors
    /// Returns [`Error::ChipNotOnBoard`] before slipping anything if a chip isn't on this board,
    /// or an error on transport errors
    pub fn bitslip(&self, chips: ChipSelect) -> Result<(), Error> {
        for chip in chips.chips() {
            self.check_on_board(chip)?;
        }
        let layout = self.layout;
        self.with_transport(|t| {
            for chip in chips.chips() {
                t.write_word(Self::NAME, CONTROL_WORD, 0)?;
                t.write_word(Self::NAME, CONTROL_WORD, layout.bitslip_bit(chip))?;
                t.write_word(Self::NAME, CONTROL_WORD, 0)?;
            }
            Ok(())
        })
    }

    /// Checks if the gateware supports demultiplexing modes
    /// Demultiplexing modes are used when running the ADC16 in dual and quad
    /// channel configurations
    /// # Errors
    /// Returns an error on transport errors
    pub fn supports_demux(&self) -> Result<bool, Error> {
        let Some(demux) = self.layout.demux else {
            return Ok(false);
        };
        self.with_transport(|t| {
            // The write enable clears itself on gateware that supports demux, so if we /can/ set it,
            // we /don't/ support demux. The current mode goes along so the probe doesn't change it.
            let mode = t.read_word(Self::NAME, CONTROL_WORD)? & (0b11 << demux.mode_shift);
            t.write_word(Self::NAME, CONTROL_WORD, mode | (1 << demux.write_enable_bit))?;
            let ctl = t.read_word(Self::NAME, CONTROL_WORD)?;
            Ok(ctl & (1 << demux.write_enable_bit) == 0)
        })
    }

    /// Gets the current demux mode if the gateware supports it, otherwise returns None
    /// # Errors
    /// Returns an error on transport errors
    pub fn demux(&self) -> Result<Option<DemuxMode>, Error> {
        match self.layout.demux {
            Some(demux) if self.supports_demux()? => {
                let ctl = self.with_transport(|t| Ok(t.read_word(Self::NAME, CONTROL_WORD)?))?;
                Ok(DemuxMode::from_bits(ctl >> demux.mode_shift))
            }
            _ => Ok(None),
        }
    }

    /// Sets the current demux mode
    ///
    /// This only changes how the gateware demultiplexes the deserialized data. The channel mode of
    /// the chips themselves is set at initialization (it needs a power down), and the two have to
    /// agree or the data will be misinterpreted.
    /// # Errors
    /// Returns [`Error::NoDemux`] if the gateware doesn't support demux modes
    pub fn set_demux(&self, mode: DemuxMode) -> Result<(), Error> {
        match self.layout.demux {
            Some(demux) if self.supports_demux()? => self.with_transport(|t| {
                let value = ((mode as u32) << demux.mode_shift) | (1 << demux.write_enable_bit);
                t.write_word(Self::NAME, CONTROL_WORD, value)?;
                Ok(())
            }),
            _ => Err(Error::NoDemux),
        }
    }

    /// Fails with [`Error::ChipNotOnBoard`] unless this board variant has a `chip`
    pub(crate) fn check_on_board(&self, chip: ChipId) -> Result<(), Error> {
        let max_chips = self.layout.max_chips;
        if chip.index() < usize::from(max_chips) {
            Ok(())
        } else {
            Err(Error::ChipNotOnBoard { chip, max_chips })
        }
    }

    /// Fails with [`Error::UnsupportedChip`] unless `chip` is compiled into the gateware and on
    /// the board. A status word claiming more chips than the board has is capped at the board.
    pub(crate) fn check_supported(&self, chip: ChipId, supported: u8) -> Result<(), Error> {
        let supported = supported.min(self.layout.max_chips);
        if chip.index() < usize::from(supported) {
            Ok(())
        } else {
            Err(Error::UnsupportedChip { chip, supported })
        }
    }
}
