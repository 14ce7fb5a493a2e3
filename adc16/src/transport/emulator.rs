//! A behavioral model of the `adc16_controller` gateware and the HMCAD1511 chips behind it
//!
//! The emulator decodes the same register words real gateware sees: the 3-wire stream on word 0,
//! tap, bitslip, snap request, and demux control on word 1, and the delay strobes. Snapshots are
//! synthesized from each chip's pattern registers, the taps latched into its lanes, and how far
//! its deserializer has been slipped. Each lane has a configurable data eye, the set of taps that
//! sample it cleanly, and each chip a configurable frame offset.

use super::{Transport, TransportResult};
use crate::{
    core::{Register, RegisterMap},
    snapadc::{
        chip::{ChipId, ChipSelect, Lane, LaneChannel, CHANNELS, LANES},
        config::SNAP_DEPTH,
        hmcad1511::{
            Address, CustomPattern1, CustomPattern2, DeskewSyncPattern, PatternCtl, Reset, SleepPd,
        },
        layout::{BoardLayout, LineLock, CONTROL_WORD, MAX_TAP, THREE_WIRE_WORD},
    },
};
use kstring::KString;
use std::{collections::HashMap, ops::RangeInclusive, path::Path};
use thiserror::Error;

const CONTROLLER: &str = "adc16_controller";

/// Taps the default eye covers
pub const DEFAULT_EYE: RangeInclusive<u8> = 8..=20;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Device `{0}` not found")]
    MissingDevice(String),
    #[error("Out of bounds access on `{device}` at byte {offset}")]
    OutOfBounds { device: String, offset: usize },
    #[error("The emulated FPGA isn't programmed")]
    NotProgrammed,
}

fn eye_mask(taps: impl IntoIterator<Item = u8>) -> u32 {
    taps.into_iter()
        .filter(|t| *t <= MAX_TAP)
        .fold(0, |mask, t| mask | (1 << t))
}

/// The state of one emulated HMCAD1511 and its deserializer
#[derive(Debug, Clone)]
pub struct EmulatedChip {
    registers: HashMap<u8, u16>,
    writes: Vec<(u8, u16)>,
    taps: [u8; LANES],
    eyes: [u32; LANES],
    bitslips: u32,
    frame_slip: Option<u8>,
}

impl Default for EmulatedChip {
    fn default() -> Self {
        Self {
            registers: HashMap::new(),
            writes: vec![],
            taps: [0; LANES],
            eyes: [eye_mask(DEFAULT_EYE); LANES],
            bitslips: 0,
            frame_slip: Some(0),
        }
    }
}

impl EmulatedChip {
    /// Current value of register `addr`, registers that were never written read as zero
    #[must_use]
    pub fn register(&self, addr: u8) -> u16 {
        self.registers.get(&addr).copied().unwrap_or_default()
    }

    /// Every 3-wire transaction this chip received, in order
    #[must_use]
    pub fn writes(&self) -> &[(u8, u16)] {
        &self.writes
    }

    /// The tap latched into `lane`
    #[must_use]
    pub fn tap(&self, lane: LaneChannel) -> u8 {
        self.taps[lane.index()]
    }

    /// Number of bitslip pulses seen
    #[must_use]
    pub fn bitslips(&self) -> u32 {
        self.bitslips
    }

    #[must_use]
    pub fn powered_down(&self) -> bool {
        // SleepPd's pd bit
        self.register(SleepPd::ADDR) & 0x0200 != 0
    }

    fn receive(&mut self, addr: u8, value: u16) {
        self.writes.push((addr, value));
        if addr == Reset::ADDR && value & 1 == 1 {
            self.registers.clear();
        } else {
            self.registers.insert(addr, value);
        }
    }

    fn lane_clean(&self, lane: LaneChannel) -> bool {
        let i = lane.index();
        (self.eyes[i] >> self.taps[i]) & 1 == 1
    }

    /// Rotation of the sync pattern given the slips so far, `None` if it can never align
    fn frame_error(&self) -> Option<u32> {
        self.frame_slip
            .map(|slip| (u32::from(slip) % 8 + 8 - self.bitslips % 8) % 8)
    }

    /// The registers that shape the chip's output
    fn output(&self) -> Output {
        Output {
            powered_down: self.powered_down(),
            deskew_sync: self.register(DeskewSyncPattern::ADDR) & 0b11,
            generator: (self.register(PatternCtl::ADDR) >> 4) & 0b111,
            custom: [
                (self.register(CustomPattern1::ADDR) >> 8) as u8,
                (self.register(CustomPattern2::ADDR) >> 8) as u8,
            ],
        }
    }

    /// The byte `lane` puts on the wire as sample `index` of its channel
    fn sample(
        &self,
        out: &Output,
        lane: LaneChannel,
        index: usize,
        patterns: &Patterns,
    ) -> u8 {
        if out.powered_down {
            return 0;
        }
        match out.deskew_sync {
            1 if self.lane_clean(lane) => patterns.deskew,
            1 => !patterns.deskew,
            2 => match self.frame_error() {
                Some(rot) => patterns.sync.rotate_left(rot),
                None => !patterns.sync,
            },
            _ => match out.generator {
                0b100 => index as u8,
                0b001 => out.custom[0],
                0b010 => out.custom[index % 2],
                // No analog input
                _ => 0,
            },
        }
    }
}

/// Output-shaping register state of one chip, read once per snapshot
#[derive(Debug, Copy, Clone)]
struct Output {
    powered_down: bool,
    deskew_sync: u16,
    generator: u16,
    custom: [u8; 2],
}

/// The fixed bytes the chips' pattern generators emit
#[derive(Debug, Copy, Clone)]
struct Patterns {
    deskew: u8,
    sync: u8,
}

/// 3-wire receiver state shared by every chip on the bus
#[derive(Debug, Default)]
struct ThreeWire {
    shift: u32,
    bits: u8,
    sclk: bool,
}

/// An emulated board, usable anywhere a [`Transport`] is
#[derive(Debug)]
pub struct Adc16Emulator {
    layout: BoardLayout,
    registers: RegisterMap,
    memory: HashMap<KString, Vec<u8>>,
    chips: Vec<EmulatedChip>,
    patterns: Patterns,
    bus: ThreeWire,
    lock: LineLock,
    supported_chips: u8,
    revision: u8,
    demux: Option<u32>,
    log: Vec<(usize, u32)>,
    snapshots: usize,
    running: bool,
}

impl Adc16Emulator {
    /// A running board laid out as `layout` with `chips` chips (at most the layout's maximum),
    /// both line clocks locked, and every lane's eye over [`DEFAULT_EYE`]
    #[must_use]
    pub fn new(layout: BoardLayout, chips: u8) -> Self {
        let chips = chips.min(layout.max_chips);
        let mut registers = RegisterMap::new();
        registers.insert(
            KString::from_static(CONTROLLER),
            Register {
                addr: 0,
                length: 16,
            },
        );
        for chip in ChipId::all(chips) {
            registers.insert(
                KString::from_string(layout.snap_device(chip)),
                Register {
                    addr: 0x1_0000 * (chip.index() + 1),
                    length: 4 * SNAP_DEPTH,
                },
            );
        }
        let memory = registers
            .iter()
            .map(|(name, reg)| (name.clone(), vec![0u8; reg.length]))
            .collect();
        let mut emulator = Self {
            layout,
            registers,
            memory,
            chips: vec![EmulatedChip::default(); usize::from(chips)],
            patterns: Patterns {
                deskew: 0x2A,
                sync: 0x70,
            },
            bus: ThreeWire {
                sclk: true,
                ..Default::default()
            },
            lock: LineLock {
                primary: true,
                secondary: true,
            },
            supported_chips: chips,
            revision: 2,
            demux: None,
            log: vec![],
            snapshots: 0,
            running: true,
        };
        emulator.store_word(THREE_WIRE_WORD, layout.idle());
        emulator
    }

    #[must_use]
    pub fn layout(&self) -> &BoardLayout {
        &self.layout
    }

    pub fn set_line_lock(&mut self, lock: LineLock) {
        self.lock = lock;
        self.refresh_status();
    }

    /// Pretend the gateware was compiled for `chips` chips
    pub fn set_supported_chips(&mut self, chips: u8) {
        self.supported_chips = chips;
        self.refresh_status();
    }

    /// Change the bytes the deskew and sync patterns produce
    pub fn set_patterns(&mut self, deskew: u8, sync: u8) {
        self.patterns = Patterns { deskew, sync };
    }

    /// Sets the taps that sample `lane` of `chip` cleanly
    pub fn set_eye(
        &mut self,
        chip: ChipId,
        lane: LaneChannel,
        good: impl IntoIterator<Item = u8>,
    ) {
        if let Some(c) = self.chips.get_mut(chip.index()) {
            c.eyes[lane.index()] = eye_mask(good);
        }
    }

    /// Sets the same eye on every lane of `chip`
    pub fn set_chip_eye(&mut self, chip: ChipId, good: impl IntoIterator<Item = u8>) {
        let mask = eye_mask(good);
        if let Some(c) = self.chips.get_mut(chip.index()) {
            c.eyes = [mask; LANES];
        }
    }

    /// Sets how many bitslips (mod 8) `chip` needs before its frames align, `None` for never
    pub fn set_frame_slip(&mut self, chip: ChipId, slip: Option<u8>) {
        if let Some(c) = self.chips.get_mut(chip.index()) {
            c.frame_slip = slip;
        }
    }

    #[must_use]
    pub fn chip(&self, chip: ChipId) -> Option<&EmulatedChip> {
        self.chips.get(chip.index())
    }

    /// Every (word, value) written to the controller, in order
    #[must_use]
    pub fn controller_writes(&self) -> &[(usize, u32)] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Number of snapshots triggered
    #[must_use]
    pub fn snapshots(&self) -> usize {
        self.snapshots
    }

    /// The demux mode bits latched by the gateware, if any were
    #[must_use]
    pub fn demux_mode(&self) -> Option<u32> {
        self.demux
    }

    fn word(&self, word: usize) -> u32 {
        self.memory
            .get(CONTROLLER)
            .and_then(|m| m.get(4 * word..4 * word + 4))
            .map_or(0, |b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn store_word(&mut self, word: usize, value: u32) {
        let status = self.status();
        let value = if word == THREE_WIRE_WORD {
            (value & !self.status_mask()) | status
        } else {
            value
        };
        if let Some(bytes) = self
            .memory
            .get_mut(CONTROLLER)
            .and_then(|m| m.get_mut(4 * word..4 * word + 4))
        {
            bytes.copy_from_slice(&value.to_be_bytes());
        }
    }

    fn status(&self) -> u32 {
        self.layout
            .status_word(self.lock, self.supported_chips, self.revision)
    }

    fn status_mask(&self) -> u32 {
        let all = LineLock {
            primary: true,
            secondary: true,
        };
        self.layout.status_word(all, 0xF, 0x3)
    }

    fn refresh_status(&mut self) {
        let current = self.word(THREE_WIRE_WORD);
        self.store_word(THREE_WIRE_WORD, current);
    }

    fn on_word(&mut self, word: usize, old: u32, new: u32) {
        self.log.push((word, new));
        let rising = new & !old;
        if word == THREE_WIRE_WORD {
            self.on_three_wire(new);
            self.store_word(word, new);
        } else if word == CONTROL_WORD {
            self.on_control(rising, new);
        } else if self.layout.strobe_words().contains(&word) {
            let tap = self.layout.decode_tap(self.word(CONTROL_WORD));
            for (chip, lane) in self.layout.decode_strobes(word, rising) {
                if let Some(c) = self.chips.get_mut(chip.index()) {
                    c.taps[lane.index()] = tap;
                }
            }
        }
    }

    fn on_three_wire(&mut self, value: u32) {
        let (sclk, sdata, cs) = self.layout.decode_three_wire(value);
        if cs.is_empty() {
            self.bus.shift = 0;
            self.bus.bits = 0;
        } else if sclk && !self.bus.sclk {
            self.bus.shift = (self.bus.shift << 1) | u32::from(sdata);
            self.bus.bits += 1;
            if self.bus.bits == 24 {
                let addr = (self.bus.shift >> 16) as u8;
                let value = (self.bus.shift & 0xFFFF) as u16;
                self.commit(cs, addr, value);
                self.bus.shift = 0;
                self.bus.bits = 0;
            }
        }
        self.bus.sclk = sclk;
    }

    fn commit(&mut self, cs: ChipSelect, addr: u8, value: u16) {
        for chip in cs.chips() {
            if let Some(c) = self.chips.get_mut(chip.index()) {
                c.receive(addr, value);
            }
        }
    }

    fn on_control(&mut self, rising: u32, value: u32) {
        for chip in self.layout.decode_bitslips(rising).chips() {
            if let Some(c) = self.chips.get_mut(chip.index()) {
                c.bitslips += 1;
            }
        }
        if rising & self.layout.snap_request() != 0 {
            self.capture();
        }
        let stored = match self.layout.demux {
            Some(demux) => {
                let we = 1 << demux.write_enable_bit;
                let mode_mask = 0b11 << demux.mode_shift;
                if value & we != 0 {
                    self.demux = Some((value & mode_mask) >> demux.mode_shift);
                }
                // The write enable clears itself and the mode reads back as latched
                (value & !(we | mode_mask)) | (self.demux.unwrap_or(0) << demux.mode_shift)
            }
            None => value,
        };
        self.store_word(CONTROL_WORD, stored);
    }

    fn capture(&mut self) {
        self.snapshots += 1;
        let patterns = self.patterns;
        for (i, chip) in self.chips.iter().enumerate() {
            // Never more than MAX_CHIPS chips
            let id = ChipId::from_index(i as u8);
            let Some(bram) = self.memory.get_mut(self.layout.snap_device(id).as_str()) else {
                continue;
            };
            let out = chip.output();
            for (index, word) in bram.chunks_exact_mut(4).enumerate() {
                let lane = if index % 2 == 0 { Lane::A } else { Lane::B };
                for (channel, byte) in word.iter_mut().enumerate().take(CHANNELS) {
                    let lane = LaneChannel {
                        // Bounded by CHANNELS
                        channel: channel as u8,
                        lane,
                    };
                    *byte = chip.sample(&out, lane, index, &patterns);
                }
            }
        }
    }

    fn device(&self, device: &str) -> Result<&Vec<u8>, Error> {
        if !self.running {
            return Err(Error::NotProgrammed);
        }
        self.memory
            .get(device)
            .ok_or_else(|| Error::MissingDevice(device.to_string()))
    }
}

impl Transport for Adc16Emulator {
    fn is_running(&mut self) -> TransportResult<bool> {
        Ok(self.running)
    }

    fn read_n_bytes(&mut self, device: &str, offset: usize, n: usize) -> TransportResult<Vec<u8>> {
        let mem = self.device(device)?;
        let bytes = mem.get(offset..offset + n).ok_or_else(|| Error::OutOfBounds {
            device: device.to_string(),
            offset,
        })?;
        Ok(bytes.to_vec())
    }

    fn write_bytes(&mut self, device: &str, offset: usize, data: &[u8]) -> TransportResult<()> {
        let mem = self.device(device)?;
        if offset + data.len() > mem.len() {
            return Err(Error::OutOfBounds {
                device: device.to_string(),
                offset,
            }
            .into());
        }
        if data.is_empty() {
            return Ok(());
        }
        if device != CONTROLLER {
            if let Some(mem) = self.memory.get_mut(device) {
                mem[offset..offset + data.len()].copy_from_slice(data);
            }
            return Ok(());
        }
        // Controller writes are handled a word at a time so partial writes still take effect
        let first = offset / 4;
        let last = (offset + data.len() - 1) / 4;
        for word in first..=last {
            let old = self.word(word);
            let mut bytes = old.to_be_bytes();
            for (i, b) in bytes.iter_mut().enumerate() {
                let addr = 4 * word + i;
                if (offset..offset + data.len()).contains(&addr) {
                    *b = data[addr - offset];
                }
            }
            let new = u32::from_be_bytes(bytes);
            self.store_word(word, new);
            self.on_word(word, old, new);
        }
        Ok(())
    }

    fn listdev(&mut self) -> TransportResult<RegisterMap> {
        Ok(self.registers.clone())
    }

    fn program(&mut self, _bitstream: &Path) -> TransportResult<()> {
        self.running = true;
        Ok(())
    }

    fn deprogram(&mut self) -> TransportResult<()> {
        self.running = false;
        Ok(())
    }
}
