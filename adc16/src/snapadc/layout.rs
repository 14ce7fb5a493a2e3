//! Board-variant bit layouts of the `adc16_controller` register words
//!
//! Both variants run the same 3-wire protocol, tap sweep, and bitslip logic. What differs is where
//! each control and status bit lives, how many chips there are, which polarity the chip selects
//! use, and how the delay strobes are packed. These are fixed gateware contracts.
//!
//! The words are assembled with shifts from a runtime [`BoardLayout`] rather than `packed_struct`
//! types, since the bit positions change with the board variant.

use super::chip::{ChipId, ChipSelect, LaneChannel, LaneMask, CHANNELS, LANES};

/// Mask of the 5-bit delay tap value
pub const TAP_MASK: u8 = 0x1F;

/// Largest delay tap
pub const MAX_TAP: u8 = TAP_MASK;

/// The word carrying the 3-wire bus and the status fields
pub const THREE_WIRE_WORD: usize = 0;

/// The word carrying delay taps, bitslips, snap requests, and demux control
pub const CONTROL_WORD: usize = 1;

/// Active level of the chip select lines
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

/// How the per-lane delay strobes are packed into words
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StrobeLayout {
    /// A lane strobes in the first word, B lane strobes in the second, four bits per chip
    Split([usize; 2]),
    /// A single word with eight bits per chip, A lanes in the low nibble
    Wide(usize),
}

/// Location of the demux control bits, for gateware that has them
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DemuxBits {
    /// Shift of the two demux mode bits
    pub mode_shift: u32,
    /// The (self clearing) write enable for the demux mode
    pub write_enable_bit: u32,
}

/// State of the two line-lock status bits
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct LineLock {
    /// Lock of the primary reference clock, required for any calibration
    pub primary: bool,
    /// Lock of the clock only used by the upper four chips
    pub secondary: bool,
}

/// Descriptor of one board variant's register layout
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BoardLayout {
    pub name: &'static str,
    /// Chips the board can carry (the gateware may compile in fewer)
    pub max_chips: u8,
    pub chip_select: Polarity,
    // Word 0
    pub cs_shift: u32,
    pub sdata_bit: u32,
    pub sclk_bit: u32,
    pub revision_shift: u32,
    pub supported_chips_shift: u32,
    pub line_lock_shift: u32,
    // Word 1
    pub tap_shift: u32,
    pub bitslip_shift: u32,
    pub snap_request_bit: u32,
    pub demux: Option<DemuxBits>,
    // Strobes
    pub strobes: StrobeLayout,
}

impl BoardLayout {
    /// The eight chip SNAP/ADC16 board
    pub const ADC16: Self = Self {
        name: "adc16",
        max_chips: 8,
        chip_select: Polarity::ActiveHigh,
        cs_shift: 0,
        sdata_bit: 8,
        sclk_bit: 9,
        revision_shift: 16,
        supported_chips_shift: 20,
        line_lock_shift: 24,
        tap_shift: 0,
        bitslip_shift: 8,
        snap_request_bit: 16,
        demux: Some(DemuxBits {
            mode_shift: 24,
            write_enable_bit: 26,
        }),
        strobes: StrobeLayout::Split([2, 3]),
    };

    /// The four chip test board
    pub const ADC16_TEST: Self = Self {
        name: "adc16_test",
        max_chips: 4,
        chip_select: Polarity::ActiveLow,
        cs_shift: 0,
        sdata_bit: 8,
        sclk_bit: 9,
        revision_shift: 16,
        supported_chips_shift: 20,
        line_lock_shift: 24,
        tap_shift: 8,
        bitslip_shift: 0,
        snap_request_bit: 16,
        demux: None,
        strobes: StrobeLayout::Wide(2),
    };

    fn cs_field(&self) -> u32 {
        (1u32 << self.max_chips) - 1
    }

    /// The 3-wire word for one clock phase. Chip selects are driven at this board's polarity.
    #[must_use]
    pub fn three_wire(&self, sclk: bool, sdata: bool, cs: ChipSelect) -> u32 {
        let selected = u32::from(cs.bits()) & self.cs_field();
        let lines = match self.chip_select {
            Polarity::ActiveHigh => selected,
            Polarity::ActiveLow => !selected & self.cs_field(),
        };
        (lines << self.cs_shift)
            | (u32::from(sdata) << self.sdata_bit)
            | (u32::from(sclk) << self.sclk_bit)
    }

    /// Clock high, nothing selected
    #[must_use]
    pub fn idle(&self) -> u32 {
        self.three_wire(true, false, ChipSelect::NONE)
    }

    /// Decodes (sclk, sdata, selected chips) from a 3-wire word
    #[must_use]
    pub fn decode_three_wire(&self, word: u32) -> (bool, bool, ChipSelect) {
        let lines = (word >> self.cs_shift) & self.cs_field();
        let selected = match self.chip_select {
            Polarity::ActiveHigh => lines,
            Polarity::ActiveLow => !lines & self.cs_field(),
        };
        (
            (word >> self.sclk_bit) & 1 == 1,
            (word >> self.sdata_bit) & 1 == 1,
            // Masked to at most 8 bits above
            ChipSelect::from_bits(selected as u8),
        )
    }

    /// The tap field holding `tap`, masked to 5 bits
    #[must_use]
    pub fn tap_bits(&self, tap: u8) -> u32 {
        u32::from(tap & TAP_MASK) << self.tap_shift
    }

    #[must_use]
    pub fn decode_tap(&self, word: u32) -> u8 {
        ((word >> self.tap_shift) as u8) & TAP_MASK
    }

    #[must_use]
    pub fn bitslip_bit(&self, chip: ChipId) -> u32 {
        1 << (self.bitslip_shift + chip.index() as u32)
    }

    /// The chips whose bitslip bits are set in `word`
    #[must_use]
    pub fn decode_bitslips(&self, word: u32) -> ChipSelect {
        ChipSelect::from_bits(((word >> self.bitslip_shift) & self.cs_field()) as u8)
    }

    #[must_use]
    pub fn snap_request(&self) -> u32 {
        1 << self.snap_request_bit
    }

    /// Indices of the words carrying delay strobes
    #[must_use]
    pub fn strobe_words(&self) -> &[usize] {
        match &self.strobes {
            StrobeLayout::Split(words) => words,
            StrobeLayout::Wide(word) => std::slice::from_ref(word),
        }
    }

    /// The (word, bits) pairs that strobe the lanes in `lanes` of `chip`. A chip this board
    /// doesn't have gets no strobe bits.
    #[must_use]
    pub fn strobe_bits(&self, chip: ChipId, lanes: LaneMask) -> Vec<(usize, u32)> {
        let shifted = |bits: u8, width: usize| {
            if chip.index() < usize::from(self.max_chips) {
                u32::from(bits)
                    .checked_shl((width * chip.index()) as u32)
                    .unwrap_or(0)
            } else {
                0
            }
        };
        match self.strobes {
            StrobeLayout::Split([a, b]) => {
                vec![(a, shifted(lanes.a(), 4)), (b, shifted(lanes.b(), 4))]
            }
            StrobeLayout::Wide(word) => vec![(word, shifted(lanes.bits(), 8))],
        }
    }

    /// Every (chip, lane) whose strobe bit is set in `value` written to word `word`
    #[must_use]
    pub fn decode_strobes(&self, word: usize, value: u32) -> Vec<(ChipId, LaneChannel)> {
        let mut hits = vec![];
        for bit in 0..32u32 {
            if (value >> bit) & 1 == 0 {
                continue;
            }
            let (chip, lane) = match self.strobes {
                StrobeLayout::Split([a, b]) if word == a || word == b => {
                    let offset = if word == a { 0 } else { CHANNELS };
                    (bit / 4, offset + (bit % 4) as usize)
                }
                StrobeLayout::Wide(w) if word == w => (bit / 8, (bit % 8) as usize),
                _ => continue,
            };
            if chip < u32::from(self.max_chips) && lane < LANES {
                hits.push((
                    ChipId::from_index(chip as u8),
                    LaneChannel::from_index(lane),
                ));
            }
        }
        hits
    }

    #[must_use]
    pub fn line_lock(&self, status: u32) -> LineLock {
        let bits = status >> self.line_lock_shift;
        LineLock {
            primary: bits & 1 == 1,
            secondary: bits & 2 == 2,
        }
    }

    /// Number of chips the gateware was compiled for
    #[must_use]
    pub fn supported_chips(&self, status: u32) -> u8 {
        ((status >> self.supported_chips_shift) & 0xF) as u8
    }

    #[must_use]
    pub fn revision(&self, status: u32) -> u8 {
        ((status >> self.revision_shift) & 0x3) as u8
    }

    /// The status word a controller with these properties would report
    #[must_use]
    pub fn status_word(&self, lock: LineLock, supported_chips: u8, revision: u8) -> u32 {
        (u32::from(lock.primary) << self.line_lock_shift)
            | (u32::from(lock.secondary) << (self.line_lock_shift + 1))
            | (u32::from(supported_chips & 0xF) << self.supported_chips_shift)
            | (u32::from(revision & 0x3) << self.revision_shift)
    }

    /// Name of the snapshot BRAM holding `chip`'s samples
    #[must_use]
    pub fn snap_device(&self, chip: ChipId) -> String {
        format!("adc16_wb_ram{}", chip.index())
    }
}

impl Default for BoardLayout {
    fn default() -> Self {
        Self::ADC16
    }
}
