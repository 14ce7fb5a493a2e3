//! Register map for the HMCAD1511 ADC from Analog Devices
//! Only the registers the ADC16 bring-up and calibration touch are modeled here, anything else can
//! still be written raw with [`super::controller::Adc16Controller::write_register`].

use adc16_derive::address;
use packed_struct::prelude::*;

/// Highest documented register address
pub const MAX_ADDRESS: u8 = 0x56;

/// A register with a fixed location in the chip's 8-bit address space
pub trait Address {
    const ADDR: u8;
}

/// Checks `addr` against the documented register space
#[must_use]
pub fn valid_address(addr: u8) -> bool {
    addr <= MAX_ADDRESS
}

#[address(0x00)]
#[derive(Debug, PackedStruct, Default, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
pub struct Reset {
    #[packed_field(bits = "0")]
    /// Self-clearing software reset
    pub(crate) reset: bool,
}

#[address(0x0F)]
#[derive(Debug, PackedStruct, Default, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
pub struct SleepPd {
    #[packed_field(bits = "0..=3")]
    pub(crate) sleep4: [bool; 4],
    #[packed_field(bits = "4..=5")]
    pub(crate) sleep2: [bool; 2],
    #[packed_field(bits = "6")]
    pub(crate) sleep1: bool,
    #[packed_field(bits = "8")]
    /// Go to sleep mode
    pub(crate) sleep: bool,
    #[packed_field(bits = "9")]
    /// Go to power down
    pub(crate) pd: bool,
    #[packed_field(bits = "10..=11", ty = "enum")]
    /// Configures the PD pin function
    pub(crate) pd_pin_cfg: PdPinCfg,
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone)]
pub enum PdPinCfg {
    SleepChannel = 1,
    DeepSleep = 2,
    #[default]
    PowerDown = 0,
}

#[address(0x25)]
#[derive(Debug, PackedStruct, Default, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
/// Selects the ramp and custom pattern generators
pub struct PatternCtl {
    #[packed_field(bits = "4..=6", ty = "enum")]
    pub(crate) pattern: Pattern,
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone, PartialEq, Eq)]
/// Output pattern type
pub enum Pattern {
    #[default]
    Disabled = 0,
    Ramp = 0b100,
    DualCustom = 0b010,
    SingleCustom = 0b001,
}

#[address(0x26)]
#[derive(Debug, PackedStruct, Default, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
/// Bits for custom pattern 1
pub struct CustomPattern1 {
    #[packed_field(bits = "8..=15")]
    pub(crate) bits_custom1: u8,
}

#[address(0x27)]
#[derive(Debug, PackedStruct, Default, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
/// Bits for custom pattern 2
pub struct CustomPattern2 {
    #[packed_field(bits = "8..=15")]
    pub(crate) bits_custom2: u8,
}

#[address(0x31)]
#[derive(Debug, PackedStruct, Default, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
/// Control for the number of channels and clock division factor
pub struct ChanNumClkDiv {
    #[packed_field(bits = "0..=2", ty = "enum")]
    pub(crate) channel_num: ChannelNum,
    #[packed_field(bits = "8..=9", ty = "enum")]
    pub(crate) clk_divide: ClockDivide,
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone)]
/// Number of channels
pub enum ChannelNum {
    /// Single channel by interleaving ADC1 to ADC4
    Single = 0b001,
    /// Dual channel where channel 1 is made by interleaving ADC1 and ADC2, channel 2 by
    /// interleaving ADC3 and ADC4
    Dual = 0b010,
    #[default]
    /// Quad channel where channel 1 corresponds to ADC1, channel2 to ADC2, channel3 to ADC3 and
    /// channel 4 to ADC4
    Quad = 0b100,
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone)]
/// Clock division factor
pub enum ClockDivide {
    #[default]
    /// Input clock / 1
    _1 = 0,
    /// Input clock / 2
    _2 = 1,
    /// Input clock / 4
    _4 = 2,
    /// Input clock / 8
    _8 = 3,
}

#[address(0x45)]
#[derive(Debug, PackedStruct, Copy, Clone, Default)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
pub struct DeskewSyncPattern {
    #[packed_field(bits = "0..=1", ty = "enum")]
    pub(crate) pat_deskew_sync: DeskewSyncMode,
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone, PartialEq, Eq)]
pub enum DeskewSyncMode {
    #[default]
    Disabled = 0,
    Deskew = 1,
    Sync = 2,
}

#[address(0x46)]
#[derive(Debug, PackedStruct, Copy, Clone, Default)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
pub struct OutputMode {
    #[packed_field(bits = "2")]
    /// Two's complement output
    pub(crate) btc_mode: bool,
    #[packed_field(bits = "3")]
    pub(crate) msb_first: bool,
}

/// The test patterns the calibration uses as ground truth
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TestPattern {
    /// Real ADC samples, no pattern
    Data,
    /// Incrementing ramp
    Ramp,
    /// Alternating bits, for measuring the data eye
    Deskew,
    /// Frame pattern, for checking word alignment
    Sync,
    /// The byte in custom pattern slot 1
    Custom1,
    /// Alternating between the two custom pattern slots
    DualCustom,
}

impl TestPattern {
    /// The register pair that enables this pattern. Both are always written so enabling one
    /// generator disables the other.
    #[must_use]
    pub(crate) fn registers(self) -> (PatternCtl, DeskewSyncPattern) {
        let (pattern, pat_deskew_sync) = match self {
            TestPattern::Data => (Pattern::Disabled, DeskewSyncMode::Disabled),
            TestPattern::Ramp => (Pattern::Ramp, DeskewSyncMode::Disabled),
            TestPattern::Deskew => (Pattern::Disabled, DeskewSyncMode::Deskew),
            TestPattern::Sync => (Pattern::Disabled, DeskewSyncMode::Sync),
            TestPattern::Custom1 => (Pattern::SingleCustom, DeskewSyncMode::Disabled),
            TestPattern::DualCustom => (Pattern::DualCustom, DeskewSyncMode::Disabled),
        };
        (PatternCtl { pattern }, DeskewSyncPattern { pat_deskew_sync })
    }
}

/// One of the two custom pattern registers
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CustomSlot {
    One,
    Two,
}

/// Sample encoding coming out of the chip
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub twos_complement: bool,
    pub msb_first: bool,
}

impl Default for OutputFormat {
    /// Signed samples, which is what the calibration compares against
    fn default() -> Self {
        Self {
            twos_complement: true,
            msb_first: false,
        }
    }
}

/// Packs a register into the 16-bit value sent over the 3-wire bus
/// # Errors
/// Returns an error if the register can't be packed
pub fn register_value<R>(reg: &R) -> Result<u16, PackingError>
where
    R: PackedStruct<ByteArray = [u8; 2]>,
{
    Ok(u16::from_be_bytes(reg.pack()?))
}
