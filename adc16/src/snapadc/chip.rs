//! Addressing for the ADC chips behind an ADC16 controller and the lanes inside them

use std::{fmt, str::FromStr};
use thiserror::Error;

/// The most chips any ADC16 controller drives
pub const MAX_CHIPS: u8 = 8;

/// Channels per HMCAD1511 chip
pub const CHANNELS: usize = 4;

/// Delayable lanes per chip (two per channel)
pub const LANES: usize = 2 * CHANNELS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid chip specifier `{spec}` - expected an index or letter for one of {chips} chips")]
    InvalidChipSpecifier { spec: String, chips: u8 },
}

/// A zero-based index of one ADC chip
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChipId(u8);

impl ChipId {
    /// Builds a chip id, checking it against the number of chips on the board
    /// # Errors
    /// Returns an error if `index` is not less than `chips`
    pub fn new(index: usize, chips: u8) -> Result<Self, Error> {
        match u8::try_from(index) {
            Ok(i) if i < chips.min(MAX_CHIPS) => Ok(Self(i)),
            _ => Err(Error::InvalidChipSpecifier {
                spec: index.to_string(),
                chips,
            }),
        }
    }

    /// Callers guarantee `index < MAX_CHIPS`
    pub(crate) const fn from_index(index: u8) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The single-letter label silkscreened on the board (`a` is chip 0)
    #[must_use]
    pub const fn letter(self) -> char {
        (b'a' + self.0) as char
    }

    /// Every chip id on a board with `chips` chips
    pub fn all(chips: u8) -> impl Iterator<Item = ChipId> {
        (0..chips.min(MAX_CHIPS)).map(ChipId)
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// The ways a user can name a chip
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChipSpecifier<'a> {
    /// Zero-based numeric index
    Index(usize),
    /// Single letter label, case insensitive
    Letter(char),
    /// Either of the above written out as text, e.g. `"3"`, `"d"`, or `"D"`
    Name(&'a str),
}

impl From<usize> for ChipSpecifier<'_> {
    fn from(v: usize) -> Self {
        Self::Index(v)
    }
}

impl From<char> for ChipSpecifier<'_> {
    fn from(v: char) -> Self {
        Self::Letter(v)
    }
}

impl<'a> From<&'a str> for ChipSpecifier<'a> {
    fn from(v: &'a str) -> Self {
        Self::Name(v)
    }
}

impl fmt::Display for ChipSpecifier<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipSpecifier::Index(i) => write!(f, "{i}"),
            ChipSpecifier::Letter(c) => write!(f, "{c}"),
            ChipSpecifier::Name(s) => write!(f, "{s}"),
        }
    }
}

/// Turn any chip specifier into the zero-based [`ChipId`] for a board with `chips` chips
/// # Errors
/// Returns [`Error::InvalidChipSpecifier`] for anything that doesn't name a chip on this board
pub fn canonicalize<'a>(spec: impl Into<ChipSpecifier<'a>>, chips: u8) -> Result<ChipId, Error> {
    let spec = spec.into();
    let invalid = || Error::InvalidChipSpecifier {
        spec: spec.to_string(),
        chips,
    };
    let index = match spec {
        ChipSpecifier::Index(i) => i,
        ChipSpecifier::Letter(c) => letter_index(c).ok_or_else(invalid)?,
        ChipSpecifier::Name(s) => {
            let s = s.trim();
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => letter_index(c).ok_or_else(invalid)?,
                _ => s.parse::<usize>().map_err(|_| invalid())?,
            }
        }
    };
    ChipId::new(index, chips).map_err(|_| invalid())
}

fn letter_index(c: char) -> Option<usize> {
    let c = c.to_ascii_lowercase();
    c.is_ascii_lowercase().then(|| (c as u8 - b'a') as usize)
}

impl FromStr for ChipId {
    type Err = Error;

    /// Parses against the largest (8 chip) board
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        canonicalize(s, MAX_CHIPS)
    }
}

/// Bitmask selecting which chips receive the next 3-wire transaction, one bit per [`ChipId`]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ChipSelect(u8);

impl ChipSelect {
    pub const NONE: Self = Self(0);

    /// Selects every chip on a board with `chips` chips
    #[must_use]
    pub fn all(chips: u8) -> Self {
        Self(((1u16 << chips.min(MAX_CHIPS)) - 1) as u8)
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Selects only `chip`
    #[must_use]
    pub const fn single(chip: ChipId) -> Self {
        Self(1 << chip.0)
    }

    #[must_use]
    pub const fn contains(self, chip: ChipId) -> bool {
        self.0 & (1 << chip.0) != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The selected chips, lowest first
    pub fn chips(self) -> impl Iterator<Item = ChipId> {
        (0..MAX_CHIPS)
            .filter(move |i| self.0 & (1 << *i) != 0)
            .map(ChipId)
    }
}

impl FromIterator<ChipId> for ChipSelect {
    fn from_iter<I: IntoIterator<Item = ChipId>>(iter: I) -> Self {
        Self(iter.into_iter().fold(0, |acc, c| acc | (1 << c.0)))
    }
}

/// The two deserializer lanes that make up one channel
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lane {
    /// Carries the even samples of a channel
    A,
    /// Carries the odd samples of a channel
    B,
}

/// One independently delayable lane: a channel (0-3) and which of its two lanes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneChannel {
    pub channel: u8,
    pub lane: Lane,
}

impl LaneChannel {
    /// # Panics
    /// Panics if `channel` isn't a valid channel index
    #[must_use]
    pub fn new(channel: u8, lane: Lane) -> Self {
        assert!((channel as usize) < CHANNELS, "channel out of range");
        Self { channel, lane }
    }

    /// All eight lanes, in [`LaneMask`] bit order
    pub fn all() -> impl Iterator<Item = LaneChannel> {
        [Lane::A, Lane::B].into_iter().flat_map(|lane| {
            (0..CHANNELS as u8).map(move |channel| LaneChannel { channel, lane })
        })
    }

    /// The position of this lane in a [`LaneMask`] and in per-lane arrays
    #[must_use]
    pub const fn index(self) -> usize {
        match self.lane {
            Lane::A => self.channel as usize,
            Lane::B => CHANNELS + self.channel as usize,
        }
    }

    /// Inverse of [`LaneChannel::index`]
    pub(crate) const fn from_index(index: usize) -> Self {
        let lane = if index < CHANNELS { Lane::A } else { Lane::B };
        Self {
            channel: (index % CHANNELS) as u8,
            lane,
        }
    }

    #[must_use]
    pub const fn mask(self) -> LaneMask {
        LaneMask(1 << self.index())
    }
}

impl fmt::Display for LaneChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.channel + 1, self.lane)
    }
}

/// Selects lanes inside one chip. Bit `c` is channel `c`'s A lane, bit `4 + c` its B lane
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LaneMask(u8);

impl LaneMask {
    pub const ALL: Self = Self(0xFF);
    pub const NONE: Self = Self(0);

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// The A lane strobes, one bit per channel
    #[must_use]
    pub const fn a(self) -> u8 {
        self.0 & 0xF
    }

    /// The B lane strobes, one bit per channel
    #[must_use]
    pub const fn b(self) -> u8 {
        self.0 >> 4
    }

    #[must_use]
    pub const fn contains(self, lane: LaneChannel) -> bool {
        self.0 & (1 << lane.index()) != 0
    }
}

impl Default for LaneMask {
    fn default() -> Self {
        Self::ALL
    }
}
