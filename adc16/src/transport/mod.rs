//! Defines the transport mechanism every ADC16 device talks through
//!
//! The ADC16 controller is exposed as an array of 32-bit words, so on top of the byte-level
//! primitives every transport gets the word-level reads and writes for free.

pub mod emulator;
pub mod mock;

use crate::core::RegisterMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Mock(#[from] mock::Error),
    #[error(transparent)]
    Emulator(#[from] emulator::Error),
    #[error("Expected {expected} bytes from the device, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("Failed to interpret the bytes read from the device")]
    Deserialize(#[source] anyhow::Error),
}

pub type TransportResult<T> = Result<T, Error>;

/// Types that implement this trait can be serialized such that they can be written to FPGA software
/// registers
pub trait Serialize {
    type Chunk;
    fn serialize(&self) -> Self::Chunk;
}

/// Types that implement this trait can be deserialized such that they can be read from FPGA
/// software registers
pub trait Deserialize: Sized {
    type Chunk;
    fn deserialize(chunk: Self::Chunk) -> anyhow::Result<Self>;
}

macro_rules! serde_num {
    ($($num:ty),+) => {
        $(
            impl Serialize for $num {
                type Chunk = [u8; std::mem::size_of::<$num>()];
                fn serialize(&self) -> Self::Chunk {
                    self.to_be_bytes()
                }
            }

            impl Deserialize for $num {
                type Chunk = [u8; std::mem::size_of::<$num>()];
                fn deserialize(chunk: Self::Chunk) -> anyhow::Result<Self> {
                    Ok(<$num>::from_be_bytes(chunk))
                }
            }
        )+
    };
}

// Everything on the wire is big endian
serde_num!(u8, u16, u32, u64, i8, i16, i32, i64);

/// The trait that is implemented for CASPER FPGA transport mechanisms.
/// The methods of this trait *assume* that the device is already connected.
///
/// Writes must reach the hardware in the order they are issued. The strobe and bit-banging
/// sequences in [`crate::snapadc`] are meaningless if a transport reorders or coalesces them.
pub trait Transport {
    /// Tests to see if the connected FPGA is programmed and running
    fn is_running(&mut self) -> TransportResult<bool>;

    /// Read `n` bytes from `device` starting at byte offset `offset`
    fn read_n_bytes(&mut self, device: &str, offset: usize, n: usize) -> TransportResult<Vec<u8>>;

    /// Read `N` bytes from `device` from byte offset `offset` into a const-sized array
    fn read_bytes<const N: usize>(
        &mut self,
        device: &str,
        offset: usize,
    ) -> TransportResult<[u8; N]> {
        let bytes = self.read_n_bytes(device, offset, N)?;
        <[u8; N]>::try_from(bytes).map_err(|v| Error::ShortRead {
            expected: N,
            got: v.len(),
        })
    }

    /// Generically read a `Deserializable` type `T` from the connected platform at `device` and
    /// offset `offset`. # Example
    /// ```
    /// # use adc16::core::Register;
    /// # use std::collections::HashMap;
    /// # use adc16::transport::mock::Mock;
    /// # let mut transport = Mock::new(HashMap::from([("sys_scratchpad".into(),Register { addr: 0, length: 4 },)]));
    /// # use adc16::transport::Transport;
    /// let my_num: u32 = transport.read::<u32, 4>("sys_scratchpad", 0).unwrap();
    /// ```
    fn read<T, const N: usize>(&mut self, device: &str, offset: usize) -> TransportResult<T>
    where
        T: Deserialize<Chunk = [u8; N]>,
    {
        let bytes: [u8; N] = self.read_bytes(device, offset)?;
        T::deserialize(bytes).map_err(Error::Deserialize)
    }

    /// Write `data` to `device` from byte offset `offset`
    fn write_bytes(&mut self, device: &str, offset: usize, data: &[u8]) -> TransportResult<()>;

    /// Generically write a `Serializable` type `T` to the connected platform at `device` and offset
    /// `offset`. # Example
    /// ```
    /// # use adc16::core::Register;
    /// # use std::collections::HashMap;
    /// # use adc16::transport::mock::Mock;
    /// # let mut transport = Mock::new(HashMap::from([("sys_scratchpad".into(),Register { addr: 0, length: 4 },)]));
    /// # use adc16::transport::Transport;
    /// transport.write("sys_scratchpad", 0, &0xDEAD_BEEFu32).unwrap();
    /// ```
    fn write<T, const N: usize>(
        &mut self,
        device: &str,
        offset: usize,
        data: &T,
    ) -> TransportResult<()>
    where
        T: Serialize<Chunk = [u8; N]>,
    {
        self.write_bytes(device, offset, &data.serialize())
    }

    /// Read the 32-bit word at word index `word` of `device`
    fn read_word(&mut self, device: &str, word: usize) -> TransportResult<u32> {
        self.read::<u32, 4>(device, 4 * word)
    }

    /// Write `value` to the 32-bit word at word index `word` of `device`
    fn write_word(&mut self, device: &str, word: usize, value: u32) -> TransportResult<()> {
        self.write::<u32, 4>(device, 4 * word, &value)
    }

    /// Read `count` consecutive 32-bit words from `device` starting at word index `word`
    fn read_words(&mut self, device: &str, word: usize, count: usize) -> TransportResult<Vec<u32>> {
        let bytes = self.read_n_bytes(device, 4 * word, 4 * count)?;
        if bytes.len() != 4 * count {
            return Err(Error::ShortRead {
                expected: 4 * count,
                got: bytes.len(),
            });
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Retrieve a list of available devices on the (potentially programmed) connected platform
    fn listdev(&mut self) -> TransportResult<RegisterMap>;

    /// Program a bitstream file from `bitstream` to the connected platform
    fn program(&mut self, bitstream: &Path) -> TransportResult<()>;

    /// Deprograms the connected platform
    fn deprogram(&mut self) -> TransportResult<()>;
}
