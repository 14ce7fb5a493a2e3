//! Mock transport implementations used in testing the interface

use super::{Transport, TransportResult};
use crate::core::{Register, RegisterMap};
use std::{collections::HashMap, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Device `{0}` not found")]
    MissingDevice(String),
    #[error("Out of bounds access on `{device}` at byte {offset}")]
    OutOfBounds { device: String, offset: usize },
}

/// One write as it reached the mock, in issue order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub device: String,
    pub offset: usize,
    pub data: Vec<u8>,
}

/// A platform that mocks reads and writes, useful for testing
#[derive(Debug)]
pub struct Mock {
    memory: HashMap<usize, u8>,
    registers: RegisterMap,
    history: Vec<WriteRecord>,
    running: bool,
}

impl Mock {
    /// Construct a new mock platform by providing a device map `devices`
    #[must_use]
    pub fn new(registers: RegisterMap) -> Self {
        // We'll represent each address lazily instead of havig a dense array
        // but it really shouldn't matter
        let mut memory: HashMap<usize, u8> = HashMap::default();

        for Register { addr, length } in registers.values() {
            for i in 0..*length {
                memory.insert(addr + i, 0u8);
            }
        }
        Self {
            memory,
            registers,
            history: vec![],
            running: true,
        }
    }

    /// Pretend the FPGA is (or isn't) running a design
    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Every write that has been made, in order
    #[must_use]
    pub fn history(&self) -> &[WriteRecord] {
        &self.history
    }

    /// Forget the write history
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// The values of every whole-word write made to word `word` of `device`, in order
    #[must_use]
    pub fn word_writes(&self, device: &str, word: usize) -> Vec<u32> {
        self.history
            .iter()
            .filter(|w| w.device == device && w.offset == 4 * word && w.data.len() == 4)
            .map(|w| u32::from_be_bytes([w.data[0], w.data[1], w.data[2], w.data[3]]))
            .collect()
    }

    fn device(&self, device: &str) -> Result<Register, Error> {
        self.registers
            .get(device)
            .copied()
            .ok_or_else(|| Error::MissingDevice(device.to_string()))
    }
}

impl Transport for Mock {
    fn is_running(&mut self) -> TransportResult<bool> {
        Ok(self.running)
    }

    fn read_n_bytes(&mut self, device: &str, offset: usize, n: usize) -> TransportResult<Vec<u8>> {
        let dev = self.device(device)?;
        if offset + n > dev.length {
            return Err(Error::OutOfBounds {
                device: device.to_string(),
                offset,
            }
            .into());
        }
        // Construct the array
        let mut bytes = vec![0u8; n];
        for i in offset..(offset + n) {
            // Pull bytes from memory into bytes vector
            let byte = self.memory.get(&(dev.addr + i)).ok_or(Error::OutOfBounds {
                device: device.to_string(),
                offset: i,
            })?;
            bytes[i - offset] = *byte;
        }
        Ok(bytes)
    }

    fn write_bytes(&mut self, device: &str, offset: usize, data: &[u8]) -> TransportResult<()> {
        let dev = self.device(device)?;
        if offset + data.len() > dev.length {
            return Err(Error::OutOfBounds {
                device: device.to_string(),
                offset,
            }
            .into());
        }
        for (i, byte) in data.iter().enumerate() {
            self.memory.insert(dev.addr + i + offset, *byte);
        }
        self.history.push(WriteRecord {
            device: device.to_string(),
            offset,
            data: data.to_vec(),
        });
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

#[cfg(test)]
mod tests {
    use super::*;
    use paste::paste;

    fn scratchpad() -> Mock {
        Mock::new(HashMap::from([(
            "sys_scratchpad".into(),
            Register { addr: 0, length: 8 },
        )]))
    }

    macro_rules! test_rw_num {
        ($num:ty, $v:literal) => {
            paste! {
                #[test]
                fn [<test_rw_$num>]() {
                    let mut transport = scratchpad();
                    let num: $num = $v;
                    transport.write("sys_scratchpad", 0, &num).unwrap();
                    let read_num: $num = transport.read("sys_scratchpad", 0).unwrap();
                    assert_eq!(read_num, num);
                }
            }
        };
    }

    #[test]
    fn test_read() {
        let mut transport = scratchpad();
        let bytes: [u8; 4] = transport.read_bytes("sys_scratchpad", 0).unwrap();
        assert_eq!(bytes, [0, 0, 0, 0]);
    }

    #[test]
    fn test_write_read_offset() {
        let mut transport = scratchpad();
        transport.write_bytes("sys_scratchpad", 2, &[7, 8]).unwrap();
        let read_bytes: [u8; 4] = transport.read_bytes("sys_scratchpad", 0).unwrap();
        assert_eq!(read_bytes, [0, 0, 7, 8]);
        let read_bytes: [u8; 2] = transport.read_bytes("sys_scratchpad", 2).unwrap();
        assert_eq!(read_bytes, [7, 8]);
    }

    #[test]
    fn test_reads_stay_inside_the_device() {
        let mut transport = Mock::new(HashMap::from([
            ("first".into(), Register { addr: 0, length: 4 }),
            ("second".into(), Register { addr: 4, length: 4 }),
        ]));
        transport.write_word("second", 0, 0xDEAD_BEEF).unwrap();
        assert!(transport.read_n_bytes("first", 0, 8).is_err());
        assert!(transport.read_words("first", 1, 1).is_err());
        assert_eq!(transport.read_word("first", 0).unwrap(), 0);
    }

    #[test]
    fn test_clear_history() {
        let mut transport = scratchpad();
        transport.write_word("sys_scratchpad", 0, 1).unwrap();
        transport.clear_history();
        assert!(transport.history().is_empty());
        transport.write_word("sys_scratchpad", 1, 2).unwrap();
        assert_eq!(transport.word_writes("sys_scratchpad", 1), vec![2]);
        // Memory survives
        assert_eq!(transport.read_word("sys_scratchpad", 0).unwrap(), 1);
    }

    #[test]
    fn test_words() {
        let mut transport = scratchpad();
        transport
            .write_word("sys_scratchpad", 1, 0xDEAD_BEEF)
            .unwrap();
        assert_eq!(transport.read_word("sys_scratchpad", 1).unwrap(), 0xDEAD_BEEF);
        assert_eq!(
            transport.read_words("sys_scratchpad", 0, 2).unwrap(),
            vec![0, 0xDEAD_BEEF]
        );
        assert_eq!(transport.word_writes("sys_scratchpad", 1), vec![0xDEAD_BEEF]);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut transport = scratchpad();
        assert!(transport.write_bytes("sys_scratchpad", 6, &[1, 2, 3]).is_err());
        assert!(transport.read_n_bytes("sys_scratchpad", 6, 3).is_err());
        assert!(transport.read_n_bytes("nope", 0, 1).is_err());
        assert!(transport.history().is_empty());
    }

    #[test]
    fn test_running() {
        let mut transport = scratchpad();
        assert!(transport.is_running().unwrap());
        transport.deprogram().unwrap();
        assert!(!transport.is_running().unwrap());
        transport.program(Path::new("design.fpg")).unwrap();
        assert!(transport.is_running().unwrap());
    }

    test_rw_num!(u8, 42);
    test_rw_num!(u32, 0xDEAD_BEEF);
    test_rw_num!(i8, -42);
    test_rw_num!(i64, -0x0DEA_DBEE_FB0B_ACAF);
}
