//! Client for the slave information interface (SII) EEPROM, driven through
//! the small register window at 0x0500.

use crate::command::{execute_read, execute_write, Commander, ExecuteOptions};
use crate::error::CommandError;
use crate::frame::DatagramAddress;
use crate::register::{EepromAddress, EepromControl, EEPROM_ADDRESS, EEPROM_CONTROL_STATUS, EEPROM_DATA};
use core::fmt;
use log::*;
use std::time::{Duration, Instant};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Control/status word that starts a read of the addressed word.
const READ_COMMAND: u16 = 0x0100;
/// Control/status word that writes the data register (write access enabled).
const WRITE_COMMAND: u16 = 0x0201;

#[derive(Debug, Clone)]
pub enum EepromError {
    Command(CommandError),
    /// Status byte with one of the error bits 13 to 15 set.
    StatusError(u8),
    BusyTimeout(Duration),
    Closed,
}

impl fmt::Display for EepromError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(err) => write!(f, "EEPROM command failed: {}", err),
            Self::StatusError(status) => {
                write!(f, "EEPROM status byte {:#04x} indicates an error", status)
            }
            Self::BusyTimeout(timeout) => {
                write!(f, "EEPROM stayed busy for {:?}", timeout)
            }
            Self::Closed => write!(f, "EEPROM client is closed"),
        }
    }
}

impl std::error::Error for EepromError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Command(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CommandError> for EepromError {
    fn from(err: CommandError) -> Self {
        Self::Command(err)
    }
}

/// Word-granular EEPROM access on the slave at `addr`. Every register
/// access expects a working counter of 1, so the address must reach exactly
/// one slave.
pub struct Eeprom<C: Commander> {
    commander: C,
    addr: DatagramAddress,
    closed: bool,
}

impl<C: Commander> Eeprom<C> {
    pub fn new(commander: C, addr: DatagramAddress) -> Result<Self, EepromError> {
        let mut eeprom = Self {
            commander,
            addr,
            closed: false,
        };
        eeprom.wait_for_idle(DEFAULT_BUSY_TIMEOUT)?;
        Ok(eeprom)
    }

    fn register(&self, offset: u16) -> DatagramAddress {
        let mut addr = self.addr;
        addr.set_offset(offset);
        addr
    }

    /// Poll the control/status word until the busy bit clears. The interface
    /// processes commands in the hundreds of microseconds, so a quiet bus
    /// passes on the first poll.
    fn wait_for_idle(&mut self, timeout: Duration) -> Result<(), EepromError> {
        let deadline = Instant::now() + timeout;
        loop {
            let reg = self.register(EEPROM_CONTROL_STATUS);
            let status = execute_read(
                &mut self.commander,
                reg,
                2,
                1,
                ExecuteOptions::default(),
            )?;
            if !EepromControl(&status[..]).busy() {
                return Ok(());
            }
            if Instant::now() > deadline {
                warn!("EEPROM busy bit stuck for {:?}", timeout);
                return Err(EepromError::BusyTimeout(timeout));
            }
        }
    }

    /// Read status after an operation and surface the error bits.
    fn check_status(&mut self) -> Result<(), EepromError> {
        let reg = self.register(EEPROM_CONTROL_STATUS);
        let status = execute_read(
            &mut self.commander,
            reg,
            2,
            1,
            ExecuteOptions::default(),
        )?;
        if EepromControl(&status[..]).has_error() {
            return Err(EepromError::StatusError(status[1]));
        }
        Ok(())
    }

    fn set_address(&mut self, addr: u32) -> Result<(), EepromError> {
        let mut reg = EepromAddress::new();
        reg.set_eeprom_address(addr);
        let addr_reg = self.register(EEPROM_ADDRESS);
        execute_write(
            &mut self.commander,
            addr_reg,
            &reg.0,
            1,
            ExecuteOptions::default(),
        )?;
        Ok(())
    }

    fn write_control(&mut self, word: u16) -> Result<(), EepromError> {
        let reg = self.register(EEPROM_CONTROL_STATUS);
        execute_write(
            &mut self.commander,
            reg,
            &word.to_le_bytes(),
            1,
            ExecuteOptions::default(),
        )?;
        Ok(())
    }

    pub fn read_word(&mut self, addr: u32) -> Result<u16, EepromError> {
        if self.closed {
            return Err(EepromError::Closed);
        }
        self.wait_for_idle(DEFAULT_BUSY_TIMEOUT)?;

        self.set_address(addr)?;
        self.write_control(READ_COMMAND)?;
        self.wait_for_idle(DEFAULT_BUSY_TIMEOUT)?;
        self.check_status()?;

        let data_reg = self.register(EEPROM_DATA);
        let data = execute_read(
            &mut self.commander,
            data_reg,
            4,
            1,
            ExecuteOptions::default(),
        )?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    pub fn write_word(&mut self, addr: u32, word: u16) -> Result<(), EepromError> {
        if self.closed {
            return Err(EepromError::Closed);
        }
        self.wait_for_idle(DEFAULT_BUSY_TIMEOUT)?;

        self.set_address(addr)?;
        let data_reg = self.register(EEPROM_DATA);
        execute_write(
            &mut self.commander,
            data_reg,
            &word.to_le_bytes(),
            1,
            ExecuteOptions::default(),
        )?;
        self.write_control(WRITE_COMMAND)?;
        self.wait_for_idle(DEFAULT_BUSY_TIMEOUT)?;
        self.check_status()?;

        // readback keeps the interface in a defined state
        let data_reg = self.register(EEPROM_DATA);
        execute_read(
            &mut self.commander,
            data_reg,
            4,
            1,
            ExecuteOptions::default(),
        )?;
        Ok(())
    }

    /// Further operations fail with [`EepromError::Closed`].
    pub fn close(&mut self) {
        self.closed = true;
    }
}
