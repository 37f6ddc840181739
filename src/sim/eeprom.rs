use super::device::MemoryDevice;
use std::sync::{Arc, Mutex};

pub const SIM_EEPROM_WORDS: usize = 8 * 1024;

/// EEPROM array and SII interface state of a simulated slave.
///
/// The array is filled with `0xee00 + index` so reads are recognizable in
/// tests and dumps. Only the read command is modeled; write and reload are
/// accepted and ignored.
#[derive(Debug)]
pub struct SimEeprom {
    pub array: Vec<u16>,
    pub addr: u32,
    /// Already in wire encoding.
    pub data_scratch: [u8; 8],

    pub pdi_control: bool,
    pub write_enable: bool,
    pub checksum_error: bool,
    pub not_loaded: bool,
    pub missing_acknowledge: bool,
    pub error_write_enable: bool,
    pub busy: bool,
}

impl SimEeprom {
    pub fn new() -> Self {
        Self {
            array: (0..SIM_EEPROM_WORDS)
                .map(|i| 0xee00u16.wrapping_add(i as u16))
                .collect(),
            addr: 0,
            data_scratch: [0; 8],
            pdi_control: false,
            write_enable: false,
            checksum_error: false,
            not_loaded: false,
            missing_acknowledge: false,
            error_write_enable: false,
            busy: false,
        }
    }

    /// Copy four consecutive words starting at the address register into the
    /// scratch, little-endian, wrapping at the end of the array.
    fn read_into_scratch(&mut self) {
        for i in 0..4 {
            let word = self.array[(self.addr as usize + i) % SIM_EEPROM_WORDS];
            self.data_scratch[i * 2..i * 2 + 2].copy_from_slice(&word.to_le_bytes());
        }
    }
}

impl Default for SimEeprom {
    fn default() -> Self {
        Self::new()
    }
}

/// The 16-byte register block at 0x0500 backed by a [`SimEeprom`].
pub struct SimEepromRegs(pub Arc<Mutex<SimEeprom>>);

impl MemoryDevice for SimEepromRegs {
    fn read(&self, offset: u16) -> (u8, bool) {
        let ee = self.0.lock().unwrap();
        let byte = match offset {
            0 => ee.pdi_control as u8,
            1 => 0x00,
            2 => {
                // two address bytes, 8-byte reads supported
                let mut b = 0xc0;
                if ee.write_enable {
                    b |= 0x01;
                }
                b
            }
            3 => {
                // low 3 bits are the command
                let mut b = 0x00;
                if ee.checksum_error {
                    b |= 1 << (11 - 8);
                }
                if ee.not_loaded {
                    b |= 1 << (12 - 8);
                }
                if ee.missing_acknowledge {
                    b |= 1 << (13 - 8);
                }
                if ee.error_write_enable {
                    b |= 1 << (14 - 8);
                }
                if ee.busy {
                    b |= 1 << (15 - 8);
                }
                b
            }
            4..=7 => ee.addr.to_le_bytes()[offset as usize - 4],
            8..=15 => ee.data_scratch[offset as usize - 8],
            _ => unreachable!("EEPROM register read past the mapping"),
        };
        (byte, true)
    }

    fn write_interact(&self, offset: u16) -> bool {
        if offset == 2 || offset == 3 {
            return !self.0.lock().unwrap().busy;
        }
        true
    }

    fn latch(&mut self, shadow: &[u8], write_mask: &[bool]) {
        let mut ee = self.0.lock().unwrap();
        for offset in 0..shadow.len() {
            if !write_mask[offset] {
                continue;
            }
            match offset {
                0 => ee.pdi_control = shadow[0] & 0x01 != 0,
                // PDI access state is not modeled
                1 => {}
                2 => ee.write_enable = shadow[2] & 0x01 != 0,
                3 => match shadow[3] & 0x03 {
                    0x00 => {
                        ee.checksum_error = false;
                        ee.not_loaded = false;
                        ee.missing_acknowledge = false;
                        ee.error_write_enable = false;
                    }
                    0x01 => {
                        // TODO: model busy time instead of completing reads
                        // within the triggering frame
                        ee.busy = false;
                        ee.read_into_scratch();
                    }
                    // write/reload are not supported by the simulator
                    _ => {}
                },
                4..=7 => {
                    let shift = (offset - 4) * 8;
                    ee.addr &= !(0xff << shift);
                    ee.addr |= (shadow[offset] as u32) << shift;
                }
                8..=15 => ee.data_scratch[offset - 8] = shadow[offset],
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fill_is_recognizable() {
        let ee = SimEeprom::new();
        assert_eq!(ee.array[0], 0xee00);
        assert_eq!(ee.array[0x7f], 0xee7f);
    }

    #[test]
    fn read_command_fills_the_scratch() {
        let mut regs = SimEepromRegs(Arc::new(Mutex::new(SimEeprom::new())));

        let mut shadow = [0u8; 16];
        let mut mask = [false; 16];
        // address register := 2
        shadow[4] = 0x02;
        mask[4] = true;
        mask[5] = true;
        mask[6] = true;
        mask[7] = true;
        // read command
        shadow[3] = 0x01;
        mask[3] = true;
        regs.latch(&shadow, &mask);

        let ee = regs.0.lock().unwrap();
        assert_eq!(ee.addr, 2);
        assert_eq!(ee.data_scratch[0..2], 0xee02u16.to_le_bytes());
        assert_eq!(ee.data_scratch[6..8], 0xee05u16.to_le_bytes());
        assert!(!ee.busy);
    }

    #[test]
    fn status_byte_reflects_the_flags() {
        let state = Arc::new(Mutex::new(SimEeprom::new()));
        let regs = SimEepromRegs(state.clone());
        assert_eq!(regs.read(3), (0x00, true));

        state.lock().unwrap().busy = true;
        assert_eq!(regs.read(3), (0x80, true));
        // bytes 2 and 3 refuse writes while busy
        assert!(!regs.write_interact(2));
        assert!(!regs.write_interact(3));
        assert!(regs.write_interact(4));

        state.lock().unwrap().busy = false;
        state.lock().unwrap().missing_acknowledge = true;
        assert_eq!(regs.read(3), (0x20, true));
    }
}
