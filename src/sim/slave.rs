use super::device::{DevMapping, MemoryDevice};
use super::eeprom::{SimEeprom, SimEepromRegs};
use super::FrameProcessor;
use crate::frame::{AddressClass, DatagramAddress, Frame};
use crate::register;
use bit_field::BitField;
use log::*;
use std::sync::{Arc, Mutex};

pub const REG_AREA_LEN: usize = 0x1000;
const BACKING_LEN: usize = 1 << 16;

/// First bytes of the register area of an ET1100-class ESC.
const ET1100_SIGNATURE: [u8; 9] = [0x11, 0x00, 0x02, 0x00, 0x08, 0x08, 0x08, 0x0b, 0xfc];

/// Shared AL status/control store. The control register is writable from
/// the EtherCat side; the status register is read-only on the bus.
#[derive(Debug)]
pub struct AlStatusControl {
    pub store: u16,
}

impl AlStatusControl {
    pub fn new() -> Self {
        Self { store: 0x0011 }
    }

    pub fn is_ecat_writable(&self) -> bool {
        true
    }

    pub fn in_error(&self) -> bool {
        self.store.get_bit(4)
    }

    pub fn set_error(&mut self, error: bool) {
        self.store.set_bit(4, error);
    }
}

impl Default for AlStatusControl {
    fn default() -> Self {
        Self::new()
    }
}

struct AlControlReg(Arc<Mutex<AlStatusControl>>);

impl MemoryDevice for AlControlReg {
    fn read(&self, offset: u16) -> (u8, bool) {
        let al = self.0.lock().unwrap();
        let byte = match offset {
            0 => al.store as u8,
            1 => (al.store >> 8) as u8,
            _ => unreachable!("AL control mapping is two bytes"),
        };
        (byte, true)
    }

    fn write_interact(&self, _offset: u16) -> bool {
        self.0.lock().unwrap().is_ecat_writable()
    }

    fn latch(&mut self, shadow: &[u8], write_mask: &[bool]) {
        if !write_mask[0] {
            return;
        }
        let mut al = self.0.lock().unwrap();
        // the error bit only clears when the write acknowledges it
        if !al.in_error() || shadow[0] & 0x10 != 0 {
            al.store &= !0x001f;
            al.store |= (shadow[0] & 0x0f) as u16;
        }
    }
}

struct AlStatusReg(Arc<Mutex<AlStatusControl>>);

impl MemoryDevice for AlStatusReg {
    fn read(&self, offset: u16) -> (u8, bool) {
        let al = self.0.lock().unwrap();
        let byte = match offset {
            0 => al.store as u8,
            1 => (al.store >> 8) as u8,
            _ => 0x00,
        };
        (byte, true)
    }

    fn write_interact(&self, _offset: u16) -> bool {
        false
    }

    fn latch(&mut self, _shadow: &[u8], _write_mask: &[bool]) {}
}

/// A cycle-accurate model of one slave controller: 64 KiB of backing
/// memory, a 4 KiB register area with device mappings, and the per-frame
/// register shadow that makes datagram writes latch atomically at the end
/// of the frame.
pub struct SimSlave {
    memory: Vec<u8>,
    shadow: Vec<u8>,
    shadow_write_mask: Vec<bool>,
    mappings: Vec<DevMapping>,
    al: Arc<Mutex<AlStatusControl>>,
    eeprom: Arc<Mutex<SimEeprom>>,
}

impl SimSlave {
    pub fn new() -> Self {
        let mut memory = vec![0u8; BACKING_LEN];
        memory[..ET1100_SIGNATURE.len()].copy_from_slice(&ET1100_SIGNATURE);

        let al = Arc::new(Mutex::new(AlStatusControl::new()));
        let eeprom = Arc::new(Mutex::new(SimEeprom::new()));
        let mappings = vec![
            DevMapping::new(register::AL_CONTROL, 0x02, Box::new(AlControlReg(al.clone()))),
            DevMapping::new(register::AL_STATUS, 0x06, Box::new(AlStatusReg(al.clone()))),
            DevMapping::new(
                register::EEPROM_CONFIGURATION,
                0x10,
                Box::new(SimEepromRegs(eeprom.clone())),
            ),
        ];

        Self {
            memory,
            shadow: vec![0u8; REG_AREA_LEN],
            shadow_write_mask: vec![false; REG_AREA_LEN],
            mappings,
            al,
            eeprom,
        }
    }

    /// Handle on the AL state shared with the mapped registers.
    pub fn al_status_control(&self) -> Arc<Mutex<AlStatusControl>> {
        self.al.clone()
    }

    /// Handle on the EEPROM state shared with the mapped registers.
    pub fn eeprom(&self) -> Arc<Mutex<SimEeprom>> {
        self.eeprom.clone()
    }

    pub fn set_station_address(&mut self, address: u16) {
        let base = register::CONFIGURED_STATION_ADDRESS as usize;
        self.memory[base..base + 2].copy_from_slice(&address.to_le_bytes());
    }

    fn station_address(&self) -> u16 {
        let base = register::CONFIGURED_STATION_ADDRESS as usize;
        u16::from_le_bytes([self.memory[base], self.memory[base + 1]])
    }

    fn mapping_at(&self, addr: u16) -> Option<usize> {
        self.mappings.iter().position(|m| m.contains(addr))
    }

    fn read8(&self, addr: u16) -> (u8, bool) {
        if (addr as usize) < REG_AREA_LEN {
            if let Some(i) = self.mapping_at(addr) {
                let mapping = &self.mappings[i];
                return mapping.device.read(addr - mapping.start);
            }
        }
        (self.memory[addr as usize], true)
    }

    fn write8(&mut self, addr: u16, data: u8) -> bool {
        if (addr as usize) < REG_AREA_LEN {
            self.shadow[addr as usize] = data;
            self.shadow_write_mask[addr as usize] = true;
            if let Some(i) = self.mapping_at(addr) {
                let mapping = &self.mappings[i];
                return mapping.device.write_interact(addr - mapping.start);
            }
        }
        // unmapped bytes write straight through, register area included
        self.memory[addr as usize] = data;
        true
    }

    fn is_addressed(&self, addr: &DatagramAddress) -> bool {
        match addr.class() {
            AddressClass::Broadcast => true,
            AddressClass::Positional => addr.position_or_address() == 0,
            AddressClass::Fixed => addr.position_or_address() == self.station_address(),
            AddressClass::Logical => false,
        }
    }

    /// Latch each mapping's shadow region once, then start the next frame
    /// with a clean mask.
    fn latch_mappings(&mut self) {
        for mapping in &mut self.mappings {
            let start = mapping.start as usize;
            let end = start + mapping.length as usize;
            mapping
                .device
                .latch(&self.shadow[start..end], &self.shadow_write_mask[start..end]);
        }
        self.shadow_write_mask.fill(false);
    }
}

impl Default for SimSlave {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProcessor for SimSlave {
    fn process_frame(&mut self, mut frame: Frame) -> Option<Frame> {
        {
            let (datagrams, buffer) = frame.split_mut();
            for datagram in datagrams.iter_mut() {
                let Some(mut addr) =
                    DatagramAddress::from_command(datagram.addr32, datagram.command)
                else {
                    continue;
                };
                if !addr.is_physical() {
                    // logical commands pass through unchanged
                    continue;
                }

                let addressed = self.is_addressed(&addr);
                addr.increment_slave_addr();
                datagram.addr32 = addr.addr32();
                if !addressed {
                    continue;
                }

                let base = addr.offset();
                let len = datagram.data_length();
                trace!(
                    "{:?} @ {:#06x}+{} addressed={}",
                    datagram.command,
                    base,
                    len,
                    addressed
                );

                let mut read_unmasked = true;
                if datagram.command.reads() {
                    let data = datagram.data_mut(buffer);
                    for i in 0..len {
                        let (byte, unmasked) = self.read8(base.wrapping_add(i));
                        data[i as usize] = byte;
                        read_unmasked &= unmasked;
                    }
                }

                let mut write_unmasked = true;
                if datagram.command.writes() {
                    let data = datagram.data(buffer);
                    for i in 0..len {
                        write_unmasked &= self.write8(base.wrapping_add(i), data[i as usize]);
                    }
                }

                if datagram.command.reads() && datagram.command.writes() {
                    // TODO: RW/ARMW/FRMW working counter update logic
                } else if datagram.command.reads() {
                    if read_unmasked {
                        datagram.working_counter += 1;
                    }
                } else if datagram.command.writes() && write_unmasked {
                    datagram.working_counter += 1;
                }
            }
        }

        self.latch_mappings();
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CommandType;

    fn frame_with(command: CommandType, addr32: u32, data: &[u8]) -> Frame {
        let mut frame = Frame::with_data_capacity(64);
        {
            let dg = frame.new_datagram(data.len()).unwrap();
            dg.command = command;
            dg.addr32 = addr32;
        }
        frame.datagram_data_mut(0).copy_from_slice(data);
        frame
    }

    #[test]
    fn positional_read_counts_and_increments() {
        let mut slave = SimSlave::new();
        let frame = frame_with(CommandType::APRD, 0, &[0u8; 4]);
        let reply = slave.process_frame(frame).unwrap();

        let dg = &reply.datagrams()[0];
        assert_eq!(dg.working_counter, 1);
        assert_eq!(dg.slave_addr(), 1);
        assert_eq!(reply.datagram_data(0), &ET1100_SIGNATURE[..4]);
    }

    #[test]
    fn missed_position_leaves_the_counter() {
        let mut slave = SimSlave::new();
        let addr = DatagramAddress::positional(1);
        let frame = frame_with(CommandType::APRD, addr.addr32(), &[0u8; 2]);
        let reply = slave.process_frame(frame).unwrap();

        let dg = &reply.datagrams()[0];
        assert_eq!(dg.working_counter, 0);
        // the position still auto-increments on the way through
        assert_eq!(dg.slave_addr(), 0);
    }

    #[test]
    fn fixed_addressing_matches_the_station_register() {
        let mut slave = SimSlave::new();
        let frame = frame_with(CommandType::FPRD, 0x1001, &[0u8; 2]);
        assert_eq!(
            slave.process_frame(frame).unwrap().datagrams()[0].working_counter,
            0
        );

        slave.set_station_address(0x1001);
        let frame = frame_with(CommandType::FPRD, 0x1001, &[0u8; 2]);
        let reply = slave.process_frame(frame).unwrap();
        let dg = &reply.datagrams()[0];
        assert_eq!(dg.working_counter, 1);
        // a configured address never auto-increments
        assert_eq!(dg.slave_addr(), 0x1001);
    }

    #[test]
    fn writes_latch_at_end_of_frame() {
        let mut slave = SimSlave::new();
        let al = slave.al_status_control();
        // the initial store carries the error indicator
        assert_eq!(al.lock().unwrap().store, 0x0011);
        assert!(al.lock().unwrap().in_error());

        let addr32 = (register::AL_CONTROL as u32) << 16;
        let frame = frame_with(CommandType::BWR, addr32, &[0x12, 0x00]);
        let reply = slave.process_frame(frame).unwrap();
        assert_eq!(reply.datagrams()[0].working_counter, 1);
        assert_eq!(al.lock().unwrap().store, 0x0002);
        assert!(!al.lock().unwrap().in_error());
    }

    #[test]
    fn error_bit_needs_an_acknowledging_write() {
        let mut slave = SimSlave::new();
        let al = slave.al_status_control();
        al.lock().unwrap().set_error(true);

        let addr32 = (register::AL_CONTROL as u32) << 16;
        let frame = frame_with(CommandType::BWR, addr32, &[0x08, 0x00]);
        slave.process_frame(frame).unwrap();
        // not acknowledged, the store keeps the error bit
        assert!(al.lock().unwrap().in_error());

        let frame = frame_with(CommandType::BWR, addr32, &[0x18, 0x00]);
        slave.process_frame(frame).unwrap();
        let store = al.lock().unwrap().store;
        assert!(!AlStatusControl { store }.in_error());
        assert_eq!(store & 0x0f, 0x08);
    }

    #[test]
    fn al_status_refuses_bus_writes() {
        let mut slave = SimSlave::new();
        let addr32 = (register::AL_STATUS as u32) << 16;
        let frame = frame_with(CommandType::BWR, addr32, &[0xff, 0xff]);
        let reply = slave.process_frame(frame).unwrap();
        // masked write: no working counter credit, store untouched
        assert_eq!(reply.datagrams()[0].working_counter, 0);
        assert_eq!(slave.al_status_control().lock().unwrap().store, 0x0011);
    }

    #[test]
    fn station_address_register_writes_through() {
        let mut slave = SimSlave::new();
        let addr32 = (register::CONFIGURED_STATION_ADDRESS as u32) << 16;
        let frame = frame_with(CommandType::APWR, addr32, &[0x34, 0x12]);
        let reply = slave.process_frame(frame).unwrap();
        assert_eq!(reply.datagrams()[0].working_counter, 1);
        assert_eq!(slave.station_address(), 0x1234);
    }
}
