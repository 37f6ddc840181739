use super::codec::*;
use crate::error::FrameError;
use core::fmt;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const ETHERNET_FCS_LEN: usize = 4;
pub const MIN_FRAME_LEN_WITH_FCS: usize = 64;
pub const MAX_FRAME_LEN_NO_VLAN: usize = 1522;
pub const MAX_FRAME_LEN_VLAN: usize = 1526;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
pub const ETHERTYPE_ETHERCAT: u16 = 0x88a4;

const OFFSET_DESTINATION: usize = 0;
const OFFSET_SOURCE: usize = 6;
const OFFSET_VLAN_OR_TYPE: usize = 12;
const OFFSET_VLAN_TCI: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EthernetAddr(pub [u8; 6]);

impl fmt::Display for EthernetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

impl From<[u8; 6]> for EthernetAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

/// Layer-2 view used by raw-socket transports. Header fields are big-endian
/// on the wire; the trailing FCS is owned by the driver.
#[derive(Debug, Clone)]
pub struct EthernetFrame {
    pub destination: EthernetAddr,
    pub source: EthernetAddr,
    pub ether_type: u16,
    pub use_vlan: bool,
    pub vlan_tci: u16,
    buffer: Vec<u8>,
    len: usize,
}

impl EthernetFrame {
    pub fn overlay(fb: &[u8]) -> Result<Self, FrameError> {
        if fb.len() < MIN_FRAME_LEN_WITH_FCS {
            return Err(FrameError::SmallBuffer);
        }

        let mut destination = [0u8; 6];
        destination.copy_from_slice(&fb[OFFSET_DESTINATION..OFFSET_SOURCE]);
        let mut source = [0u8; 6];
        source.copy_from_slice(&fb[OFFSET_SOURCE..OFFSET_VLAN_OR_TYPE]);

        let (ether_type, _) = read_u16_be(&fb[OFFSET_VLAN_OR_TYPE..])?;
        let mut use_vlan = false;
        let mut vlan_tci = 0;
        if ether_type == ETHERTYPE_VLAN {
            use_vlan = true;
            let (tci, _) = read_u16_be(&fb[OFFSET_VLAN_TCI..])?;
            vlan_tci = tci;
        }

        Ok(Self {
            destination: EthernetAddr(destination),
            source: EthernetAddr(source),
            ether_type,
            use_vlan,
            vlan_tci,
            buffer: fb.to_vec(),
            len: fb.len(),
        })
    }

    pub fn header_len(&self) -> usize {
        if self.use_vlan {
            ETHERNET_HEADER_LEN + 4
        } else {
            ETHERNET_HEADER_LEN
        }
    }

    pub fn footer_len(&self) -> usize {
        ETHERNET_FCS_LEN
    }

    /// Header contents are undefined until `write_down` has run.
    pub fn frame_buf(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len()..self.len - self.footer_len()]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header = self.header_len();
        let footer = self.footer_len();
        &mut self.buffer[header..self.len - footer]
    }

    pub fn set_payload_len(&mut self, payload_len: usize) -> Result<(), FrameError> {
        let new_len = payload_len + self.header_len() + self.footer_len();
        if new_len < MIN_FRAME_LEN_WITH_FCS {
            return Err(FrameError::SmallBuffer);
        }

        let max = if self.use_vlan {
            MAX_FRAME_LEN_VLAN
        } else {
            MAX_FRAME_LEN_NO_VLAN
        };
        if new_len > max {
            return Err(FrameError::LargeData);
        }
        if new_len > self.buffer.len() {
            return Err(FrameError::SmallBuffer);
        }

        self.len = new_len;
        Ok(())
    }

    /// Re-emit the header fields into the owned buffer.
    pub fn write_down(&mut self) -> Result<(), FrameError> {
        if self.use_vlan {
            return Err(FrameError::VlanNotSupported);
        }
        self.buffer[OFFSET_DESTINATION..OFFSET_SOURCE].copy_from_slice(&self.destination.0);
        self.buffer[OFFSET_SOURCE..OFFSET_VLAN_OR_TYPE].copy_from_slice(&self.source.0);
        write_u16_be(&mut self.buffer[OFFSET_VLAN_OR_TYPE..], self.ether_type)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_parses_addresses_and_type() {
        let mut buf = vec![0u8; MIN_FRAME_LEN_WITH_FCS];
        buf[0..6].copy_from_slice(&[0xab, 0xcd, 0xef, 0x12, 0x23, 0x34]);
        buf[6..12].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0xaa, 0x55]);
        buf[12..14].copy_from_slice(&0x88a2u16.to_be_bytes());

        let ef = EthernetFrame::overlay(&buf).unwrap();
        assert_eq!(ef.destination.to_string(), "ab:cd:ef:12:23:34");
        assert_eq!(ef.source.to_string(), "de:ad:be:ef:aa:55");
        assert_eq!(ef.ether_type, 0x88a2);
        assert!(!ef.use_vlan);
    }

    #[test]
    fn overlay_rejects_short_buffers() {
        let buf = vec![0u8; 20];
        assert_eq!(
            EthernetFrame::overlay(&buf).unwrap_err(),
            FrameError::SmallBuffer
        );
    }

    #[test]
    fn payload_ops_on_a_minimum_frame() {
        let buf = vec![0u8; MIN_FRAME_LEN_WITH_FCS];
        let mut ef = EthernetFrame::overlay(&buf).unwrap();

        let payload_len = ef.payload().len();
        assert_eq!(
            payload_len,
            MIN_FRAME_LEN_WITH_FCS - ETHERNET_HEADER_LEN - ETHERNET_FCS_LEN
        );

        // the payload already occupies the whole buffer
        assert!(ef.set_payload_len(payload_len + 1).is_err());
        // below the padding minimum
        assert!(ef.set_payload_len(payload_len - 1).is_err());
        assert!(ef.set_payload_len(payload_len).is_ok());
    }

    #[test]
    fn vlan_tagged_frames_parse_but_do_not_emit() {
        let mut buf = vec![0u8; MIN_FRAME_LEN_WITH_FCS];
        buf[12..14].copy_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
        buf[14..16].copy_from_slice(&0x0123u16.to_be_bytes());

        let mut ef = EthernetFrame::overlay(&buf).unwrap();
        assert!(ef.use_vlan);
        assert_eq!(ef.vlan_tci, 0x0123);
        assert_eq!(ef.header_len(), ETHERNET_HEADER_LEN + 4);
        assert_eq!(ef.write_down().unwrap_err(), FrameError::VlanNotSupported);
    }

    #[test]
    fn write_down_emits_big_endian() {
        let buf = vec![0u8; MIN_FRAME_LEN_WITH_FCS];
        let mut ef = EthernetFrame::overlay(&buf).unwrap();
        ef.destination = EthernetAddr([1, 2, 3, 4, 5, 6]);
        ef.source = EthernetAddr([7, 8, 9, 10, 11, 12]);
        ef.ether_type = ETHERTYPE_ETHERCAT;
        ef.write_down().unwrap();

        let fb = ef.frame_buf();
        assert_eq!(&fb[0..6], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&fb[12..14], &[0x88, 0xa4]);
    }
}
