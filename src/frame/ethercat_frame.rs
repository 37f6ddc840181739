use super::codec::*;
use super::datagram::{Datagram, DATAGRAM_OVERHEAD_LEN, MAX_DATA_LEN};
use crate::error::FrameError;
use heapless::Vec as BoundedVec;

pub const FRAME_HEADER_LEN: usize = 2;
/// Byte budget for all datagrams of one frame: a standard Ethernet MTU less
/// the Ethernet, UDP and EtherCat headers.
pub const MAX_FRAME_DATA: usize = 1470;
/// Frame type 1 carries EtherCat commands.
pub const FRAME_TYPE_COMMANDS: u8 = 1;
/// Each datagram needs at least its 12 overhead bytes, which bounds the
/// datagram count of a frame.
pub const MAX_FRAME_DATAGRAMS: usize = 128;

const FRAME_LEN_MASK: u16 = (1 << 11) - 1;

/// An EtherCat frame: a 2-byte header followed by chained datagrams.
///
/// The frame exclusively owns its byte buffer; its [`Datagram`] views cover
/// a prefix of that buffer without overlapping. Views are invalidated when
/// the frame is dropped or rebuilt.
#[derive(Debug, Clone)]
pub struct Frame {
    buffer: Vec<u8>,
    datagrams: BoundedVec<Datagram, MAX_FRAME_DATAGRAMS>,
    frame_type: u8,
}

impl Frame {
    /// Initialize a zero-length frame occupying `buffer`.
    pub fn point_to(buffer: Vec<u8>) -> Result<Self, FrameError> {
        if buffer.len() < FRAME_HEADER_LEN {
            return Err(FrameError::SmallBuffer);
        }
        Ok(Self {
            buffer,
            datagrams: BoundedVec::new(),
            frame_type: FRAME_TYPE_COMMANDS,
        })
    }

    /// A frame sized for `data_len` bytes of datagrams.
    pub fn with_data_capacity(data_len: usize) -> Self {
        Self {
            buffer: vec![0; FRAME_HEADER_LEN + data_len],
            datagrams: BoundedVec::new(),
            frame_type: FRAME_TYPE_COMMANDS,
        }
    }

    /// Parse a received frame, overlaying datagram views until one reports
    /// that it is the last.
    pub fn overlay(bytes: &[u8]) -> Result<Self, FrameError> {
        let (word, _) = read_u16_le(bytes)?;
        let frame_len = (word & FRAME_LEN_MASK) as usize;
        let frame_type = (word >> 12) as u8 & 0x0f;
        if FRAME_HEADER_LEN + frame_len > bytes.len() {
            return Err(FrameError::SmallBuffer);
        }

        let mut frame = Self {
            buffer: bytes.to_vec(),
            datagrams: BoundedVec::new(),
            frame_type,
        };
        let mut offset = FRAME_HEADER_LEN;
        loop {
            let (datagram, next) = Datagram::overlay(&frame.buffer, offset)?;
            let last = datagram.is_last();
            frame
                .datagrams
                .push(datagram)
                .map_err(|_| FrameError::TooManyDatagrams)?;
            offset = next;
            if last {
                break;
            }
        }
        Ok(frame)
    }

    /// Total bytes of all datagrams, the value of the header length field.
    pub fn datagrams_byte_len(&self) -> usize {
        self.datagrams.iter().map(Datagram::byte_len).sum()
    }

    pub fn byte_len(&self) -> usize {
        FRAME_HEADER_LEN + self.datagrams_byte_len()
    }

    pub fn frame_type(&self) -> u8 {
        self.frame_type
    }

    pub fn datagrams(&self) -> &[Datagram] {
        &self.datagrams
    }

    pub fn datagrams_mut(&mut self) -> &mut [Datagram] {
        &mut self.datagrams
    }

    /// Header views and payload buffer, borrowed simultaneously.
    pub fn split_mut(&mut self) -> (&mut [Datagram], &mut [u8]) {
        let Self {
            buffer, datagrams, ..
        } = self;
        (datagrams, buffer)
    }

    pub fn datagram_data(&self, i: usize) -> &[u8] {
        self.datagrams[i].data(&self.buffer)
    }

    pub fn datagram_data_mut(&mut self, i: usize) -> &mut [u8] {
        self.datagrams[i].data_mut(&mut self.buffer)
    }

    /// Append a datagram view with a `payload_len`-byte payload. The new
    /// datagram becomes the terminal one; its predecessor's last bit is
    /// cleared.
    pub fn new_datagram(&mut self, payload_len: usize) -> Result<&mut Datagram, FrameError> {
        if payload_len > MAX_DATA_LEN {
            return Err(FrameError::LargeData);
        }
        let offset = FRAME_HEADER_LEN + self.datagrams_byte_len();
        let needed = DATAGRAM_OVERHEAD_LEN + payload_len;
        if offset + needed > self.buffer.len() {
            return Err(FrameError::SmallBuffer);
        }

        let capacity = self.buffer.len() - offset - DATAGRAM_OVERHEAD_LEN;
        let mut datagram = Datagram::point_to(offset, capacity);
        datagram.set_data_len(payload_len)?;

        if let Some(prev) = self.datagrams.last_mut() {
            prev.set_last(false);
        }
        self.datagrams
            .push(datagram)
            .map_err(|_| FrameError::TooManyDatagrams)?;
        Ok(self.datagrams.last_mut().unwrap())
    }

    /// Serialize header and datagram headers into the owned buffer and
    /// return the wire bytes.
    pub fn commit(&mut self) -> Result<&[u8], FrameError> {
        if self.datagrams.is_empty() {
            return Err(FrameError::EmptyFrame);
        }
        let total = self.datagrams_byte_len();
        if FRAME_HEADER_LEN + total > self.buffer.len() {
            return Err(FrameError::SmallBuffer);
        }

        let word = total as u16 & FRAME_LEN_MASK | (self.frame_type as u16) << 12;
        write_u16_le(&mut self.buffer, word)?;
        for datagram in &self.datagrams {
            datagram.commit(&mut self.buffer)?;
        }
        Ok(&self.buffer[..FRAME_HEADER_LEN + total])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CommandType;

    #[test]
    fn commit_writes_length_and_type() {
        let mut frame = Frame::with_data_capacity(MAX_FRAME_DATA);
        for len in [6usize, 10, 0] {
            frame.new_datagram(len).unwrap();
        }
        let bytes = frame.commit().unwrap().to_vec();

        let expected_len = (6 + 12) + (10 + 12) + 12;
        let word = u16::from_le_bytes([bytes[0], bytes[1]]);
        assert_eq!((word & 0x07ff) as usize, expected_len);
        assert_eq!(word >> 12, FRAME_TYPE_COMMANDS as u16);
        assert_eq!(bytes.len(), FRAME_HEADER_LEN + expected_len);
    }

    #[test]
    fn only_the_terminal_datagram_is_last() {
        let mut frame = Frame::with_data_capacity(256);
        frame.new_datagram(4).unwrap();
        assert!(frame.datagrams()[0].is_last());
        frame.new_datagram(8).unwrap();
        frame.new_datagram(2).unwrap();

        let lasts: Vec<bool> = frame.datagrams().iter().map(|d| d.is_last()).collect();
        assert_eq!(lasts, [false, false, true]);
    }

    #[test]
    fn commit_then_overlay_round_trips() {
        let mut frame = Frame::with_data_capacity(64);
        {
            let dg = frame.new_datagram(2).unwrap();
            dg.command = CommandType::FPRD;
            dg.index = 3;
            dg.addr32 = 0x0502_1001;
        }
        {
            let dg = frame.new_datagram(4).unwrap();
            dg.command = CommandType::BWR;
            dg.index = 3;
        }
        frame.datagram_data_mut(1).copy_from_slice(&[0xaa; 4]);
        let bytes = frame.commit().unwrap().to_vec();

        let parsed = Frame::overlay(&bytes).unwrap();
        assert_eq!(parsed.frame_type(), FRAME_TYPE_COMMANDS);
        assert_eq!(parsed.datagrams().len(), 2);
        assert_eq!(parsed.datagrams()[0].command, CommandType::FPRD);
        assert_eq!(parsed.datagrams()[0].offset_addr(), 0x0502);
        assert!(!parsed.datagrams()[0].is_last());
        assert_eq!(parsed.datagrams()[1].command, CommandType::BWR);
        assert!(parsed.datagrams()[1].is_last());
        assert_eq!(parsed.datagram_data(1), &[0xaa; 4]);
        assert_eq!(parsed.datagrams_byte_len(), bytes.len() - FRAME_HEADER_LEN);
    }

    #[test]
    fn empty_frame_does_not_commit() {
        let mut frame = Frame::with_data_capacity(16);
        assert_eq!(frame.commit().unwrap_err(), FrameError::EmptyFrame);
    }

    #[test]
    fn new_datagram_respects_the_buffer() {
        let mut frame = Frame::with_data_capacity(30);
        frame.new_datagram(18).unwrap();
        // 30 - (18 + 12) = 0 bytes left
        assert_eq!(frame.new_datagram(1).unwrap_err(), FrameError::SmallBuffer);
        frame.new_datagram(0).unwrap_err();
    }

    #[test]
    fn overlay_rejects_truncated_frames() {
        let mut frame = Frame::with_data_capacity(16);
        frame.new_datagram(4).unwrap();
        let bytes = frame.commit().unwrap().to_vec();
        assert_eq!(
            Frame::overlay(&bytes[..bytes.len() - 1]).unwrap_err(),
            FrameError::SmallBuffer
        );
    }
}
