mod udp;

pub use udp::*;

use crate::error::TransportError;
use crate::frame::{Frame, MAX_FRAME_DATA};

/// One transmit/receive round-trip over a link.
///
/// `cycle` commits and sends every queued outbound frame, then collects the
/// replies that arrive within the transport's deadline. A read timeout is
/// not an error; it shows up as a short (possibly empty) inbound list.
pub trait Framer {
    fn cycle(&mut self, frames: Vec<Frame>) -> Result<Vec<Frame>, TransportError>;

    /// Datagram byte budget per frame on this link.
    fn max_frame_data(&self) -> usize {
        MAX_FRAME_DATA
    }

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
