mod device;
mod eeprom;
mod slave;

pub use device::*;
pub use eeprom::*;
pub use slave::*;

use crate::error::TransportError;
use crate::frame::Frame;
use crate::transport::Framer;
use log::*;

/// One slave's view of a passing frame. Returning `None` swallows the
/// frame; it never reaches the remaining slaves or the master.
pub trait FrameProcessor: Send {
    fn process_frame(&mut self, frame: Frame) -> Option<Frame>;
}

/// A simulated bus: outbound frames are cloned byte-for-byte, threaded
/// through every slave in declaration order, and returned as received.
#[derive(Default)]
pub struct Bus {
    slaves: Vec<Box<dyn FrameProcessor>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_slave(&mut self, slave: impl FrameProcessor + 'static) {
        self.slaves.push(Box::new(slave));
    }
}

impl Framer for Bus {
    fn cycle(&mut self, frames: Vec<Frame>) -> Result<Vec<Frame>, TransportError> {
        let mut inbound = Vec::new();
        for mut outbound in frames {
            // the slaves work on their own copy, never on the master's buffer
            let bytes = outbound.commit()?.to_vec();
            let mut passing = Some(Frame::overlay(&bytes)?);

            for slave in &mut self.slaves {
                match passing {
                    Some(frame) => passing = slave.process_frame(frame),
                    None => break,
                }
            }
            match passing {
                Some(frame) => inbound.push(frame),
                None => debug!("a slave swallowed a frame"),
            }
        }
        Ok(inbound)
    }
}
