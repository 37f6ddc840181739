pub mod codec;

mod address;
mod datagram;
mod ethercat_frame;
mod ethernet;

pub use address::*;
pub use datagram::*;
pub use ethercat_frame::*;
pub use ethernet::*;
