pub mod command;
pub mod eeprom;
pub mod error;
pub mod frame;
pub mod register;
pub mod sim;
pub mod transport;

pub use command::*;
pub use eeprom::*;
pub use error::*;
pub use frame::*;
pub use transport::*;
