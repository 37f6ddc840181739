use crate::frame::{AddressClass, CommandType};
use core::fmt;

/// Errors produced while overlaying or emitting wire views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    SmallBuffer,
    LargeData,
    TooManyDatagrams,
    EmptyFrame,
    VlanNotSupported,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SmallBuffer => write!(f, "buffer too small"),
            Self::LargeData => write!(f, "data exceeds the wire format limit"),
            Self::TooManyDatagrams => write!(f, "too many datagrams for one frame"),
            Self::EmptyFrame => write!(f, "frame contains no datagrams"),
            Self::VlanNotSupported => write!(f, "VLAN tags are not supported"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Errors surfaced by a transport cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Tx(std::io::ErrorKind),
    Rx(std::io::ErrorKind),
    Frame(FrameError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx(kind) => write!(f, "transmit failed: {}", kind),
            Self::Rx(kind) => write!(f, "receive failed: {}", kind),
            Self::Frame(err) => write!(f, "frame error in transport: {}", err),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Frame(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        Self::Frame(err)
    }
}

/// Errors surfaced through the command layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Frame(FrameError),
    Transport(TransportError),
    /// No reply matched the outbound command within the cycle.
    NoFrame,
    /// A reply arrived but could not be overlaid.
    NoOverlay,
    /// The reply carries a working counter other than the expected one.
    WkcMismatch {
        command: CommandType,
        addr32: u32,
        want: u16,
        have: u16,
    },
    /// The requested datagram can never fit a frame.
    DataTooLarge(usize),
    UnsupportedAddress(AddressClass),
    ConcurrentCycle,
    Closed,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(err) => write!(f, "frame error: {}", err),
            Self::Transport(err) => write!(f, "transport error: {}", err),
            Self::NoFrame => write!(f, "frame did not arrive"),
            Self::NoOverlay => write!(f, "failed to overlay"),
            Self::WkcMismatch {
                command,
                addr32,
                want,
                have,
            } => write!(
                f,
                "working counter error, want {}, have {} on {:?} {:#010x}",
                want, have, command, addr32
            ),
            Self::DataTooLarge(len) => {
                write!(f, "data length {} exceeds the frame budget", len)
            }
            Self::UnsupportedAddress(class) => {
                write!(f, "{:?} addressing is not usable here", class)
            }
            Self::ConcurrentCycle => write!(f, "a concurrent cycle is already pending"),
            Self::Closed => write!(f, "commander is closed"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Frame(err) => Some(err),
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FrameError> for CommandError {
    fn from(err: FrameError) -> Self {
        Self::Frame(err)
    }
}

impl From<TransportError> for CommandError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}
