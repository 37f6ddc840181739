use super::Framer;
use crate::error::TransportError;
use crate::frame::Frame;
use log::*;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

/// EtherCat frames travel in UDP datagrams on port 0x88a4.
pub const ETHERCAT_UDP_PORT: u16 = 0x88a4;

const UDP_RECEIVE_BUF_LEN: usize = 1500;
/// How often the read deadline may be extended by one cycle time while
/// outstanding replies are missing.
const MAX_CYCLE_STRETCH: u32 = 10;

/// Multicast UDP transport.
///
/// Outbound frames go to the configured group; replies arrive on the same
/// socket. The receive deadline is one cycle time, stretched in one-cycle
/// increments while fewer frames than were sent have arrived.
#[derive(Debug)]
pub struct UdpFramer {
    socket: UdpSocket,
    group: SocketAddrV4,
    cycle_time: Duration,
    cycle_count: u64,
}

impl UdpFramer {
    pub fn new(
        interface: Ipv4Addr,
        group: Ipv4Addr,
        cycle_time: Duration,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, ETHERCAT_UDP_PORT))?;
        socket.join_multicast_v4(&group, &interface)?;
        socket.set_multicast_loop_v4(false)?;
        Ok(Self {
            socket,
            group: SocketAddrV4::new(group, ETHERCAT_UDP_PORT),
            cycle_time,
            cycle_count: 0,
        })
    }

    fn receive_all(&mut self, sent: usize) -> Result<Vec<Frame>, TransportError> {
        let mut inbound = Vec::new();
        let mut deadline = Instant::now() + self.cycle_time;
        let mut stretch = 0;
        let mut buf = [0u8; UDP_RECEIVE_BUF_LEN];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                if stretch < MAX_CYCLE_STRETCH && inbound.len() < sent {
                    stretch += 1;
                    deadline += self.cycle_time;
                    continue;
                }
                break;
            }
            self.socket
                .set_read_timeout(Some(remaining))
                .map_err(|e| TransportError::Rx(e.kind()))?;

            match self.socket.recv_from(&mut buf) {
                Ok((n, _)) => match Frame::overlay(&buf[..n]) {
                    Ok(frame) => inbound.push(frame),
                    // discard malformed frames
                    Err(err) => debug!("cycle {}: dropping frame: {}", self.cycle_count, err),
                },
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(e) => return Err(TransportError::Rx(e.kind())),
            }
        }
        Ok(inbound)
    }
}

impl Framer for UdpFramer {
    fn cycle(&mut self, mut frames: Vec<Frame>) -> Result<Vec<Frame>, TransportError> {
        for frame in &mut frames {
            let bytes = frame.commit()?;
            match self.socket.send_to(bytes, self.group) {
                Ok(_) => {}
                // the interface has no address while the link is down; the
                // frame counts as lost
                Err(e) if e.kind() == io::ErrorKind::AddrNotAvailable => {
                    warn!("send masked: {}", e);
                }
                Err(e) => return Err(TransportError::Tx(e.kind())),
            }
        }

        let inbound = self.receive_all(frames.len())?;
        trace!(
            "cycle {}: {} frames out, {} in",
            self.cycle_count,
            frames.len(),
            inbound.len()
        );
        self.cycle_count += 1;
        Ok(inbound)
    }
}
