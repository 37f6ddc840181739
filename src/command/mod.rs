mod framer;
mod mux;

pub use framer::*;
pub use mux::*;

use crate::error::CommandError;
use crate::frame::{CommandType, DatagramAddress};
use log::*;
use std::time::Instant;

/// Reservation handle tying a command record to the datagram the framer set
/// aside for it. Frame sequence numbers start at 1; a zeroed slot marks a
/// record that was never reserved (the `Default` state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct CommandSlot {
    pub frame_seq: u64,
    pub position: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DatagramOut {
    pub command: CommandType,
    pub addr32: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DatagramIn {
    pub command: CommandType,
    pub addr32: u32,
    pub data: Vec<u8>,
    pub working_counter: u16,
}

/// Binding record between an outbound datagram and its eventual reply.
///
/// Obtained from [`Commander::new_command`], stamped by the caller, then
/// resolved by the next [`Commander::cycle`] it is handed to.
#[derive(Debug, Clone, Default)]
pub struct ExecutingCommand {
    pub datagram_out: DatagramOut,
    pub datagram_in: Option<DatagramIn>,
    pub arrived: bool,
    pub overlayed: bool,
    pub error: Option<CommandError>,
    pub(crate) slot: CommandSlot,
}

/// The synchronous command-issuing interface, implemented by the command
/// framer and by a multiplexer channel.
pub trait Commander {
    /// Reserve a datagram with a `data_len`-byte payload in the cycle under
    /// construction.
    fn new_command(&mut self, data_len: usize) -> Result<ExecutingCommand, CommandError>;

    /// Run one bus cycle, resolving the passed command records in place.
    fn cycle(&mut self, commands: &mut [ExecutingCommand]) -> Result<(), CommandError>;

    fn close(&mut self) -> Result<(), CommandError> {
        Ok(())
    }
}

/// The error a resolved command reports by default: lost frame, failed
/// overlay, or whatever the cycle recorded.
pub fn choose_default_error(command: &ExecutingCommand) -> Option<CommandError> {
    if !command.arrived {
        return Some(CommandError::NoFrame);
    }
    if !command.overlayed {
        return Some(CommandError::NoOverlay);
    }
    command.error.clone()
}

/// Retry policy for [`execute_read`] and [`execute_write`].
#[derive(Debug, Clone, Copy)]
pub struct ExecuteOptions {
    /// Cycles that may come back without a reply before giving up.
    pub frameloss_tries: u32,
    /// Working-counter mismatches are retried until this deadline.
    pub wc_deadline: Option<Instant>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            frameloss_tries: 3,
            wc_deadline: None,
        }
    }
}

/// Read `n` bytes from `addr`, expecting `expected_wc` slaves to serve the
/// command.
pub fn execute_read<C: Commander>(
    commander: &mut C,
    addr: DatagramAddress,
    n: usize,
    expected_wc: u16,
    options: ExecuteOptions,
) -> Result<Vec<u8>, CommandError> {
    let command = addr.read_command()?;
    execute(commander, command, addr, None, n, expected_wc, options)
}

/// Write `data` to `addr`, expecting `expected_wc` slaves to accept it.
pub fn execute_write<C: Commander>(
    commander: &mut C,
    addr: DatagramAddress,
    data: &[u8],
    expected_wc: u16,
    options: ExecuteOptions,
) -> Result<Vec<u8>, CommandError> {
    let command = addr.write_command()?;
    execute(
        commander,
        command,
        addr,
        Some(data),
        data.len(),
        expected_wc,
        options,
    )
}

fn execute<C: Commander>(
    commander: &mut C,
    command: CommandType,
    addr: DatagramAddress,
    write_data: Option<&[u8]>,
    n: usize,
    expected_wc: u16,
    options: ExecuteOptions,
) -> Result<Vec<u8>, CommandError> {
    let mut frameloss_left = options.frameloss_tries;
    loop {
        let mut commands = [commander.new_command(n)?];
        {
            let out = &mut commands[0].datagram_out;
            out.command = command;
            out.addr32 = addr.addr32();
            if let Some(data) = write_data {
                out.data.copy_from_slice(data);
            }
        }
        commander.cycle(&mut commands)?;
        let [mut resolved] = commands;

        if !resolved.arrived && frameloss_left > 0 {
            frameloss_left -= 1;
            debug!(
                "{:?} {:#010x}: frame lost, {} tries left",
                command, addr.addr32(), frameloss_left
            );
            continue;
        }
        if let Some(err) = choose_default_error(&resolved) {
            return Err(err);
        }

        let reply = resolved.datagram_in.take().ok_or(CommandError::NoFrame)?;
        if reply.working_counter != expected_wc {
            let may_retry = options
                .wc_deadline
                .map_or(false, |deadline| Instant::now() < deadline);
            if may_retry {
                debug!(
                    "{:?} {:#010x}: wkc {} != {}, retrying",
                    command, addr.addr32(), reply.working_counter, expected_wc
                );
                continue;
            }
            return Err(CommandError::WkcMismatch {
                command,
                addr32: addr.addr32(),
                want: expected_wc,
                have: reply.working_counter,
            });
        }
        return Ok(reply.data);
    }
}

pub fn execute_read_u8<C: Commander>(
    commander: &mut C,
    addr: DatagramAddress,
    expected_wc: u16,
    options: ExecuteOptions,
) -> Result<u8, CommandError> {
    let buf = execute_read(commander, addr, 1, expected_wc, options)?;
    Ok(u8::from_le_bytes([buf[0]]))
}

pub fn execute_read_u16<C: Commander>(
    commander: &mut C,
    addr: DatagramAddress,
    expected_wc: u16,
    options: ExecuteOptions,
) -> Result<u16, CommandError> {
    let buf = execute_read(commander, addr, 2, expected_wc, options)?;
    Ok(u16::from_le_bytes([buf[0], buf[1]]))
}

pub fn execute_read_u32<C: Commander>(
    commander: &mut C,
    addr: DatagramAddress,
    expected_wc: u16,
    options: ExecuteOptions,
) -> Result<u32, CommandError> {
    let buf = execute_read(commander, addr, 4, expected_wc, options)?;
    Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

pub fn execute_write_u8<C: Commander>(
    commander: &mut C,
    addr: DatagramAddress,
    value: u8,
    expected_wc: u16,
    options: ExecuteOptions,
) -> Result<(), CommandError> {
    execute_write(commander, addr, &value.to_le_bytes(), expected_wc, options).map(|_| ())
}

pub fn execute_write_u16<C: Commander>(
    commander: &mut C,
    addr: DatagramAddress,
    value: u16,
    expected_wc: u16,
    options: ExecuteOptions,
) -> Result<(), CommandError> {
    execute_write(commander, addr, &value.to_le_bytes(), expected_wc, options).map(|_| ())
}

pub fn execute_write_u32<C: Commander>(
    commander: &mut C,
    addr: DatagramAddress,
    value: u32,
    expected_wc: u16,
    options: ExecuteOptions,
) -> Result<(), CommandError> {
    execute_write(commander, addr, &value.to_le_bytes(), expected_wc, options).map(|_| ())
}
