use super::{CommandSlot, Commander, DatagramIn, DatagramOut, ExecutingCommand};
use crate::error::CommandError;
use crate::frame::{CommandType, Frame, DATAGRAM_OVERHEAD_LEN};
use crate::transport::Framer;
use log::*;

struct OpenFrame {
    frame: Frame,
    seq: u64,
    /// Datagram bytes already claimed, including overhead.
    offset: usize,
}

struct QueuedFrame {
    frame: Frame,
    seq: u64,
    index: u8,
}

/// Metadata kept per outbound frame for reply matching after the frames
/// themselves have been handed to the transport.
struct OutboundRecord {
    byte_len: usize,
    index: u8,
    datagrams: Vec<(CommandType, u16)>,
    /// Caller-slice position of the command stamped at each datagram.
    commands: Vec<Option<usize>>,
}

/// Batches command records into frames of bounded size and matches replies
/// back to them after each transport cycle.
pub struct CommandFramer<F: Framer> {
    framer: F,
    max_frame_data: usize,
    current_index: u8,
    next_frame_seq: u64,
    current: Option<OpenFrame>,
    queue: Vec<QueuedFrame>,
}

impl<F: Framer> CommandFramer<F> {
    pub fn new(framer: F) -> Self {
        let max_frame_data = framer.max_frame_data();
        Self {
            framer,
            max_frame_data,
            current_index: 0,
            next_frame_seq: 1,
            current: None,
            queue: Vec::new(),
        }
    }

    pub fn framer_mut(&mut self) -> &mut F {
        &mut self.framer
    }

    fn open_frame(&mut self) {
        self.current = Some(OpenFrame {
            frame: Frame::with_data_capacity(self.max_frame_data),
            seq: self.next_frame_seq,
            offset: 0,
        });
        self.next_frame_seq += 1;
    }

    fn finish_frame(&mut self) {
        let Some(mut open) = self.current.take() else {
            return;
        };
        if open.frame.datagrams().is_empty() {
            return;
        }
        let index = self.current_index;
        self.current_index = self.current_index.wrapping_add(1);
        for datagram in open.frame.datagrams_mut() {
            datagram.index = index;
        }
        self.queue.push(QueuedFrame {
            frame: open.frame,
            seq: open.seq,
            index,
        });
    }

    /// Stamp each passed record's outbound datagram into the frame slot
    /// reserved for it, remembering where the record sits in the caller's
    /// slice.
    fn stamp_commands(&mut self, commands: &[ExecutingCommand]) -> Vec<OutboundRecord> {
        let mut records: Vec<OutboundRecord> = self
            .queue
            .iter()
            .map(|q| OutboundRecord {
                byte_len: q.frame.datagrams_byte_len(),
                index: q.index,
                datagrams: Vec::new(),
                commands: vec![None; q.frame.datagrams().len()],
            })
            .collect();

        let base_seq = self.queue.first().map(|q| q.seq).unwrap_or(0);
        for (ci, command) in commands.iter().enumerate() {
            let CommandSlot {
                frame_seq,
                position,
            } = command.slot;
            if frame_seq == 0 {
                continue;
            }
            let Some(qi) = frame_seq
                .checked_sub(base_seq)
                .map(|d| d as usize)
                .filter(|qi| base_seq != 0 && *qi < self.queue.len())
            else {
                warn!("command record belongs to an earlier cycle, ignoring it");
                continue;
            };

            let queued = &mut self.queue[qi];
            let (datagrams, buffer) = queued.frame.split_mut();
            let datagram = &mut datagrams[position];
            let out = &command.datagram_out;
            datagram.command = out.command;
            datagram.addr32 = out.addr32;

            let payload = datagram.data_mut(buffer);
            if payload.len() != out.data.len() {
                warn!(
                    "outbound data was resized from {} to {} bytes after reservation",
                    payload.len(),
                    out.data.len()
                );
            }
            let n = payload.len().min(out.data.len());
            payload[..n].copy_from_slice(&out.data[..n]);

            records[qi].commands[position] = Some(ci);
        }

        for (record, queued) in records.iter_mut().zip(&self.queue) {
            record.datagrams = queued
                .frame
                .datagrams()
                .iter()
                .map(|d| (d.command, d.data_length()))
                .collect();
        }
        records
    }

    /// Walk the inbound frames against the outbound records. The search
    /// cursor only ever advances, so a later inbound frame can only match a
    /// later outbound frame.
    fn match_replies(
        records: &[OutboundRecord],
        inbound: &[Frame],
        commands: &mut [ExecutingCommand],
    ) {
        let mut oi = 0;
        for in_frame in inbound {
            if oi >= records.len() {
                break;
            }
            for (i, record) in records.iter().enumerate().skip(oi) {
                if in_frame.datagrams_byte_len() != record.byte_len {
                    continue;
                }
                let in_datagrams = in_frame.datagrams();
                if in_datagrams.is_empty() || record.datagrams.is_empty() {
                    continue;
                }
                if in_datagrams.len() != record.datagrams.len() {
                    continue;
                }
                if in_datagrams[0].index != record.index {
                    continue;
                }

                for (j, (out_command, out_len)) in record.datagrams.iter().enumerate() {
                    let in_datagram = &in_datagrams[j];
                    if in_datagram.command != *out_command {
                        continue;
                    }
                    if in_datagram.data_length() != *out_len {
                        continue;
                    }
                    let Some(ci) = record.commands[j] else {
                        continue;
                    };
                    let command = &mut commands[ci];
                    command.arrived = true;
                    command.overlayed = true;
                    command.error = None;
                    command.datagram_in = Some(DatagramIn {
                        command: in_datagram.command,
                        addr32: in_datagram.addr32,
                        data: in_frame.datagram_data(j).to_vec(),
                        working_counter: in_datagram.working_counter,
                    });
                }

                oi = i;
                break;
            }
        }
    }
}

impl<F: Framer> Commander for CommandFramer<F> {
    fn new_command(&mut self, data_len: usize) -> Result<ExecutingCommand, CommandError> {
        let needed = data_len + DATAGRAM_OVERHEAD_LEN;
        if needed > self.max_frame_data {
            return Err(CommandError::DataTooLarge(data_len));
        }

        if let Some(open) = &self.current {
            if needed > self.max_frame_data - open.offset {
                self.finish_frame();
            }
        }
        if self.current.is_none() {
            self.open_frame();
        }

        let open = self.current.as_mut().unwrap();
        let position = open.frame.datagrams().len();
        open.frame.new_datagram(data_len)?;
        open.offset += needed;

        Ok(ExecutingCommand {
            datagram_out: DatagramOut {
                command: CommandType::NOP,
                addr32: 0,
                data: vec![0; data_len],
            },
            slot: CommandSlot {
                frame_seq: open.seq,
                position,
            },
            ..Default::default()
        })
    }

    fn cycle(&mut self, commands: &mut [ExecutingCommand]) -> Result<(), CommandError> {
        if self
            .current
            .as_ref()
            .map_or(false, |open| !open.frame.datagrams().is_empty())
        {
            self.finish_frame();
        } else {
            self.current = None;
        }

        let records = self.stamp_commands(commands);
        let outbound: Vec<Frame> = self.queue.drain(..).map(|q| q.frame).collect();
        trace!("cycle: {} outbound frames", outbound.len());

        let inbound = self.framer.cycle(outbound).map_err(CommandError::from)?;
        Self::match_replies(&records, &inbound, commands);
        Ok(())
    }

    fn close(&mut self) -> Result<(), CommandError> {
        self.framer.close().map_err(CommandError::from)
    }
}
