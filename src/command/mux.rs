use super::{Commander, ExecutingCommand};
use crate::error::CommandError;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::*;
use std::mem;
use std::thread::{self, JoinHandle};

type CycleResponse = (Vec<ExecutingCommand>, Result<(), CommandError>);

enum Request {
    OpenChannel {
        resp: Sender<usize>,
    },
    New {
        chan: usize,
        data_len: usize,
        resp: Sender<Result<ExecutingCommand, CommandError>>,
    },
    ChannelCycle {
        chan: usize,
        commands: Vec<ExecutingCommand>,
        resp: Sender<CycleResponse>,
    },
    TopCycle {
        resp: Sender<Result<(), CommandError>>,
    },
    Shutdown,
}

/// Fans independent command producers in onto one shared commander.
///
/// A dedicated worker owns the inner commander and processes a request
/// mailbox. Every producer holds a [`MuxChannel`]; once a top-level
/// [`Multiplexer::cycle`] is pending and every channel with open commands
/// has parked inside its own `cycle`, the worker runs exactly one inner
/// cycle and hands all parties the same outcome.
pub struct Multiplexer {
    requests: Sender<Request>,
    worker: Option<JoinHandle<()>>,
}

impl Multiplexer {
    pub fn new<C>(inner: C) -> Self
    where
        C: Commander + Send + 'static,
    {
        let (requests, mailbox) = unbounded();
        let worker = thread::Builder::new()
            .name("ecat-mux".into())
            .spawn(move || Worker::new(inner, mailbox).run())
            .expect("failed to spawn the multiplexer worker");
        Self {
            requests,
            worker: Some(worker),
        }
    }

    /// Open a new producer channel.
    pub fn open_commander(&self) -> Result<MuxChannel, CommandError> {
        let (resp, rx) = bounded(1);
        self.requests
            .send(Request::OpenChannel { resp })
            .map_err(|_| CommandError::Closed)?;
        let chan = rx.recv().map_err(|_| CommandError::Closed)?;
        Ok(MuxChannel {
            chan,
            requests: self.requests.clone(),
        })
    }

    /// Release the next barrier: returns once the worker has run one inner
    /// cycle for the currently open producers.
    pub fn cycle(&self) -> Result<(), CommandError> {
        let (resp, rx) = bounded(1);
        self.requests
            .send(Request::TopCycle { resp })
            .map_err(|_| CommandError::Closed)?;
        rx.recv().map_err(|_| CommandError::Closed)?
    }

    /// Shut the worker down; producers blocked in a channel call unblock
    /// with [`CommandError::Closed`].
    pub fn close(&mut self) -> Result<(), CommandError> {
        if let Some(worker) = self.worker.take() {
            let _ = self.requests.send(Request::Shutdown);
            if worker.join().is_err() {
                error!("multiplexer worker panicked");
            }
        }
        Ok(())
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A producer-side commander bound to one multiplexer.
pub struct MuxChannel {
    chan: usize,
    requests: Sender<Request>,
}

impl Commander for MuxChannel {
    fn new_command(&mut self, data_len: usize) -> Result<ExecutingCommand, CommandError> {
        let (resp, rx) = bounded(1);
        self.requests
            .send(Request::New {
                chan: self.chan,
                data_len,
                resp,
            })
            .map_err(|_| CommandError::Closed)?;
        rx.recv().map_err(|_| CommandError::Closed)?
    }

    fn cycle(&mut self, commands: &mut [ExecutingCommand]) -> Result<(), CommandError> {
        let taken: Vec<ExecutingCommand> = commands.iter_mut().map(mem::take).collect();
        let (resp, rx) = bounded(1);
        if let Err(send_err) = self.requests.send(Request::ChannelCycle {
            chan: self.chan,
            commands: taken,
            resp,
        }) {
            // hand the records back before reporting the dead worker
            if let Request::ChannelCycle {
                commands: taken, ..
            } = send_err.0
            {
                for (slot, command) in commands.iter_mut().zip(taken) {
                    *slot = command;
                }
            }
            return Err(CommandError::Closed);
        }

        let (returned, result) = rx.recv().map_err(|_| CommandError::Closed)?;
        for (slot, command) in commands.iter_mut().zip(returned) {
            *slot = command;
        }
        result
    }
}

#[derive(Default)]
struct ControlBlock {
    commands_open: bool,
    cycling: Option<(Vec<ExecutingCommand>, Sender<CycleResponse>)>,
}

struct Worker<C> {
    inner: C,
    mailbox: Receiver<Request>,
    chans: Vec<ControlBlock>,
    pending_cycle: Option<Sender<Result<(), CommandError>>>,
}

impl<C: Commander> Worker<C> {
    fn new(inner: C, mailbox: Receiver<Request>) -> Self {
        Self {
            inner,
            mailbox,
            chans: Vec::new(),
            pending_cycle: None,
        }
    }

    fn run(mut self) {
        loop {
            self.try_cycle();
            match self.mailbox.recv() {
                Ok(Request::Shutdown) | Err(_) => break,
                Ok(request) => self.handle(request),
            }
        }
        self.shutdown();
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::OpenChannel { resp } => {
                self.chans.push(ControlBlock::default());
                let _ = resp.send(self.chans.len() - 1);
            }
            Request::New {
                chan,
                data_len,
                resp,
            } => {
                let result = self.inner.new_command(data_len);
                if result.is_ok() {
                    self.chans[chan].commands_open = true;
                }
                let _ = resp.send(result);
            }
            Request::ChannelCycle {
                chan,
                commands,
                resp,
            } => {
                let block = &mut self.chans[chan];
                if block.cycling.is_some() {
                    let _ = resp.send((commands, Err(CommandError::ConcurrentCycle)));
                } else {
                    block.cycling = Some((commands, resp));
                }
            }
            Request::TopCycle { resp } => {
                if self.pending_cycle.is_some() {
                    let _ = resp.send(Err(CommandError::ConcurrentCycle));
                } else {
                    self.pending_cycle = Some(resp);
                }
            }
            Request::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    /// Run the barrier once a top-level cycle is pending and no channel is
    /// still filling in commands.
    fn try_cycle(&mut self) {
        if self.pending_cycle.is_none() {
            return;
        }
        let all_cycling = self
            .chans
            .iter()
            .all(|block| !block.commands_open || block.cycling.is_some());
        if !all_cycling {
            return;
        }

        let mut all = Vec::new();
        let mut counts = Vec::with_capacity(self.chans.len());
        for block in &mut self.chans {
            let count = match &mut block.cycling {
                Some((commands, _)) => {
                    let count = commands.len();
                    all.append(commands);
                    count
                }
                None => 0,
            };
            counts.push(count);
        }

        let result = self.inner.cycle(&mut all);
        debug!(
            "multiplexed cycle over {} commands: {:?}",
            all.len(),
            result.as_ref().err()
        );

        let mut rest = all;
        for (block, count) in self.chans.iter_mut().zip(counts) {
            block.commands_open = false;
            if let Some((_, resp)) = block.cycling.take() {
                let tail = rest.split_off(count);
                let _ = resp.send((rest, result.clone()));
                rest = tail;
            }
        }

        if let Some(resp) = self.pending_cycle.take() {
            let _ = resp.send(result);
        }
    }

    fn shutdown(&mut self) {
        for block in &mut self.chans {
            if let Some((commands, resp)) = block.cycling.take() {
                let _ = resp.send((commands, Err(CommandError::Closed)));
            }
        }
        if let Some(resp) = self.pending_cycle.take() {
            let _ = resp.send(Err(CommandError::Closed));
        }
        if let Err(err) = self.inner.close() {
            warn!("closing the inner commander failed: {}", err);
        }
    }
}
