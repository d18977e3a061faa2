use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use tracing::{debug, info, warn};

use crate::ax25::{FrameBytes, UFrameCmd, AX25_FLAG};
use crate::command::{CmdId, CmdMsg};
use crate::comms_manager::{CommsEvent, CommsManagerHandle};
use crate::timer::OneShotTimer;
use crate::transport::CommandDispatcher;
use crate::uplink::{DecodedUplink, UplinkFlow};

/// Collects stuffed frames out of a byte stream.
///
/// Bytes before an opening flag are ignored and back-to-back flags are idle fill. A
/// closing flag also opens the next frame.
#[derive(Debug, Clone, Default)]
pub struct FrameAccumulator {
    buffer: FrameBytes,
    in_frame: bool,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        return Self::default();
    }

    /// Feeds one byte, returning a complete stuffed frame once its closing flag arrives.
    pub fn push(&mut self, byte: u8) -> Option<FrameBytes> {
        if !self.in_frame {
            if byte == AX25_FLAG {
                self.start();
            }
            return None;
        }

        if byte == AX25_FLAG {
            if self.buffer.len() == 1 {
                return None;
            }

            let mut frame: FrameBytes = self.buffer;
            if frame.push(AX25_FLAG).is_err() {
                warn!("frame overflowed before its closing flag");
                self.start();
                return None;
            }

            self.start();
            return Some(frame);
        }

        if self.buffer.push(byte).is_err() {
            warn!(len = self.buffer.len(), "frame too long, dropping it");
            self.reset();
        }

        return None;
    }

    /// Whether a frame has started and holds data past its opening flag.
    pub fn is_mid_frame(&self) -> bool {
        return self.in_frame && self.buffer.len() > 1;
    }

    /// Drops any partial frame and waits for the next opening flag.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.in_frame = false;
    }

    fn start(&mut self) {
        self.buffer.clear();
        // capacity is never zero
        let _ = self.buffer.push(AX25_FLAG);
        self.in_frame = true;
    }
}

/// The task that turns received bytes into link events and dispatched commands.
pub struct UplinkDecoder {
    flow: UplinkFlow,
    manager: CommsManagerHandle,
    dispatcher: Box<dyn CommandDispatcher>,
    bytes: Receiver<u8>,
    flag_timeout: Duration,
    accumulator: FrameAccumulator,
    timer: Option<OneShotTimer>,
    timer_generation: u64,
}

impl UplinkDecoder {
    pub fn new(
        flow: UplinkFlow,
        manager: CommsManagerHandle,
        dispatcher: Box<dyn CommandDispatcher>,
        bytes: Receiver<u8>,
        flag_timeout: Duration,
    ) -> Self {
        return UplinkDecoder {
            flow: flow,
            manager: manager,
            dispatcher: dispatcher,
            bytes: bytes,
            flag_timeout: flag_timeout,
            accumulator: FrameAccumulator::new(),
            timer: None,
            timer_generation: 0,
        };
    }

    /// Runs until every byte sender is gone.
    pub fn run(mut self) {
        let (timeout_tx, timeout_rx) = channel::bounded::<u64>(1);
        info!("uplink decoder started");

        loop {
            select! {
                recv(self.bytes) -> byte => match byte {
                    Ok(byte) => self.on_byte(byte, &timeout_tx),
                    Err(_) => break,
                },
                recv(timeout_rx) -> generation => {
                    if let Ok(generation) = generation {
                        self.on_flag_timeout(generation);
                    }
                }
            }
        }

        info!("uplink decoder stopped");
    }

    fn on_byte(&mut self, byte: u8, timeouts: &Sender<u64>) {
        let was_mid_frame: bool = self.accumulator.is_mid_frame();

        match self.accumulator.push(byte) {
            Some(frame) => {
                self.stop_timer();
                self.handle_frame(frame.as_slice());
            }
            None => {
                if !was_mid_frame && self.accumulator.is_mid_frame() {
                    self.timer_generation += 1;
                    self.timer = Some(OneShotTimer::start(self.flag_timeout, timeouts.clone(), self.timer_generation));
                }
            }
        }
    }

    fn on_flag_timeout(&mut self, generation: u64) {
        if generation != self.timer_generation || !self.accumulator.is_mid_frame() {
            return;
        }

        warn!("no closing flag before the flag timeout, dropping partial frame");
        self.accumulator.reset();
        self.timer = None;
    }

    fn stop_timer(&mut self) {
        self.timer_generation += 1;
        self.timer = None;
    }

    /// Decodes one frame and posts the event it stands for. A frame that fails any layer is
    /// dropped, and the manager goes back to listening.
    pub fn handle_frame(&mut self, frame: &[u8]) {
        let event: CommsEvent = match self.flow.decode_packet(frame) {
            Ok(DecodedUplink::Control { cmd, .. }) => match cmd {
                UFrameCmd::Conn => CommsEvent::ConnReceived,
                UFrameCmd::Ack => CommsEvent::AckReceived,
                UFrameCmd::Disc => CommsEvent::DiscReceived,
            },
            Ok(DecodedUplink::Commands(commands)) => self.dispatch_all(commands),
            Err(err) => {
                warn!(error = %err, len = frame.len(), "dropping uplink frame");
                CommsEvent::FrameDropped
            }
        };

        if let Err(err) = self.manager.post(event) {
            warn!(error = %err, ?event, "could not post decoder event");
        }
    }

    fn dispatch_all(&mut self, commands: Vec<CmdMsg>) -> CommsEvent {
        let mut disconnect: bool = false;

        for cmd in commands {
            debug!(id = ?cmd.id(), timestamp = cmd.timestamp, "dispatching command");
            disconnect |= cmd.id() == CmdId::UplinkDisc;

            if let Err(err) = self.dispatcher.dispatch(cmd) {
                warn!(error = %err, id = ?cmd.id(), "command dispatch failed");
            }
        }

        return if disconnect {
            CommsEvent::StartDisc
        } else {
            CommsEvent::UplinkFinished
        };
    }
}
