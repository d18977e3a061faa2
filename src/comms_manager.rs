//! Half-duplex link state machine.
//!
//! The manager task owns the connection state. Every other task talks to it by posting
//! [`CommsEvent`]s on its queue; each state handler does one blocking unit of work and the
//! outcome comes back as the next event. All transitions go through [`get_next_state`].
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use crossbeam::select;
use tracing::{debug, error, info, warn};

use crate::ax25::{UFrameCmd, AX25_FLAG};
use crate::config::CommsConfig;
use crate::downlink::TransmitEvent;
use crate::error::{CommsError, Result};
use crate::transport::ByteTransport;
use crate::uplink::UplinkFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommsState {
    Disconnected,
    AwaitingConn,
    SendingConn,
    SendingDisc,
    SendingAck,
    AwaitingAckDisc,
    AwaitingAckConn,
    Uplinking,
    Downlinking,
    EnteringEmergency,
    EmergencyUplink,
}

impl CommsState {
    /// States whose handler listens for frames from the ground.
    pub fn is_receiving(self) -> bool {
        return matches!(
            self,
            CommsState::AwaitingConn
                | CommsState::AwaitingAckConn
                | CommsState::AwaitingAckDisc
                | CommsState::Uplinking
                | CommsState::EmergencyUplink
        );
    }

    pub const ALL: [CommsState; 11] = [
        CommsState::Disconnected,
        CommsState::AwaitingConn,
        CommsState::SendingConn,
        CommsState::SendingDisc,
        CommsState::SendingAck,
        CommsState::AwaitingAckDisc,
        CommsState::AwaitingAckConn,
        CommsState::Uplinking,
        CommsState::Downlinking,
        CommsState::EnteringEmergency,
        CommsState::EmergencyUplink,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommsEvent {
    BeginUplink,
    EnterEmergency,
    BeginDownlink,
    ConnReceived,
    ConnSent,
    AckSent,
    AckReceived,
    DiscReceived,
    NoAck,
    UplinkFinished,
    StartDisc,
    DownlinkFinished,
    DiscSent,
    EmergencyInitialized,
    /// The decoder threw away a frame it could not decode.
    FrameDropped,
    Error,
}

impl CommsEvent {
    pub const ALL: [CommsEvent; 16] = [
        CommsEvent::BeginUplink,
        CommsEvent::EnterEmergency,
        CommsEvent::BeginDownlink,
        CommsEvent::ConnReceived,
        CommsEvent::ConnSent,
        CommsEvent::AckSent,
        CommsEvent::AckReceived,
        CommsEvent::DiscReceived,
        CommsEvent::NoAck,
        CommsEvent::UplinkFinished,
        CommsEvent::StartDisc,
        CommsEvent::DownlinkFinished,
        CommsEvent::DiscSent,
        CommsEvent::EmergencyInitialized,
        CommsEvent::FrameDropped,
        CommsEvent::Error,
    ];
}

/// The transition table. Any pair not listed here is an `InvalidStateTransition`.
///
/// A dropped frame keeps a listening state where it is.
pub fn get_next_state(event: CommsEvent, state: CommsState) -> Result<CommsState> {
    use CommsEvent as E;
    use CommsState as S;

    return match (state, event) {
        (_, E::Error) => Ok(S::Disconnected),
        (state, E::FrameDropped) if state.is_receiving() => Ok(state),

        (S::Disconnected, E::BeginUplink) => Ok(S::AwaitingConn),
        (S::Disconnected, E::EnterEmergency) => Ok(S::EnteringEmergency),
        (S::Disconnected, E::BeginDownlink) => Ok(S::Downlinking),
        (S::AwaitingConn, E::ConnReceived) => Ok(S::SendingAck),
        (S::SendingConn, E::ConnSent) => Ok(S::AwaitingAckConn),
        (S::SendingAck, E::AckSent) => Ok(S::Uplinking),
        (S::AwaitingAckConn, E::AckReceived) => Ok(S::EmergencyUplink),
        (S::AwaitingAckConn, E::NoAck) => Ok(S::SendingConn),
        (S::Uplinking, E::UplinkFinished) => Ok(S::Downlinking),
        (S::Uplinking, E::StartDisc) => Ok(S::SendingDisc),
        (S::Downlinking, E::DownlinkFinished) => Ok(S::SendingDisc),
        (S::SendingDisc, E::DiscSent) => Ok(S::AwaitingAckDisc),
        (S::AwaitingAckDisc, E::AckReceived) => Ok(S::Disconnected),
        (S::EnteringEmergency, E::EmergencyInitialized) => Ok(S::SendingConn),
        (S::EmergencyUplink, E::UplinkFinished) => Ok(S::Disconnected),

        (state, event) => Err(CommsError::InvalidStateTransition {
            state: state,
            event: event,
        }),
    };
}

/// Posts events to a running [`CommsManager`] and asks it to stop.
#[derive(Debug, Clone)]
pub struct CommsManagerHandle {
    events: Sender<CommsEvent>,
    shutdown: Sender<()>,
    send_timeout: Duration,
}

impl CommsManagerHandle {
    /// Queues an event, waiting at most the configured send timeout.
    pub fn post(&self, event: CommsEvent) -> Result<()> {
        return self.events.send_timeout(event, self.send_timeout).map_err(CommsError::from);
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.try_send(());
    }
}

pub struct CommsManager {
    state: CommsState,
    config: CommsConfig,
    flow: UplinkFlow,
    transport: Box<dyn ByteTransport>,
    events: Receiver<CommsEvent>,
    shutdown: Receiver<()>,
    handle: CommsManagerHandle,
    decode_queue: Sender<u8>,
    transmit_queue: Receiver<TransmitEvent>,
    conn_retries: u32,
    receive_deadline: Option<Instant>,
    observer: Option<Sender<CommsState>>,
}

impl CommsManager {
    /// # Arguments
    /// - `flow`: this station's codec, used for the connection-control frames it sends
    /// - `decode_queue`: feeds received bytes to the uplink decoder task
    /// - `transmit_queue`: frames produced by the downlink encoder
    pub fn new(
        config: CommsConfig,
        flow: UplinkFlow,
        transport: Box<dyn ByteTransport>,
        decode_queue: Sender<u8>,
        transmit_queue: Receiver<TransmitEvent>,
    ) -> Self {
        let (events_tx, events_rx) = channel::bounded::<CommsEvent>(config.event_queue_len);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);

        let handle: CommsManagerHandle = CommsManagerHandle {
            events: events_tx,
            shutdown: shutdown_tx,
            send_timeout: config.queue_send_timeout(),
        };

        return CommsManager {
            state: CommsState::Disconnected,
            config: config,
            flow: flow,
            transport: transport,
            events: events_rx,
            shutdown: shutdown_rx,
            handle: handle,
            decode_queue: decode_queue,
            transmit_queue: transmit_queue,
            conn_retries: 0,
            receive_deadline: None,
            observer: None,
        };
    }

    /// Reports every state the manager enters on `observer`.
    pub fn with_observer(mut self, observer: Sender<CommsState>) -> Self {
        self.observer = Some(observer);
        return self;
    }

    pub fn handle(&self) -> CommsManagerHandle {
        return self.handle.clone();
    }

    pub fn state(&self) -> CommsState {
        return self.state;
    }

    /// Processes events until shut down.
    pub fn run(mut self) {
        info!("comms manager started");

        loop {
            let event: CommsEvent = select! {
                recv(self.shutdown) -> _ => break,
                recv(self.events) -> event => match event {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };

            self.process_event(event);
        }

        info!(state = ?self.state, "comms manager stopped");
    }

    /// Applies one event and runs the handler of the state it leads to.
    ///
    /// An invalid event is logged and treated as an error, sending the link back to
    /// `Disconnected`. A failing handler posts `Error` for the next round. After a dropped
    /// frame the listening handler resumes against the deadline it started with.
    pub fn process_event(&mut self, event: CommsEvent) -> CommsState {
        let next: CommsState = match get_next_state(event, self.state) {
            Ok(next) => next,
            Err(err) => {
                warn!(error = %err, "rejected comms event");
                CommsState::Disconnected
            }
        };

        debug!(from = ?self.state, to = ?next, ?event, "comms transition");
        self.enter(next);

        let resume: bool = event == CommsEvent::FrameDropped && next.is_receiving();
        if !resume {
            self.receive_deadline = None;
        }

        if let Err(err) = self.run_state_handler() {
            error!(state = ?self.state, error = %err, "comms state handler failed");

            if self.handle.post(CommsEvent::Error).is_err() {
                warn!("event queue unavailable, resetting link directly");
                self.enter(CommsState::Disconnected);
            }
        }

        return self.state;
    }

    /// The observer only hears about actual changes.
    fn enter(&mut self, state: CommsState) {
        if state == self.state {
            return;
        }

        info!(state = ?state, "comms state changed");
        self.state = state;

        if let Some(observer) = &self.observer {
            let _ = observer.try_send(state);
        }
    }

    fn run_state_handler(&mut self) -> Result<()> {
        return match self.state {
            CommsState::Disconnected => {
                self.conn_retries = 0;
                Ok(())
            }
            CommsState::AwaitingConn => self.receive_frame(self.config.conn_timeout()),
            CommsState::SendingConn => {
                self.send_u_frame(UFrameCmd::Conn)?;
                self.handle.post(CommsEvent::ConnSent)
            }
            CommsState::SendingAck => {
                self.send_u_frame(UFrameCmd::Ack)?;
                self.handle.post(CommsEvent::AckSent)
            }
            CommsState::SendingDisc => {
                self.send_u_frame(UFrameCmd::Disc)?;
                self.handle.post(CommsEvent::DiscSent)
            }
            CommsState::AwaitingAckDisc => self.receive_frame(self.config.ack_timeout()),
            CommsState::AwaitingAckConn => match self.receive_frame(self.config.ack_timeout()) {
                Err(CommsError::Timeout) if self.conn_retries < self.config.max_conn_retries => {
                    self.conn_retries += 1;
                    warn!(retry = self.conn_retries, "no ACK for CONN, retrying");
                    self.handle.post(CommsEvent::NoAck)
                }
                other => other,
            },
            CommsState::Uplinking | CommsState::EmergencyUplink => self.receive_frame(self.config.conn_timeout()),
            CommsState::Downlinking => {
                self.transmit_downlink()?;
                self.handle.post(CommsEvent::DownlinkFinished)
            }
            CommsState::EnteringEmergency => {
                self.transport.reinitialize()?;
                self.handle.post(CommsEvent::EmergencyInitialized)
            }
        };
    }

    fn send_u_frame(&mut self, cmd: UFrameCmd) -> Result<()> {
        let frame = self.flow.encode_u_frame(cmd, true)?;
        debug!(?cmd, len = frame.len(), "sending U-frame");

        return self.transport.send_bytes(frame.as_slice());
    }

    /// Forwards the bytes of one frame, flag to flag, to the decoder task. The decoder
    /// posts whatever event the frame turns into, `FrameDropped` included.
    ///
    /// # Arguments
    /// - `wait`: how long the state listens in total, counted from its first call
    fn receive_frame(&mut self, wait: Duration) -> Result<()> {
        let deadline: Instant = *self.receive_deadline.get_or_insert_with(|| Instant::now() + wait);
        let mut started: bool = false;
        let mut has_body: bool = false;

        loop {
            let timeout: Duration = if has_body {
                self.config.inter_byte_timeout()
            } else {
                deadline.saturating_duration_since(Instant::now())
            };

            let byte: u8 = self.transport.receive_byte(timeout)?.ok_or(CommsError::Timeout)?;
            self.decode_queue
                .send_timeout(byte, self.config.queue_send_timeout())
                .map_err(CommsError::from)?;

            if byte == AX25_FLAG {
                if has_body {
                    return Ok(());
                }
                started = true;
            } else if started {
                has_body = true;
            }
        }
    }

    /// Ships queued downlink frames until the end marker, an idle transmit queue or the
    /// per-pass frame limit.
    fn transmit_downlink(&mut self) -> Result<()> {
        let wait: Duration = self.config.transmit_timeout();

        for sent in 0..self.config.max_downlink_frames {
            match self.transmit_queue.recv_timeout(wait) {
                Ok(TransmitEvent::Packet(frame)) => self.transport.send_bytes(frame.as_slice())?,
                Ok(TransmitEvent::EndDownlink) => {
                    info!(frames = sent, "downlink finished");
                    return Ok(());
                }
                Err(RecvTimeoutError::Timeout) => {
                    info!(frames = sent, "transmit queue idle, ending downlink");
                    return Ok(());
                }
                Err(RecvTimeoutError::Disconnected) => return Err(CommsError::ChannelClosed),
            }
        }

        warn!(max = self.config.max_downlink_frames, "downlink frame limit reached");
        return Ok(());
    }
}
