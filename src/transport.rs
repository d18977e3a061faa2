//! Seams to the world outside the link stack: the radio byte stream, the application that
//! runs commands, and the store that produces telemetry.
use std::collections::VecDeque;
use std::io::Read;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::command::CmdMsg;
use crate::error::{CommsError, Result};
use crate::telemetry::{unpack_telemetry, TelemetryRecord, MAX_TELEM_RECORD_SIZE};

/// A half-duplex byte stream to the radio or UART.
pub trait ByteTransport: Send {
    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Waits up to `timeout` for one byte, `Ok(None)` on timeout.
    fn receive_byte(&mut self, timeout: Duration) -> Result<Option<u8>>;

    /// Brings the radio back to a known state, used when entering emergency mode.
    fn reinitialize(&mut self) -> Result<()> {
        return Ok(());
    }
}

/// Hands fully decoded commands to the application.
pub trait CommandDispatcher: Send {
    fn dispatch(&mut self, cmd: CmdMsg) -> Result<()>;
}

impl<F> CommandDispatcher for F
where
    F: FnMut(CmdMsg) -> Result<()> + Send,
{
    fn dispatch(&mut self, cmd: CmdMsg) -> Result<()> {
        return self(cmd);
    }
}

/// Pull-based source of pending telemetry, `Ok(None)` once drained.
pub trait TelemetrySource {
    fn next_telemetry(&mut self) -> Result<Option<TelemetryRecord>>;
}

/// One end of an in-memory byte link.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Sender<u8>,
    rx: Receiver<u8>,
}

impl ChannelTransport {
    /// Two connected ends, bytes sent on one are received on the other.
    pub fn pair(capacity: usize) -> (ChannelTransport, ChannelTransport) {
        let (a_tx, b_rx) = channel::bounded::<u8>(capacity);
        let (b_tx, a_rx) = channel::bounded::<u8>(capacity);

        return (
            ChannelTransport { tx: a_tx, rx: a_rx },
            ChannelTransport { tx: b_tx, rx: b_rx },
        );
    }
}

impl ByteTransport for ChannelTransport {
    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for &byte in bytes {
            self.tx.send(byte).map_err(|_| CommsError::ChannelClosed)?;
        }

        return Ok(());
    }

    fn receive_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        return match self.rx.recv_timeout(timeout) {
            Ok(byte) => Ok(Some(byte)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CommsError::ChannelClosed),
        };
    }
}

/// Telemetry held in memory.
#[derive(Debug, Default)]
pub struct BufferTelemetrySource {
    records: VecDeque<TelemetryRecord>,
}

impl BufferTelemetrySource {
    pub fn new(records: impl IntoIterator<Item = TelemetryRecord>) -> Self {
        return BufferTelemetrySource {
            records: records.into_iter().collect(),
        };
    }

    pub fn push(&mut self, record: TelemetryRecord) {
        self.records.push_back(record);
    }
}

impl TelemetrySource for BufferTelemetrySource {
    fn next_telemetry(&mut self) -> Result<Option<TelemetryRecord>> {
        return Ok(self.records.pop_front());
    }
}

/// Telemetry read back from a store of packed records, such as a telemetry file.
pub struct ReaderTelemetrySource<R: Read> {
    reader: R,
    buffer: Vec<u8>,
    offset: usize,
    exhausted: bool,
}

impl<R: Read> ReaderTelemetrySource<R> {
    pub fn new(reader: R) -> Self {
        return ReaderTelemetrySource {
            reader: reader,
            buffer: Vec::new(),
            offset: 0,
            exhausted: false,
        };
    }

    fn fill(&mut self) -> Result<()> {
        self.buffer.drain(..self.offset);
        self.offset = 0;

        let mut chunk: [u8; 256] = [0u8; 256];
        while !self.exhausted && self.buffer.len() < MAX_TELEM_RECORD_SIZE {
            let read: usize = self.reader.read(&mut chunk)?;
            if read == 0 {
                self.exhausted = true;
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }

        return Ok(());
    }
}

impl<R: Read> TelemetrySource for ReaderTelemetrySource<R> {
    fn next_telemetry(&mut self) -> Result<Option<TelemetryRecord>> {
        if self.buffer.len() - self.offset < MAX_TELEM_RECORD_SIZE {
            self.fill()?;
        }

        return unpack_telemetry(&self.buffer, &mut self.offset);
    }
}
