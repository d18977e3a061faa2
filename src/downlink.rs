//! Satellite-to-ground telemetry flow.
//!
//! Packed telemetry records are gathered into 223-byte blocks, each block is
//! Reed-Solomon encoded, framed as an I-frame, stuffed and queued for the transmitter.
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Sender;
use tracing::{debug, info, warn};

use crate::ax25::{send_i_frame, stuff_frame, FrameBytes, IFrameControl, ReceivedFrame};
use crate::config::LinkAddresses;
use crate::error::{CommsError, Result};
use crate::reed_solomon::{ReedSolomon, RS_MESSAGE_LEN};
use crate::telemetry::{pack_telemetry, unpack_telemetry_block, TelemetryRecord, MAX_TELEM_RECORD_SIZE};
use crate::transport::TelemetrySource;
use crate::uplink::deframe;

/// Items on the outbound transmit queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmitEvent {
    /// A stuffed frame ready to go out.
    Packet(FrameBytes),
    /// No more frames for this pass.
    EndDownlink,
}

/// Accumulates packed records into blocks without ever splitting a record.
#[derive(Debug, Clone)]
pub struct TelemetryPacker {
    block: [u8; RS_MESSAGE_LEN],
    used: usize,
}

impl Default for TelemetryPacker {
    fn default() -> Self {
        return Self::new();
    }
}

impl TelemetryPacker {
    pub fn new() -> Self {
        return TelemetryPacker {
            block: [0u8; RS_MESSAGE_LEN],
            used: 0,
        };
    }

    pub fn used(&self) -> usize {
        return self.used;
    }

    /// Adds one packed record.
    ///
    /// # Returns
    /// The current block, ready to send, when `record` doesn't fit behind it. The record
    /// then starts the next block. Records longer than a block are rejected.
    pub fn push_packed(&mut self, record: &[u8]) -> Result<Option<[u8; RS_MESSAGE_LEN]>> {
        if record.len() > RS_MESSAGE_LEN {
            return Err(CommsError::InvalidArgument("telemetry record is larger than a downlink block"));
        }

        let mut flushed: Option<[u8; RS_MESSAGE_LEN]> = None;
        if self.used + record.len() > RS_MESSAGE_LEN {
            flushed = self.finish();
        }

        self.block[self.used..self.used + record.len()].copy_from_slice(record);
        self.used += record.len();

        return Ok(flushed);
    }

    pub fn push(&mut self, record: &TelemetryRecord) -> Result<Option<[u8; RS_MESSAGE_LEN]>> {
        let mut packed: [u8; MAX_TELEM_RECORD_SIZE] = [0u8; MAX_TELEM_RECORD_SIZE];
        let len: usize = pack_telemetry(record, &mut packed)?;

        return self.push_packed(&packed[..len]);
    }

    /// The partially filled block, zero-padded, or `None` if nothing is pending.
    pub fn finish(&mut self) -> Option<[u8; RS_MESSAGE_LEN]> {
        if self.used == 0 {
            return None;
        }

        let block: [u8; RS_MESSAGE_LEN] = self.block;
        self.block = [0u8; RS_MESSAGE_LEN];
        self.used = 0;

        return Some(block);
    }
}

/// Turns telemetry into frames on the transmit queue.
pub struct DownlinkEncoder {
    rs: Arc<ReedSolomon>,
    addresses: LinkAddresses,
    transmit: Sender<TransmitEvent>,
    send_timeout: Duration,
    send_seq: u8,
}

impl DownlinkEncoder {
    pub fn new(
        rs: Arc<ReedSolomon>,
        addresses: LinkAddresses,
        transmit: Sender<TransmitEvent>,
        send_timeout: Duration,
    ) -> Self {
        return DownlinkEncoder {
            rs: rs,
            addresses: addresses,
            transmit: transmit,
            send_timeout: send_timeout,
            send_seq: 0,
        };
    }

    /// Encodes one block into a stuffed I-frame, advancing N(S) modulo 128.
    pub fn encode_block(&mut self, block: &[u8; RS_MESSAGE_LEN]) -> Result<FrameBytes> {
        let codeword = self.rs.encode(block)?;
        let control: IFrameControl = IFrameControl::new(self.send_seq, 0, false)?;

        let frame: FrameBytes = send_i_frame(&codeword, control, &self.addresses.dest, &self.addresses.src)?;
        self.send_seq = (self.send_seq + 1) % 128;

        return stuff_frame(&frame);
    }

    fn enqueue(&self, event: TransmitEvent) -> Result<()> {
        return self.transmit.send_timeout(event, self.send_timeout).map_err(|err| {
            let err: CommsError = err.into();
            warn!(error = %err, "transmit queue rejected downlink event");
            err
        });
    }

    pub fn send_block(&mut self, block: &[u8; RS_MESSAGE_LEN]) -> Result<()> {
        let seq: u8 = self.send_seq;
        let frame: FrameBytes = self.encode_block(block)?;
        debug!(len = frame.len(), seq, "queueing downlink frame");

        return self.enqueue(TransmitEvent::Packet(frame));
    }

    /// Drains `source` into frames, followed by the end-of-downlink marker.
    ///
    /// # Returns
    /// The number of frames queued.
    pub fn send_telemetry(&mut self, source: &mut dyn TelemetrySource) -> Result<usize> {
        let mut packer: TelemetryPacker = TelemetryPacker::new();
        let mut frames: usize = 0;

        while let Some(record) = source.next_telemetry()? {
            if let Some(block) = packer.push(&record)? {
                self.send_block(&block)?;
                frames += 1;
            }
        }

        if let Some(block) = packer.finish() {
            self.send_block(&block)?;
            frames += 1;
        }

        self.enqueue(TransmitEvent::EndDownlink)?;
        info!(frames, "downlink queued");

        return Ok(frames);
    }
}

/// A downlink frame as the ground station sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct DownlinkFrame {
    pub control: IFrameControl,
    pub records: Vec<TelemetryRecord>,
}

/// Ground-side decode of one stuffed downlink frame.
pub fn decode_downlink_frame(rs: &ReedSolomon, addresses: &LinkAddresses, stuffed: &[u8]) -> Result<DownlinkFrame> {
    return match deframe(rs, stuffed)? {
        ReceivedFrame::Data { header, control, info } => {
            if !addresses.is_for_us(&header.dest) {
                return Err(CommsError::InvalidFrame("frame is not addressed to this station"));
            }

            Ok(DownlinkFrame {
                control: control,
                records: unpack_telemetry_block(&info[..RS_MESSAGE_LEN])?,
            })
        }
        ReceivedFrame::Control { .. } => Err(CommsError::InvalidFrame("expected a telemetry I-frame")),
    };
}
