//! Ground-to-satellite packet flow.
//!
//! Send path: command pack, AES, Reed-Solomon, AX.25 I-frame, bit stuffing.
//! Receive path: the same layers undone in reverse, U-frames short-circuit to the
//! connection state machine.
use std::sync::Arc;

use tracing::{debug, warn};

use crate::aes128::{AesContext, AES_IV_SIZE};
use crate::ax25::{
    info_field_mut, peek_frame_type, recv, send_i_frame, send_u_frame, stuff_frame, unstuff_frame, FrameBytes,
    FrameType, IFrameControl, ReceivedFrame, UFrameCmd,
};
use crate::command::{pack_cmd_list, unpack_cmd_list, CmdMsg};
use crate::config::LinkAddresses;
use crate::error::{CommsError, Result};
use crate::reed_solomon::{ReedSolomon, RS_MESSAGE_LEN};

/// What one uplink frame turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedUplink {
    Control { cmd: UFrameCmd, poll_final: bool },
    Commands(Vec<CmdMsg>),
}

/// Unstuffs a frame, Reed-Solomon corrects the information field of I-frames in place and
/// parses the result. The FCS is checked over the corrected frame.
pub fn deframe(rs: &ReedSolomon, stuffed: &[u8]) -> Result<ReceivedFrame> {
    let mut unstuffed: FrameBytes = unstuff_frame(stuffed)?;

    if peek_frame_type(unstuffed.as_slice())? == FrameType::Information {
        let corrected: usize = rs.decode_in_place(info_field_mut(unstuffed.as_mut_slice())?)?;
        if corrected > 0 {
            debug!(corrected, "corrected bytes in information field");
        }
    }

    return recv(unstuffed.as_slice());
}

/// The uplink codec of one station, holding shared read-only codec contexts.
#[derive(Debug, Clone)]
pub struct UplinkFlow {
    rs: Arc<ReedSolomon>,
    aes: Arc<AesContext>,
    addresses: LinkAddresses,
}

impl UplinkFlow {
    pub fn new(rs: Arc<ReedSolomon>, aes: Arc<AesContext>, addresses: LinkAddresses) -> Self {
        return UplinkFlow {
            rs: rs,
            aes: aes,
            addresses: addresses,
        };
    }

    pub fn addresses(&self) -> &LinkAddresses {
        return &self.addresses;
    }

    pub fn payload_capacity(&self) -> usize {
        return self.aes.payload_capacity();
    }

    /// Encrypts, FEC-encodes, frames and stuffs one plaintext payload.
    pub fn encode_packet(&self, plaintext: &[u8], iv: &[u8; AES_IV_SIZE]) -> Result<FrameBytes> {
        let block: [u8; RS_MESSAGE_LEN] = self.aes.seal_block(plaintext, iv)?;
        let codeword = self.rs.encode(&block)?;

        let frame: FrameBytes = send_i_frame(
            &codeword,
            IFrameControl::default(),
            &self.addresses.dest,
            &self.addresses.src,
        )?;

        return stuff_frame(&frame);
    }

    /// Packs `commands` back to back and encodes them as one frame.
    pub fn encode_commands(&self, commands: &[CmdMsg], iv: &[u8; AES_IV_SIZE]) -> Result<FrameBytes> {
        let mut payload: Vec<u8> = vec![0u8; self.payload_capacity()];
        let used: usize = pack_cmd_list(&mut payload, commands)?;
        payload.truncate(used);

        return self.encode_packet(&payload, iv);
    }

    /// A stuffed connection-control frame.
    pub fn encode_u_frame(&self, cmd: UFrameCmd, poll_final: bool) -> Result<FrameBytes> {
        let frame: FrameBytes = send_u_frame(cmd, poll_final, &self.addresses.dest, &self.addresses.src)?;

        return stuff_frame(&frame);
    }

    /// Decodes one complete stuffed frame.
    ///
    /// Any failing layer drops the whole frame, no partially decoded commands are returned.
    pub fn decode_packet(&self, stuffed: &[u8]) -> Result<DecodedUplink> {
        let frame: ReceivedFrame = deframe(&self.rs, stuffed)?;

        if !self.addresses.is_for_us(&frame.header().dest) {
            warn!(dest = %frame.header().dest.callsign(), "dropping frame addressed to another station");
            return Err(CommsError::InvalidFrame("frame is not addressed to this station"));
        }

        return match frame {
            ReceivedFrame::Control { cmd, poll_final, .. } => Ok(DecodedUplink::Control {
                cmd: cmd,
                poll_final: poll_final,
            }),
            ReceivedFrame::Data { info, .. } => {
                let mut block: [u8; RS_MESSAGE_LEN] = [0u8; RS_MESSAGE_LEN];
                block.copy_from_slice(&info[..RS_MESSAGE_LEN]);

                let plaintext: Vec<u8> = self.aes.open_block(&block)?;
                Ok(DecodedUplink::Commands(unpack_cmd_list(&plaintext)?))
            }
        };
    }
}
