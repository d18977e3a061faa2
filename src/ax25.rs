use crc::{Crc, CRC_16_IBM_SDLC};
use tracing::trace;

use crate::bits::{BitReader, BitWriter};
use crate::error::{CommsError, Result};

pub const AX25_FLAG: u8 = 0x7E;

/// Protocol identifier for "no layer 3 protocol".
pub const AX25_PID_NO_L3: u8 = 0xF0;

pub const AX25_ADDRESS_LEN: usize = 7;
pub const AX25_CALLSIGN_LEN: usize = 6;
pub const AX25_FCS_LEN: usize = 2;

/// Length of the information field of an I-frame, one Reed-Solomon codeword.
pub const AX25_INFO_LEN: usize = 255;

pub const AX25_I_CONTROL_LEN: usize = 2;
pub const AX25_U_CONTROL_LEN: usize = 1;

const CONTROL_POSITION: usize = 1 + 2 * AX25_ADDRESS_LEN;
const I_PID_POSITION: usize = CONTROL_POSITION + AX25_I_CONTROL_LEN;
const I_INFO_POSITION: usize = I_PID_POSITION + 1;

/// flag + addresses + control + pid + info + fcs + flag
pub const AX25_I_FRAME_LEN: usize =
    1 + 2 * AX25_ADDRESS_LEN + AX25_I_CONTROL_LEN + 1 + AX25_INFO_LEN + AX25_FCS_LEN + 1;

/// flag + addresses + control + pid + fcs + flag
pub const AX25_U_FRAME_LEN: usize = 1 + 2 * AX25_ADDRESS_LEN + AX25_U_CONTROL_LEN + 1 + AX25_FCS_LEN + 1;

/// Worst case after bit stuffing, one extra bit for every five.
pub const AX25_MAX_STUFFED_LEN: usize = AX25_I_FRAME_LEN * 6 / 5;

pub const CUBESAT_CALLSIGN: &str = "AKITO";
pub const GROUND_STATION_CALLSIGN: &str = "ATLAS";
pub const DEFAULT_SSID: u8 = 0;

const U_CONTROL_CONN: u8 = 0b0110_1111;
const U_CONTROL_DISC: u8 = 0b0100_0011;
const U_CONTROL_ACK: u8 = 0b0110_0011;
const POLL_FINAL_BIT: u8 = 0b0001_0000;

const FCS: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// A fixed-capacity byte buffer with a write pointer, used for frames on both sides of
/// the stuffing step.
///
/// # Fields
/// - `bytes`: backing storage, only `bytes[..pointer]` is meaningful
/// - `pointer`: number of bytes written
#[derive(Clone, Copy, Debug)]
pub struct Bytes<const N: usize> {
    pub bytes: [u8; N],
    pub pointer: usize,
}

/// Only the written bytes take part in comparisons.
impl<const N: usize> PartialEq for Bytes<N> {
    fn eq(&self, other: &Self) -> bool {
        return self.as_slice() == other.as_slice();
    }
}

impl<const N: usize> Eq for Bytes<N> {}

impl<const N: usize> Default for Bytes<N> {
    fn default() -> Self {
        return Self::new();
    }
}

impl<const N: usize> Bytes<N> {
    pub fn new() -> Bytes<N> {
        return Bytes {
            bytes: [0; N],
            pointer: 0,
        };
    }

    pub fn push(&mut self, value: u8) -> Result<()> {
        if self.pointer >= N {
            return Err(CommsError::BufferTooSmall {
                needed: self.pointer + 1,
                available: N,
            });
        }

        self.bytes[self.pointer] = value;
        self.pointer += 1;

        return Ok(());
    }

    pub fn extend(&mut self, values: &[u8]) -> Result<()> {
        if values.len() + self.pointer > N {
            return Err(CommsError::BufferTooSmall {
                needed: values.len() + self.pointer,
                available: N,
            });
        }

        self.bytes[self.pointer..self.pointer + values.len()].copy_from_slice(values);
        self.pointer += values.len();

        return Ok(());
    }

    pub fn as_slice(&self) -> &[u8] {
        return &self.bytes[..self.pointer];
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        return &mut self.bytes[..self.pointer];
    }

    pub fn len(&self) -> usize {
        return self.pointer;
    }

    pub fn is_empty(&self) -> bool {
        return self.pointer == 0;
    }

    pub fn clear(&mut self) {
        self.pointer = 0;
    }
}

/// Buffer large enough for any frame, stuffed or not.
pub type FrameBytes = Bytes<AX25_MAX_STUFFED_LEN>;

/// A packed AX.25 address: six shifted callsign characters followed by the SSID byte.
///
/// The SSID byte is laid out as `C | 1 | 1 | SSID(4) | E`, where `C` is the
/// command/response bit and `E` marks the last address of the header.
///
/// # Example
/// ```
/// use obc_gs_link::ax25::Address;
///
/// let addr = Address::new("AKITO", 0, false, false).unwrap();
/// assert_eq!(addr.callsign(), "AKITO");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub bytes: [u8; AX25_ADDRESS_LEN],
}

impl Address {
    /// Packs a callsign and an SSID.
    ///
    /// # Fields
    /// - `callsign`: 1 to 6 ASCII characters, shorter callsigns are padded with spaces
    /// - `ssid`: at most 15
    /// - `control_bit`: the command/response bit
    /// - `last_addr`: sets the address-extension bit, true for the source address
    pub fn new(callsign: &str, ssid: u8, control_bit: bool, last_addr: bool) -> Result<Self> {
        if callsign.len() > AX25_CALLSIGN_LEN {
            return Err(CommsError::CallsignTooLong {
                max: AX25_CALLSIGN_LEN,
            });
        }
        if callsign.is_empty() || !callsign.is_ascii() {
            return Err(CommsError::InvalidArgument("callsign must be 1 to 6 ASCII characters"));
        }
        if ssid > 15 {
            return Err(CommsError::InvalidArgument("SSID must fit in 4 bits"));
        }

        let mut bytes: [u8; AX25_ADDRESS_LEN] = [b' ' << 1; AX25_ADDRESS_LEN];
        for (slot, char) in bytes.iter_mut().zip(callsign.bytes()) {
            *slot = char << 1;
        }

        bytes[AX25_CALLSIGN_LEN] =
            ((control_bit as u8) << 7) | 0b0110_0000 | (ssid << 1) | (last_addr as u8);

        return Ok(Address { bytes: bytes });
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; AX25_ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|_| CommsError::InvalidArgument("address must be 7 bytes"))?;

        return Ok(Address { bytes: bytes });
    }

    /// The callsign with its padding removed.
    pub fn callsign(&self) -> String {
        return self.bytes[..AX25_CALLSIGN_LEN]
            .iter()
            .map(|byte| (byte >> 1) as char)
            .collect::<String>()
            .trim_end()
            .to_string();
    }

    pub fn ssid(&self) -> u8 {
        return (self.bytes[AX25_CALLSIGN_LEN] >> 1) & 0x0F;
    }

    pub fn control_bit(&self) -> bool {
        return self.bytes[AX25_CALLSIGN_LEN] & 0x80 != 0;
    }

    pub fn is_last(&self) -> bool {
        return self.bytes[AX25_CALLSIGN_LEN] & 0x01 != 0;
    }

    /// Same station, ignoring the command/response and extension bits.
    pub fn same_station(&self, other: &Address) -> bool {
        return self.bytes[..AX25_CALLSIGN_LEN] == other.bytes[..AX25_CALLSIGN_LEN]
            && self.ssid() == other.ssid();
    }
}

/// Destination address of a frame (never the last address of the header).
pub fn get_dest_address(callsign: &str, ssid: u8, control_bit: bool) -> Result<Address> {
    return Address::new(callsign, ssid, control_bit, false);
}

/// Source address of a frame, carrying the address-extension terminator.
pub fn get_source_address(callsign: &str, ssid: u8, control_bit: bool) -> Result<Address> {
    return Address::new(callsign, ssid, control_bit, true);
}

/// The connection-control commands carried by unnumbered frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UFrameCmd {
    /// SABME
    Conn,
    Disc,
    /// UA
    Ack,
}

impl UFrameCmd {
    pub fn control_byte(self, poll_final: bool) -> u8 {
        let base: u8 = match self {
            UFrameCmd::Conn => U_CONTROL_CONN,
            UFrameCmd::Disc => U_CONTROL_DISC,
            UFrameCmd::Ack => U_CONTROL_ACK,
        };

        return base | if poll_final { POLL_FINAL_BIT } else { 0 };
    }

    pub fn from_control_byte(byte: u8) -> Option<(Self, bool)> {
        let poll_final: bool = byte & POLL_FINAL_BIT != 0;

        return match byte & !POLL_FINAL_BIT {
            U_CONTROL_CONN => Some((UFrameCmd::Conn, poll_final)),
            U_CONTROL_DISC => Some((UFrameCmd::Disc, poll_final)),
            U_CONTROL_ACK => Some((UFrameCmd::Ack, poll_final)),
            _ => None,
        };
    }
}

/// Modulo-128 information frame control field.
///
/// # Fields
/// - `send_seq`: N(S), 7 bits
/// - `recv_seq`: N(R), 7 bits
/// - `poll`: poll bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IFrameControl {
    pub send_seq: u8,
    pub recv_seq: u8,
    pub poll: bool,
}

impl IFrameControl {
    pub fn new(send_seq: u8, recv_seq: u8, poll: bool) -> Result<Self> {
        if send_seq > 127 || recv_seq > 127 {
            return Err(CommsError::InvalidArgument("sequence numbers are 7 bits"));
        }

        return Ok(IFrameControl {
            send_seq: send_seq,
            recv_seq: recv_seq,
            poll: poll,
        });
    }

    pub fn to_bytes(&self) -> [u8; AX25_I_CONTROL_LEN] {
        return [self.send_seq << 1, (self.recv_seq << 1) | self.poll as u8];
    }

    pub fn from_bytes(bytes: [u8; AX25_I_CONTROL_LEN]) -> Self {
        return IFrameControl {
            send_seq: bytes[0] >> 1,
            recv_seq: bytes[1] >> 1,
            poll: bytes[1] & 1 != 0,
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Information,
    Supervisory,
    Unnumbered,
}

impl FrameType {
    /// Classifies a frame by the low bits of its first control byte.
    pub fn from_control_byte(byte: u8) -> Self {
        if byte & 0b01 == 0 {
            return FrameType::Information;
        }
        if byte & 0b10 == 0 {
            return FrameType::Supervisory;
        }

        return FrameType::Unnumbered;
    }
}

/// Frame check sequence: CRC-16/X.25 over everything between the opening flag and the FCS.
pub fn fcs_calculate(data: &[u8]) -> u16 {
    return FCS.checksum(data);
}

fn push_header(frame: &mut FrameBytes, dest: &Address, src: &Address) -> Result<()> {
    frame.push(AX25_FLAG)?;
    frame.extend(&dest.bytes)?;
    frame.extend(&src.bytes)?;

    return Ok(());
}

fn push_trailer(frame: &mut FrameBytes) -> Result<()> {
    let fcs: u16 = fcs_calculate(&frame.as_slice()[1..]);
    frame.extend(&fcs.to_le_bytes())?;
    frame.push(AX25_FLAG)?;

    return Ok(());
}

/// Builds an unstuffed information frame carrying one 255-byte information field.
pub fn send_i_frame(
    info: &[u8; AX25_INFO_LEN],
    control: IFrameControl,
    dest: &Address,
    src: &Address,
) -> Result<FrameBytes> {
    let mut frame: FrameBytes = FrameBytes::new();

    push_header(&mut frame, dest, src)?;
    frame.extend(&control.to_bytes())?;
    frame.push(AX25_PID_NO_L3)?;
    frame.extend(info)?;
    push_trailer(&mut frame)?;

    return Ok(frame);
}

/// Builds an unstuffed unnumbered frame for a connection-control command.
pub fn send_u_frame(cmd: UFrameCmd, poll_final: bool, dest: &Address, src: &Address) -> Result<FrameBytes> {
    let mut frame: FrameBytes = FrameBytes::new();

    push_header(&mut frame, dest, src)?;
    frame.push(cmd.control_byte(poll_final))?;
    frame.push(AX25_PID_NO_L3)?;
    push_trailer(&mut frame)?;

    return Ok(frame);
}

fn check_flags(frame: &[u8]) -> bool {
    return frame.len() >= 2 && frame[0] == AX25_FLAG && frame[frame.len() - 1] == AX25_FLAG;
}

/// Exact length of `unstuffed` once stuffed, flags included.
pub fn stuffed_len(unstuffed: &[u8]) -> usize {
    if unstuffed.len() < 2 {
        return unstuffed.len();
    }

    let body: &[u8] = &unstuffed[1..unstuffed.len() - 1];
    let mut bits: usize = 0;
    let mut ones: u8 = 0;

    for bit in BitReader::new(body) {
        bits += 1;
        if bit {
            ones += 1;
            if ones == 5 {
                bits += 1;
                ones = 0;
            }
        } else {
            ones = 0;
        }
    }

    return bits.div_ceil(8) + 2;
}

/// Bit-stuffs the region between the two flags of `unstuffed` into `out`.
///
/// A zero bit follows every run of five ones, the last partial byte is zero-padded and
/// the flags are copied unchanged.
///
/// # Returns
/// The stuffed length, or `BufferTooSmall` without touching `out` when it can't hold it.
pub fn stuff(unstuffed: &[u8], out: &mut [u8]) -> Result<usize> {
    if !check_flags(unstuffed) {
        return Err(CommsError::InvalidArgument("frame must start and end with a flag"));
    }

    let needed: usize = stuffed_len(unstuffed);
    if needed > out.len() {
        return Err(CommsError::BufferTooSmall {
            needed: needed,
            available: out.len(),
        });
    }

    let available: usize = out.len();
    let body: &[u8] = &unstuffed[1..unstuffed.len() - 1];
    let mut writer: BitWriter = BitWriter::new(out);
    let mut ones: u8 = 0;
    let mut fits: bool = writer.write_byte(AX25_FLAG);

    for bit in BitReader::new(body) {
        fits &= writer.write_bit(bit);

        if bit {
            ones += 1;
            if ones == 5 {
                fits &= writer.write_bit(false);
                ones = 0;
            }
        } else {
            ones = 0;
        }
    }

    writer.align();
    fits &= writer.write_byte(AX25_FLAG);

    if !fits || writer.bytes_written() != needed {
        return Err(CommsError::BufferTooSmall {
            needed: needed,
            available: available,
        });
    }

    trace!(unstuffed = unstuffed.len(), stuffed = needed, "stuffed frame");
    return Ok(needed);
}

/// Removes the stuffed zero bits from the region between the flags of `stuffed`.
///
/// Six consecutive ones inside the region mean a flag or abort sequence showed up in the
/// middle of the frame and the frame is reported as `CorruptedFrame`. Trailing pad bits
/// that don't make up a whole byte are dropped.
///
/// # Returns
/// The unstuffed length, flags included.
pub fn unstuff(stuffed: &[u8], out: &mut [u8]) -> Result<usize> {
    if !check_flags(stuffed) {
        return Err(CommsError::CorruptedFrame);
    }

    let body: &[u8] = &stuffed[1..stuffed.len() - 1];
    let mut unstuffed: Bytes<AX25_MAX_STUFFED_LEN> = Bytes::new();
    unstuffed.push(AX25_FLAG)?;

    let mut ones: u8 = 0;
    let mut current: u8 = 0;
    let mut filled: u8 = 0;

    for bit in BitReader::new(body) {
        if ones == 5 {
            if bit {
                return Err(CommsError::CorruptedFrame);
            }
            ones = 0;
            continue;
        }

        ones = if bit { ones + 1 } else { 0 };

        current = (current << 1) | bit as u8;
        filled += 1;
        if filled == 8 {
            unstuffed.push(current).map_err(|_| CommsError::CorruptedFrame)?;
            current = 0;
            filled = 0;
        }
    }

    unstuffed.push(AX25_FLAG).map_err(|_| CommsError::CorruptedFrame)?;

    if unstuffed.len() > out.len() {
        return Err(CommsError::BufferTooSmall {
            needed: unstuffed.len(),
            available: out.len(),
        });
    }

    out[..unstuffed.len()].copy_from_slice(unstuffed.as_slice());
    return Ok(unstuffed.len());
}

/// Stuffs a frame into a fresh buffer.
pub fn stuff_frame(unstuffed: &FrameBytes) -> Result<FrameBytes> {
    let mut stuffed: FrameBytes = FrameBytes::new();
    stuffed.pointer = stuff(unstuffed.as_slice(), &mut stuffed.bytes)?;

    return Ok(stuffed);
}

/// Unstuffs a frame into a fresh buffer.
pub fn unstuff_frame(stuffed: &[u8]) -> Result<FrameBytes> {
    let mut unstuffed: FrameBytes = FrameBytes::new();
    unstuffed.pointer = unstuff(stuffed, &mut unstuffed.bytes)?;

    return Ok(unstuffed);
}

/// Reads the frame type of an unstuffed frame without checking the FCS.
pub fn peek_frame_type(unstuffed: &[u8]) -> Result<FrameType> {
    if !check_flags(unstuffed) || unstuffed.len() < AX25_U_FRAME_LEN {
        return Err(CommsError::InvalidFrame("frame is too short"));
    }

    return Ok(FrameType::from_control_byte(unstuffed[CONTROL_POSITION]));
}

/// The information field of an unstuffed I-frame.
pub fn info_field_mut(unstuffed: &mut [u8]) -> Result<&mut [u8; AX25_INFO_LEN]> {
    if unstuffed.len() != AX25_I_FRAME_LEN {
        return Err(CommsError::InvalidFrame("I-frame has the wrong length"));
    }

    return (&mut unstuffed[I_INFO_POSITION..I_INFO_POSITION + AX25_INFO_LEN])
        .try_into()
        .map_err(|_| CommsError::InvalidFrame("I-frame has the wrong length"));
}

/// Address pair of a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub dest: Address,
    pub src: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivedFrame {
    /// A connection-control command.
    Control {
        header: FrameHeader,
        cmd: UFrameCmd,
        poll_final: bool,
    },
    /// A data frame, the caller FEC/AES-processes `info`.
    Data {
        header: FrameHeader,
        control: IFrameControl,
        info: Box<[u8; AX25_INFO_LEN]>,
    },
}

impl ReceivedFrame {
    pub fn header(&self) -> &FrameHeader {
        return match self {
            ReceivedFrame::Control { header, .. } => header,
            ReceivedFrame::Data { header, .. } => header,
        };
    }
}

/// Parses an unstuffed frame: checks the FCS, then reports either the U-frame command or
/// the information field of an I-frame.
pub fn recv(unstuffed: &[u8]) -> Result<ReceivedFrame> {
    let frame_type: FrameType = peek_frame_type(unstuffed)?;

    let fcs_position: usize = unstuffed.len() - 1 - AX25_FCS_LEN;
    let computed: u16 = fcs_calculate(&unstuffed[1..fcs_position]);
    let received: u16 = u16::from_le_bytes([unstuffed[fcs_position], unstuffed[fcs_position + 1]]);
    if computed != received {
        return Err(CommsError::FcsMismatch {
            computed: computed,
            received: received,
        });
    }

    let header: FrameHeader = FrameHeader {
        dest: Address::from_bytes(&unstuffed[1..1 + AX25_ADDRESS_LEN])?,
        src: Address::from_bytes(&unstuffed[1 + AX25_ADDRESS_LEN..CONTROL_POSITION])?,
    };

    return match frame_type {
        FrameType::Unnumbered => {
            if unstuffed.len() != AX25_U_FRAME_LEN {
                return Err(CommsError::InvalidFrame("U-frame has the wrong length"));
            }
            if unstuffed[CONTROL_POSITION + AX25_U_CONTROL_LEN] != AX25_PID_NO_L3 {
                return Err(CommsError::InvalidFrame("unexpected protocol id"));
            }

            let (cmd, poll_final) = UFrameCmd::from_control_byte(unstuffed[CONTROL_POSITION])
                .ok_or(CommsError::InvalidFrame("unrecognized U-frame command"))?;

            Ok(ReceivedFrame::Control {
                header: header,
                cmd: cmd,
                poll_final: poll_final,
            })
        }
        FrameType::Information => {
            if unstuffed.len() != AX25_I_FRAME_LEN {
                return Err(CommsError::InvalidFrame("I-frame has the wrong length"));
            }
            if unstuffed[I_PID_POSITION] != AX25_PID_NO_L3 {
                return Err(CommsError::InvalidFrame("unexpected protocol id"));
            }

            let control: IFrameControl =
                IFrameControl::from_bytes([unstuffed[CONTROL_POSITION], unstuffed[CONTROL_POSITION + 1]]);

            let mut info: Box<[u8; AX25_INFO_LEN]> = Box::new([0u8; AX25_INFO_LEN]);
            info.copy_from_slice(&unstuffed[I_INFO_POSITION..I_INFO_POSITION + AX25_INFO_LEN]);

            Ok(ReceivedFrame::Data {
                header: header,
                control: control,
                info: info,
            })
        }
        FrameType::Supervisory => Err(CommsError::InvalidFrame("supervisory frames are not used on this link")),
    };
}
