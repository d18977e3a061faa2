//! Command wire encoding.
//!
//! Each command is `id (1) | timestamp (4) | fields`, with bit 7 of the id marking a
//! time-tagged command and every integer big-endian. Commands are packed back to back,
//! an id of zero ends the list.
use crate::error::{CommsError, Result};

pub const CMD_ID_SIZE: usize = 1;
pub const CMD_TIMESTAMP_SIZE: usize = 4;
pub const CMD_HEADER_SIZE: usize = CMD_ID_SIZE + CMD_TIMESTAMP_SIZE;

const TIME_TAGGED_BIT: u8 = 0x80;

/// Largest packed command (header plus two 32-bit fields).
pub const MAX_CMD_MSG_SIZE: usize = CMD_HEADER_SIZE + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CmdId {
    EndOfFrame = 0,
    ExecObcReset = 1,
    RtcSync = 2,
    DownlinkLogsNextPass = 3,
    MicroSdFormat = 4,
    Ping = 5,
    DownlinkTelem = 6,
    UplinkDisc = 7,
    SetProgrammingSession = 8,
    EraseApp = 9,
    DownloadData = 10,
    VerifyCrc = 11,
    I2cProbe = 12,
    Arm = 13,
    Execute = 14,
}

/// Number of registered command ids, the end-of-frame sentinel included.
pub const NUM_CMD_CALLBACKS: u8 = 15;

impl TryFrom<u8> for CmdId {
    type Error = CommsError;

    fn try_from(value: u8) -> Result<Self> {
        return Ok(match value & !TIME_TAGGED_BIT {
            0 => CmdId::EndOfFrame,
            1 => CmdId::ExecObcReset,
            2 => CmdId::RtcSync,
            3 => CmdId::DownlinkLogsNextPass,
            4 => CmdId::MicroSdFormat,
            5 => CmdId::Ping,
            6 => CmdId::DownlinkTelem,
            7 => CmdId::UplinkDisc,
            8 => CmdId::SetProgrammingSession,
            9 => CmdId::EraseApp,
            10 => CmdId::DownloadData,
            11 => CmdId::VerifyCrc,
            12 => CmdId::I2cProbe,
            13 => CmdId::Arm,
            14 => CmdId::Execute,
            other => return Err(CommsError::UnsupportedCommand(other)),
        });
    }
}

/// Command-specific fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdData {
    ExecObcReset,
    RtcSync { unix_time: u32 },
    DownlinkLogsNextPass { log_level: u8 },
    MicroSdFormat,
    Ping,
    DownlinkTelem,
    UplinkDisc,
    SetProgrammingSession { session: u8 },
    EraseApp,
    DownloadData { session: u8, length: u16, address: u32 },
    VerifyCrc,
    I2cProbe,
    Arm { arm_data: u32, arm_id: u32 },
    Execute { execute_data: u32, execute_id: u32 },
}

impl CmdData {
    pub fn id(&self) -> CmdId {
        return match self {
            CmdData::ExecObcReset => CmdId::ExecObcReset,
            CmdData::RtcSync { .. } => CmdId::RtcSync,
            CmdData::DownlinkLogsNextPass { .. } => CmdId::DownlinkLogsNextPass,
            CmdData::MicroSdFormat => CmdId::MicroSdFormat,
            CmdData::Ping => CmdId::Ping,
            CmdData::DownlinkTelem => CmdId::DownlinkTelem,
            CmdData::UplinkDisc => CmdId::UplinkDisc,
            CmdData::SetProgrammingSession { .. } => CmdId::SetProgrammingSession,
            CmdData::EraseApp => CmdId::EraseApp,
            CmdData::DownloadData { .. } => CmdId::DownloadData,
            CmdData::VerifyCrc => CmdId::VerifyCrc,
            CmdData::I2cProbe => CmdId::I2cProbe,
            CmdData::Arm { .. } => CmdId::Arm,
            CmdData::Execute { .. } => CmdId::Execute,
        };
    }

    /// Bytes taken by the fields after the common header.
    pub fn fields_len(&self) -> usize {
        return match self {
            CmdData::RtcSync { .. } => 4,
            CmdData::DownlinkLogsNextPass { .. } | CmdData::SetProgrammingSession { .. } => 1,
            CmdData::DownloadData { .. } => 7,
            CmdData::Arm { .. } | CmdData::Execute { .. } => 8,
            _ => 0,
        };
    }
}

/// One command as carried over the uplink.
///
/// # Fields
/// - `timestamp`: unix time the command is scheduled for when `is_time_tagged` is set
/// - `is_time_tagged`: run at `timestamp` instead of on receipt
/// - `data`: the command and its fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdMsg {
    pub timestamp: u32,
    pub is_time_tagged: bool,
    pub data: CmdData,
}

impl CmdMsg {
    pub fn new(data: CmdData) -> Self {
        return CmdMsg {
            timestamp: 0,
            is_time_tagged: false,
            data: data,
        };
    }

    pub fn time_tagged(data: CmdData, timestamp: u32) -> Self {
        return CmdMsg {
            timestamp: timestamp,
            is_time_tagged: true,
            data: data,
        };
    }

    pub fn id(&self) -> CmdId {
        return self.data.id();
    }

    pub fn packed_len(&self) -> usize {
        return CMD_HEADER_SIZE + self.data.fields_len();
    }
}

/// Cursor over a packed buffer that fails instead of reading past the end.
struct Reader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end: usize = self.offset + N;
        let bytes: [u8; N] = self
            .buffer
            .get(self.offset..end)
            .and_then(|slice| slice.try_into().ok())
            .ok_or(CommsError::BufferTooSmall {
                needed: end,
                available: self.buffer.len(),
            })?;
        self.offset = end;

        return Ok(bytes);
    }

    fn u8(&mut self) -> Result<u8> {
        return Ok(self.take::<1>()?[0]);
    }

    fn u16(&mut self) -> Result<u16> {
        return Ok(u16::from_be_bytes(self.take()?));
    }

    fn u32(&mut self) -> Result<u32> {
        return Ok(u32::from_be_bytes(self.take()?));
    }
}

/// Packs `msg` into `buffer` at `offset`, advancing `offset` past it.
///
/// # Returns
/// The number of bytes written. Fails with `BufferTooSmall` before writing anything when
/// the command doesn't fit.
pub fn pack_cmd_msg(buffer: &mut [u8], offset: &mut usize, msg: &CmdMsg) -> Result<usize> {
    let len: usize = msg.packed_len();
    let end: usize = *offset + len;
    let available: usize = buffer.len();
    let out: &mut [u8] = buffer.get_mut(*offset..end).ok_or(CommsError::BufferTooSmall {
        needed: end,
        available: available,
    })?;

    let mut id: u8 = msg.id() as u8;
    if msg.is_time_tagged {
        id |= TIME_TAGGED_BIT;
    }

    out[0] = id;
    out[CMD_ID_SIZE..CMD_HEADER_SIZE].copy_from_slice(&msg.timestamp.to_be_bytes());

    let fields: &mut [u8] = &mut out[CMD_HEADER_SIZE..];
    match msg.data {
        CmdData::RtcSync { unix_time } => fields.copy_from_slice(&unix_time.to_be_bytes()),
        CmdData::DownlinkLogsNextPass { log_level } => fields[0] = log_level,
        CmdData::SetProgrammingSession { session } => fields[0] = session,
        CmdData::DownloadData {
            session,
            length,
            address,
        } => {
            fields[0] = session;
            fields[1..3].copy_from_slice(&length.to_be_bytes());
            fields[3..7].copy_from_slice(&address.to_be_bytes());
        }
        CmdData::Arm { arm_data, arm_id } => {
            fields[..4].copy_from_slice(&arm_data.to_be_bytes());
            fields[4..].copy_from_slice(&arm_id.to_be_bytes());
        }
        CmdData::Execute {
            execute_data,
            execute_id,
        } => {
            fields[..4].copy_from_slice(&execute_data.to_be_bytes());
            fields[4..].copy_from_slice(&execute_id.to_be_bytes());
        }
        CmdData::ExecObcReset
        | CmdData::MicroSdFormat
        | CmdData::Ping
        | CmdData::DownlinkTelem
        | CmdData::UplinkDisc
        | CmdData::EraseApp
        | CmdData::VerifyCrc
        | CmdData::I2cProbe => {}
    }

    *offset = end;
    return Ok(len);
}

/// Unpacks the command at `offset`, advancing `offset` by the bytes it took.
///
/// # Returns
/// `None` without moving `offset` when the id is the end-of-frame sentinel.
pub fn unpack_cmd_msg(buffer: &[u8], offset: &mut usize) -> Result<Option<CmdMsg>> {
    let mut reader: Reader = Reader {
        buffer: buffer,
        offset: *offset,
    };

    let raw_id: u8 = reader.u8()?;
    let id: CmdId = CmdId::try_from(raw_id)?;
    if id == CmdId::EndOfFrame {
        return Ok(None);
    }

    let timestamp: u32 = reader.u32()?;

    let data: CmdData = match id {
        CmdId::EndOfFrame => return Ok(None),
        CmdId::ExecObcReset => CmdData::ExecObcReset,
        CmdId::RtcSync => CmdData::RtcSync {
            unix_time: reader.u32()?,
        },
        CmdId::DownlinkLogsNextPass => CmdData::DownlinkLogsNextPass {
            log_level: reader.u8()?,
        },
        CmdId::MicroSdFormat => CmdData::MicroSdFormat,
        CmdId::Ping => CmdData::Ping,
        CmdId::DownlinkTelem => CmdData::DownlinkTelem,
        CmdId::UplinkDisc => CmdData::UplinkDisc,
        CmdId::SetProgrammingSession => CmdData::SetProgrammingSession { session: reader.u8()? },
        CmdId::EraseApp => CmdData::EraseApp,
        CmdId::DownloadData => CmdData::DownloadData {
            session: reader.u8()?,
            length: reader.u16()?,
            address: reader.u32()?,
        },
        CmdId::VerifyCrc => CmdData::VerifyCrc,
        CmdId::I2cProbe => CmdData::I2cProbe,
        CmdId::Arm => CmdData::Arm {
            arm_data: reader.u32()?,
            arm_id: reader.u32()?,
        },
        CmdId::Execute => CmdData::Execute {
            execute_data: reader.u32()?,
            execute_id: reader.u32()?,
        },
    };

    *offset = reader.offset;
    return Ok(Some(CmdMsg {
        timestamp: timestamp,
        is_time_tagged: raw_id & TIME_TAGGED_BIT != 0,
        data: data,
    }));
}

/// Unpacks every command up to the end-of-frame sentinel or the end of the buffer.
pub fn unpack_cmd_list(buffer: &[u8]) -> Result<Vec<CmdMsg>> {
    let mut commands: Vec<CmdMsg> = Vec::new();
    let mut offset: usize = 0;

    while offset < buffer.len() {
        match unpack_cmd_msg(buffer, &mut offset)? {
            Some(cmd) => commands.push(cmd),
            None => break,
        }
    }

    return Ok(commands);
}

/// Packs a list of commands back to back into `buffer`.
///
/// # Returns
/// The number of bytes used. The rest of the buffer is left as is, a zeroed buffer reads
/// back as end-of-frame.
pub fn pack_cmd_list(buffer: &mut [u8], commands: &[CmdMsg]) -> Result<usize> {
    let mut offset: usize = 0;
    for cmd in commands {
        pack_cmd_msg(buffer, &mut offset, cmd)?;
    }

    return Ok(offset);
}
