//! Telemetry record wire encoding for the downlink.
//!
//! A record is `id (1) | timestamp (4) | value`, big-endian. Id zero is never assigned so
//! the zero padding at the end of a downlink block reads back as end-of-data.
use crate::error::{CommsError, Result};

pub const TELEM_ID_SIZE: usize = 1;
pub const TELEM_TIMESTAMP_SIZE: usize = 4;

/// The largest packed record.
pub const MAX_TELEM_RECORD_SIZE: usize = TELEM_ID_SIZE + TELEM_TIMESTAMP_SIZE + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TelemetryId {
    Cc1120Temp = 1,
    CommsCustomTransceiverTemp = 2,
    ObcTemp = 3,
    AdcsMagBoardTemp = 4,
    AdcsSensorBoardTemp = 5,
    EpsBoardTemp = 6,
    SolarPanel1Temp = 7,
    SolarPanel2Temp = 8,
    SolarPanel3Temp = 9,
    SolarPanel4Temp = 10,
    EpsComms5vCurrent = 11,
    EpsComms3v3Current = 12,
    EpsMagnetorquer8vCurrent = 13,
    EpsAdcs5vCurrent = 14,
    EpsAdcs3v3Current = 15,
    EpsObc3v3Current = 16,
    EpsComms5vVoltage = 17,
    EpsComms3v3Voltage = 18,
    EpsMagnetorquer8vVoltage = 19,
    EpsAdcs5vVoltage = 20,
    EpsAdcs3v3Voltage = 21,
    EpsObc3v3Voltage = 22,
    ObcState = 23,
    EpsState = 24,
    LogFileNumber = 25,
    NumCspPacketsRcvd = 26,
}

const ALL_IDS: [TelemetryId; 26] = [
    TelemetryId::Cc1120Temp,
    TelemetryId::CommsCustomTransceiverTemp,
    TelemetryId::ObcTemp,
    TelemetryId::AdcsMagBoardTemp,
    TelemetryId::AdcsSensorBoardTemp,
    TelemetryId::EpsBoardTemp,
    TelemetryId::SolarPanel1Temp,
    TelemetryId::SolarPanel2Temp,
    TelemetryId::SolarPanel3Temp,
    TelemetryId::SolarPanel4Temp,
    TelemetryId::EpsComms5vCurrent,
    TelemetryId::EpsComms3v3Current,
    TelemetryId::EpsMagnetorquer8vCurrent,
    TelemetryId::EpsAdcs5vCurrent,
    TelemetryId::EpsAdcs3v3Current,
    TelemetryId::EpsObc3v3Current,
    TelemetryId::EpsComms5vVoltage,
    TelemetryId::EpsComms3v3Voltage,
    TelemetryId::EpsMagnetorquer8vVoltage,
    TelemetryId::EpsAdcs5vVoltage,
    TelemetryId::EpsAdcs3v3Voltage,
    TelemetryId::EpsObc3v3Voltage,
    TelemetryId::ObcState,
    TelemetryId::EpsState,
    TelemetryId::LogFileNumber,
    TelemetryId::NumCspPacketsRcvd,
];

impl TryFrom<u8> for TelemetryId {
    type Error = CommsError;

    fn try_from(value: u8) -> Result<Self> {
        return ALL_IDS
            .iter()
            .copied()
            .find(|id| *id as u8 == value)
            .ok_or(CommsError::UnsupportedTelemetry(value));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    F32,
    U8,
    U32,
}

impl ValueKind {
    pub fn size(self) -> usize {
        return match self {
            ValueKind::F32 | ValueKind::U32 => 4,
            ValueKind::U8 => 1,
        };
    }
}

impl TelemetryId {
    pub fn all() -> &'static [TelemetryId] {
        return &ALL_IDS;
    }

    pub fn value_kind(self) -> ValueKind {
        return match self {
            TelemetryId::ObcState | TelemetryId::EpsState => ValueKind::U8,
            TelemetryId::LogFileNumber | TelemetryId::NumCspPacketsRcvd => ValueKind::U32,
            _ => ValueKind::F32,
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryValue {
    F32(f32),
    U8(u8),
    U32(u32),
}

impl TelemetryValue {
    pub fn kind(&self) -> ValueKind {
        return match self {
            TelemetryValue::F32(_) => ValueKind::F32,
            TelemetryValue::U8(_) => ValueKind::U8,
            TelemetryValue::U32(_) => ValueKind::U32,
        };
    }
}

/// One timestamped telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    id: TelemetryId,
    timestamp: u32,
    value: TelemetryValue,
}

impl TelemetryRecord {
    /// Fails with `InvalidArgument` when the value type doesn't match the id.
    pub fn new(id: TelemetryId, timestamp: u32, value: TelemetryValue) -> Result<Self> {
        if id.value_kind() != value.kind() {
            return Err(CommsError::InvalidArgument("telemetry value type doesn't match its id"));
        }

        return Ok(TelemetryRecord {
            id: id,
            timestamp: timestamp,
            value: value,
        });
    }

    pub fn id(&self) -> TelemetryId {
        return self.id;
    }

    pub fn timestamp(&self) -> u32 {
        return self.timestamp;
    }

    pub fn value(&self) -> TelemetryValue {
        return self.value;
    }

    pub fn packed_len(&self) -> usize {
        return TELEM_ID_SIZE + TELEM_TIMESTAMP_SIZE + self.value.kind().size();
    }
}

/// Packs one record into `buffer`, returning the number of bytes written.
pub fn pack_telemetry(record: &TelemetryRecord, buffer: &mut [u8]) -> Result<usize> {
    let len: usize = record.packed_len();
    if buffer.len() < len {
        return Err(CommsError::BufferTooSmall {
            needed: len,
            available: buffer.len(),
        });
    }

    buffer[0] = record.id as u8;
    buffer[TELEM_ID_SIZE..TELEM_ID_SIZE + TELEM_TIMESTAMP_SIZE].copy_from_slice(&record.timestamp.to_be_bytes());

    let value: &mut [u8] = &mut buffer[TELEM_ID_SIZE + TELEM_TIMESTAMP_SIZE..len];
    match record.value {
        TelemetryValue::F32(v) => value.copy_from_slice(&v.to_be_bytes()),
        TelemetryValue::U8(v) => value[0] = v,
        TelemetryValue::U32(v) => value.copy_from_slice(&v.to_be_bytes()),
    }

    return Ok(len);
}

/// Unpacks the record at `offset`, advancing it past the record.
///
/// # Returns
/// `None` at a zero id (padding), without moving `offset`.
pub fn unpack_telemetry(buffer: &[u8], offset: &mut usize) -> Result<Option<TelemetryRecord>> {
    let Some(&raw_id) = buffer.get(*offset) else {
        return Ok(None);
    };
    if raw_id == 0 {
        return Ok(None);
    }

    let id: TelemetryId = TelemetryId::try_from(raw_id)?;
    let kind: ValueKind = id.value_kind();

    let start: usize = *offset + TELEM_ID_SIZE;
    let value_start: usize = start + TELEM_TIMESTAMP_SIZE;
    let end: usize = value_start + kind.size();
    if end > buffer.len() {
        return Err(CommsError::BufferTooSmall {
            needed: end,
            available: buffer.len(),
        });
    }

    let mut timestamp: [u8; 4] = [0u8; 4];
    timestamp.copy_from_slice(&buffer[start..value_start]);

    let raw: &[u8] = &buffer[value_start..end];
    let value: TelemetryValue = match kind {
        ValueKind::U8 => TelemetryValue::U8(raw[0]),
        ValueKind::F32 => TelemetryValue::F32(f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
        ValueKind::U32 => TelemetryValue::U32(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
    };

    *offset = end;
    return Ok(Some(TelemetryRecord {
        id: id,
        timestamp: u32::from_be_bytes(timestamp),
        value: value,
    }));
}

/// Every record of a downlink block, up to the zero padding.
pub fn unpack_telemetry_block(buffer: &[u8]) -> Result<Vec<TelemetryRecord>> {
    let mut records: Vec<TelemetryRecord> = Vec::new();
    let mut offset: usize = 0;

    while let Some(record) = unpack_telemetry(buffer, &mut offset)? {
        records.push(record);
    }

    return Ok(records);
}
