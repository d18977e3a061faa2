use thiserror::Error;

use crate::comms_manager::{CommsEvent, CommsState};

/// Every failure the link stack can report.
///
/// Codec functions never panic on wire data, they return one of these instead and leave the
/// decision (drop the frame, retry, fall back to `Disconnected`) to the composition layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("buffer too small: {needed} bytes needed, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("callsign is longer than {max} characters")]
    CallsignTooLong { max: usize },

    /// Unstuffing found a flag or abort sequence where frame data was expected.
    #[error("corrupted AX.25 frame")]
    CorruptedFrame,

    #[error("FCS mismatch: computed {computed:#06x}, received {received:#06x}")]
    FcsMismatch { computed: u16, received: u16 },

    #[error("invalid AX.25 frame: {0}")]
    InvalidFrame(&'static str),

    #[error("Reed-Solomon block has more errors than can be corrected")]
    RsDecodeFailure,

    #[error("AES-GCM authentication failed")]
    AuthFailed,

    #[error("unsupported command id {0}")]
    UnsupportedCommand(u8),

    #[error("unsupported telemetry id {0}")]
    UnsupportedTelemetry(u8),

    #[error("invalid transition from {state:?} on {event:?}")]
    InvalidStateTransition { state: CommsState, event: CommsEvent },

    #[error("queue is full")]
    QueueFull,

    #[error("timed out")]
    Timeout,

    #[error("channel closed")]
    ChannelClosed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = core::result::Result<T, CommsError>;

impl<T> From<crossbeam::channel::SendTimeoutError<T>> for CommsError {
    fn from(err: crossbeam::channel::SendTimeoutError<T>) -> Self {
        return match err {
            crossbeam::channel::SendTimeoutError::Timeout(_) => CommsError::QueueFull,
            crossbeam::channel::SendTimeoutError::Disconnected(_) => CommsError::ChannelClosed,
        };
    }
}

impl<T> From<crossbeam::channel::TrySendError<T>> for CommsError {
    fn from(err: crossbeam::channel::TrySendError<T>) -> Self {
        return match err {
            crossbeam::channel::TrySendError::Full(_) => CommsError::QueueFull,
            crossbeam::channel::TrySendError::Disconnected(_) => CommsError::ChannelClosed,
        };
    }
}

impl From<crossbeam::channel::RecvTimeoutError> for CommsError {
    fn from(err: crossbeam::channel::RecvTimeoutError) -> Self {
        return match err {
            crossbeam::channel::RecvTimeoutError::Timeout => CommsError::Timeout,
            crossbeam::channel::RecvTimeoutError::Disconnected => CommsError::ChannelClosed,
        };
    }
}

impl From<std::io::Error> for CommsError {
    fn from(err: std::io::Error) -> Self {
        return CommsError::Transport(err.to_string());
    }
}
