//! Uplink/downlink link stack shared by the OBC and the ground station: AX.25 framing with
//! bit stuffing, RS(255, 223) forward error correction, AES-128 and the command and
//! telemetry codecs, composed into the uplink and downlink flows and driven by a
//! half-duplex connection state machine.

pub mod aes128;
pub mod ax25;
pub mod bits;
pub mod command;
pub mod comms_manager;
pub mod config;
pub mod downlink;
pub mod error;
pub mod gf;
pub mod link;
pub mod reed_solomon;
pub mod telemetry;
pub mod timer;
pub mod transport;
pub mod uplink;
pub mod uplink_decoder;

pub use error::{CommsError, Result};

#[cfg(test)]
mod test;
