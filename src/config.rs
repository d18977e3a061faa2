use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aes128::{AesContext, CipherMode, AES_KEY_SIZE};
use crate::ax25::{get_dest_address, get_source_address, Address, CUBESAT_CALLSIGN, DEFAULT_SSID, GROUND_STATION_CALLSIGN};
use crate::error::{CommsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Station {
    Cubesat,
    GroundStation,
}

impl Station {
    pub fn peer(self) -> Station {
        return match self {
            Station::Cubesat => Station::GroundStation,
            Station::GroundStation => Station::Cubesat,
        };
    }
}

/// Header addresses of the frames one station sends.
///
/// # Fields
/// - `src`: this station, carrying the address-extension bit
/// - `dest`: the other end of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAddresses {
    pub src: Address,
    pub dest: Address,
}

impl LinkAddresses {
    /// Whether a received frame is addressed to this station.
    pub fn is_for_us(&self, received_dest: &Address) -> bool {
        return received_dest.same_station(&self.src);
    }
}

/// Link settings shared by both ends, loadable from TOML. Every field has a default so an
/// empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommsConfig {
    pub cubesat_callsign: String,
    pub ground_station_callsign: String,
    pub ssid: u8,

    /// Pre-shared AES-128 key.
    pub aes_key: [u8; AES_KEY_SIZE],
    pub cipher_mode: CipherMode,

    /// Time allowed between the opening and closing flag of one frame.
    pub flag_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    /// How long AWAITING_CONN listens for a ground station.
    pub conn_timeout_ms: u64,
    pub inter_byte_timeout_ms: u64,
    pub max_conn_retries: u32,

    /// Largest burst the radio delivers at once, the decode queue holds two of them.
    pub rx_burst_size: usize,
    pub transmit_queue_len: usize,
    pub event_queue_len: usize,
    pub queue_send_timeout_ms: u64,
    /// How long the downlink encoder waits on a full transmit queue, and how long the
    /// transmitter waits on an empty one before ending the pass.
    pub transmit_timeout_ms: u64,
    pub max_downlink_frames: usize,
}

impl Default for CommsConfig {
    fn default() -> Self {
        return CommsConfig {
            cubesat_callsign: CUBESAT_CALLSIGN.to_string(),
            ground_station_callsign: GROUND_STATION_CALLSIGN.to_string(),
            ssid: DEFAULT_SSID,
            aes_key: core::array::from_fn(|i| i as u8),
            cipher_mode: CipherMode::Ctr,
            flag_timeout_ms: 330_000,
            ack_timeout_ms: 5_000,
            conn_timeout_ms: 60_000,
            inter_byte_timeout_ms: 1_000,
            max_conn_retries: 3,
            rx_burst_size: 128,
            transmit_queue_len: 3,
            event_queue_len: 10,
            queue_send_timeout_ms: 10,
            transmit_timeout_ms: 5_000,
            max_downlink_frames: 1000,
        };
    }
}

impl CommsConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CommsConfig = toml::from_str(text).map_err(|e| CommsError::Config(e.to_string()))?;
        config.validate()?;

        return Ok(config);
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text: String = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CommsError::Config(format!("{}: {}", path.as_ref().display(), e)))?;

        return Self::from_toml_str(&text);
    }

    pub fn validate(&self) -> Result<()> {
        self.link_addresses(Station::Cubesat)?;

        if self.rx_burst_size == 0 || self.transmit_queue_len == 0 || self.event_queue_len == 0 {
            return Err(CommsError::Config("queue sizes must be non-zero".to_string()));
        }
        if self.flag_timeout_ms == 0 || self.ack_timeout_ms == 0 {
            return Err(CommsError::Config("timeouts must be non-zero".to_string()));
        }

        return Ok(());
    }

    fn callsign(&self, station: Station) -> &str {
        return match station {
            Station::Cubesat => &self.cubesat_callsign,
            Station::GroundStation => &self.ground_station_callsign,
        };
    }

    /// Header addresses for frames sent from `local` to the other end of the link.
    pub fn link_addresses(&self, local: Station) -> Result<LinkAddresses> {
        let remote: Station = local.peer();

        let src: Address = get_source_address(self.callsign(local), self.ssid, false)
            .map_err(|e| CommsError::Config(format!("{:?} callsign: {}", local, e)))?;
        let dest: Address = get_dest_address(self.callsign(remote), self.ssid, false)
            .map_err(|e| CommsError::Config(format!("{:?} callsign: {}", remote, e)))?;

        return Ok(LinkAddresses { src: src, dest: dest });
    }

    pub fn aes_context(&self) -> Result<AesContext> {
        return AesContext::new(&self.aes_key, self.cipher_mode);
    }

    pub fn decode_queue_len(&self) -> usize {
        return self.rx_burst_size * 2;
    }

    pub fn flag_timeout(&self) -> Duration {
        return Duration::from_millis(self.flag_timeout_ms);
    }

    pub fn ack_timeout(&self) -> Duration {
        return Duration::from_millis(self.ack_timeout_ms);
    }

    pub fn conn_timeout(&self) -> Duration {
        return Duration::from_millis(self.conn_timeout_ms);
    }

    pub fn inter_byte_timeout(&self) -> Duration {
        return Duration::from_millis(self.inter_byte_timeout_ms);
    }

    pub fn transmit_timeout(&self) -> Duration {
        return Duration::from_millis(self.transmit_timeout_ms);
    }

    pub fn queue_send_timeout(&self) -> Duration {
        return Duration::from_millis(self.queue_send_timeout_ms);
    }
}
