use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use tracing::{info, warn};

use crate::comms_manager::{CommsEvent, CommsManager, CommsManagerHandle, CommsState};
use crate::config::{CommsConfig, LinkAddresses, Station};
use crate::downlink::{DownlinkEncoder, TransmitEvent};
use crate::error::Result;
use crate::reed_solomon::ReedSolomon;
use crate::transport::{ByteTransport, CommandDispatcher, TelemetrySource};
use crate::uplink::UplinkFlow;
use crate::uplink_decoder::UplinkDecoder;

/// The flight side of the link: the comms manager and uplink decoder tasks, wired
/// together with their queues, plus the downlink encoder for the caller's thread.
pub struct ObcLink {
    manager: CommsManagerHandle,
    downlink: DownlinkEncoder,
    threads: Vec<JoinHandle<()>>,
}

impl ObcLink {
    /// Builds the codec contexts once and starts the tasks.
    ///
    /// # Arguments
    /// - `observer`: optionally receives every state the manager enters
    pub fn spawn(
        config: CommsConfig,
        transport: Box<dyn ByteTransport>,
        dispatcher: Box<dyn CommandDispatcher>,
        observer: Option<Sender<CommsState>>,
    ) -> Result<Self> {
        config.validate()?;

        let rs: Arc<ReedSolomon> = Arc::new(ReedSolomon::new());
        let aes = Arc::new(config.aes_context()?);
        let addresses: LinkAddresses = config.link_addresses(Station::Cubesat)?;
        let flow: UplinkFlow = UplinkFlow::new(rs.clone(), aes, addresses);

        let (decode_tx, decode_rx) = channel::bounded::<u8>(config.decode_queue_len());
        let (transmit_tx, transmit_rx) = channel::bounded::<TransmitEvent>(config.transmit_queue_len);

        let mut manager: CommsManager =
            CommsManager::new(config.clone(), flow.clone(), transport, decode_tx, transmit_rx);
        if let Some(observer) = observer {
            manager = manager.with_observer(observer);
        }
        let handle: CommsManagerHandle = manager.handle();

        let decoder: UplinkDecoder =
            UplinkDecoder::new(flow, handle.clone(), dispatcher, decode_rx, config.flag_timeout());

        let threads: Vec<JoinHandle<()>> = vec![
            thread::Builder::new()
                .name("comms-manager".to_string())
                .spawn(move || manager.run())?,
            thread::Builder::new()
                .name("uplink-decoder".to_string())
                .spawn(move || decoder.run())?,
        ];

        info!(callsign = %config.cubesat_callsign, mode = ?config.cipher_mode, "OBC link started");

        return Ok(ObcLink {
            manager: handle.clone(),
            downlink: DownlinkEncoder::new(rs, addresses, transmit_tx, config.transmit_timeout()),
            threads: threads,
        });
    }

    pub fn handle(&self) -> CommsManagerHandle {
        return self.manager.clone();
    }

    pub fn post(&self, event: CommsEvent) -> Result<()> {
        return self.manager.post(event);
    }

    /// Queues every pending record for the transmitter, see [`DownlinkEncoder::send_telemetry`].
    pub fn send_telemetry(&mut self, source: &mut dyn TelemetrySource) -> Result<usize> {
        return self.downlink.send_telemetry(source);
    }

    /// Stops the tasks and waits for them. The manager finishes the handler it is in first.
    pub fn shutdown(self) {
        self.manager.shutdown();
        drop(self.downlink);

        for handle in self.threads {
            if handle.join().is_err() {
                warn!("comms task panicked");
            }
        }
    }
}
