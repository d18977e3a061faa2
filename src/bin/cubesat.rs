//! Loopback pass simulation.
//!
//! Runs the flight-side link tasks against an in-memory byte link and plays the ground
//! station on the other end: CONN/ACK handshake, one command uplink, the telemetry
//! downlink that follows it and the closing DISC/ACK.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail};
use clap::Parser;
use obc_gs_link::aes128::generate_iv;
use obc_gs_link::ax25::{FrameBytes, ReceivedFrame, UFrameCmd};
use obc_gs_link::command::{CmdData, CmdMsg};
use obc_gs_link::comms_manager::CommsEvent;
use obc_gs_link::config::{CommsConfig, LinkAddresses, Station};
use obc_gs_link::downlink::decode_downlink_frame;
use obc_gs_link::link::ObcLink;
use obc_gs_link::reed_solomon::ReedSolomon;
use obc_gs_link::telemetry::{TelemetryId, TelemetryRecord, TelemetryValue, ValueKind};
use obc_gs_link::transport::{BufferTelemetrySource, ByteTransport, ChannelTransport};
use obc_gs_link::uplink::{deframe, UplinkFlow};
use obc_gs_link::uplink_decoder::FrameAccumulator;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cubesat")]
#[command(about = "Simulate one OBC/ground station pass over a loopback link")]
struct Args {
    /// Link configuration (TOML), defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Telemetry records queued for the downlink
    #[arg(long, default_value = "60")]
    records: u32,
}

/// The simulated ground end of the link.
struct GroundStation {
    transport: ChannelTransport,
    flow: UplinkFlow,
    rs: Arc<ReedSolomon>,
    addresses: LinkAddresses,
    accumulator: FrameAccumulator,
}

impl GroundStation {
    fn read_frame(&mut self) -> anyhow::Result<FrameBytes> {
        loop {
            let byte: u8 = self
                .transport
                .receive_byte(Duration::from_secs(10))?
                .ok_or_else(|| anyhow!("satellite went quiet"))?;

            if let Some(frame) = self.accumulator.push(byte) {
                return Ok(frame);
            }
        }
    }

    fn send_control(&mut self, cmd: UFrameCmd) -> anyhow::Result<()> {
        let frame: FrameBytes = self.flow.encode_u_frame(cmd, true)?;
        info!(?cmd, "ground: sending");

        self.transport.send_bytes(frame.as_slice())?;
        return Ok(());
    }

    fn expect_control(&mut self, expected: UFrameCmd) -> anyhow::Result<()> {
        let frame: FrameBytes = self.read_frame()?;

        match deframe(&self.rs, frame.as_slice())? {
            ReceivedFrame::Control { cmd, .. } if cmd == expected => {
                info!(?cmd, "ground: received");
                return Ok(());
            }
            other => bail!("expected {:?}, got {:?}", expected, other),
        }
    }

    /// Plays one full pass.
    ///
    /// # Returns
    /// The number of commands sent up and telemetry records received.
    fn run_pass(mut self) -> anyhow::Result<(usize, usize)> {
        self.send_control(UFrameCmd::Conn)?;
        self.expect_control(UFrameCmd::Ack)?;

        let commands: [CmdMsg; 3] = [
            CmdMsg::new(CmdData::Ping),
            CmdMsg::new(CmdData::RtcSync {
                unix_time: 1_700_000_000,
            }),
            CmdMsg::time_tagged(CmdData::DownlinkLogsNextPass { log_level: 2 }, 1_700_000_600),
        ];
        let uplink: FrameBytes = self.flow.encode_commands(&commands, &generate_iv())?;
        info!(len = uplink.len(), "ground: sending commands");
        self.transport.send_bytes(uplink.as_slice())?;

        let received: usize = self.receive_downlink()?;
        self.send_control(UFrameCmd::Ack)?;

        return Ok((commands.len(), received));
    }

    /// Reads telemetry frames until the satellite asks to disconnect.
    fn receive_downlink(&mut self) -> anyhow::Result<usize> {
        let mut records: usize = 0;

        loop {
            let frame: FrameBytes = self.read_frame()?;

            match deframe(&self.rs, frame.as_slice()) {
                Ok(ReceivedFrame::Control {
                    cmd: UFrameCmd::Disc, ..
                }) => {
                    info!("ground: received DISC");
                    return Ok(records);
                }
                Ok(ReceivedFrame::Control { cmd, .. }) => warn!(?cmd, "ground: unexpected control frame"),
                Ok(ReceivedFrame::Data { .. }) => {
                    let downlink = decode_downlink_frame(&self.rs, &self.addresses, frame.as_slice())?;
                    info!(seq = downlink.control.send_seq, records = downlink.records.len(), "ground: telemetry frame");

                    for record in &downlink.records {
                        info!(id = ?record.id(), timestamp = record.timestamp(), value = ?record.value(), "ground: telemetry");
                    }
                    records += downlink.records.len();
                }
                Err(err) => warn!(error = %err, "ground: dropping frame"),
            }
        }
    }
}

fn sample_telemetry(count: u32) -> anyhow::Result<BufferTelemetrySource> {
    let ids: &[TelemetryId] = TelemetryId::all();
    let mut source: BufferTelemetrySource = BufferTelemetrySource::default();

    for i in 0..count {
        let id: TelemetryId = ids[i as usize % ids.len()];
        let value: TelemetryValue = match id.value_kind() {
            ValueKind::F32 => TelemetryValue::F32(20.0 + i as f32 * 0.25),
            ValueKind::U8 => TelemetryValue::U8((i % 4) as u8),
            ValueKind::U32 => TelemetryValue::U32(i),
        };

        source.push(TelemetryRecord::new(id, 1_700_000_000 + i, value)?);
    }

    return Ok(source);
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();

    let config: CommsConfig = match &args.config {
        Some(path) => CommsConfig::load(path)?,
        None => CommsConfig::default(),
    };

    let (satellite_end, ground_end) = ChannelTransport::pair(4096);

    let dispatcher = |cmd: CmdMsg| -> obc_gs_link::Result<()> {
        info!(id = ?cmd.id(), time_tagged = cmd.is_time_tagged, data = ?cmd.data, "satellite: running command");
        return Ok(());
    };
    let mut link: ObcLink = ObcLink::spawn(config.clone(), Box::new(satellite_end), Box::new(dispatcher), None)?;

    let rs: Arc<ReedSolomon> = Arc::new(ReedSolomon::new());
    let addresses: LinkAddresses = config.link_addresses(Station::GroundStation)?;
    let ground: GroundStation = GroundStation {
        transport: ground_end,
        flow: UplinkFlow::new(rs.clone(), Arc::new(config.aes_context()?), addresses),
        rs: rs,
        addresses: addresses,
        accumulator: FrameAccumulator::new(),
    };
    let ground_pass = thread::Builder::new()
        .name("ground-station".to_string())
        .spawn(move || ground.run_pass())?;

    link.post(CommsEvent::BeginUplink)?;

    // blocks on the transmit queue until the satellite starts downlinking
    let frames: usize = link.send_telemetry(&mut sample_telemetry(args.records)?)?;
    info!(frames, "satellite: telemetry queued");

    let (commands, received) = ground_pass
        .join()
        .map_err(|_| anyhow!("ground station thread panicked"))??;

    // let the satellite settle back into DISCONNECTED before stopping it
    thread::sleep(Duration::from_millis(100));
    link.shutdown();

    println!("pass complete: {} commands up, {} telemetry records down", commands, received);
    return Ok(());
}
