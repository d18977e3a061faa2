//! Ground station tool: builds uplink frames and decodes frames captured off the air.
//!
//! Usage:
//!   ground_station encode ping rtc-sync=1700000000
//!   ground_station --config link.toml encode --at 1700000100 arm=3735928559,7
//!   ground_station control conn
//!   ground_station decode 7e82...7e
//!   ground_station decode-downlink 7e82...7e

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use obc_gs_link::aes128::{generate_iv, AES_IV_SIZE};
use obc_gs_link::ax25::UFrameCmd;
use obc_gs_link::command::{CmdData, CmdMsg};
use obc_gs_link::config::{CommsConfig, Station};
use obc_gs_link::downlink::decode_downlink_frame;
use obc_gs_link::reed_solomon::ReedSolomon;
use obc_gs_link::uplink::{DecodedUplink, UplinkFlow};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ground_station")]
#[command(about = "Encode and decode OBC link frames")]
#[command(version)]
struct Args {
    /// Link configuration (TOML), defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pack commands into one encoded uplink frame, printed as hex
    Encode {
        /// Commands such as `ping`, `rtc-sync=<unix>`, `download-data=<session>,<length>,<address>`
        #[arg(required = true)]
        commands: Vec<String>,

        /// Time-tag every command for this unix time
        #[arg(long)]
        at: Option<u32>,

        /// AES IV as 32 hex digits, random when omitted
        #[arg(long)]
        iv: Option<String>,
    },
    /// Encode a connection-control frame
    Control {
        #[arg(value_enum)]
        kind: ControlKind,
    },
    /// Decode an uplink frame the way the satellite does
    Decode { frame: String },
    /// Decode a telemetry frame sent by the satellite
    DecodeDownlink { frame: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ControlKind {
    Conn,
    Disc,
    Ack,
}

impl From<ControlKind> for UFrameCmd {
    fn from(kind: ControlKind) -> Self {
        return match kind {
            ControlKind::Conn => UFrameCmd::Conn,
            ControlKind::Disc => UFrameCmd::Disc,
            ControlKind::Ack => UFrameCmd::Ack,
        };
    }
}

fn parse_args<const N: usize>(name: &str, args: Option<&str>) -> anyhow::Result<[u64; N]> {
    let values: Vec<u64> = args
        .unwrap_or("")
        .split(',')
        .filter(|value| !value.is_empty())
        .map(|value| value.trim().parse::<u64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("bad argument for {}", name))?;

    return values
        .try_into()
        .map_err(|values: Vec<u64>| anyhow!("{} takes {} argument(s), got {}", name, N, values.len()));
}

fn narrow<T: TryFrom<u64>>(name: &str, value: u64) -> anyhow::Result<T> {
    return T::try_from(value).map_err(|_| anyhow!("{} is out of range for {}", value, name));
}

/// Parses `name[=arg,arg...]` into a command.
fn parse_command(text: &str) -> anyhow::Result<CmdData> {
    let (name, args) = match text.split_once('=') {
        Some((name, args)) => (name, Some(args)),
        None => (text, None),
    };

    let data: CmdData = match name {
        "obc-reset" => {
            parse_args::<0>(name, args)?;
            CmdData::ExecObcReset
        }
        "rtc-sync" => {
            let [unix_time] = parse_args::<1>(name, args)?;
            CmdData::RtcSync {
                unix_time: narrow(name, unix_time)?,
            }
        }
        "downlink-logs" => {
            let [log_level] = parse_args::<1>(name, args)?;
            CmdData::DownlinkLogsNextPass {
                log_level: narrow(name, log_level)?,
            }
        }
        "micro-sd-format" => {
            parse_args::<0>(name, args)?;
            CmdData::MicroSdFormat
        }
        "ping" => {
            parse_args::<0>(name, args)?;
            CmdData::Ping
        }
        "downlink-telem" => {
            parse_args::<0>(name, args)?;
            CmdData::DownlinkTelem
        }
        "disconnect" => {
            parse_args::<0>(name, args)?;
            CmdData::UplinkDisc
        }
        "set-programming-session" => {
            let [session] = parse_args::<1>(name, args)?;
            CmdData::SetProgrammingSession {
                session: narrow(name, session)?,
            }
        }
        "erase-app" => {
            parse_args::<0>(name, args)?;
            CmdData::EraseApp
        }
        "download-data" => {
            let [session, length, address] = parse_args::<3>(name, args)?;
            CmdData::DownloadData {
                session: narrow(name, session)?,
                length: narrow(name, length)?,
                address: narrow(name, address)?,
            }
        }
        "verify-crc" => {
            parse_args::<0>(name, args)?;
            CmdData::VerifyCrc
        }
        "i2c-probe" => {
            parse_args::<0>(name, args)?;
            CmdData::I2cProbe
        }
        "arm" => {
            let [arm_data, arm_id] = parse_args::<2>(name, args)?;
            CmdData::Arm {
                arm_data: narrow(name, arm_data)?,
                arm_id: narrow(name, arm_id)?,
            }
        }
        "execute" => {
            let [execute_data, execute_id] = parse_args::<2>(name, args)?;
            CmdData::Execute {
                execute_data: narrow(name, execute_data)?,
                execute_id: narrow(name, execute_id)?,
            }
        }
        other => bail!("unknown command {:?}", other),
    };

    return Ok(data);
}

fn parse_iv(text: Option<&str>) -> anyhow::Result<[u8; AES_IV_SIZE]> {
    let Some(text) = text else {
        return Ok(generate_iv());
    };

    let bytes: Vec<u8> = hex::decode(text).context("IV is not valid hex")?;
    return bytes
        .try_into()
        .map_err(|_| anyhow!("IV must be {} bytes", AES_IV_SIZE));
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    let config: CommsConfig = match &args.config {
        Some(path) => CommsConfig::load(path)?,
        None => CommsConfig::default(),
    };

    let rs: Arc<ReedSolomon> = Arc::new(ReedSolomon::new());
    let flow: UplinkFlow = UplinkFlow::new(
        rs.clone(),
        Arc::new(config.aes_context()?),
        config.link_addresses(Station::GroundStation)?,
    );

    match args.command {
        Command::Encode { commands, at, iv } => {
            let commands: Vec<CmdMsg> = commands
                .iter()
                .map(|text| -> anyhow::Result<CmdMsg> {
                    let data: CmdData = parse_command(text)?;
                    Ok(match at {
                        Some(timestamp) => CmdMsg::time_tagged(data, timestamp),
                        None => CmdMsg::new(data),
                    })
                })
                .collect::<anyhow::Result<_>>()?;

            let iv: [u8; AES_IV_SIZE] = parse_iv(iv.as_deref())?;
            let frame = flow.encode_commands(&commands, &iv)?;

            info!(commands = commands.len(), len = frame.len(), "encoded uplink frame");
            println!("{}", hex::encode(frame.as_slice()));
        }
        Command::Control { kind } => {
            let frame = flow.encode_u_frame(kind.into(), true)?;
            println!("{}", hex::encode(frame.as_slice()));
        }
        Command::Decode { frame } => {
            let bytes: Vec<u8> = hex::decode(frame.trim()).context("frame is not valid hex")?;
            let satellite: UplinkFlow = UplinkFlow::new(
                rs,
                Arc::new(config.aes_context()?),
                config.link_addresses(Station::Cubesat)?,
            );

            match satellite.decode_packet(&bytes)? {
                DecodedUplink::Control { cmd, poll_final } => println!("{:?} (P/F = {})", cmd, poll_final),
                DecodedUplink::Commands(commands) => {
                    for cmd in commands {
                        println!("{:?}", cmd);
                    }
                }
            }
        }
        Command::DecodeDownlink { frame } => {
            let bytes: Vec<u8> = hex::decode(frame.trim()).context("frame is not valid hex")?;
            let downlink = decode_downlink_frame(&rs, flow.addresses(), &bytes)?;

            println!("N(S) = {}", downlink.control.send_seq);
            for record in downlink.records {
                println!("{:?} @ {}: {:?}", record.id(), record.timestamp(), record.value());
            }
        }
    }

    return Ok(());
}
