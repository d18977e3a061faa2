use std::sync::Arc;

use obc_gs_link::aes128::AES_IV_SIZE;
use obc_gs_link::command::{CmdData, CmdMsg};
use obc_gs_link::config::{CommsConfig, Station};
use obc_gs_link::reed_solomon::ReedSolomon;
use obc_gs_link::uplink::{DecodedUplink, UplinkFlow};

fn main() -> anyhow::Result<()> {
    let start = std::time::Instant::now();
    let duration = std::time::Duration::from_secs(1);
    let mut packets: u32 = 0;
    let mut bytes: u64 = 0;

    let config: CommsConfig = CommsConfig::default();
    let rs = Arc::new(ReedSolomon::new());
    let aes = Arc::new(config.aes_context()?);

    let ground = UplinkFlow::new(rs.clone(), aes.clone(), config.link_addresses(Station::GroundStation)?);
    let satellite = UplinkFlow::new(rs, aes, config.link_addresses(Station::Cubesat)?);

    let commands = [
        CmdMsg::new(CmdData::Ping),
        CmdMsg::new(CmdData::RtcSync {
            unix_time: 1_700_000_000,
        }),
    ];
    let mut iv: [u8; AES_IV_SIZE] = [0x01; AES_IV_SIZE];

    loop {
        if start.elapsed() >= duration {
            break;
        }

        iv[0] = iv[0].wrapping_add(1);
        let frame = ground.encode_commands(&commands, &iv)?;

        if let Ok(DecodedUplink::Commands(_)) = satellite.decode_packet(frame.as_slice()) {
            packets += 1;
            bytes += frame.len() as u64;
        }
    }

    println!("{} packets/second", packets);
    print_throughput(bytes);

    return Ok(());
}

fn print_throughput(bytes: u64) {
    match () {
        _ if bytes >= 1_000_000 => println!("{:.2} mb/s", bytes as f64 / 1_000_000.0),
        _ if bytes >= 1_000 => println!("{:.2} kb/s", bytes as f64 / 1_000.0),
        _ => println!("{:.2} b/s", bytes as f64),
    }
}
