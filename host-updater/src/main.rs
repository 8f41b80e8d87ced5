// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bench OTA updater. Speaks the binary frame protocol over a serial
//! port: packs raw application binaries into OTA images, uploads with
//! per-chunk retry and offset-based resume, and drives the maintenance
//! commands (status, confirm, reboot, abort, event log).

use clap::{Parser, Subcommand};
use crc::{Crc, CRC_32_ISO_HDLC};
use host_protocol as proto;
use host_protocol::{LogEntry, OtaAck, OtaData, OtaReply, OtaStart, OtaStatusReport};
use log::{debug, info, warn};
use std::error::Error;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Must match the device's table-driven engine (zlib convention).
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const CHUNK_SIZE: usize = consts::OTA_CHUNK_MAX;
const CHUNK_CRC_RETRIES: u32 = 3;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const ERASE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Serial port the ball is attached to.
    #[arg(short, long, default_value = "/dev/ttyACM0")]
    port: String,

    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Wrap a raw application binary into an OTA image.
    Pack {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 1)]
        version: u16,
    },
    /// Pack (unless --packed) and upload a firmware image.
    Upload {
        input: PathBuf,
        #[arg(long, default_value_t = 1)]
        version: u16,
        /// The input already carries the OTA image header.
        #[arg(long)]
        packed: bool,
    },
    /// Query the OTA status record.
    Status,
    /// Accept the currently running test-boot image.
    Confirm,
    /// Reset the device.
    Reboot,
    /// Abort any in-flight OTA session.
    Abort,
    /// Dump the device event log.
    Log,
}

/// Prepend the image header: magic(4) + version(2) + payload size(4) +
/// payload crc32(4). The START frame covers the full image including
/// this header.
fn make_image(bin: &[u8], version: u16) -> Vec<u8> {
    let mut image = Vec::with_capacity(consts::OTA_HEADER_SIZE + bin.len());
    image.extend_from_slice(&consts::OTA_MAGIC.to_le_bytes());
    image.extend_from_slice(&version.to_le_bytes());
    image.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    image.extend_from_slice(&CRC32.checksum(bin).to_le_bytes());
    image.extend_from_slice(bin);
    image
}

struct Device {
    port: Box<dyn serialport::SerialPort>,
}

impl Device {
    fn open(path: &str, baud: u32) -> Result<Self, Box<dyn Error>> {
        let port = serialport::new(path, baud).timeout(Duration::from_millis(200)).open()?;
        Ok(Self { port })
    }

    fn send_frame(&mut self, frame_type: u8, payload: &[u8]) -> Result<(), Box<dyn Error>> {
        let mut buf = [0u8; proto::MAX_FRAME_SIZE];
        let wire = proto::encode(frame_type, payload, &mut buf).map_err(|e| format!("{:?}", e))?;
        self.port.write_all(wire)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one complete frame, blocking up to `deadline`.
    fn read_frame(&mut self, deadline: Instant) -> Result<(u8, Vec<u8>), Box<dyn Error>> {
        let mut header = [0u8; proto::FRAME_HEADER_SIZE];
        let mut got = 0;
        while got < header.len() {
            if Instant::now() > deadline {
                return Err("timed out waiting for a reply".into());
            }
            match self.port.read(&mut header[got..]) {
                Ok(n) => got += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let len = u16::from_le_bytes([header[1], header[2]]) as usize;
        let mut payload = vec![0u8; len];
        let mut got = 0;
        while got < len {
            if Instant::now() > deadline {
                return Err("timed out inside a frame".into());
            }
            match self.port.read(&mut payload[got..]) {
                Ok(n) => got += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok((header[0], payload))
    }

    /// Wait for a frame of `want`, skipping telemetry and heartbeats
    /// the device emits on its own.
    fn wait_for(&mut self, want: u8, timeout: Duration) -> Result<Vec<u8>, Box<dyn Error>> {
        let deadline = Instant::now() + timeout;
        loop {
            let (frame_type, payload) = self.read_frame(deadline)?;
            if frame_type == want {
                return Ok(payload);
            }
            match frame_type {
                proto::MSG_OTA_PROGRESS if payload.len() >= 4 => {
                    let done = u32::from_le_bytes(payload[..4].try_into().unwrap());
                    info!("erase progress: {} KiB", done / 1024);
                }
                proto::RSP_STATUS | proto::MSG_ACCEL | proto::MSG_GYRO => {
                    debug!("skipping unsolicited 0x{:02X}", frame_type)
                }
                other => debug!("skipping frame 0x{:02X}", other),
            }
        }
    }

    fn ota_command(&mut self, frame_type: u8, payload: &[u8]) -> Result<Vec<u8>, Box<dyn Error>> {
        self.send_frame(frame_type, payload)?;
        self.wait_for(proto::RSP_OTA, REPLY_TIMEOUT)
    }
}

fn upload(device: &mut Device, image: &[u8], version: u16) -> Result<(), Box<dyn Error>> {
    let total = image.len() as u32;
    let full_crc = CRC32.checksum(image);
    info!("image: {} bytes, crc32 0x{:08X}", total, full_crc);

    // Clear any stale session.
    device.send_frame(proto::CMD_OTA_ABORT, &[])?;
    thread::sleep(Duration::from_millis(200));
    let _ = device.wait_for(proto::RSP_OTA, Duration::from_millis(500));

    let start = OtaStart {
        slot: 1,
        version,
        total_size: total,
        expected_crc32: full_crc,
    };
    let reply = device.ota_command(proto::CMD_OTA_START, &start.to_bytes())?;
    match reply.first().and_then(|&c| OtaReply::from_u8(c)) {
        Some(OtaReply::OkStart) => info!("START accepted"),
        other => return Err(format!("START rejected: {:?}", other).into()),
    }

    info!("waiting for staging erase...");
    device.wait_for(proto::MSG_OTA_READY, ERASE_TIMEOUT)?;
    info!("device ready for data");

    let mut offset = 0u32;
    let mut crc_retries = 0u32;
    let started = Instant::now();
    while offset < total {
        let end = (offset as usize + CHUNK_SIZE).min(image.len());
        let chunk = &image[offset as usize..end];
        let mut buf = vec![0u8; chunk.len() + OtaData::OVERHEAD];
        let payload = OtaData::encode(offset, chunk, CRC32.checksum(chunk), &mut buf).to_vec();

        let reply = device.ota_command(proto::CMD_OTA_DATA, &payload)?;
        if let Some(ack) = OtaAck::parse(&reply) {
            offset = ack.next_expected_offset;
            crc_retries = 0;
            debug!("ack at {}/{}", offset, total);
            continue;
        }
        match reply.first().and_then(|&c| OtaReply::from_u8(c)) {
            Some(OtaReply::ErrChunkCrc) => {
                crc_retries += 1;
                if crc_retries > CHUNK_CRC_RETRIES {
                    return Err("chunk CRC kept failing; check the link".into());
                }
                warn!("chunk CRC rejected at {}, retrying", offset);
            }
            Some(OtaReply::ErrBadOffset) if reply.len() >= 5 => {
                let resume = u32::from_le_bytes(reply[1..5].try_into().unwrap());
                warn!("device expects offset {}, resuming there", resume);
                offset = resume;
            }
            other => return Err(format!("DATA rejected at offset {}: {:?}", offset, other).into()),
        }
    }
    info!("upload of {} bytes took {:.1?}", total, started.elapsed());

    let reply = device.ota_command(proto::CMD_OTA_FINISH, &[])?;
    match reply.first().and_then(|&c| OtaReply::from_u8(c)) {
        Some(OtaReply::OkFinish) => {
            info!("image verified and armed; device is rebooting into its test boot");
            info!("run `confirm` once it is back, or it rolls back in {} s", consts::CONFIRM_WINDOW_MS / 1000);
            Ok(())
        }
        Some(OtaReply::ErrCrcMismatch) if reply.len() >= 5 => {
            let got = u32::from_le_bytes(reply[1..5].try_into().unwrap());
            Err(format!("image CRC mismatch: device computed 0x{:08X}, expected 0x{:08X}", got, full_crc).into())
        }
        other => Err(format!("FINISH rejected: {:?}", other).into()),
    }
}

const STATE_NAMES: [&str; 8] = [
    "IDLE",
    "PREPARE_ERASE",
    "READY_FOR_DATA",
    "RECEIVING",
    "VERIFYING",
    "PENDING_REBOOT",
    "TEST_BOOT",
    "ERROR",
];

fn print_status(report: &OtaStatusReport) {
    let state = STATE_NAMES.get(report.state as usize).unwrap_or(&"?");
    println!("state:            {} ({})", state, report.state);
    println!("received:         {}/{} bytes", report.bytes_received, report.total_size);
    println!("next offset:      {}", report.next_expected_offset);
    println!("erased:           {} bytes", report.erase_progress_bytes);
    println!("last error:       {}", report.last_error);
    println!("active slot:      {}", report.active_slot);
    println!("pending slot:     {}", report.pending_slot);
    println!("expected crc32:   0x{:08X}", report.expected_crc32);
}

fn event_name(event: u8) -> &'static str {
    match event {
        1 => "START",
        2 => "ABORT",
        3 => "FAULT",
        4 => "READY",
        5 => "ARMED",
        6 => "CONFIRM",
        7 => "ROLLBACK",
        8 => "REBOOT",
        _ => "?",
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();
    let args = Args::parse();

    if let Command::Pack { input, output, version } = &args.command {
        let bin = fs::read(input)?;
        let image = make_image(&bin, *version);
        fs::write(output, &image)?;
        println!(
            "packed {} -> {} ({} bytes, full crc32 0x{:08X})",
            input.display(),
            output.display(),
            image.len(),
            CRC32.checksum(&image)
        );
        return Ok(());
    }

    let mut device = Device::open(&args.port, args.baud)?;

    match args.command {
        Command::Pack { .. } => unreachable!(),
        Command::Upload { input, version, packed } => {
            let bin = fs::read(&input)?;
            let (image, version) = if packed {
                if bin.len() < consts::OTA_HEADER_SIZE || bin[0..4] != consts::OTA_MAGIC.to_le_bytes() {
                    return Err("input does not start with an OTA image header".into());
                }
                let version = u16::from_le_bytes([bin[4], bin[5]]);
                (bin, version)
            } else {
                (make_image(&bin, version), version)
            };
            if image.len() as u32 > consts::STAGING_SIZE {
                return Err(format!("image of {} bytes exceeds the staging slot", image.len()).into());
            }
            upload(&mut device, &image, version)?;
        }
        Command::Status => {
            let reply = device.ota_command(proto::CMD_OTA_STATUS, &[])?;
            let report = OtaStatusReport::parse(&reply).ok_or("malformed status reply")?;
            print_status(&report);
        }
        Command::Confirm => {
            device.ota_command(proto::CMD_OTA_CONFIRM, &[])?;
            println!("image confirmed");
        }
        Command::Reboot => {
            device.ota_command(proto::CMD_OTA_REBOOT, &[])?;
            println!("device is resetting");
        }
        Command::Abort => {
            device.ota_command(proto::CMD_OTA_ABORT, &[])?;
            println!("session aborted");
        }
        Command::Log => {
            let reply = device.ota_command(proto::CMD_OTA_GET_LOG, &[])?;
            if reply.is_empty() {
                println!("event log is empty");
            }
            for raw in reply.chunks_exact(LogEntry::SIZE) {
                let entry = LogEntry::from_bytes([raw[0], raw[1], raw[2], raw[3]]);
                println!("{:<10} param {}", event_name(entry.event), entry.param);
            }
        }
    }
    Ok(())
}
