// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end scenarios for the OTA engine and boot gate, run against
//! the in-memory flash, a recording sink and a scripted clock. Each
//! test drives the same frame sequences a real host would send and
//! asserts on the replies and the persistent flag.

use consts::{OTA_MAGIC, STAGING_ADDR, STAGING_SIZE};
use host_protocol as proto;
use host_protocol::{LogEntry, OtaAck, OtaData, OtaStart, OtaStatusReport};

use crate::crc32;
use crate::engine::{OtaEngine, OtaError, State};
use crate::flag;
use crate::gate::{ConfirmGate, GateState};
use crate::testutil::{FakePlatform, FixedHealth, MemFlash, RecordingSink};

type TestEngine = OtaEngine<MemFlash, RecordingSink, FakePlatform>;

fn new_engine() -> TestEngine {
    OtaEngine::new(MemFlash::new(), RecordingSink::default(), FakePlatform::default())
}

fn boot_from(flash: MemFlash) -> TestEngine {
    OtaEngine::new(flash, RecordingSink::default(), FakePlatform::default())
}

/// A well-formed OTA image: 14-byte header plus a patterned payload.
fn build_image(payload_len: usize, version: u16) -> Vec<u8> {
    let payload: Vec<u8> = (0..payload_len).map(|i| (i * 31 + 7) as u8).collect();
    let mut image = Vec::with_capacity(14 + payload_len);
    image.extend_from_slice(&OTA_MAGIC.to_le_bytes());
    image.extend_from_slice(&version.to_le_bytes());
    image.extend_from_slice(&(payload_len as u32).to_le_bytes());
    image.extend_from_slice(&crc32::checksum(&payload).to_le_bytes());
    image.extend_from_slice(&payload);
    image
}

fn start(engine: &mut TestEngine, total: u32, crc: u32) {
    let cmd = OtaStart {
        slot: 1,
        version: 2,
        total_size: total,
        expected_crc32: crc,
    };
    engine.handle_frame(proto::CMD_OTA_START, &cmd.to_bytes()).unwrap();
}

/// Poll until the background erase finishes, advancing time 10 ms per
/// main-loop turn.
fn run_erase(engine: &mut TestEngine) {
    let mut turns = 0;
    while engine.state() == State::PrepareErase {
        engine.platform_mut().now += 10;
        engine.poll().unwrap();
        turns += 1;
        assert!(turns < 300, "erase never completed");
    }
    assert_eq!(engine.state(), State::ReadyForData);
}

fn send_chunk(engine: &mut TestEngine, offset: u32, chunk: &[u8]) {
    let crc = crc32::checksum(chunk);
    let mut buf = [0u8; 512];
    let payload = OtaData::encode(offset, chunk, crc, &mut buf).to_vec();
    engine.handle_frame(proto::CMD_OTA_DATA, &payload).unwrap();
}

fn upload(engine: &mut TestEngine, image: &[u8], chunk_size: usize) {
    let mut offset = 0usize;
    for chunk in image.chunks(chunk_size) {
        send_chunk(engine, offset as u32, chunk);
        offset += chunk.len();
    }
}

fn staged<'a>(flash: &'a MemFlash, len: usize) -> &'a [u8] {
    &flash.as_slice()[STAGING_ADDR as usize..STAGING_ADDR as usize + len]
}

fn decode_log(payload: &[u8]) -> Vec<LogEntry> {
    payload
        .chunks_exact(LogEntry::SIZE)
        .map(|c| LogEntry::from_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[test]
fn happy_path_one_kilobyte_image() {
    let image = build_image(1010, 2); // 1024 bytes total
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();

    start(&mut engine, 1024, crc);
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x00]));
    assert_eq!(engine.state(), State::PrepareErase);

    engine.sink_mut().drain();
    run_erase(&mut engine);
    assert_eq!(engine.sink_mut().last(), &(proto::MSG_OTA_READY, vec![0]));

    send_chunk(&mut engine, 0, &image[..480]);
    let expect_ack = |off: u32| {
        OtaAck {
            next_expected_offset: off,
            total_size: 1024,
        }
        .to_bytes()
        .to_vec()
    };
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, expect_ack(480)));
    assert_eq!(engine.state(), State::Receiving);

    send_chunk(&mut engine, 480, &image[480..960]);
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, expect_ack(960)));

    send_chunk(&mut engine, 960, &image[960..]);
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, expect_ack(1024)));

    engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x01]));
    assert_eq!(engine.state(), State::PendingReboot);
    assert_eq!(engine.platform_mut().reboots, 1);
    assert_eq!(engine.platform_mut().delays.last(), Some(&50));

    let (mut flash, _, _) = engine.into_parts();
    assert_eq!(staged(&flash, 1024), &image[..]);
    let record = flag::read(&mut flash).unwrap();
    assert!(record.is_pending_confirm());
    assert_eq!(record.slot, 1);
    assert_eq!(record.size, 1024);
    assert_eq!(record.crc32, crc);
    assert_eq!(record.confirmed, 0);
}

#[test]
fn staged_bytes_equal_accepted_chunks_for_any_chunking() {
    // Invariant 1: whatever the chunking, staging holds the exact
    // concatenation of accepted chunks.
    for chunk_size in [37usize, 128, 256, 480] {
        let image = build_image(2034, 1); // 2048 total
        let crc = crc32::checksum(&image);
        let mut engine = new_engine();
        start(&mut engine, image.len() as u32, crc);
        run_erase(&mut engine);
        upload(&mut engine, &image, chunk_size);
        engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();
        assert_eq!(engine.state(), State::PendingReboot, "chunk size {}", chunk_size);
        let (flash, _, _) = engine.into_parts();
        assert_eq!(staged(&flash, image.len()), &image[..], "chunk size {}", chunk_size);
    }
}

#[test]
fn overrun_chunk_is_terminal_and_restart_recovers() {
    let image = build_image(946, 1); // 960 bytes total
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();

    start(&mut engine, 960, crc);
    run_erase(&mut engine);
    send_chunk(&mut engine, 0, &image[..480]);

    // Offset past the end of the image: terminal, no clipping.
    send_chunk(&mut engine, 960, &[0u8; 480]);
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x04]));
    assert_eq!(engine.state(), State::Error);
    assert_eq!(engine.session().last_error, OtaError::Chunk);

    // The error is sticky: further DATA is ignored outright.
    engine.sink_mut().drain();
    send_chunk(&mut engine, 480, &image[480..960]);
    assert!(engine.sink_mut().frames.is_empty());

    // Only a new START clears it.
    start(&mut engine, 960, crc);
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x00]));
    run_erase(&mut engine);
    send_chunk(&mut engine, 0, &image[..480]);
    send_chunk(&mut engine, 480, &image[480..960]);
    engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x01]));
}

#[test]
fn duplicate_chunk_reacks_without_touching_flash() {
    let image = build_image(946, 1);
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();
    start(&mut engine, 960, crc);
    run_erase(&mut engine);
    send_chunk(&mut engine, 0, &image[..480]);

    let writes_before = engine.flash_mut().write_ops;
    let session_before = *engine.session();

    // Retransmission of an already accepted offset.
    send_chunk(&mut engine, 0, &image[..480]);
    let ack = OtaAck {
        next_expected_offset: 480,
        total_size: 960,
    };
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, ack.to_bytes().to_vec()));
    assert_eq!(engine.flash_mut().write_ops, writes_before);
    assert_eq!(engine.session().bytes_received, session_before.bytes_received);
    assert_eq!(engine.session().crc32_accum, session_before.crc32_accum);
}

#[test]
fn corrupt_chunk_crc_is_recoverable_in_place() {
    let image = build_image(946, 1);
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();
    start(&mut engine, 960, crc);
    run_erase(&mut engine);

    // First chunk with a flipped check value.
    let chunk = &image[..480];
    let mut buf = [0u8; 512];
    let payload = OtaData::encode(0, chunk, crc32::checksum(chunk) ^ 1, &mut buf).to_vec();
    engine.handle_frame(proto::CMD_OTA_DATA, &payload).unwrap();
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x06]));
    assert_eq!(engine.state(), State::ReadyForData);
    assert_eq!(engine.session().next_expected_offset, 0);
    assert_eq!(engine.session().bytes_received, 0);

    // Clean retransmission of the same offset is accepted.
    send_chunk(&mut engine, 0, chunk);
    let ack = OtaAck {
        next_expected_offset: 480,
        total_size: 960,
    };
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, ack.to_bytes().to_vec()));
    assert_eq!(engine.state(), State::Receiving);
}

#[test]
fn out_of_order_chunk_reports_resume_offset() {
    let image = build_image(946, 1);
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();
    start(&mut engine, 960, crc);
    run_erase(&mut engine);

    // Second chunk arrives first.
    send_chunk(&mut engine, 480, &image[480..960]);
    let (frame_type, payload) = engine.sink_mut().last().clone();
    assert_eq!(frame_type, proto::RSP_OTA);
    assert_eq!(payload[0], 0x07);
    assert_eq!(&payload[1..5], &0u32.to_le_bytes());
    // Recoverable: no ERROR, nothing accepted.
    assert_eq!(engine.state(), State::ReadyForData);

    send_chunk(&mut engine, 0, &image[..480]);
    send_chunk(&mut engine, 480, &image[480..960]);
    assert_eq!(engine.session().bytes_received, 960);
    engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x01]));
}

#[test]
fn next_expected_offset_never_decreases() {
    // Invariant 2, across duplicates, gaps and corrupt chunks.
    let image = build_image(1906, 1); // 1920 total
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();
    start(&mut engine, 1920, crc);
    run_erase(&mut engine);

    let mut watermark = 0u32;
    let script: &[(u32, usize, bool)] = &[
        (0, 480, true),
        (0, 480, true),      // duplicate
        (1440, 480, true),   // gap
        (480, 480, false),   // corrupt crc
        (480, 480, true),
        (960, 480, true),
        (480, 480, true),    // stale duplicate
        (1440, 480, true),
    ];
    for &(offset, len, good_crc) in script {
        let chunk = &image[offset as usize..offset as usize + len];
        let crc = crc32::checksum(chunk) ^ u32::from(!good_crc);
        let mut buf = [0u8; 512];
        let payload = OtaData::encode(offset, chunk, crc, &mut buf).to_vec();
        engine.handle_frame(proto::CMD_OTA_DATA, &payload).unwrap();
        assert!(engine.session().next_expected_offset >= watermark);
        watermark = engine.session().next_expected_offset;
    }
    assert_eq!(watermark, 1920);
}

#[test]
fn size_mismatch_on_finish_is_terminal() {
    let image = build_image(946, 1);
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();
    start(&mut engine, 960, crc);
    run_erase(&mut engine);
    send_chunk(&mut engine, 0, &image[..480]);

    engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x03]));
    assert_eq!(engine.state(), State::Error);
    // The flag sector was never written.
    assert!(!engine.read_flag().unwrap().is_valid());
}

#[test]
fn crc_mismatch_on_finish_reports_computed_value() {
    let image = build_image(946, 1);
    let actual = crc32::checksum(&image);
    let mut engine = new_engine();
    // Host lies about the image CRC.
    start(&mut engine, 960, actual ^ 0xFFFF);
    run_erase(&mut engine);
    upload(&mut engine, &image, 480);

    engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();
    let (_, payload) = engine.sink_mut().last().clone();
    assert_eq!(payload[0], 0x08);
    assert_eq!(&payload[1..5], &actual.to_le_bytes());
    assert_eq!(engine.state(), State::Error);
    assert_eq!(engine.platform_mut().reboots, 0);
    assert!(!engine.read_flag().unwrap().is_valid());
}

#[test]
fn bad_image_magic_rejected_without_arming() {
    // Structurally valid transfer whose first word is not the magic.
    let mut image = build_image(1010, 2);
    image[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();
    start(&mut engine, image.len() as u32, crc);
    run_erase(&mut engine);
    upload(&mut engine, &image, 480);

    engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x05]));
    assert_eq!(engine.state(), State::Error);
    assert_eq!(engine.platform_mut().reboots, 0);
    assert!(!engine.read_flag().unwrap().is_valid());
}

#[test]
fn odd_sized_image_is_flushed_and_padded() {
    let image = build_image(1007, 1); // 1021 bytes, not a word multiple
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();
    start(&mut engine, 1021, crc);
    run_erase(&mut engine);
    upload(&mut engine, &image, 480);

    engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x01]));
    let (flash, _, _) = engine.into_parts();
    assert_eq!(staged(&flash, 1021), &image[..]);
    // The final partial word is padded with the erased value.
    assert_eq!(&flash.as_slice()[STAGING_ADDR as usize + 1021..STAGING_ADDR as usize + 1024], &[0xFF; 3]);
}

#[test]
fn start_rejects_zero_and_oversize_totals() {
    let mut engine = new_engine();
    start(&mut engine, 0, 0);
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x02]));
    assert_eq!(engine.state(), State::Error);
    assert_eq!(engine.session().last_error, OtaError::Size);

    // A valid START recovers from the sticky error.
    start(&mut engine, 4096, 0x1234_5678);
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x00]));
    assert_eq!(engine.state(), State::PrepareErase);

    start(&mut engine, STAGING_SIZE + 1, 0);
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x02]));
    assert_eq!(engine.state(), State::Error);
}

#[test]
fn data_during_erase_is_dropped_with_progress() {
    let mut engine = new_engine();
    start(&mut engine, 20_000, 0xABCD); // five sectors to erase
    engine.platform_mut().now = 1;
    engine.poll().unwrap(); // first sector
    engine.poll().unwrap(); // second sector
    assert_eq!(engine.state(), State::PrepareErase);

    engine.sink_mut().drain();
    send_chunk(&mut engine, 0, &[1, 2, 3, 4]);
    let frames = engine.sink_mut().drain();
    assert_eq!(frames, vec![(proto::MSG_OTA_PROGRESS, 8192u32.to_le_bytes().to_vec())]);
    assert_eq!(engine.session().bytes_received, 0);
    assert_eq!(engine.state(), State::PrepareErase);
}

#[test]
fn erase_emits_paced_progress_and_ready() {
    let mut engine = new_engine();
    start(&mut engine, 100 * 1024, 0x5555); // 25 sectors
    engine.sink_mut().drain();

    // Walk the clock 300 ms per poll; every erase step crosses the
    // 250 ms progress interval.
    let mut progress = Vec::new();
    let mut turns = 0;
    while engine.state() == State::PrepareErase {
        engine.platform_mut().now += 300;
        engine.poll().unwrap();
        turns += 1;
        assert!(turns < 100);
        for (frame_type, payload) in engine.sink_mut().drain() {
            if frame_type == proto::MSG_OTA_PROGRESS {
                progress.push(u32::from_le_bytes(payload.try_into().unwrap()));
            } else {
                assert_eq!(frame_type, proto::MSG_OTA_READY);
                assert_eq!(payload, vec![0]);
            }
        }
    }
    assert!(progress.len() >= 24, "got {} progress frames", progress.len());
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(engine.session().erase_progress_bytes, 100 * 1024);
    // Erase runs bracketed by yields, two per sector.
    assert_eq!(engine.platform_mut().yields, 50);
}

#[test]
fn abort_resets_to_idle() {
    let image = build_image(946, 1);
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();
    start(&mut engine, 960, crc);
    run_erase(&mut engine);
    send_chunk(&mut engine, 0, &image[..480]);

    engine.sink_mut().drain();
    engine.handle_frame(proto::CMD_OTA_ABORT, &[]).unwrap();
    assert_eq!(engine.sink_mut().frames, vec![(proto::RSP_OTA, vec![])]);
    assert_eq!(engine.state(), State::Idle);
    assert_eq!(engine.session().bytes_received, 0);
    assert_eq!(engine.session().total_size, 0);
}

#[test]
fn status_report_tracks_session_and_flag() {
    let image = build_image(946, 1);
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();
    start(&mut engine, 960, crc);
    run_erase(&mut engine);
    send_chunk(&mut engine, 0, &image[..480]);

    engine.handle_frame(proto::CMD_OTA_STATUS, &[]).unwrap();
    let (_, payload) = engine.sink_mut().last().clone();
    let report = OtaStatusReport::parse(&payload).unwrap();
    assert_eq!(report.state, State::Receiving as u8);
    assert_eq!(report.next_expected_offset, 480);
    assert_eq!(report.bytes_received, 480);
    assert_eq!(report.total_size, 960);
    assert_eq!(report.last_error, 0);
    assert_eq!(report.active_slot, 0);
    assert_eq!(report.pending_slot, 0);
    assert_eq!(report.expected_crc32, crc);

    // Finish arming, then the report must show the pending slot.
    send_chunk(&mut engine, 480, &image[480..960]);
    engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();
    engine.handle_frame(proto::CMD_OTA_STATUS, &[]).unwrap();
    let report = OtaStatusReport::parse(&engine.sink_mut().last().1).unwrap();
    assert_eq!(report.pending_slot, 1);
    assert_eq!(report.active_slot, 0);

    // CONFIRM flips it to the active slot.
    engine.handle_frame(proto::CMD_OTA_CONFIRM, &[]).unwrap();
    engine.handle_frame(proto::CMD_OTA_STATUS, &[]).unwrap();
    let report = OtaStatusReport::parse(&engine.sink_mut().last().1).unwrap();
    assert_eq!(report.pending_slot, 0);
    assert_eq!(report.active_slot, 1);
}

#[test]
fn finish_ignored_unless_receiving() {
    let mut engine = new_engine();
    engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();
    assert!(engine.sink_mut().frames.is_empty());
    assert_eq!(engine.state(), State::Idle);

    start(&mut engine, 4096, 0x42);
    run_erase(&mut engine);
    engine.sink_mut().drain();
    engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();
    assert!(engine.sink_mut().frames.is_empty());
    assert_eq!(engine.state(), State::ReadyForData);
}

#[test]
fn get_log_returns_events_oldest_first() {
    let image = build_image(1010, 2);
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();
    start(&mut engine, 1024, crc);
    run_erase(&mut engine);
    upload(&mut engine, &image, 480);
    engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();

    engine.sink_mut().drain();
    engine.handle_frame(proto::CMD_OTA_GET_LOG, &[]).unwrap();
    let (_, payload) = engine.sink_mut().last().clone();
    let entries = decode_log(&payload);
    assert_eq!(entries[0], LogEntry { event: 1, param: 1024 }); // START
    assert_eq!(entries[1], LogEntry { event: 4, param: 4096 }); // READY, one sector erased
    assert_eq!(entries[2], LogEntry { event: 5, param: 1024 }); // ARMED
}

#[test]
fn reboot_command_logs_and_resets() {
    let mut engine = new_engine();
    engine.handle_frame(proto::CMD_OTA_REBOOT, &[]).unwrap();
    assert_eq!(engine.sink_mut().last(), &(proto::RSP_OTA, vec![0x00]));
    assert_eq!(engine.platform_mut().delays.last(), Some(&100));
    assert_eq!(engine.platform_mut().reboots, 1);

    engine.sink_mut().drain();
    engine.handle_frame(proto::CMD_OTA_GET_LOG, &[]).unwrap();
    let entries = decode_log(&engine.sink_mut().last().1);
    assert_eq!(entries[0], LogEntry { event: 8, param: 0 });
}

#[test]
fn flash_write_fault_is_terminal_without_a_wire_reply() {
    let image = build_image(946, 1);
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();
    start(&mut engine, 960, crc);
    run_erase(&mut engine);

    engine.flash_mut().fail_writes = true;
    engine.sink_mut().drain();
    let chunk = &image[..480];
    let mut buf = [0u8; 512];
    let payload = OtaData::encode(0, chunk, crc32::checksum(chunk), &mut buf).to_vec();
    assert!(engine.handle_frame(proto::CMD_OTA_DATA, &payload).is_err());
    assert_eq!(engine.state(), State::Error);
    assert_eq!(engine.session().last_error, OtaError::Flash);
    assert!(engine.sink_mut().frames.is_empty());
}

// --- boot gate -----------------------------------------------------------

/// Upload and arm a valid image, returning the flash as it would be
/// found after the post-FINISH reset.
fn armed_flash() -> MemFlash {
    let image = build_image(1010, 2);
    let crc = crc32::checksum(&image);
    let mut engine = new_engine();
    start(&mut engine, 1024, crc);
    run_erase(&mut engine);
    upload(&mut engine, &image, 480);
    engine.handle_frame(proto::CMD_OTA_FINISH, &[]).unwrap();
    assert_eq!(engine.platform_mut().reboots, 1);
    let (flash, _, _) = engine.into_parts();
    flash
}

/// Drive one full boot's gate until it resolves.
fn run_gate(engine: &mut TestEngine, healthy: bool) -> GateState {
    let mut gate = ConfirmGate::new();
    let mut health = FixedHealth(healthy);
    loop {
        let state = gate.poll(engine, &mut health).unwrap();
        if state != GateState::Watching {
            return state;
        }
        engine.platform_mut().now += 1_000;
    }
}

#[test]
fn gate_without_pending_image_is_a_no_op() {
    let mut engine = new_engine();
    assert_eq!(run_gate(&mut engine, true), GateState::NoPending);
    assert_eq!(engine.state(), State::Idle);
}

#[test]
fn test_boot_expiry_leaves_flag_for_bootloader_rollback() {
    let mut engine = boot_from(armed_flash());
    let mut gate = ConfirmGate::new();
    let mut sick = FixedHealth(false);

    assert_eq!(gate.poll(&mut engine, &mut sick).unwrap(), GateState::Watching);
    assert_eq!(engine.state(), State::TestBoot);
    assert_eq!(engine.read_flag().unwrap().boot_attempts, 1);

    // Health never passes; the 30 s window runs out.
    let mut outcome = GateState::Watching;
    for _ in 0..40 {
        engine.platform_mut().now += 1_000;
        outcome = gate.poll(&mut engine, &mut sick).unwrap();
        if outcome != GateState::Watching {
            break;
        }
    }
    assert_eq!(outcome, GateState::Expired);
    assert_eq!(gate.outcome(), Some(GateState::Expired));

    // pending=1 confirmed=0 still present: the bootloader reverts.
    let record = engine.read_flag().unwrap();
    assert!(record.is_pending_confirm());
    assert_eq!(engine.state(), State::Idle);
}

#[test]
fn healthy_test_boot_confirms_inside_window() {
    // First boot fails, second boot passes: the redesigned flow ends
    // with a confirmed image and a cleared failure counter.
    let mut engine = boot_from(armed_flash());
    assert_eq!(run_gate(&mut engine, false), GateState::Expired);

    let (flash, _, _) = engine.into_parts();
    let mut engine = boot_from(flash);
    assert_eq!(run_gate(&mut engine, true), GateState::Confirmed);

    let record = engine.read_flag().unwrap();
    assert_eq!(record.pending, 0);
    assert_eq!(record.confirmed, 1);
    assert_eq!(record.boot_attempts, 0);
    assert_eq!(engine.state(), State::Idle);
}

#[test]
fn safe_mode_after_three_failed_test_boots() {
    let mut flash = armed_flash();
    for boot in 1..=3u8 {
        let mut engine = boot_from(flash);
        assert_eq!(run_gate(&mut engine, false), GateState::Expired);
        assert_eq!(engine.read_flag().unwrap().boot_attempts, boot);
        (flash, _, _) = engine.into_parts();
    }

    // Fourth boot refuses to keep test-booting a broken image.
    let mut engine = boot_from(flash);
    assert_eq!(run_gate(&mut engine, false), GateState::SafeMode);
    let record = engine.read_flag().unwrap();
    assert_eq!(record.pending, 0);
    assert_eq!(record.confirmed, 0);
}

#[test]
fn normal_boot_clears_stale_failure_counter() {
    // An expired test boot leaves attempts > 0; once the bootloader has
    // reverted and the old image boots (no pending flag), the counter
    // resets.
    let mut engine = boot_from(armed_flash());
    assert_eq!(run_gate(&mut engine, false), GateState::Expired);
    engine.rollback_pending().unwrap(); // what the bootloader's revert implies
    let (flash, _, _) = engine.into_parts();

    let mut engine = boot_from(flash);
    assert_eq!(run_gate(&mut engine, true), GateState::NoPending);
    assert_eq!(engine.read_flag().unwrap().boot_attempts, 0);
}
