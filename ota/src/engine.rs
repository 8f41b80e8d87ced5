// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The OTA state machine.
//!
//! Drives one update session at a time: START arms a background erase
//! of the staging slot, DATA chunks are accepted strictly in offset
//! order (duplicates re-acked, gaps bounced with the expected offset so
//! any host-side window collapses to in-order delivery), FINISH
//! verifies size, CRC and image magic, writes the persistent flag and
//! reboots into the test boot.

use consts::{OTA_CHUNK_MAX, OTA_ERASE_SECTOR, OTA_MAGIC, OTA_PROGRESS_INTERVAL_MS, STAGING_ADDR, STAGING_SIZE};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use host_protocol::{self as proto, LogEntry, OtaAck, OtaData, OtaReply, OtaStart, OtaStatusReport};

use crate::crc32;
use crate::flag::{self, OtaFlag};
use crate::flash::PageProgrammer;
use crate::log::{Event, EventLog, LOG_CAPACITY};

/// Outgoing frame transport. Transmission is best-effort: an
/// unsubscribed or saturated link drops the frame and the protocol's
/// offset-based re-acking covers the loss.
pub trait FrameSink {
    fn send(&mut self, frame_type: u8, payload: &[u8]);
}

/// Capabilities the engine borrows from the surrounding application.
/// In tests these are spies, so `reboot` must return.
pub trait Platform {
    fn now_ms(&mut self) -> u32;
    /// Called before every flash erase or program so the radio stack
    /// can service interrupts the flash operation would starve.
    fn yield_radio(&mut self);
    fn delay_ms(&mut self, ms: u32);
    fn reboot(&mut self);
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Idle = 0,
    PrepareErase = 1,
    ReadyForData = 2,
    Receiving = 3,
    Verifying = 4,
    PendingReboot = 5,
    TestBoot = 6,
    Error = 7,
}

/// Session-local error, reported in the OTA status record. Distinct
/// from the wire subcodes in [`OtaReply`]; `reply()` maps between the
/// two. `Flash` has no wire form: a storage fault gets no reply and
/// the host recovers by timing out and re-STARTing.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaError {
    None = 0,
    Size = 1,
    SizeMismatch = 2,
    Chunk = 3,
    BadMagic = 4,
    ChunkCrc = 5,
    BadOffset = 6,
    CrcMismatch = 7,
    Flash = 8,
}

impl OtaError {
    pub fn reply(self) -> Option<OtaReply> {
        Some(match self {
            OtaError::None | OtaError::Flash => return None,
            OtaError::Size => OtaReply::ErrSize,
            OtaError::SizeMismatch => OtaReply::ErrSizeMismatch,
            OtaError::Chunk => OtaReply::ErrChunk,
            OtaError::BadMagic => OtaReply::ErrBadMagic,
            OtaError::ChunkCrc => OtaReply::ErrChunkCrc,
            OtaError::BadOffset => OtaReply::ErrBadOffset,
            OtaError::CrcMismatch => OtaReply::ErrCrcMismatch,
        })
    }
}

/// Volatile download context; lives from START to FINISH/ABORT/fault.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub slot: u8,
    pub version: u16,
    pub total_size: u32,
    pub expected_crc32: u32,
    pub bytes_received: u32,
    pub crc32_accum: u32,
    /// The only offset the session accepts next; strictly monotonic.
    pub next_expected_offset: u32,
    pub erase_progress_bytes: u32,
    /// Sticky until the next START.
    pub last_error: OtaError,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            slot: 0,
            version: 0,
            total_size: 0,
            expected_crc32: 0,
            bytes_received: 0,
            crc32_accum: 0,
            next_expected_offset: 0,
            erase_progress_bytes: 0,
            last_error: OtaError::None,
        }
    }
}

#[derive(Default)]
struct EraseJob {
    addr: u32,
    total: u32,
    started: bool,
    last_progress_ms: u32,
}

pub struct OtaEngine<F, S, P> {
    flash: F,
    sink: S,
    platform: P,
    state: State,
    session: Session,
    erase: EraseJob,
    writer: PageProgrammer,
    log: EventLog,
}

impl<F: NorFlash, S: FrameSink, P: Platform> OtaEngine<F, S, P> {
    pub fn new(flash: F, sink: S, platform: P) -> Self {
        Self {
            flash,
            sink,
            platform,
            state: State::Idle,
            session: Session::default(),
            erase: EraseJob::default(),
            writer: PageProgrammer::new(STAGING_ADDR),
            log: EventLog::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The shell shares the transport for its own (non-OTA) replies.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    #[cfg(test)]
    pub(crate) fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn log_event(&mut self, event: Event, param: u32) {
        self.log.record(event, param);
    }

    pub fn into_parts(self) -> (F, S, P) {
        (self.flash, self.sink, self.platform)
    }

    pub(crate) fn set_state(&mut self, state: State) {
        self.state = state;
    }

    /// Drop the session and return to IDLE. In-flight flash work has
    /// already completed at this command boundary.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.session = Session::default();
        self.erase = EraseJob::default();
        self.writer = PageProgrammer::new(STAGING_ADDR);
    }

    /// Dispatch one received frame. Frame types outside the OTA range
    /// are ignored so the shell can route everything through here.
    pub fn handle_frame(&mut self, frame_type: u8, payload: &[u8]) -> Result<(), F::Error> {
        match frame_type {
            proto::CMD_OTA_START => {
                self.handle_start(payload);
                Ok(())
            }
            proto::CMD_OTA_DATA => self.handle_data(payload),
            proto::CMD_OTA_FINISH => self.handle_finish(),
            proto::CMD_OTA_ABORT => {
                self.handle_abort();
                Ok(())
            }
            proto::CMD_OTA_STATUS => self.handle_status(),
            proto::CMD_OTA_CONFIRM => self.handle_confirm(),
            proto::CMD_OTA_REBOOT => {
                self.handle_reboot();
                Ok(())
            }
            proto::CMD_OTA_GET_LOG => {
                self.handle_get_log();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Background erase; call from the main loop. Erases at most one
    /// sector per call so the loop never stalls longer than one erase.
    pub fn poll(&mut self) -> Result<(), F::Error> {
        if self.state != State::PrepareErase || self.erase.total == 0 {
            return Ok(());
        }

        if !self.erase.started {
            self.erase.started = true;
            self.erase.addr = STAGING_ADDR;
            self.erase.last_progress_ms = self.platform.now_ms();
        }

        if self.erase.addr >= STAGING_ADDR + self.erase.total {
            self.state = State::ReadyForData;
            self.session.erase_progress_bytes = self.erase.total;
            self.log.record(Event::Ready, self.erase.total);
            self.sink.send(proto::MSG_OTA_READY, &[0]);
            return Ok(());
        }

        self.platform.yield_radio();
        let end = self.erase.addr + OTA_ERASE_SECTOR;
        if let Err(e) = self.flash.erase(self.erase.addr, end) {
            self.enter_error(OtaError::Flash);
            return Err(e);
        }
        self.erase.addr = end;
        self.session.erase_progress_bytes = self.erase.addr - STAGING_ADDR;
        self.platform.yield_radio();

        let now = self.platform.now_ms();
        if now.wrapping_sub(self.erase.last_progress_ms) >= OTA_PROGRESS_INTERVAL_MS {
            self.erase.last_progress_ms = now;
            let progress = self.session.erase_progress_bytes.to_le_bytes();
            self.sink.send(proto::MSG_OTA_PROGRESS, &progress);
        }
        Ok(())
    }

    fn handle_start(&mut self, payload: &[u8]) {
        let Some(start) = OtaStart::parse(payload) else {
            return;
        };
        if self.state != State::Idle {
            self.reset();
        }
        self.session = Session {
            slot: start.slot,
            version: start.version,
            total_size: start.total_size,
            expected_crc32: start.expected_crc32,
            ..Session::default()
        };

        if start.total_size == 0 || start.total_size > STAGING_SIZE {
            self.enter_error(OtaError::Size);
            self.reply(OtaReply::ErrSize);
            return;
        }

        self.state = State::PrepareErase;
        let rounded = (start.total_size + (OTA_ERASE_SECTOR - 1)) & !(OTA_ERASE_SECTOR - 1);
        self.erase = EraseJob {
            addr: 0,
            total: rounded.max(OTA_ERASE_SECTOR),
            started: false,
            last_progress_ms: 0,
        };
        self.writer = PageProgrammer::new(STAGING_ADDR);
        self.log.record(Event::Start, start.total_size);
        self.reply(OtaReply::OkStart);
    }

    fn handle_data(&mut self, payload: &[u8]) -> Result<(), F::Error> {
        let Some(data) = OtaData::parse(payload) else {
            return Ok(());
        };

        match self.state {
            State::PrepareErase => {
                // Still erasing: answer with progress to keep the link
                // alive and drop the chunk; the host resends after READY.
                let progress = self.session.erase_progress_bytes.to_le_bytes();
                self.sink.send(proto::MSG_OTA_PROGRESS, &progress);
                return Ok(());
            }
            State::ReadyForData | State::Receiving => {}
            _ => return Ok(()),
        }

        let chunk_len = data.chunk.len() as u32;
        if data.chunk.len() > OTA_CHUNK_MAX || data.offset.saturating_add(chunk_len) > self.session.total_size {
            // Overrun past total_size is terminal; nothing is clipped.
            self.enter_error(OtaError::Chunk);
            self.reply(OtaReply::ErrChunk);
            return Ok(());
        }

        if data.offset > self.session.next_expected_offset {
            // Ahead of the stream: recoverable. Append the offset the
            // host must resume from.
            self.session.last_error = OtaError::BadOffset;
            let mut rsp = [0u8; 5];
            rsp[0] = OtaReply::ErrBadOffset as u8;
            rsp[1..5].copy_from_slice(&self.session.next_expected_offset.to_le_bytes());
            self.sink.send(proto::RSP_OTA, &rsp);
            return Ok(());
        }

        if data.offset < self.session.next_expected_offset {
            // Duplicate of an already accepted chunk: re-ack with the
            // current position, touch neither flash nor the session.
            self.send_ack();
            return Ok(());
        }

        if crc32::checksum(data.chunk) != data.chunk_crc32 {
            // Recoverable: the host retransmits the same offset.
            self.session.last_error = OtaError::ChunkCrc;
            self.reply(OtaReply::ErrChunkCrc);
            return Ok(());
        }

        self.state = State::Receiving;
        self.session.crc32_accum = crc32::update(self.session.crc32_accum, data.chunk);
        self.session.bytes_received += chunk_len;

        let Self { flash, writer, platform, .. } = self;
        if let Err(e) = writer.push(flash, &mut || platform.yield_radio(), data.chunk) {
            self.enter_error(OtaError::Flash);
            return Err(e);
        }

        self.session.next_expected_offset = data.offset + chunk_len;
        self.send_ack();
        Ok(())
    }

    fn handle_finish(&mut self) -> Result<(), F::Error> {
        if self.state != State::Receiving {
            return Ok(());
        }
        self.state = State::Verifying;

        if self.session.bytes_received != self.session.total_size {
            self.enter_error(OtaError::SizeMismatch);
            self.reply(OtaReply::ErrSizeMismatch);
            return Ok(());
        }

        if self.session.crc32_accum != self.session.expected_crc32 {
            self.enter_error(OtaError::CrcMismatch);
            // Append what the device computed so the host can log it.
            let mut rsp = [0u8; 5];
            rsp[0] = OtaReply::ErrCrcMismatch as u8;
            rsp[1..5].copy_from_slice(&self.session.crc32_accum.to_le_bytes());
            self.sink.send(proto::RSP_OTA, &rsp);
            return Ok(());
        }

        // The image is only fully in flash once the carry is flushed.
        {
            let Self { flash, writer, platform, .. } = self;
            if let Err(e) = writer.flush(flash, &mut || platform.yield_radio()) {
                self.enter_error(OtaError::Flash);
                return Err(e);
            }
        }

        let mut magic = [0u8; 4];
        if let Err(e) = self.flash.read(STAGING_ADDR, &mut magic) {
            self.enter_error(OtaError::Flash);
            return Err(e);
        }
        if u32::from_le_bytes(magic) != OTA_MAGIC {
            self.enter_error(OtaError::BadMagic);
            self.reply(OtaReply::ErrBadMagic);
            return Ok(());
        }

        let armed = OtaFlag::armed(1, self.session.total_size, self.session.expected_crc32);
        {
            let Self { flash, platform, .. } = self;
            if let Err(e) = flag::write(flash, &mut || platform.yield_radio(), &armed) {
                self.enter_error(OtaError::Flash);
                return Err(e);
            }
        }

        self.state = State::PendingReboot;
        self.log.record(Event::Armed, self.session.total_size);
        self.reply(OtaReply::OkFinish);
        // Let the transport drain the ack before the reset takes effect.
        self.platform.delay_ms(50);
        self.platform.reboot();
        Ok(())
    }

    fn handle_abort(&mut self) {
        self.log.record(Event::Abort, 0);
        self.reset();
        self.sink.send(proto::RSP_OTA, &[]);
    }

    fn handle_status(&mut self) -> Result<(), F::Error> {
        let flag = flag::read(&mut self.flash)?;
        let report = OtaStatusReport {
            state: self.state as u8,
            next_expected_offset: self.session.next_expected_offset,
            bytes_received: self.session.bytes_received,
            total_size: self.session.total_size,
            erase_progress_bytes: self.session.erase_progress_bytes,
            last_error: self.session.last_error as u8,
            active_slot: (flag.is_valid() && flag.slot == 1 && flag.confirmed == 1) as u8,
            pending_slot: flag.is_pending_confirm() as u8,
            expected_crc32: self.session.expected_crc32,
        };
        self.sink.send(proto::RSP_OTA, &report.to_bytes());
        Ok(())
    }

    fn handle_confirm(&mut self) -> Result<(), F::Error> {
        self.confirm()?;
        self.sink.send(proto::RSP_OTA, &[0]);
        Ok(())
    }

    fn handle_reboot(&mut self) {
        self.log.record(Event::Reboot, 0);
        self.sink.send(proto::RSP_OTA, &[0]);
        self.platform.delay_ms(100);
        self.platform.reboot();
    }

    fn handle_get_log(&mut self) {
        let mut buf = [0u8; LOG_CAPACITY * LogEntry::SIZE];
        let n = self.log.read_out(&mut buf);
        self.sink.send(proto::RSP_OTA, &buf[..n]);
    }

    /// Accept the running image: the test boot passed.
    pub fn confirm(&mut self) -> Result<(), F::Error> {
        let mut flag = flag::read(&mut self.flash)?;
        if !flag.is_valid() {
            return Ok(());
        }
        flag.pending = 0;
        flag.confirmed = 1;
        flag.boot_attempts = 0;
        self.write_flag(&flag)?;
        self.log.record(Event::Confirm, 0);
        Ok(())
    }

    /// Discard an armed-but-unconfirmed image; the bootloader selects
    /// the previously good slot on the next reset.
    pub fn rollback_pending(&mut self) -> Result<(), F::Error> {
        let mut flag = flag::read(&mut self.flash)?;
        if !flag.is_valid() {
            return Ok(());
        }
        flag.pending = 0;
        flag.confirmed = 0;
        self.write_flag(&flag)?;
        self.log.record(Event::Rollback, 0);
        Ok(())
    }

    pub fn is_pending_confirm(&mut self) -> Result<bool, F::Error> {
        Ok(flag::read(&mut self.flash)?.is_pending_confirm())
    }

    pub fn read_flag(&mut self) -> Result<OtaFlag, F::Error> {
        flag::read(&mut self.flash)
    }

    pub(crate) fn write_flag(&mut self, flag: &OtaFlag) -> Result<(), F::Error> {
        let Self { flash, platform, .. } = self;
        flag::write(flash, &mut || platform.yield_radio(), flag)
    }

    fn enter_error(&mut self, err: OtaError) {
        self.session.last_error = err;
        self.state = State::Error;
        self.log.record(Event::Fault, err as u32);
    }

    fn reply(&mut self, code: OtaReply) {
        self.sink.send(proto::RSP_OTA, &[code as u8]);
    }

    fn send_ack(&mut self) {
        let ack = OtaAck {
            next_expected_offset: self.session.next_expected_offset,
            total_size: self.session.total_size,
        };
        self.sink.send(proto::RSP_OTA, &ack.to_bytes());
    }
}
