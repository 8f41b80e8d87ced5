// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host to ball binary protocol.
//! Frames are `type(1) + length(2 LE) + payload`, carried unchanged over
//! the NUS characteristics and over the bench UART. The same crate is
//! linked into the firmware and the host tools so there is exactly one
//! definition of every wire layout.

#![cfg_attr(not(test), no_std)]

mod frame;
mod records;

pub use frame::{encode, FeedResult, Frame, FrameAccumulator, FRAME_HEADER_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use records::{
    DeviceId, DeviceStatus, ImuSample, LogEntry, OtaAck, OtaData, OtaStart, OtaStatusReport, StreamControl, DEVICE_UID_LEN,
};

/// Largest single BLE packet moved through the NUS characteristics
/// (ATT_MTU 247 minus the 3-byte ATT header).
pub const MAX_BLE_PACKET: usize = 244;

/// One radio packet worth of raw frame bytes.
pub type Message = heapless::Vec<u8, MAX_BLE_PACKET>;

// Commands (host -> device)
pub const CMD_OTA_START: u8 = 0x10;
pub const CMD_OTA_DATA: u8 = 0x11;
pub const CMD_OTA_FINISH: u8 = 0x12;
pub const CMD_OTA_ABORT: u8 = 0x13;
pub const CMD_OTA_STATUS: u8 = 0x16;
pub const CMD_OTA_CONFIRM: u8 = 0x17;
pub const CMD_OTA_REBOOT: u8 = 0x18;
pub const CMD_OTA_GET_LOG: u8 = 0x19;
pub const CMD_GET_ID: u8 = 0x80;
pub const CMD_GET_STATUS: u8 = 0x85;
pub const CMD_SET_STREAM: u8 = 0x87;

// Responses and unsolicited messages (device -> host)
pub const RSP_ID: u8 = 0x81;
pub const MSG_ACCEL: u8 = 0x84;
pub const RSP_STATUS: u8 = 0x86;
pub const MSG_GYRO: u8 = 0x89;
pub const RSP_OTA: u8 = 0x90;
pub const MSG_OTA_PROGRESS: u8 = 0x91;
pub const MSG_OTA_READY: u8 = 0x92;

/// First payload byte of every RSP_OTA reply.
///
/// `OkStart` doubles as the generic "ok" for CONFIRM and REBOOT, and as
/// the leading byte of the 9-byte DATA ack.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaReply {
    OkStart = 0x00,
    OkFinish = 0x01,
    ErrSize = 0x02,
    ErrSizeMismatch = 0x03,
    ErrChunk = 0x04,
    ErrBadMagic = 0x05,
    ErrChunkCrc = 0x06,
    ErrBadOffset = 0x07,
    ErrCrcMismatch = 0x08,
}

impl OtaReply {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Self::OkStart,
            0x01 => Self::OkFinish,
            0x02 => Self::ErrSize,
            0x03 => Self::ErrSizeMismatch,
            0x04 => Self::ErrChunk,
            0x05 => Self::ErrBadMagic,
            0x06 => Self::ErrChunkCrc,
            0x07 => Self::ErrBadOffset,
            0x08 => Self::ErrCrcMismatch,
            _ => return None,
        })
    }

    /// Recoverable replies keep the session alive; the host retransmits
    /// (ErrChunkCrc) or resumes from the appended offset (ErrBadOffset).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ErrChunkCrc | Self::ErrBadOffset)
    }
}

/// Device states reported in the RSP_STATUS `device_state` field.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    Boot = 0,
    Idle = 1,
    Armed = 2,
    Recording = 3,
    Flushing = 4,
    Ota = 5,
    Error = 6,
}

/// IMU source reported in the RSP_STATUS `imu_source` field.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImuSource {
    Internal = 0,
    Lsm6Spi = 1,
    Auto = 2,
}
