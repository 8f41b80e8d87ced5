// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Fixed wire layouts carried inside frame payloads. All multi-byte
//! fields are little-endian and tightly packed; the byte offsets are an
//! external contract shared with the host tools and must not drift.

/// Length of the device UID reported in RSP_ID (64-bit FICR DEVICEID).
pub const DEVICE_UID_LEN: usize = 8;

fn read_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// CMD_OTA_START payload: slot(1) version(2) total_size(4) expected_crc32(4).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaStart {
    pub slot: u8,
    pub version: u16,
    pub total_size: u32,
    pub expected_crc32: u32,
}

impl OtaStart {
    pub const SIZE: usize = 11;

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            slot: payload[0],
            version: read_u16(&payload[1..]),
            total_size: read_u32(&payload[3..]),
            expected_crc32: read_u32(&payload[7..]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0] = self.slot;
        b[1..3].copy_from_slice(&self.version.to_le_bytes());
        b[3..7].copy_from_slice(&self.total_size.to_le_bytes());
        b[7..11].copy_from_slice(&self.expected_crc32.to_le_bytes());
        b
    }
}

/// CMD_OTA_DATA payload: offset(4) chunk(N) chunk_crc32(4), N >= 0.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq)]
pub struct OtaData<'a> {
    pub offset: u32,
    pub chunk: &'a [u8],
    pub chunk_crc32: u32,
}

impl<'a> OtaData<'a> {
    /// offset(4) + trailing crc32(4).
    pub const OVERHEAD: usize = 8;

    pub fn parse(payload: &'a [u8]) -> Option<Self> {
        if payload.len() < Self::OVERHEAD {
            return None;
        }
        let crc_at = payload.len() - 4;
        Some(Self {
            offset: read_u32(payload),
            chunk: &payload[4..crc_at],
            chunk_crc32: read_u32(&payload[crc_at..]),
        })
    }

    /// Build the payload into `buf` and return the written prefix.
    /// Panics if `buf` is shorter than `chunk.len() + OVERHEAD`; callers
    /// size their buffers from OTA_CHUNK_MAX.
    pub fn encode<'b>(offset: u32, chunk: &[u8], chunk_crc32: u32, buf: &'b mut [u8]) -> &'b [u8] {
        let total = chunk.len() + Self::OVERHEAD;
        buf[0..4].copy_from_slice(&offset.to_le_bytes());
        buf[4..4 + chunk.len()].copy_from_slice(chunk);
        buf[total - 4..total].copy_from_slice(&chunk_crc32.to_le_bytes());
        &buf[..total]
    }
}

/// The 9-byte DATA acknowledgement inside RSP_OTA:
/// subcode 0x00, next_expected_offset(4), total_size(4).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaAck {
    pub next_expected_offset: u32,
    pub total_size: u32,
}

impl OtaAck {
    pub const SIZE: usize = 9;

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::SIZE || payload[0] != 0x00 {
            return None;
        }
        Some(Self {
            next_expected_offset: read_u32(&payload[1..]),
            total_size: read_u32(&payload[5..]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[1..5].copy_from_slice(&self.next_expected_offset.to_le_bytes());
        b[5..9].copy_from_slice(&self.total_size.to_le_bytes());
        b
    }
}

/// CMD_OTA_STATUS reply payload (24 bytes). The first byte is the OTA
/// state, in the same position a subcode would occupy.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaStatusReport {
    pub state: u8,
    pub next_expected_offset: u32,
    pub bytes_received: u32,
    pub total_size: u32,
    pub erase_progress_bytes: u32,
    pub last_error: u8,
    pub active_slot: u8,
    pub pending_slot: u8,
    pub expected_crc32: u32,
}

impl OtaStatusReport {
    pub const SIZE: usize = 24;

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            state: payload[0],
            next_expected_offset: read_u32(&payload[1..]),
            bytes_received: read_u32(&payload[5..]),
            total_size: read_u32(&payload[9..]),
            erase_progress_bytes: read_u32(&payload[13..]),
            last_error: payload[17],
            active_slot: payload[18],
            pending_slot: payload[19],
            expected_crc32: read_u32(&payload[20..]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0] = self.state;
        b[1..5].copy_from_slice(&self.next_expected_offset.to_le_bytes());
        b[5..9].copy_from_slice(&self.bytes_received.to_le_bytes());
        b[9..13].copy_from_slice(&self.total_size.to_le_bytes());
        b[13..17].copy_from_slice(&self.erase_progress_bytes.to_le_bytes());
        b[17] = self.last_error;
        b[18] = self.active_slot;
        b[19] = self.pending_slot;
        b[20..24].copy_from_slice(&self.expected_crc32.to_le_bytes());
        b
    }
}

/// RSP_STATUS payload (48 bytes): general device health record.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub uptime_ms: u32,
    pub last_error: u8,
    pub error_flags: u8,
    pub device_state: u8,
    pub imu_source: u8,
    pub active_slot: u8,
    pub pending_slot: u8,
    pub samples_recorded: u32,
    pub gyro_saturation_counter: u16,
    pub storage_used: u32,
    pub storage_free: u32,
    pub battery_mv: u16,
    /// Signed, 0.25 degC units.
    pub temperature: i16,
    pub reset_reason: u8,
    pub firmware_build_id: u16,
}

impl DeviceStatus {
    pub const SIZE: usize = 48;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0..4].copy_from_slice(&self.uptime_ms.to_le_bytes());
        b[4] = self.last_error;
        b[5] = self.error_flags;
        b[6] = self.device_state;
        b[7] = self.imu_source;
        b[8] = self.active_slot;
        b[9] = self.pending_slot;
        b[10..14].copy_from_slice(&self.samples_recorded.to_le_bytes());
        b[14..16].copy_from_slice(&self.gyro_saturation_counter.to_le_bytes());
        // b[16..18] pad
        b[18..22].copy_from_slice(&self.storage_used.to_le_bytes());
        b[22..26].copy_from_slice(&self.storage_free.to_le_bytes());
        b[26..28].copy_from_slice(&self.battery_mv.to_le_bytes());
        b[28..30].copy_from_slice(&self.temperature.to_le_bytes());
        b[30] = self.reset_reason;
        // b[31] pad
        b[32..34].copy_from_slice(&self.firmware_build_id.to_le_bytes());
        // b[34..48] reserved
        b
    }

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            uptime_ms: read_u32(payload),
            last_error: payload[4],
            error_flags: payload[5],
            device_state: payload[6],
            imu_source: payload[7],
            active_slot: payload[8],
            pending_slot: payload[9],
            samples_recorded: read_u32(&payload[10..]),
            gyro_saturation_counter: read_u16(&payload[14..]),
            storage_used: read_u32(&payload[18..]),
            storage_free: read_u32(&payload[22..]),
            battery_mv: read_u16(&payload[26..]),
            temperature: read_u16(&payload[28..]) as i16,
            reset_reason: payload[30],
            firmware_build_id: read_u16(&payload[32..]),
        })
    }
}

/// RSP_ID payload: fw_version(2) protocol(1) hw(1) uid_len(1) uid(8).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId {
    pub fw_version: u16,
    pub protocol_version: u8,
    pub hw_revision: u8,
    pub uid: [u8; DEVICE_UID_LEN],
}

impl DeviceId {
    pub const SIZE: usize = 5 + DEVICE_UID_LEN;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0..2].copy_from_slice(&self.fw_version.to_le_bytes());
        b[2] = self.protocol_version;
        b[3] = self.hw_revision;
        b[4] = DEVICE_UID_LEN as u8;
        b[5..].copy_from_slice(&self.uid);
        b
    }

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 5 {
            return None;
        }
        let uid_len = payload[4] as usize;
        if uid_len != DEVICE_UID_LEN || payload.len() < 5 + uid_len {
            return None;
        }
        let mut uid = [0u8; DEVICE_UID_LEN];
        uid.copy_from_slice(&payload[5..5 + uid_len]);
        Some(Self {
            fw_version: read_u16(payload),
            protocol_version: payload[2],
            hw_revision: payload[3],
            uid,
        })
    }
}

/// MSG_ACCEL / MSG_GYRO payload: t_ms(4) x(4) y(4) z(4), floats LE.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    pub t_ms: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl ImuSample {
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0..4].copy_from_slice(&self.t_ms.to_le_bytes());
        b[4..8].copy_from_slice(&self.x.to_le_bytes());
        b[8..12].copy_from_slice(&self.y.to_le_bytes());
        b[12..16].copy_from_slice(&self.z.to_le_bytes());
        b
    }

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            t_ms: read_u32(payload),
            x: f32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
            y: f32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]),
            z: f32::from_le_bytes([payload[12], payload[13], payload[14], payload[15]]),
        })
    }
}

/// CMD_SET_STREAM payload: accel(1) gyro(1), nonzero enables.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamControl {
    pub accel: bool,
    pub gyro: bool,
}

impl StreamControl {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 2 {
            return None;
        }
        Some(Self {
            accel: payload[0] != 0,
            gyro: payload[1] != 0,
        })
    }
}

/// One event-log record: event(1) param(3 LE). The param is truncated
/// to 24 bits on write.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntry {
    pub event: u8,
    pub param: u32,
}

impl LogEntry {
    pub const SIZE: usize = 4;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        [
            self.event,
            self.param as u8,
            (self.param >> 8) as u8,
            (self.param >> 16) as u8,
        ]
    }

    pub fn from_bytes(b: [u8; Self::SIZE]) -> Self {
        Self {
            event: b[0],
            param: u32::from_le_bytes([b[1], b[2], b[3], 0]),
        }
    }
}
