// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]

/// Maximum Transfer Unit (MTU) size for BLE communication.
/// Set to 247 bytes to allow efficient data transfer while staying within BLE limits.
pub const ATT_MTU: usize = 247;

/// Full device name advertised over BLE.
pub const DEVICE_NAME: &str = "Vortex Ball";

/// Short device name used in limited advertising data, kept within the
/// 31-byte advertising payload.
pub const SHORT_NAME: &str = "Vortex";

/// UUID for the Nordic UART Service (NUS).
pub const NUS_UUID: u128 = 0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E;

/// List of BLE service UUIDs supported by this device.
pub const SERVICES_LIST: [[u8; 16]; 1] = [NUS_UUID.to_le_bytes()];

/// Firmware version reported in RSP_ID and archived in the image header.
pub const FW_VERSION: u16 = 0x0200;

/// Binary protocol revision reported in RSP_ID.
pub const PROTOCOL_VERSION: u8 = 2;

/// Hardware revision reported in RSP_ID.
pub const HW_REVISION: u8 = 1;

// ---------------------------------------------------------------------------
// Flash map. The bootloader shares these addresses; changing any of them is
// a flash-layout migration, not a code change.
// ---------------------------------------------------------------------------

/// Slot A, the primary application image the bootloader jumps to.
pub const SLOT_A_ADDR: u32 = 0x0002_6000;

/// Slot B, the OTA staging area.
pub const STAGING_ADDR: u32 = 0x0008_0000;

/// Usable staging capacity. The region runs up to the flag sector at
/// 0xFE000; capacity is capped at 496 KiB.
pub const STAGING_SIZE: u32 = 496 * 1024;

/// Reserved 4 KiB sector holding the persistent OTA flag record.
pub const FLAG_ADDR: u32 = 0x000F_E000;

// ---------------------------------------------------------------------------
// OTA transfer parameters.
// ---------------------------------------------------------------------------

/// "TOBS" little-endian: first word of every valid OTA image.
pub const OTA_MAGIC: u32 = 0x5342_4F54;

/// "FATO" little-endian: first word of a valid persistent flag record.
pub const OTA_FLAG_MAGIC: u32 = 0x4F54_4146;

/// Image header: magic(4) + version(2) + payload size(4) + payload crc32(4).
pub const OTA_HEADER_SIZE: usize = 14;

/// Largest DATA chunk the device accepts.
pub const OTA_CHUNK_MAX: usize = 480;

/// Flash erase granularity.
pub const OTA_ERASE_SECTOR: u32 = 4096;

/// Flash program split size; the yield hook runs between pages.
pub const OTA_DATA_PAGE: usize = 256;

/// The host may keep this many DATA frames in flight. Offset-based
/// ACKing collapses the window to in-order acceptance on the device.
pub const OTA_SLIDING_WINDOW: usize = 4;

/// Minimum spacing of MSG_OTA_PROGRESS frames during background erase.
/// Frequent progress keeps the BLE link from idling out mid-erase.
pub const OTA_PROGRESS_INTERVAL_MS: u32 = 250;

// ---------------------------------------------------------------------------
// Boot gate.
// ---------------------------------------------------------------------------

/// A freshly booted unconfirmed image has this long to pass health
/// checks before the next reset rolls it back.
pub const CONFIRM_WINDOW_MS: u32 = 30_000;

/// Health check cadence inside the confirm window.
pub const CONFIRM_CHECK_INTERVAL_MS: u32 = 1_000;

/// Consecutive failed test boots before the device drops to safe mode.
pub const BOOT_FAIL_MAX: u8 = 3;

/// Cadence of the unsolicited RSP_STATUS heartbeat.
pub const STATUS_INTERVAL_MS: u32 = 1_000;
