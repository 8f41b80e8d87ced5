// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device identity: the 64-bit FICR DEVICEID, reported through RSP_ID.

use host_protocol::DeviceId;
use nrf52840_pac as pac;

/// Read the factory device ID, little-endian.
pub fn read_uid() -> [u8; 8] {
    let ficr = unsafe { &*pac::FICR::ptr() };
    let id_low = ficr.deviceid[0].read().bits();
    let id_high = ficr.deviceid[1].read().bits();
    let mut uid = [0u8; 8];
    uid[..4].copy_from_slice(&id_low.to_le_bytes());
    uid[4..].copy_from_slice(&id_high.to_le_bytes());
    uid
}

pub fn record(uid: [u8; 8]) -> DeviceId {
    DeviceId {
        fw_version: consts::FW_VERSION,
        protocol_version: consts::PROTOCOL_VERSION,
        hw_revision: consts::HW_REVISION,
        uid,
    }
}
