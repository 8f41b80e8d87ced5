// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! RSP_STATUS (0x86) filling: the fixed 48-byte device health record.

use host_protocol::{DeviceState, DeviceStatus, ImuSource};
use ota_core::{OtaFlag, State};

pub struct Counters {
    pub uptime_ms: u32,
    pub last_error: u8,
    pub error_flags: u8,
    pub reset_reason: u8,
    pub samples_recorded: u32,
    pub gyro_saturation: u16,
    /// 0.25 degC units, signed.
    pub temperature: i16,
}

pub fn fill(ota_state: State, flag: &OtaFlag, safe_mode: bool, counters: Counters) -> DeviceStatus {
    let device_state = if safe_mode {
        DeviceState::Error
    } else if ota_state != State::Idle {
        DeviceState::Ota
    } else {
        DeviceState::Idle
    };

    DeviceStatus {
        uptime_ms: counters.uptime_ms,
        last_error: counters.last_error,
        error_flags: counters.error_flags,
        device_state: device_state as u8,
        imu_source: ImuSource::Internal as u8,
        active_slot: (flag.is_valid() && flag.slot == 1 && flag.confirmed == 1) as u8,
        pending_slot: flag.is_pending_confirm() as u8,
        samples_recorded: counters.samples_recorded,
        gyro_saturation_counter: counters.gyro_saturation,
        // No storage backend: recordings are streamed, not stored.
        storage_used: 0,
        storage_free: 0,
        // No battery sense on this revision.
        battery_mv: 0,
        temperature: counters.temperature,
        reset_reason: counters.reset_reason,
        firmware_build_id: consts::FW_VERSION,
    }
}
