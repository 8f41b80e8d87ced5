// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device health bookkeeping: last error, error flags and the decoded
//! reset reason, all surfaced through RSP_STATUS.

use nrf52840_pac as pac;

pub const ERR_NONE: u8 = 0;
pub const ERR_IMU: u8 = 1;
pub const ERR_MEM: u8 = 2;
pub const ERR_BLE: u8 = 3;
pub const ERR_FLASH: u8 = 4;

pub const RESET_REASON_POR: u8 = 0;
pub const RESET_REASON_PIN: u8 = 1;
pub const RESET_REASON_WDT: u8 = 2;
pub const RESET_REASON_SOFT: u8 = 3;
pub const RESET_REASON_LOCKUP: u8 = 4;

pub struct Health {
    pub last_error: u8,
    pub error_flags: u8,
    pub reset_reason: u8,
}

impl Health {
    /// Decode and clear POWER.RESETREAS. Must run before the SoftDevice
    /// is enabled, which takes ownership of the POWER peripheral.
    pub fn init() -> Self {
        let power = unsafe { &*pac::POWER::ptr() };
        let reason = power.resetreas.read();
        let reset_reason = if reason.dog().is_detected() {
            RESET_REASON_WDT
        } else if reason.sreq().is_detected() {
            RESET_REASON_SOFT
        } else if reason.lockup().is_detected() {
            RESET_REASON_LOCKUP
        } else if reason.resetpin().is_detected() {
            RESET_REASON_PIN
        } else {
            RESET_REASON_POR
        };
        power.resetreas.write(|w| unsafe { w.bits(0xFFFF_FFFF) });

        Self {
            last_error: ERR_NONE,
            error_flags: 0,
            reset_reason,
        }
    }

    pub fn set_last_error(&mut self, err: u8) {
        self.last_error = err;
        if err != ERR_NONE && err < 8 {
            self.error_flags |= 1 << err;
        }
    }
}

/// RAM pattern check over a scratch buffer.
pub fn selftest_mem() -> bool {
    let mut scratch = [0u8; 64];
    for (i, b) in scratch.iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(0x5A);
    }
    scratch.iter().enumerate().all(|(i, &b)| b == (i as u8).wrapping_mul(0x5A))
}
