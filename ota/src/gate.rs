// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Boot-time confirm gate.
//!
//! The first boot of a freshly armed image is a test boot: the gate
//! watches the injected health monitor for up to 30 seconds and calls
//! `confirm` once everything passes. If the window elapses the flag is
//! left pending-unconfirmed, so the bootloader reverts to the previous
//! slot at the next reset. A persisted per-boot counter drops the
//! device into safe mode when an image keeps failing its test boot.
//!
//! The gate is poll-driven from the main loop; it never blocks the
//! radio.

use consts::{BOOT_FAIL_MAX, CONFIRM_CHECK_INTERVAL_MS, CONFIRM_WINDOW_MS};
use embedded_storage::nor_flash::NorFlash;

use crate::engine::{FrameSink, OtaEngine, Platform, State};

/// Health checks gating image confirmation: radio alive, battery above
/// threshold, sensors responding.
pub trait HealthMonitor {
    fn healthy(&mut self) -> bool;
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Inside the confirm window, still checking.
    Watching,
    /// No pending image; normal boot.
    NoPending,
    /// Health passed, image confirmed.
    Confirmed,
    /// Window elapsed unconfirmed; the next reset rolls back.
    Expired,
    /// Too many consecutive failed test boots; pending image dropped.
    SafeMode,
}

pub struct ConfirmGate {
    begun: bool,
    start_ms: u32,
    last_check_ms: u32,
    resolved: Option<GateState>,
}

impl ConfirmGate {
    pub const fn new() -> Self {
        Self {
            begun: false,
            start_ms: 0,
            last_check_ms: 0,
            resolved: None,
        }
    }

    /// Final outcome, once reached. `Watching` is never stored here.
    pub fn outcome(&self) -> Option<GateState> {
        self.resolved
    }

    pub fn poll<F, S, P, H>(&mut self, engine: &mut OtaEngine<F, S, P>, health: &mut H) -> Result<GateState, F::Error>
    where
        F: NorFlash,
        S: FrameSink,
        P: Platform,
        H: HealthMonitor,
    {
        if let Some(state) = self.resolved {
            return Ok(state);
        }

        if !self.begun {
            self.begun = true;
            let flag = engine.read_flag()?;
            if !flag.is_pending_confirm() {
                // Normal boot; drop any stale failure count.
                if flag.is_valid() && flag.boot_attempts != 0 {
                    let mut clean = flag;
                    clean.boot_attempts = 0;
                    engine.write_flag(&clean)?;
                }
                self.resolved = Some(GateState::NoPending);
                return Ok(GateState::NoPending);
            }
            if flag.boot_attempts >= BOOT_FAIL_MAX {
                // The image never survived a test boot; stop retrying it.
                engine.rollback_pending()?;
                self.resolved = Some(GateState::SafeMode);
                return Ok(GateState::SafeMode);
            }
            let mut counted = flag;
            counted.boot_attempts += 1;
            engine.write_flag(&counted)?;
            engine.set_state(State::TestBoot);
            let now = engine.platform_mut().now_ms();
            self.start_ms = now;
            self.last_check_ms = now;
            return Ok(GateState::Watching);
        }

        let now = engine.platform_mut().now_ms();
        if now.wrapping_sub(self.start_ms) >= CONFIRM_WINDOW_MS {
            // Deliberately no confirm and no flag write: pending stays
            // set and the bootloader reverts at the next reset.
            if engine.state() == State::TestBoot {
                engine.set_state(State::Idle);
            }
            self.resolved = Some(GateState::Expired);
            return Ok(GateState::Expired);
        }

        if now.wrapping_sub(self.last_check_ms) >= CONFIRM_CHECK_INTERVAL_MS {
            self.last_check_ms = now;
            if health.healthy() {
                engine.confirm()?;
                if engine.state() == State::TestBoot {
                    engine.set_state(State::Idle);
                }
                self.resolved = Some(GateState::Confirmed);
                return Ok(GateState::Confirmed);
            }
        }

        Ok(GateState::Watching)
    }
}

impl Default for ConfirmGate {
    fn default() -> Self {
        Self::new()
    }
}
