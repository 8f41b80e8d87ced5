// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! OTA update core for the Vortex ball.
//!
//! The engine owns the staging slot of a dual-slot flash layout. A
//! framed command stream drives it through download, verification and
//! arming; the bootloader consumes the persistent flag record this
//! crate writes, and the boot gate decides between confirm and
//! rollback on the first boot of a new image.
//!
//! Everything hardware-shaped is injected: flash is any
//! `embedded_storage::nor_flash::NorFlash`, transmit is a [`FrameSink`],
//! and time / yield / reboot come from a [`Platform`]. The whole crate
//! runs under `cargo test` on the host against in-memory fakes.

#![cfg_attr(not(test), no_std)]

pub mod crc32;
mod engine;
mod flag;
mod flash;
mod gate;
mod log;

pub use engine::{FrameSink, OtaEngine, OtaError, Platform, Session, State};
pub use flag::OtaFlag;
pub use flash::PageProgrammer;
pub use gate::{ConfirmGate, GateState, HealthMonitor};
pub use log::{Event, EventLog, LOG_CAPACITY};

#[cfg(test)]
mod testutil;

#[cfg(test)]
mod tests;
