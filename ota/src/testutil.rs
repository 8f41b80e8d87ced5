// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host-test doubles for the injected capabilities: an in-memory NOR
//! flash that enforces erase-before-program semantics, a recording
//! frame sink, a scripted clock/reboot spy and a settable health
//! monitor.

use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash};

use crate::engine::{FrameSink, Platform};
use crate::gate::HealthMonitor;

/// Whole 1 MiB device so the real flash map constants work unchanged.
pub const FLASH_SIZE: usize = 0x0010_0000;

/// In-memory NOR flash. Every byte starts unerased; programming a word
/// that is not freshly erased panics, which is exactly the bug class
/// the carry logic in the page programmer must avoid.
pub struct MemFlash {
    mem: Vec<u8>,
    writable: Vec<bool>,
    pub erase_ops: u32,
    pub write_ops: u32,
    pub fail_writes: bool,
}

impl MemFlash {
    pub fn new() -> Self {
        Self {
            mem: vec![0u8; FLASH_SIZE],
            writable: vec![false; FLASH_SIZE],
            erase_ops: 0,
            write_ops: 0,
            fail_writes: false,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mem
    }

    /// Pre-erase a region without going through the engine.
    pub fn erase_range(&mut self, addr: u32, len: u32) {
        NorFlash::erase(self, addr, addr + len).unwrap();
        self.erase_ops -= 1;
    }
}

impl ErrorType for MemFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MemFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > FLASH_SIZE {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        bytes.copy_from_slice(&self.mem[start..end]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        FLASH_SIZE
    }
}

impl NorFlash for MemFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert_eq!(from as usize % Self::ERASE_SIZE, 0, "unaligned erase from {:#x}", from);
        assert_eq!(to as usize % Self::ERASE_SIZE, 0, "unaligned erase to {:#x}", to);
        if to as usize > FLASH_SIZE || from > to {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        self.erase_ops += 1;
        for i in from as usize..to as usize {
            self.mem[i] = 0xFF;
            self.writable[i] = true;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(NorFlashErrorKind::Other);
        }
        assert_eq!(offset as usize % Self::WRITE_SIZE, 0, "unaligned write at {:#x}", offset);
        assert_eq!(bytes.len() % Self::WRITE_SIZE, 0, "ragged write of {} bytes", bytes.len());
        let start = offset as usize;
        let end = start + bytes.len();
        if end > FLASH_SIZE {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        self.write_ops += 1;
        for (i, &b) in (start..end).zip(bytes) {
            assert!(self.writable[i], "program of non-erased byte at {:#x}", i);
            self.mem[i] = b;
            self.writable[i] = false;
        }
        Ok(())
    }
}

/// Captures every transmitted frame for assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub frames: Vec<(u8, Vec<u8>)>,
}

impl RecordingSink {
    pub fn last(&self) -> &(u8, Vec<u8>) {
        self.frames.last().expect("no frames sent")
    }

    pub fn drain(&mut self) -> Vec<(u8, Vec<u8>)> {
        std::mem::take(&mut self.frames)
    }
}

impl FrameSink for RecordingSink {
    fn send(&mut self, frame_type: u8, payload: &[u8]) {
        self.frames.push((frame_type, payload.to_vec()));
    }
}

/// Manually advanced clock plus spies for yield, delay and reboot.
#[derive(Default)]
pub struct FakePlatform {
    pub now: u32,
    pub yields: u32,
    pub delays: Vec<u32>,
    pub reboots: u32,
}

impl Platform for FakePlatform {
    fn now_ms(&mut self) -> u32 {
        self.now
    }

    fn yield_radio(&mut self) {
        self.yields += 1;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delays.push(ms);
    }

    fn reboot(&mut self) {
        self.reboots += 1;
    }
}

pub struct FixedHealth(pub bool);

impl HealthMonitor for FixedHealth {
    fn healthy(&mut self) -> bool {
        self.0
    }
}
