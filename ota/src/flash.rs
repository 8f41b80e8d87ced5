// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sequential page programmer for the staging slot.
//!
//! DATA chunks arrive in strictly ascending, contiguous offsets but
//! with arbitrary lengths, while NOR flash programs in fixed write
//! units and each unit may be programmed only once between erases. The
//! programmer splits incoming slices into page-sized programs, runs the
//! injected yield hook before every flash operation so the radio stack
//! can service its interrupts, and carries trailing bytes that do not
//! fill a write unit until the next push (or a final padded flush).

use consts::OTA_DATA_PAGE;
use embedded_storage::nor_flash::NorFlash;
use heapless::Vec;

/// Largest supported flash write unit.
pub const MAX_WRITE_UNIT: usize = 8;

pub struct PageProgrammer {
    /// Next flash address to program; always write-unit aligned.
    next_addr: u32,
    carry: Vec<u8, MAX_WRITE_UNIT>,
}

impl PageProgrammer {
    pub fn new(base: u32) -> Self {
        Self {
            next_addr: base,
            carry: Vec::new(),
        }
    }

    /// Bytes accepted but not yet in flash.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Append `data` to the staging stream and program every complete
    /// write unit, page by page.
    pub fn push<F: NorFlash>(&mut self, flash: &mut F, yield_hook: &mut impl FnMut(), mut data: &[u8]) -> Result<(), F::Error> {
        debug_assert!(F::WRITE_SIZE <= MAX_WRITE_UNIT);

        // Top up a partial write unit left over from the previous push.
        if !self.carry.is_empty() {
            let take = (F::WRITE_SIZE - self.carry.len()).min(data.len());
            let _ = self.carry.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.carry.len() < F::WRITE_SIZE {
                return Ok(());
            }
            yield_hook();
            flash.write(self.next_addr, &self.carry)?;
            self.next_addr += F::WRITE_SIZE as u32;
            self.carry.clear();
        }

        let aligned = data.len() - data.len() % F::WRITE_SIZE;
        let (mut body, tail) = data.split_at(aligned);
        while !body.is_empty() {
            let n = body.len().min(OTA_DATA_PAGE);
            yield_hook();
            flash.write(self.next_addr, &body[..n])?;
            self.next_addr += n as u32;
            body = &body[n..];
        }

        let _ = self.carry.extend_from_slice(tail);
        Ok(())
    }

    /// Program any carried tail, padded to a full write unit with 0xFF
    /// (the erased value, so the padding is inert).
    pub fn flush<F: NorFlash>(&mut self, flash: &mut F, yield_hook: &mut impl FnMut()) -> Result<(), F::Error> {
        if self.carry.is_empty() {
            return Ok(());
        }
        while self.carry.len() < F::WRITE_SIZE {
            let _ = self.carry.push(0xFF);
        }
        yield_hook();
        flash.write(self.next_addr, &self.carry)?;
        self.next_addr += F::WRITE_SIZE as u32;
        self.carry.clear();
        Ok(())
    }
}
