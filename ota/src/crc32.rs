// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Table-driven CRC-32, reflected polynomial 0xEDB88320.
//!
//! The update function inverts on entry and exit, so a caller-visible
//! state of 0 starts a fresh checksum and intermediate states chain:
//! `update(update(0, a), b) == update(0, a ++ b)`. This is the zlib
//! `crc32()` convention; hosts must seed with 0, not 0xFFFFFFFF. Chunk
//! check values and the whole-image accumulator both use it.

const POLY: u32 = 0xEDB8_8320;

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { POLY ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

static TABLE: [u32; 256] = make_table();

/// Continue a checksum over `data`. Seed with 0 for a fresh one.
pub fn update(crc: u32, data: &[u8]) -> u32 {
    let mut c = !crc;
    for &byte in data {
        c = TABLE[((c ^ byte as u32) & 0xFF) as usize] ^ (c >> 8);
    }
    !c
}

/// Checksum of a complete buffer.
pub fn checksum(data: &[u8]) -> u32 {
    update(0, data)
}
