// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `dsd` module defines the constants of the DSD audio family.

/// The size of one SACD disc sector in bytes.
pub const SECTOR_SIZE: u64 = 2048;

/// Audio frames per second. One frame covers 1/75 s of audio.
pub const FRAMES_PER_SEC: u32 = 75;

/// Samples per frame per channel, in 44.1 kHz units. At 64Fs each such
/// sample spans 64 DSD bits, so a frame holds 588 * 64 = 37632 bits.
pub const SAMPLES_PER_FRAME: u32 = 588;

/// The nominal DSD sampling frequency (64Fs).
pub const SAMPLING_FREQUENCY_64: u32 = 2_822_400;

/// The maximum number of audio channels on an SACD.
pub const MAX_CHANNELS: u32 = 6;

/// Bytes of DSD per channel in one frame at 64Fs: 588 * 64 / 8.
pub const FRAME_BYTES_PER_CHANNEL_64: u32 = 4704;

/// Returns the 64Fs rate multiplier (1, 2, or 4) for a sampling frequency in
/// the DSD family, or `None` for any other rate.
pub fn rate_multiplier(sample_rate: u32) -> Option<u32> {
    match sample_rate {
        r if r == SAMPLING_FREQUENCY_64 => Some(1),
        r if r == 2 * SAMPLING_FREQUENCY_64 => Some(2),
        r if r == 4 * SAMPLING_FREQUENCY_64 => Some(4),
        _ => None,
    }
}

/// Bytes of DSD per channel in one frame at the given sampling frequency.
pub fn frame_bytes_per_channel(sample_rate: u32) -> Option<u32> {
    rate_multiplier(sample_rate).map(|m| m * FRAME_BYTES_PER_CHANNEL_64)
}

/// One-bit samples per channel in one frame at the given sampling frequency.
pub fn frame_samples_per_channel(sample_rate: u32) -> Option<u64> {
    frame_bytes_per_channel(sample_rate).map(|b| 8 * u64::from(b))
}

const fn build_bit_reverse_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u8).reverse_bits();
        i += 1;
    }
    table
}

/// Maps every byte value to the value with its bit order reversed.
pub const BIT_REVERSE: [u8; 256] = build_bit_reverse_table();
