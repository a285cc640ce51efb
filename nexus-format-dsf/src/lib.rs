// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sony DSF container support for DSD-Nexus.
//!
//! This crate does not read or write files. It computes the byte-exact
//! layout of a DSF file from track parameters ([`DsfLayout`]) and converts
//! audio between the SACD disc layout (byte-interleaved, MSB-first bits)
//! and the DSF layout (per-channel 4096-byte blocks, LSB-first bits).

mod layout;
mod transform;

pub use layout::{DsfLayout, DsfRegion};
pub use transform::{block_to_byte, byte_to_block};

/// Size of the "DSD " chunk in bytes.
pub const DSD_CHUNK_SIZE: u64 = 28;

/// Size of the "fmt " chunk in bytes.
pub const FMT_CHUNK_SIZE: u64 = 52;

/// Size of the "data" chunk header in bytes.
pub const DATA_CHUNK_HEADER_SIZE: u64 = 12;

/// Offset of the first audio byte: the three fixed headers.
pub const AUDIO_DATA_OFFSET: u64 = DSD_CHUNK_SIZE + FMT_CHUNK_SIZE + DATA_CHUNK_HEADER_SIZE;

/// Per-channel audio block size in bytes.
pub const BLOCK_SIZE_PER_CHANNEL: u64 = 4096;

/// Filler byte placed between the audio region and the ID3 tag.
pub const PAD_BYTE: u8 = 0x69;
