// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Direct Stream Transfer (DST) support for DSD-Nexus.
//!
//! DST is the lossless compression scheme for DSD defined in ISO/IEC
//! 14496-3 subpart 10. Every frame fully restores the decoder state from
//! its own bitstream, so frames are decoded independently and in parallel.
//!
//! [`DstDecoder`] expands a single frame. [`DecodePool`] runs a fixed set
//! of worker threads drawing frames from a shared queue. [`DstStream`]
//! layers a per-file look-ahead loop on top of a pool and delivers decoded
//! frames in strict submission order regardless of worker completion order.

mod bitstream;
mod decoder;
mod pipeline;

pub use decoder::DstDecoder;
pub use pipeline::{DecodePool, DstStream, FrameSource};

/// Look-ahead budget of a [`DstStream`] in frames: 25 s of audio.
pub const LOOKAHEAD_FRAMES: u32 = 25 * nexus_core::dsd::FRAMES_PER_SEC;

/// Upper bound on decode worker threads.
pub const MAX_THREADS: usize = 64;
