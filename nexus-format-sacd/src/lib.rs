// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SACD disc image index for DSD-Nexus.
//!
//! Parses the Master TOC and per-area tables of an SACD disc image from a
//! positional byte source and exposes area and track enumeration, per-track
//! extents, and the textual metadata carried by the TOC. All produced values
//! are immutable and the index is safe to share across threads read-only.

mod area;
mod index;
mod toc;

pub use area::{AreaDescriptor, AreaToc, AreaType, FrameFormat, TrackExtent, TrackText};
pub use index::ImageIndex;
pub use toc::{probe, AlbumText, MasterToc};

/// The sector at which the Master TOC is located.
pub const MASTER_TOC_SECTOR: u64 = 510;
