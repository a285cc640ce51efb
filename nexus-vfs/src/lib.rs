// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The SACD virtual filesystem.
//!
//! Presents a host directory of SACD disc images as a browsable tree of
//! virtual DSF files, synthesising valid DSF byte streams on demand from
//! the DSD or DST frames inside the images.
//!
//! [`Overlay`] is the consumer-facing surface: it shadows a configured
//! source directory, passes ordinary entries through, and replaces every
//! disc image with a virtual folder of per-area, per-track `.dsf` files.
//! Open images are pooled and evicted least-recently-used.
//!
//! [`SacdImage`] is the per-image layer underneath: track enumeration,
//! virtual file handles ([`VirtualDsfFile`]), and the editable ID3 overlay
//! persisted to an XML sidecar next to the image.

mod config;
mod file;
mod filename;
mod id3;
mod image;
mod overlay;

pub use config::{IsoExtensions, OverlayConfig};
pub use file::{FileInfo, VirtualDsfFile};
pub use filename::TrackFilenameFormat;
pub use image::SacdImage;
pub use overlay::{Entry, EntryKind, EntrySource, OpenMode, Overlay, OverlayFile};

pub use nexus_codec_dst::DecodePool;
pub use nexus_format_sacd::AreaType;
