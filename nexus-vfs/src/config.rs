// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bitflags::bitflags;

bitflags! {
    /// Which file extensions promote a directory entry to a virtual folder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IsoExtensions: u32 {
        /// Detect `.iso` files.
        const ISO_LOWER = 0x01;
        /// Detect `.ISO` files.
        const ISO_UPPER = 0x02;
    }
}

impl IsoExtensions {
    /// Whether `name` carries one of the enabled image extensions.
    pub fn matches(&self, name: &str) -> bool {
        (self.contains(IsoExtensions::ISO_LOWER) && name.ends_with(".iso"))
            || (self.contains(IsoExtensions::ISO_UPPER) && name.ends_with(".ISO"))
    }
}

impl Default for IsoExtensions {
    fn default() -> IsoExtensions {
        IsoExtensions::ISO_LOWER | IsoExtensions::ISO_UPPER
    }
}

/// Configuration of an [`Overlay`](crate::Overlay) context.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Host directory to shadow. Required.
    pub source_dir: PathBuf,
    /// Extensions promoted to virtual folders.
    pub iso_extensions: IsoExtensions,
    /// DST decode workers. 0 auto-detects from the CPU count.
    pub thread_pool_size: usize,
    /// Maximum concurrently mounted images. 0 means unlimited.
    pub max_open_isos: usize,
    /// Idle timeout before an unused image is eligible for eviction.
    /// Zero means no timeout.
    pub cache_timeout: Duration,
    /// Show the stereo area of discs that carry one.
    pub stereo_visible: bool,
    /// Show the multichannel area of discs that carry one.
    pub multichannel_visible: bool,
}

impl OverlayConfig {
    pub fn new<P: AsRef<Path>>(source_dir: P) -> OverlayConfig {
        OverlayConfig {
            source_dir: source_dir.as_ref().to_path_buf(),
            iso_extensions: IsoExtensions::default(),
            thread_pool_size: 0,
            max_open_isos: 0,
            cache_timeout: Duration::ZERO,
            stereo_visible: true,
            multichannel_visible: true,
        }
    }
}
