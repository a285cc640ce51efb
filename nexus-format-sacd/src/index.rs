// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::info;
use nexus_core::errors::Result;
use nexus_core::io::ReadAt;

use crate::area::{AreaDescriptor, AreaToc, AreaType, TrackExtent, TrackText};
use crate::toc::{AlbumText, MasterToc};

/// A fully parsed SACD disc image index.
///
/// Holds the Master TOC and the per-area track tables. Construction reads
/// and validates every structure; afterwards the index is plain immutable
/// data.
pub struct ImageIndex {
    master: MasterToc,
    album: AlbumText,
    areas: Vec<AreaToc>,
}

impl ImageIndex {
    /// Parse the TOC structures of an SACD image.
    ///
    /// Fails with `NotSacd` when the Master TOC signature is absent and
    /// `Malformed` on any structural inconsistency.
    pub fn open(source: &dyn ReadAt) -> Result<ImageIndex> {
        let master = MasterToc::read(source)?;
        let album = AlbumText::read(source)?;

        let mut areas = Vec::new();
        if let Some((start, span)) = master.stereo_area {
            areas.push(AreaToc::read(source, AreaType::Stereo, start, span)?);
        }
        if let Some((start, span)) = master.multichannel_area {
            areas.push(AreaToc::read(source, AreaType::Multichannel, start, span)?);
        }

        info!(
            "opened sacd image: album=\"{}\", areas={}",
            album.title,
            areas.len()
        );

        Ok(ImageIndex { master, album, areas })
    }

    pub fn master_toc(&self) -> &MasterToc {
        &self.master
    }

    pub fn album_text(&self) -> &AlbumText {
        &self.album
    }

    /// Descriptors of the areas present on the disc.
    pub fn areas(&self) -> impl Iterator<Item = &AreaDescriptor> {
        self.areas.iter().map(|a| &a.descriptor)
    }

    pub fn area(&self, area: AreaType) -> Option<&AreaDescriptor> {
        self.area_toc(area).map(|a| &a.descriptor)
    }

    pub fn has_area(&self, area: AreaType) -> bool {
        self.area_toc(area).is_some()
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    /// The track extents of an area, in track order.
    pub fn tracks(&self, area: AreaType) -> &[TrackExtent] {
        self.area_toc(area).map(|a| a.tracks.as_slice()).unwrap_or(&[])
    }

    /// The extent of a track by 1-based index.
    pub fn track(&self, area: AreaType, track_num: u32) -> Option<&TrackExtent> {
        if track_num == 0 {
            return None;
        }
        self.tracks(area).get(track_num as usize - 1)
    }

    /// The textual metadata of a track by 1-based index.
    pub fn track_text(&self, area: AreaType, track_num: u32) -> Option<&TrackText> {
        if track_num == 0 {
            return None;
        }
        self.area_toc(area).and_then(|a| a.text.get(track_num as usize - 1))
    }

    fn area_toc(&self, area: AreaType) -> Option<&AreaToc> {
        self.areas.iter().find(|a| a.descriptor.area == area)
    }
}
