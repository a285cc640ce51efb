// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::debug;
use nexus_core::dsd::SECTOR_SIZE;
use nexus_core::errors::{not_sacd_error, Result};
use nexus_core::io::{ReadAt, SourceReader};

use crate::MASTER_TOC_SECTOR;

/// Master TOC signature "SACDMTOC".
const MASTER_TOC_SIGNATURE: [u8; 8] = *b"SACDMTOC";

/// Cheaply check whether a source carries the Master TOC signature,
/// without parsing anything else.
pub fn probe(source: &dyn ReadAt) -> bool {
    let mut signature = [0u8; 8];
    let offset = MASTER_TOC_SECTOR * SECTOR_SIZE;
    source.read_exact_at(offset, &mut signature).is_ok() && signature == MASTER_TOC_SIGNATURE
}

/// Decode a NUL-padded UTF-8 field. Invalid sequences are replaced.
pub(crate) fn decode_text(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// The parsed Master TOC.
///
/// Locates the stereo and multichannel areas and carries the album-level
/// fields that are not per-area.
#[derive(Debug)]
pub struct MasterToc {
    pub version_major: u8,
    pub version_minor: u8,
    pub catalog_number: String,
    pub album_set_size: u16,
    pub album_sequence_number: u16,
    pub date_year: u16,
    pub date_month: u8,
    pub date_day: u8,
    pub stereo_area: Option<(u32, u32)>,
    pub multichannel_area: Option<(u32, u32)>,
}

impl MasterToc {
    /// Read the Master TOC from sector 510 of the source.
    ///
    /// Fails with `NotSacd` when the signature check fails.
    pub fn read(source: &dyn ReadAt) -> Result<MasterToc> {
        let base = MASTER_TOC_SECTOR * SECTOR_SIZE;
        let mut reader = SourceReader::at(source, base);

        let signature = reader.read_signature()?;
        if signature != MASTER_TOC_SIGNATURE {
            return not_sacd_error();
        }

        let version_major = reader.read_u8()?;
        let version_minor = reader.read_u8()?;

        reader.seek(base + 16);
        let mut catalog = [0u8; 16];
        reader.read_buf_exact(&mut catalog)?;
        let catalog_number = String::from_utf8_lossy(&catalog).trim_end().to_string();

        let album_set_size = reader.read_be_u16()?;
        let album_sequence_number = reader.read_be_u16()?;

        reader.seek(base + 40);
        let date_year = reader.read_be_u16()?;
        let date_month = reader.read_u8()?;
        let date_day = reader.read_u8()?;

        reader.seek(base + 48);
        let stereo_start = reader.read_be_u32()?;
        let stereo_span = reader.read_be_u32()?;
        let multichannel_start = reader.read_be_u32()?;
        let multichannel_span = reader.read_be_u32()?;

        debug!(
            "master toc: version={}.{}, stereo=({}, {}), multichannel=({}, {})",
            version_major, version_minor, stereo_start, stereo_span, multichannel_start,
            multichannel_span
        );

        let area = |start: u32, span: u32| if start != 0 { Some((start, span)) } else { None };

        Ok(MasterToc {
            version_major,
            version_minor,
            catalog_number,
            album_set_size,
            album_sequence_number,
            date_year,
            date_month,
            date_day,
            stereo_area: area(stereo_start, stereo_span),
            multichannel_area: area(multichannel_start, multichannel_span),
        })
    }
}

/// Album-level textual metadata from the sector following the Master TOC.
#[derive(Debug, Default, Clone)]
pub struct AlbumText {
    pub title: String,
    pub artist: String,
    pub publisher: String,
    pub copyright: String,
}

impl AlbumText {
    pub fn read(source: &dyn ReadAt) -> Result<AlbumText> {
        let base = (MASTER_TOC_SECTOR + 1) * SECTOR_SIZE;
        let mut raw = [0u8; 512];
        source.read_exact_at(base, &mut raw)?;

        Ok(AlbumText {
            title: decode_text(&raw[0..128]),
            artist: decode_text(&raw[128..256]),
            publisher: decode_text(&raw[256..384]),
            copyright: decode_text(&raw[384..512]),
        })
    }
}
