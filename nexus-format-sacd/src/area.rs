// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::debug;
use nexus_core::dsd::{self, SECTOR_SIZE};
use nexus_core::errors::{malformed_error, Result};
use nexus_core::io::{ReadAt, SourceReader};

use crate::toc::decode_text;

/// Stereo area TOC signature.
const TWO_CHANNEL_SIGNATURE: [u8; 8] = *b"TWOCHTOC";

/// Multichannel area TOC signature.
const MULTI_CHANNEL_SIGNATURE: [u8; 8] = *b"MULCHTOC";

/// Track table records per sector.
const TRACK_RECORDS_PER_SECTOR: u32 = 128;

/// Track text records per sector.
const TEXT_RECORDS_PER_SECTOR: u32 = 8;

/// One of the two audio areas an SACD may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaType {
    Stereo,
    Multichannel,
}

impl AreaType {
    pub fn name(&self) -> &'static str {
        match *self {
            AreaType::Stereo => "Stereo",
            AreaType::Multichannel => "Multi-channel",
        }
    }
}

/// How the audio frames of an area are stored on disc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// DST-compressed frames, length-prefixed, packed back-to-back.
    DstCompressed,
    /// Linear DSD frames packed back-to-back.
    Dsd,
    /// Linear DSD, three frames packed per 14-sector window.
    Dsd3In14,
    /// Linear DSD, three frames packed per 16-sector window.
    Dsd3In16,
}

impl FrameFormat {
    fn from_code(code: u8) -> Option<FrameFormat> {
        match code {
            0 => Some(FrameFormat::DstCompressed),
            1 => Some(FrameFormat::Dsd),
            2 => Some(FrameFormat::Dsd3In14),
            3 => Some(FrameFormat::Dsd3In16),
            _ => None,
        }
    }

    /// Sector window holding three frames, for the grouped linear formats.
    pub fn sectors_per_group(&self) -> Option<u64> {
        match *self {
            FrameFormat::Dsd3In14 => Some(14),
            FrameFormat::Dsd3In16 => Some(16),
            _ => None,
        }
    }

    pub fn is_dst(&self) -> bool {
        matches!(*self, FrameFormat::DstCompressed)
    }
}

/// Properties of one audio area.
#[derive(Debug, Clone)]
pub struct AreaDescriptor {
    pub area: AreaType,
    pub channel_count: u32,
    pub sample_rate: u32,
    pub frame_format: FrameFormat,
    pub track_count: u32,
    pub loudspeaker_config: Option<u8>,
}

/// Location and length of one track's audio within the disc image.
///
/// Immutable for the lifetime of the image.
#[derive(Debug, Clone, Copy)]
pub struct TrackExtent {
    /// First disc sector of the track's audio region.
    pub start_sector: u32,
    /// Number of sectors the audio region spans.
    pub sector_span: u32,
    /// Number of 1/75 s audio frames in the track.
    pub frame_count: u32,
}

/// Textual metadata of one track.
#[derive(Debug, Clone, Default)]
pub struct TrackText {
    pub title: String,
    pub performer: String,
}

/// The parsed TOC of one audio area: descriptor, track table, track text.
#[derive(Debug)]
pub struct AreaToc {
    pub descriptor: AreaDescriptor,
    pub tracks: Vec<TrackExtent>,
    pub text: Vec<TrackText>,
}

impl AreaToc {
    /// Read and validate an area TOC spanning `[start, start + span)` sectors.
    pub fn read(source: &dyn ReadAt, area: AreaType, start: u32, span: u32) -> Result<AreaToc> {
        if span == 0 {
            return malformed_error("sacd: empty area span");
        }

        let base = u64::from(start) * SECTOR_SIZE;
        let mut reader = SourceReader::at(source, base);

        let signature = reader.read_signature()?;
        let expected = match area {
            AreaType::Stereo => TWO_CHANNEL_SIGNATURE,
            AreaType::Multichannel => MULTI_CHANNEL_SIGNATURE,
        };
        if signature != expected {
            return malformed_error("sacd: bad area toc signature");
        }

        let _version = reader.read_be_u16()?;
        let channel_count = u32::from(reader.read_u8()?);
        let format_code = reader.read_u8()?;
        let loudspeaker = reader.read_u8()?;
        let track_count = u32::from(reader.read_u8()?);

        reader.seek(base + 16);
        let sample_rate = reader.read_be_u32()?;

        if channel_count < 1 || channel_count > dsd::MAX_CHANNELS {
            return malformed_error("sacd: channel count outside 1..=6");
        }
        if track_count == 0 {
            return malformed_error("sacd: area has no tracks");
        }

        let frame_format = match FrameFormat::from_code(format_code) {
            Some(format) => format,
            None => return malformed_error("sacd: unknown frame format"),
        };

        let frame_bytes = match dsd::frame_bytes_per_channel(sample_rate) {
            Some(bytes) => u64::from(bytes) * u64::from(channel_count),
            None => return malformed_error("sacd: sample rate outside the dsd family"),
        };

        if let Some(group) = frame_format.sectors_per_group() {
            if 3 * frame_bytes > group * SECTOR_SIZE {
                return malformed_error("sacd: frames do not fit the sector group");
            }
        }

        let descriptor = AreaDescriptor {
            area,
            channel_count,
            sample_rate,
            frame_format,
            track_count,
            loudspeaker_config: if loudspeaker != 0 { Some(loudspeaker) } else { None },
        };

        debug!(
            "area toc {}: channels={}, rate={}, format={:?}, tracks={}",
            descriptor.area.name(),
            channel_count,
            sample_rate,
            frame_format,
            track_count
        );

        let tracks = read_track_table(source, &descriptor, start, span, frame_bytes)?;
        let text = read_track_text(source, start, track_count)?;

        Ok(AreaToc { descriptor, tracks, text })
    }

    /// Sectors occupied by the area TOC structures before the audio region.
    pub fn toc_sectors(track_count: u32) -> u64 {
        let table = track_count.div_ceil(TRACK_RECORDS_PER_SECTOR);
        let text = track_count.div_ceil(TEXT_RECORDS_PER_SECTOR);
        1 + u64::from(table) + u64::from(text)
    }
}

fn read_track_table(
    source: &dyn ReadAt,
    descriptor: &AreaDescriptor,
    start: u32,
    span: u32,
    frame_bytes: u64,
) -> Result<Vec<TrackExtent>> {
    let area_end = u64::from(start) + u64::from(span);
    let data_start = u64::from(start) + AreaToc::toc_sectors(descriptor.track_count);

    let mut reader = SourceReader::at(source, (u64::from(start) + 1) * SECTOR_SIZE);
    let mut tracks = Vec::with_capacity(descriptor.track_count as usize);
    let mut prev_end = data_start;

    for _ in 0..descriptor.track_count {
        let start_sector = reader.read_be_u32()?;
        let sector_span = reader.read_be_u32()?;
        let frame_count = reader.read_be_u32()?;
        reader.ignore_bytes(4);

        if sector_span == 0 || frame_count == 0 {
            return malformed_error("sacd: empty track extent");
        }

        let track_start = u64::from(start_sector);
        let track_end = track_start + u64::from(sector_span);

        // Tracks must be in ascending sector order, free of overlap, and
        // contained in the area's audio region.
        if track_start < prev_end || track_end > area_end {
            return malformed_error("sacd: track extents overlap or escape the area");
        }

        // For the fixed-size linear formats the frame count must fit the span.
        let capacity = match descriptor.frame_format.sectors_per_group() {
            Some(group) => {
                let groups = u64::from(sector_span) / group;
                3 * groups
            }
            None if !descriptor.frame_format.is_dst() => {
                u64::from(sector_span) * SECTOR_SIZE / frame_bytes
            }
            None => u64::MAX,
        };
        if u64::from(frame_count) > capacity {
            return malformed_error("sacd: track frame count exceeds its sector span");
        }

        prev_end = track_end;
        tracks.push(TrackExtent { start_sector, sector_span, frame_count });
    }

    Ok(tracks)
}

fn read_track_text(source: &dyn ReadAt, start: u32, track_count: u32) -> Result<Vec<TrackText>> {
    let table_sectors = u64::from(track_count.div_ceil(TRACK_RECORDS_PER_SECTOR));
    let text_base = (u64::from(start) + 1 + table_sectors) * SECTOR_SIZE;

    let mut text = Vec::with_capacity(track_count as usize);
    let mut record = [0u8; 256];

    for idx in 0..u64::from(track_count) {
        source.read_exact_at(text_base + idx * 256, &mut record)?;
        text.push(TrackText {
            title: decode_text(&record[0..160]),
            performer: decode_text(&record[160..256]),
        });
    }

    Ok(text)
}
