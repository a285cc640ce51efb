// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthetic SACD image builder shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use nexus_format_dsf::byte_to_block;

pub const SECTOR: usize = 2048;
pub const RATE: u32 = 2_822_400;
pub const FRAME_BYTES_PER_CHANNEL: usize = 4704;
pub const MASTER_TOC_SECTOR: usize = 510;
pub const STEREO_AREA_SECTOR: usize = 600;

/// Wire codes of the area frame formats.
pub const FORMAT_DST: u8 = 0;
pub const FORMAT_DSD: u8 = 1;
pub const FORMAT_DSD_3_IN_14: u8 = 2;

#[derive(Clone)]
pub struct TrackSpec {
    pub frames: u32,
    pub title: String,
    pub performer: String,
}

impl TrackSpec {
    pub fn new(frames: u32, title: &str, performer: &str) -> TrackSpec {
        TrackSpec { frames, title: title.to_string(), performer: performer.to_string() }
    }

    /// A track with no TOC text, so the virtual file carries no ID3 unless
    /// the album has text.
    pub fn untitled(frames: u32) -> TrackSpec {
        TrackSpec::new(frames, "", "")
    }
}

#[derive(Clone)]
pub struct AreaSpec {
    pub channels: u32,
    pub format: u8,
    pub tracks: Vec<TrackSpec>,
    /// Replace one DST frame record `(track_index_0_based, frame)` with a
    /// malformed compressed frame.
    pub broken_dst_frame: Option<(usize, u32)>,
}

impl AreaSpec {
    pub fn new(channels: u32, format: u8, tracks: Vec<TrackSpec>) -> AreaSpec {
        AreaSpec { channels, format, tracks, broken_dst_frame: None }
    }
}

#[derive(Clone, Default)]
pub struct ImageBuilder {
    pub album_title: String,
    pub album_artist: String,
    pub stereo: Option<AreaSpec>,
    pub multichannel: Option<AreaSpec>,
}

/// Deterministic audio content: the source byte at `index` of `frame` of
/// the 1-based `track_num`.
pub fn audio_byte(track_num: u32, frame: u32, index: usize) -> u8 {
    ((u64::from(track_num) * 131 + u64::from(frame) * 31 + index as u64 * 7) % 251) as u8
}

/// One frame of byte-interleaved MSB-first source audio.
pub fn frame_payload(channels: u32, track_num: u32, frame: u32) -> Vec<u8> {
    let len = FRAME_BYTES_PER_CHANNEL * channels as usize;
    (0..len).map(|i| audio_byte(track_num, frame, i)).collect()
}

/// The full byte-interleaved source stream of a track.
pub fn track_source_bytes(channels: u32, track_num: u32, frames: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    for frame in 0..frames {
        bytes.extend_from_slice(&frame_payload(channels, track_num, frame));
    }
    bytes
}

/// The audio region of the corresponding virtual DSF file: the source
/// stream in block-interleaved LSB-first layout, zero-padded to whole
/// blocks.
pub fn expected_audio_region(channels: u32, track_num: u32, frames: u32) -> Vec<u8> {
    let src = track_source_bytes(channels, track_num, frames);
    let per_channel = src.len() / channels as usize;
    let blocks = per_channel.div_ceil(4096);
    let mut blocked = vec![0u8; blocks * 4096 * channels as usize];
    byte_to_block(&src, channels as usize, &mut blocked).unwrap();
    blocked
}

fn put(image: &mut Vec<u8>, offset: usize, bytes: &[u8]) {
    if image.len() < offset + bytes.len() {
        image.resize(offset + bytes.len(), 0);
    }
    image[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn toc_sectors(track_count: usize) -> usize {
    1 + track_count.div_ceil(128) + track_count.div_ceil(8)
}

/// Bytes one track occupies in the audio region.
fn track_content_len(area: &AreaSpec, track_idx: usize) -> usize {
    let spec = &area.tracks[track_idx];
    let frame_bytes = FRAME_BYTES_PER_CHANNEL * area.channels as usize;

    match area.format {
        FORMAT_DSD => spec.frames as usize * frame_bytes,
        FORMAT_DSD_3_IN_14 => (spec.frames as usize).div_ceil(3) * 14 * SECTOR,
        FORMAT_DST => {
            let mut len = 0;
            for frame in 0..spec.frames {
                len += 4;
                if area.broken_dst_frame == Some((track_idx, frame)) {
                    len += 3;
                } else {
                    len += 1 + frame_bytes;
                }
            }
            len
        }
        _ => panic!("unsupported test format"),
    }
}

fn write_area(
    image: &mut Vec<u8>,
    area: &AreaSpec,
    start_sector: usize,
    signature: &[u8; 8],
) -> usize {
    let base = start_sector * SECTOR;
    put(image, base, signature);
    put(image, base + 8, &1u16.to_be_bytes());
    image.resize(image.len().max(base + 20), 0);
    image[base + 10] = area.channels as u8;
    image[base + 11] = area.format;
    image[base + 12] = 0;
    image[base + 13] = area.tracks.len() as u8;
    put(image, base + 16, &RATE.to_be_bytes());

    // Track table, then text table.
    let table = base + SECTOR;
    let text = table + area.tracks.len().div_ceil(128) * SECTOR;

    let mut cursor = start_sector + toc_sectors(area.tracks.len());
    for (idx, track) in area.tracks.iter().enumerate() {
        let content = track_content_len(area, idx);
        let span = content.div_ceil(SECTOR);

        let record = table + idx * 16;
        put(image, record, &(cursor as u32).to_be_bytes());
        put(image, record + 4, &(span as u32).to_be_bytes());
        put(image, record + 8, &track.frames.to_be_bytes());

        let text_record = text + idx * 256;
        put(image, text_record, track.title.as_bytes());
        put(image, text_record + 160, track.performer.as_bytes());

        write_track_audio(image, area, idx, cursor * SECTOR);
        cursor += span;
    }

    // Sectors spanned by the whole area.
    cursor - start_sector
}

fn write_track_audio(image: &mut Vec<u8>, area: &AreaSpec, track_idx: usize, base: usize) {
    let track_num = track_idx as u32 + 1;
    let spec = &area.tracks[track_idx];
    let frame_bytes = FRAME_BYTES_PER_CHANNEL * area.channels as usize;

    match area.format {
        FORMAT_DSD => {
            for frame in 0..spec.frames {
                let offset = base + frame as usize * frame_bytes;
                put(image, offset, &frame_payload(area.channels, track_num, frame));
            }
        }
        FORMAT_DSD_3_IN_14 => {
            for frame in 0..spec.frames {
                let group = frame as usize / 3;
                let offset =
                    base + group * 14 * SECTOR + (frame as usize % 3) * frame_bytes;
                put(image, offset, &frame_payload(area.channels, track_num, frame));
            }
        }
        FORMAT_DST => {
            let mut offset = base;
            for frame in 0..spec.frames {
                let payload = if area.broken_dst_frame == Some((track_idx, frame)) {
                    // A compressed frame with an unsupported segmentation
                    // header.
                    vec![0x80, 0x00, 0x00]
                } else {
                    let mut record = Vec::with_capacity(1 + frame_bytes);
                    record.push(0x00);
                    record.extend_from_slice(&frame_payload(area.channels, track_num, frame));
                    record
                };

                put(image, offset, &(payload.len() as u16).to_be_bytes());
                put(image, offset + 2, &[0, 0]);
                put(image, offset + 4, &payload);
                offset += 4 + payload.len();
            }
        }
        _ => panic!("unsupported test format"),
    }
}

impl ImageBuilder {
    pub fn stereo_only(area: AreaSpec) -> ImageBuilder {
        ImageBuilder {
            album_title: "Test Album".to_string(),
            album_artist: "Test Artist".to_string(),
            stereo: Some(area),
            multichannel: None,
        }
    }

    pub fn build_bytes(&self) -> Vec<u8> {
        let mut image = vec![0u8; (MASTER_TOC_SECTOR + 2) * SECTOR];

        let mut stereo_loc = None;
        let mut multichannel_loc = None;
        let mut cursor = STEREO_AREA_SECTOR;

        if let Some(ref area) = self.stereo {
            let span = write_area(&mut image, area, cursor, b"TWOCHTOC");
            stereo_loc = Some((cursor as u32, span as u32));
            cursor += span;
        }
        if let Some(ref area) = self.multichannel {
            let span = write_area(&mut image, area, cursor, b"MULCHTOC");
            multichannel_loc = Some((cursor as u32, span as u32));
            cursor += span;
        }

        // Master TOC and album text.
        let base = MASTER_TOC_SECTOR * SECTOR;
        put(&mut image, base, b"SACDMTOC");
        put(&mut image, base + 8, &[2, 0]);
        put(&mut image, base + 16, b"NEXUS-TEST-0001 ");
        put(&mut image, base + 32, &1u16.to_be_bytes());
        put(&mut image, base + 34, &1u16.to_be_bytes());
        put(&mut image, base + 40, &2026u16.to_be_bytes());
        if let Some((start, span)) = stereo_loc {
            put(&mut image, base + 48, &start.to_be_bytes());
            put(&mut image, base + 52, &span.to_be_bytes());
        }
        if let Some((start, span)) = multichannel_loc {
            put(&mut image, base + 56, &start.to_be_bytes());
            put(&mut image, base + 60, &span.to_be_bytes());
        }

        let text = (MASTER_TOC_SECTOR + 1) * SECTOR;
        put(&mut image, text, self.album_title.as_bytes());
        put(&mut image, text + 128, self.album_artist.as_bytes());

        image.resize(cursor.max(MASTER_TOC_SECTOR + 2) * SECTOR, 0);
        image
    }

    pub fn write_iso(&self, path: &Path) {
        fs::write(path, self.build_bytes()).unwrap();
    }
}
