// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use nexus_core::dsd;
use nexus_core::errors::{invalid_arg_error, Result};

use crate::{
    AUDIO_DATA_OFFSET, BLOCK_SIZE_PER_CHANNEL, DATA_CHUNK_HEADER_SIZE, DSD_CHUNK_SIZE,
    FMT_CHUNK_SIZE,
};

/// The regions a DSF byte address can fall into, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsfRegion {
    DsdChunk,
    FmtChunk,
    DataHeader,
    Audio,
    Padding,
    Id3,
}

/// The byte-exact layout of one virtual DSF file.
///
/// A pure function of the track parameters and the effective ID3 length:
/// two layouts computed from equal inputs are identical, and every byte of
/// the file is deterministically reproducible from the layout plus the
/// track's audio and ID3 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsfLayout {
    channel_count: u32,
    sample_rate: u32,
    /// One-bit samples per channel.
    sample_count: u64,
    audio_size: u64,
    padding_size: u64,
    id3_size: u64,
}

impl DsfLayout {
    /// Compute the layout of a virtual DSF file holding `frame_count` audio
    /// frames and an ID3 tag of `id3_size` bytes (0 for none).
    pub fn synthesize(
        channel_count: u32,
        sample_rate: u32,
        frame_count: u32,
        id3_size: u64,
    ) -> Result<DsfLayout> {
        if channel_count < 1 || channel_count > dsd::MAX_CHANNELS {
            return invalid_arg_error("dsf: channel count outside 1..=6");
        }
        let samples_per_frame = match dsd::frame_samples_per_channel(sample_rate) {
            Some(samples) => samples,
            None => return invalid_arg_error("dsf: sample rate outside the dsd family"),
        };

        let sample_count = u64::from(frame_count) * samples_per_frame;
        let bytes_per_channel = sample_count.div_ceil(8);
        let blocks_per_channel = bytes_per_channel.div_ceil(BLOCK_SIZE_PER_CHANNEL);
        let audio_size = blocks_per_channel * BLOCK_SIZE_PER_CHANNEL * u64::from(channel_count);

        // The ID3 tag, when present, starts on an 8-byte boundary.
        let padding_size = if id3_size > 0 {
            (AUDIO_DATA_OFFSET + audio_size).wrapping_neg() % 8
        } else {
            0
        };

        Ok(DsfLayout {
            channel_count,
            sample_rate,
            sample_count,
            audio_size,
            padding_size,
            id3_size,
        })
    }

    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// One-bit samples per channel, as stored in the "fmt " chunk.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Size of the block-aligned audio region in bytes.
    pub fn audio_size(&self) -> u64 {
        self.audio_size
    }

    /// Meaningful (non-pad) audio bytes per channel.
    pub fn bytes_per_channel(&self) -> u64 {
        self.sample_count.div_ceil(8)
    }

    pub fn padding_size(&self) -> u64 {
        self.padding_size
    }

    pub fn id3_size(&self) -> u64 {
        self.id3_size
    }

    /// Offset of the ID3 tag, or 0 when the file carries none.
    pub fn metadata_offset(&self) -> u64 {
        if self.id3_size > 0 {
            AUDIO_DATA_OFFSET + self.audio_size + self.padding_size
        } else {
            0
        }
    }

    /// Total size of the virtual file in bytes.
    pub fn total_size(&self) -> u64 {
        AUDIO_DATA_OFFSET + self.audio_size + self.padding_size + self.id3_size
    }

    /// Bytes covered by one block group: one 4096-byte block per channel.
    pub fn block_group_size(&self) -> u64 {
        BLOCK_SIZE_PER_CHANNEL * u64::from(self.channel_count)
    }

    /// Resolve an absolute file offset to its region, the offset within that
    /// region, and the region's length. `None` past end of file.
    pub fn region_at(&self, offset: u64) -> Option<(DsfRegion, u64, u64)> {
        let mut base = 0u64;
        let regions = [
            (DsfRegion::DsdChunk, DSD_CHUNK_SIZE),
            (DsfRegion::FmtChunk, FMT_CHUNK_SIZE),
            (DsfRegion::DataHeader, DATA_CHUNK_HEADER_SIZE),
            (DsfRegion::Audio, self.audio_size),
            (DsfRegion::Padding, self.padding_size),
            (DsfRegion::Id3, self.id3_size),
        ];
        for (region, len) in regions {
            if offset < base + len {
                return Some((region, offset - base, len));
            }
            base += len;
        }
        None
    }

    /// Fabricate the 92 header bytes: "DSD ", "fmt ", and the "data" chunk
    /// header. All integers little-endian.
    pub fn header_bytes(&self) -> [u8; 92] {
        let mut header = [0u8; 92];

        header[0..4].copy_from_slice(b"DSD ");
        header[4..12].copy_from_slice(&DSD_CHUNK_SIZE.to_le_bytes());
        header[12..20].copy_from_slice(&self.total_size().to_le_bytes());
        header[20..28].copy_from_slice(&self.metadata_offset().to_le_bytes());

        header[28..32].copy_from_slice(b"fmt ");
        header[32..40].copy_from_slice(&FMT_CHUNK_SIZE.to_le_bytes());
        header[40..44].copy_from_slice(&1u32.to_le_bytes()); // format version
        header[44..48].copy_from_slice(&0u32.to_le_bytes()); // format id: raw DSD
        header[48..52].copy_from_slice(&self.channel_type().to_le_bytes());
        header[52..56].copy_from_slice(&self.channel_count.to_le_bytes());
        header[56..60].copy_from_slice(&self.sample_rate.to_le_bytes());
        header[60..64].copy_from_slice(&1u32.to_le_bytes()); // bits per sample
        header[64..72].copy_from_slice(&self.sample_count.to_le_bytes());
        header[72..76].copy_from_slice(&(BLOCK_SIZE_PER_CHANNEL as u32).to_le_bytes());
        // Bytes 76..80 reserved.

        header[80..84].copy_from_slice(b"data");
        header[84..92]
            .copy_from_slice(&(DATA_CHUNK_HEADER_SIZE + self.audio_size).to_le_bytes());

        header
    }

    /// The DSF channel type field for the channel count: mono, stereo,
    /// 3 channels, quad, 5 channels, 5.1.
    fn channel_type(&self) -> u32 {
        match self.channel_count {
            1 => 1,
            2 => 2,
            3 => 3,
            4 => 4,
            5 => 6,
            _ => 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DsfLayout, DsfRegion};

    #[test]
    fn verify_layout_without_id3() {
        // 750 frames of stereo DSD64: 750 * 4704 = 3 528 000 bytes per
        // channel, 862 blocks per channel.
        let layout = DsfLayout::synthesize(2, 2_822_400, 750, 0).unwrap();

        assert_eq!(layout.sample_count(), 750 * 37632);
        assert_eq!(layout.bytes_per_channel(), 3_528_000);
        assert_eq!(layout.audio_size(), 862 * 4096 * 2);
        assert_eq!(layout.padding_size(), 0);
        assert_eq!(layout.metadata_offset(), 0);
        assert_eq!(layout.total_size(), 92 + 862 * 4096 * 2);
    }

    #[test]
    fn verify_layout_with_id3() {
        let layout = DsfLayout::synthesize(2, 2_822_400, 750, 372).unwrap();

        // 92 + audio is 4 mod 8, so four pad bytes realign the tag.
        assert_eq!(layout.padding_size(), 4);
        assert_eq!(layout.metadata_offset(), 92 + 862 * 4096 * 2 + 4);
        assert_eq!(layout.metadata_offset() % 8, 0);
        assert_eq!(layout.total_size(), layout.metadata_offset() + 372);
    }

    #[test]
    fn verify_block_alignment_invariant() {
        for (channels, frames) in [(1u32, 1u32), (2, 7), (5, 33), (6, 750)] {
            let layout = DsfLayout::synthesize(channels, 2_822_400, frames, 0).unwrap();
            assert_eq!(layout.audio_size() % (4096 * u64::from(channels)), 0);
        }
    }

    #[test]
    fn verify_header_bytes() {
        let layout = DsfLayout::synthesize(2, 2_822_400, 750, 372).unwrap();
        let header = layout.header_bytes();

        assert_eq!(&header[0..4], b"DSD ");
        assert_eq!(u64::from_le_bytes(header[4..12].try_into().unwrap()), 28);
        assert_eq!(
            u64::from_le_bytes(header[12..20].try_into().unwrap()),
            layout.total_size()
        );
        assert_eq!(
            u64::from_le_bytes(header[20..28].try_into().unwrap()),
            layout.metadata_offset()
        );

        assert_eq!(&header[28..32], b"fmt ");
        assert_eq!(u64::from_le_bytes(header[32..40].try_into().unwrap()), 52);
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(header[44..48].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(header[48..52].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(header[52..56].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(header[56..60].try_into().unwrap()), 2_822_400);
        assert_eq!(u32::from_le_bytes(header[60..64].try_into().unwrap()), 1);
        assert_eq!(
            u64::from_le_bytes(header[64..72].try_into().unwrap()),
            layout.sample_count()
        );
        assert_eq!(u32::from_le_bytes(header[72..76].try_into().unwrap()), 4096);

        assert_eq!(&header[80..84], b"data");
        assert_eq!(
            u64::from_le_bytes(header[84..92].try_into().unwrap()),
            12 + layout.audio_size()
        );
    }

    #[test]
    fn verify_region_partition() {
        let layout = DsfLayout::synthesize(2, 2_822_400, 1, 100).unwrap();

        assert_eq!(layout.region_at(0), Some((DsfRegion::DsdChunk, 0, 28)));
        assert_eq!(layout.region_at(27), Some((DsfRegion::DsdChunk, 27, 28)));
        assert_eq!(layout.region_at(28), Some((DsfRegion::FmtChunk, 0, 52)));
        assert_eq!(layout.region_at(80), Some((DsfRegion::DataHeader, 0, 12)));
        assert_eq!(layout.region_at(92), Some((DsfRegion::Audio, 0, layout.audio_size())));

        let pad = 92 + layout.audio_size();
        assert_eq!(layout.region_at(pad), Some((DsfRegion::Padding, 0, 4)));
        assert_eq!(
            layout.region_at(layout.metadata_offset()),
            Some((DsfRegion::Id3, 0, 100))
        );
        assert_eq!(layout.region_at(layout.total_size()), None);
    }

    #[test]
    fn verify_rejects_bad_parameters() {
        assert!(DsfLayout::synthesize(0, 2_822_400, 1, 0).is_err());
        assert!(DsfLayout::synthesize(7, 2_822_400, 1, 0).is_err());
        assert!(DsfLayout::synthesize(2, 48_000, 1, 0).is_err());
    }
}
