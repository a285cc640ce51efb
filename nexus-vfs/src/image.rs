// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An open, indexed SACD disc image.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use nexus_codec_dst::{DecodePool, DstStream, FrameSource, LOOKAHEAD_FRAMES};
use nexus_core::dsd::{self, SECTOR_SIZE};
use nexus_core::errors::{invalid_arg_error, malformed_error, not_found_error, Error, Result};
use nexus_core::io::{FileSource, ReadAt};
use nexus_format_sacd::{AreaDescriptor, AreaType, ImageIndex, TrackExtent};

use crate::filename::{track_filename, TrackFilenameFormat};
use crate::id3::{build_track_id3, Id3OverlayStore};

/// Longest DST frame record payload accepted from an image. Bounds an
/// incompressible six-channel frame stored raw.
const MAX_DST_FRAME_LEN: u32 = 32768;

/// An open SACD disc image: the source stream, its parsed index, and the
/// editable ID3 overlay.
///
/// Immutable after construction except for the overlay store and the
/// generation counter that invalidates layouts derived from it. Shared
/// between the overlay directory and every open virtual file via `Arc`.
pub struct SacdImage {
    source: Arc<dyn ReadAt>,
    index: ImageIndex,
    sidecar: Option<PathBuf>,
    id3: Mutex<Id3OverlayStore>,
    /// Bumped on every overlay write; virtual files recompute their layout
    /// when their snapshot falls behind.
    id3_generation: AtomicU64,
    /// Lazily discovered DST frame offsets, shared across file handles.
    dst_offsets: Mutex<HashMap<(AreaType, u32), Arc<Mutex<Vec<u64>>>>>,
}

impl SacdImage {
    /// Open and index a disc image file. A sidecar document next to the
    /// image is merged when present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SacdImage> {
        let path = path.as_ref();
        let source = FileSource::open(path)?;

        let mut file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => return invalid_arg_error("vfs: image path has no file name"),
        };
        file_name.push_str(".xml");
        let sidecar = path.with_file_name(file_name);

        SacdImage::with_source(Arc::new(source), Some(sidecar))
    }

    /// Open an image over an arbitrary byte source, with an optional
    /// sidecar location for overlay persistence.
    pub fn with_source(source: Arc<dyn ReadAt>, sidecar: Option<PathBuf>) -> Result<SacdImage> {
        let index = ImageIndex::open(&source)?;

        let mut store = Id3OverlayStore::default();
        if let Some(ref sidecar) = sidecar {
            if sidecar.exists() {
                if let Err(err) = store.load(sidecar) {
                    warn!("ignoring unreadable sidecar {}: {}", sidecar.display(), err);
                }
            }
        }

        Ok(SacdImage {
            source,
            index,
            sidecar,
            id3: Mutex::new(store),
            id3_generation: AtomicU64::new(0),
            dst_offsets: Mutex::new(HashMap::new()),
        })
    }

    pub fn index(&self) -> &ImageIndex {
        &self.index
    }

    /// The sidecar path overlay saves go to, if the image is file-backed.
    pub fn sidecar_path(&self) -> Option<&Path> {
        self.sidecar.as_deref()
    }

    pub(crate) fn id3_generation(&self) -> u64 {
        self.id3_generation.load(Ordering::Acquire)
    }

    fn bump_id3_generation(&self) {
        self.id3_generation.fetch_add(1, Ordering::AcqRel);
    }

    fn check_track(&self, area: AreaType, track_num: u32) -> Result<()> {
        if self.index.track(area, track_num).is_none() {
            return not_found_error();
        }
        Ok(())
    }

    /// The ID3 blob a virtual file carries: the overlay when set, else the
    /// tag synthesised from the track's TOC text, else empty.
    pub fn effective_id3(&self, area: AreaType, track_num: u32) -> Vec<u8> {
        if let Some(blob) = self.id3.lock().get(area, track_num) {
            return blob.clone();
        }
        build_track_id3(&self.index, area, track_num)
    }

    /// Replace the ID3 tag of a track without touching the image.
    pub fn set_id3_overlay(&self, area: AreaType, track_num: u32, bytes: &[u8]) -> Result<()> {
        self.check_track(area, track_num)?;
        self.id3.lock().set(area, track_num, bytes.to_vec());
        self.bump_id3_generation();
        Ok(())
    }

    /// The effective ID3 tag of a track.
    pub fn get_id3_tag(&self, area: AreaType, track_num: u32) -> Result<Vec<u8>> {
        self.check_track(area, track_num)?;
        Ok(self.effective_id3(area, track_num))
    }

    /// Drop a track's overlay, reverting to the tag from the disc text.
    pub fn clear_id3_overlay(&self, area: AreaType, track_num: u32) -> Result<()> {
        self.check_track(area, track_num)?;
        self.id3.lock().clear(area, track_num);
        self.bump_id3_generation();
        Ok(())
    }

    pub fn has_unsaved_id3_changes(&self) -> bool {
        self.id3.lock().has_unsaved()
    }

    /// Persist the overlay to the sidecar document. A failed save keeps the
    /// overlay dirty so it can be retried.
    pub fn save_id3_overlay(&self) -> Result<()> {
        let mut store = self.id3.lock();
        if !store.has_unsaved() {
            return Ok(());
        }
        let sidecar = match self.sidecar {
            Some(ref path) => path,
            None => return invalid_arg_error("vfs: image has no sidecar location"),
        };
        store.save(sidecar)?;
        info!("saved id3 overlay sidecar {}", sidecar.display());
        Ok(())
    }

    /// Generate the virtual filename of a track, without the `.dsf` suffix.
    pub fn track_filename(
        &self,
        area: AreaType,
        track_num: u32,
        format: TrackFilenameFormat,
    ) -> Result<String> {
        self.check_track(area, track_num)?;
        Ok(track_filename(&self.index, area, track_num, format))
    }

    pub(crate) fn area_and_track(
        &self,
        area: AreaType,
        track_num: u32,
    ) -> Result<(&AreaDescriptor, &TrackExtent)> {
        let descriptor = match self.index.area(area) {
            Some(descriptor) => descriptor,
            None => return not_found_error(),
        };
        let extent = match self.index.track(area, track_num) {
            Some(extent) => extent,
            None => return not_found_error(),
        };
        Ok((descriptor, extent))
    }

    /// Read one linear-DSD frame (byte-interleaved, MSB-first) of a track.
    pub(crate) fn read_linear_frame(
        &self,
        descriptor: &AreaDescriptor,
        extent: &TrackExtent,
        frame_index: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        debug_assert!(frame_index < extent.frame_count);

        let frame_bytes = dsd::frame_bytes_per_channel(descriptor.sample_rate)
            .expect("validated at open") as u64
            * u64::from(descriptor.channel_count);
        debug_assert_eq!(buf.len() as u64, frame_bytes);

        let base = u64::from(extent.start_sector) * SECTOR_SIZE;
        let offset = match descriptor.frame_format.sectors_per_group() {
            Some(group) => {
                let window = u64::from(frame_index / 3) * group * SECTOR_SIZE;
                base + window + u64::from(frame_index % 3) * frame_bytes
            }
            None => base + u64::from(frame_index) * frame_bytes,
        };

        self.source.read_exact_at(offset, buf)
    }

    /// A [`FrameSource`] over a DST track, for feeding a decode stream.
    pub(crate) fn dst_frame_source(
        &self,
        area: AreaType,
        track_num: u32,
        extent: &TrackExtent,
    ) -> DstFrameSource {
        let offsets = Arc::clone(
            self.dst_offsets
                .lock()
                .entry((area, track_num))
                .or_insert_with(|| Arc::new(Mutex::new(Vec::new()))),
        );

        let base = u64::from(extent.start_sector) * SECTOR_SIZE;
        DstFrameSource {
            source: Arc::clone(&self.source),
            region_start: base,
            region_end: base + u64::from(extent.sector_span) * SECTOR_SIZE,
            frame_count: extent.frame_count,
            offsets,
        }
    }

    /// Spawn an ordered decode stream for a DST track starting at
    /// `start_frame`.
    pub(crate) fn spawn_dst_stream(
        &self,
        descriptor: &AreaDescriptor,
        area: AreaType,
        track_num: u32,
        extent: &TrackExtent,
        pool: &Arc<DecodePool>,
        start_frame: u32,
    ) -> DstStream {
        let remaining = extent.frame_count.saturating_sub(start_frame);
        let lookahead = LOOKAHEAD_FRAMES.min(remaining);

        DstStream::spawn(
            pool,
            self.dst_frame_source(area, track_num, extent),
            descriptor.channel_count,
            descriptor.sample_rate,
            start_frame,
            lookahead,
        )
    }
}

/// Reads length-prefixed DST frame records from a track's sector span.
///
/// Frame offsets are discovered by sequential scanning and remembered in a
/// per-track index shared between streams, so a re-spawned stream does not
/// rescan from the start of the track.
pub(crate) struct DstFrameSource {
    source: Arc<dyn ReadAt>,
    region_start: u64,
    region_end: u64,
    frame_count: u32,
    offsets: Arc<Mutex<Vec<u64>>>,
}

impl DstFrameSource {
    /// Record header: u16 payload length, u16 reserved.
    const HEADER_LEN: u64 = 4;

    fn record_at(&self, offset: u64) -> Result<(u64, u32)> {
        if offset + Self::HEADER_LEN > self.region_end {
            return malformed_error("sacd: dst frame record escapes the track");
        }
        let mut header = [0u8; 4];
        self.source.read_exact_at(offset, &mut header)?;
        let len = u32::from(u16::from_be_bytes([header[0], header[1]]));
        if len == 0 || len > MAX_DST_FRAME_LEN {
            return malformed_error("sacd: bad dst frame length");
        }
        if offset + Self::HEADER_LEN + u64::from(len) > self.region_end {
            return malformed_error("sacd: dst frame record escapes the track");
        }
        Ok((offset + Self::HEADER_LEN, len))
    }

    /// Ensure the shared index covers frames `0..=index`; returns the
    /// offset of record `index`.
    fn locate(&self, index: u32) -> Result<u64> {
        let mut offsets = self.offsets.lock();
        if offsets.is_empty() {
            offsets.push(self.region_start);
        }

        while offsets.len() <= index as usize {
            let last = *offsets.last().unwrap();
            let (payload, len) = self.record_at(last)?;
            offsets.push(payload + u64::from(len));
        }

        Ok(offsets[index as usize])
    }
}

impl FrameSource for DstFrameSource {
    fn frame_count(&self) -> u32 {
        self.frame_count
    }

    fn read_frame(&mut self, index: u32) -> Result<Vec<u8>> {
        if index >= self.frame_count {
            return Err(Error::Eof);
        }

        let record = self.locate(index)?;
        let (payload, len) = self.record_at(record)?;

        let mut frame = vec![0u8; len as usize];
        self.source.read_exact_at(payload, &mut frame)?;
        Ok(frame)
    }
}
