// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The virtual DSF file reader.
//!
//! A [`VirtualDsfFile`] serves arbitrary `(offset, length)` reads over a
//! virtual address space that no on-disk file backs: fabricated DSF
//! headers, audio assembled from the image's DSD or DST frames, pad bytes,
//! and the track's effective ID3 tag. Reading any byte range twice with no
//! intervening overlay write produces identical bytes.

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use nexus_codec_dst::{DecodePool, DstStream, LOOKAHEAD_FRAMES};
use nexus_core::dsd;
use nexus_core::errors::{invalid_arg_error, Error, Result};
use nexus_format_dsf::{byte_to_block, DsfLayout, DsfRegion, BLOCK_SIZE_PER_CHANNEL, PAD_BYTE};
use nexus_format_sacd::{AreaDescriptor, AreaType, TrackExtent};

use crate::image::SacdImage;

/// Static properties of an open virtual file.
#[derive(Debug, Clone, Copy)]
pub struct FileInfo {
    pub total_size: u64,
    pub audio_size: u64,
    /// Offset of the ID3 tag, 0 when the file carries none.
    pub metadata_offset: u64,
    pub metadata_size: u64,
    pub channel_count: u32,
    pub sample_rate: u32,
    /// One-bit samples per channel.
    pub sample_count: u64,
    pub duration_seconds: f64,
    /// Whether the source track is DST-compressed.
    pub dst_compressed: bool,
}

/// Decode-side state of a DST track: the ordered stream plus the bounded
/// window of recently decoded frames.
struct DstState {
    stream: DstStream,
    /// Index the stream will deliver next.
    next_index: u32,
    /// Recently decoded frames in ascending index order, evicted
    /// oldest-first.
    window: VecDeque<(u32, Vec<u8>)>,
    capacity: usize,
}

struct FileState {
    layout: DsfLayout,
    header: [u8; 92],
    /// Effective ID3 snapshot the layout was computed from.
    id3: Vec<u8>,
    id3_generation: u64,
    cursor: u64,
    /// Last assembled audio block group, for sequential small reads.
    group_cache: Option<(u64, Vec<u8>)>,
    dst: Option<DstState>,
    /// ID3 bytes written through the handle, committed on flush.
    pending_id3: Option<Vec<u8>>,
    poison: Option<&'static str>,
}

/// An open virtual DSF file over one track of a mounted image.
///
/// Reads are serialised by an internal mutex; distinct handles on the same
/// track are independent and each owns its own decode pipeline.
pub struct VirtualDsfFile {
    image: Arc<SacdImage>,
    area: AreaType,
    track_num: u32,
    descriptor: AreaDescriptor,
    extent: TrackExtent,
    // Declared before `pool` so the decode stream is dropped while the
    // pool is still alive.
    state: Mutex<FileState>,
    pool: Arc<DecodePool>,
}

impl VirtualDsfFile {
    /// Open a virtual DSF file over one track of `image`. DST tracks
    /// decode through `pool`.
    pub fn open(
        image: Arc<SacdImage>,
        area: AreaType,
        track_num: u32,
        pool: Arc<DecodePool>,
    ) -> Result<VirtualDsfFile> {
        let (descriptor, extent) = {
            let (descriptor, extent) = image.area_and_track(area, track_num)?;
            (descriptor.clone(), *extent)
        };

        let id3 = image.effective_id3(area, track_num);
        let layout = DsfLayout::synthesize(
            descriptor.channel_count,
            descriptor.sample_rate,
            extent.frame_count,
            id3.len() as u64,
        )?;

        let state = FileState {
            layout,
            header: layout.header_bytes(),
            id3,
            id3_generation: image.id3_generation(),
            cursor: 0,
            group_cache: None,
            dst: None,
            pending_id3: None,
            poison: None,
        };

        debug!(
            "opened virtual dsf: {:?} track {}, {} bytes, dst={}",
            area,
            track_num,
            layout.total_size(),
            descriptor.frame_format.is_dst()
        );

        Ok(VirtualDsfFile {
            image,
            area,
            track_num,
            descriptor,
            extent,
            state: Mutex::new(state),
            pool,
        })
    }

    /// Static properties of the file at its current layout.
    pub fn info(&self) -> FileInfo {
        let mut state = self.state.lock();
        self.refresh(&mut state);

        let layout = &state.layout;
        FileInfo {
            total_size: layout.total_size(),
            audio_size: layout.audio_size(),
            metadata_offset: layout.metadata_offset(),
            metadata_size: layout.id3_size(),
            channel_count: layout.channel_count(),
            sample_rate: layout.sample_rate(),
            sample_count: layout.sample_count(),
            duration_seconds: f64::from(self.extent.frame_count)
                / f64::from(dsd::FRAMES_PER_SEC),
            dst_compressed: self.descriptor.frame_format.is_dst(),
        }
    }

    /// Read up to `buf.len()` bytes at absolute `offset`. Returns the
    /// number of bytes produced; 0 at or past end of file.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        self.read_at_locked(&mut state, offset, buf)
    }

    fn read_at_locked(&self, state: &mut FileState, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if let Some(msg) = state.poison {
            return Err(Error::DecodeFailed(msg));
        }
        self.refresh(state);

        let total = state.layout.total_size();
        if offset >= total || buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min((total - offset) as usize);

        let mut produced = 0usize;
        while produced < len {
            let pos = offset + produced as u64;
            let (region, within, region_len) =
                state.layout.region_at(pos).expect("offset clipped to file size");
            let take = ((region_len - within) as usize).min(len - produced);
            let out = &mut buf[produced..produced + take];

            let served = match region {
                DsfRegion::DsdChunk | DsfRegion::FmtChunk | DsfRegion::DataHeader => {
                    out.copy_from_slice(&state.header[pos as usize..pos as usize + take]);
                    Ok(())
                }
                DsfRegion::Audio => self.serve_audio(state, within, out),
                DsfRegion::Padding => {
                    out.fill(PAD_BYTE);
                    Ok(())
                }
                DsfRegion::Id3 => {
                    let start = within as usize;
                    out.copy_from_slice(&state.id3[start..start + take]);
                    Ok(())
                }
            };

            if let Err(err) = served {
                if let Error::DecodeFailed(msg) = err {
                    state.poison = Some(msg);
                }
                // Bytes already produced are valid; the error resurfaces on
                // the next call.
                return if produced > 0 { Ok(produced) } else { Err(err) };
            }
            produced += take;
        }

        Ok(len)
    }

    /// Read at the logical cursor, advancing it.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let cursor = state.cursor;
        let n = self.read_at_locked(&mut state, cursor, buf)?;
        state.cursor = cursor + n as u64;
        Ok(n)
    }

    /// Move the logical cursor.
    pub fn seek(&self, from: SeekFrom) -> Result<u64> {
        let mut state = self.state.lock();
        self.refresh(&mut state);
        let total = state.layout.total_size();

        let target = match from {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => total.checked_add_signed(delta),
            SeekFrom::Current(delta) => state.cursor.checked_add_signed(delta),
        };

        match target {
            Some(cursor) => {
                state.cursor = cursor;
                Ok(cursor)
            }
            None => invalid_arg_error("vfs: seek before start of file"),
        }
    }

    /// The logical cursor position.
    pub fn tell(&self) -> u64 {
        self.state.lock().cursor
    }

    /// Write bytes at `offset`. Only the ID3 region is writable; the bytes
    /// are collected in a pending buffer and committed to the overlay
    /// store by [`VirtualDsfFile::flush`].
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        self.refresh(&mut state);

        let metadata_offset = state.layout.metadata_offset();
        if metadata_offset == 0 || offset < metadata_offset {
            return Err(Error::Access);
        }

        let rel = (offset - metadata_offset) as usize;
        if state.pending_id3.is_none() {
            let snapshot = state.id3.clone();
            state.pending_id3 = Some(snapshot);
        }

        let pending = state.pending_id3.as_mut().unwrap();
        if pending.len() < rel + buf.len() {
            pending.resize(rel + buf.len(), 0);
        }
        pending[rel..rel + buf.len()].copy_from_slice(buf);

        Ok(buf.len())
    }

    /// Commit pending ID3 writes to the image's overlay store. The next
    /// read observes the recomputed layout.
    pub fn flush(&self) -> Result<()> {
        let pending = {
            let mut state = self.state.lock();
            state.pending_id3.take()
        };

        match pending {
            Some(blob) => self.image.set_id3_overlay(self.area, self.track_num, &blob),
            None => Ok(()),
        }
    }

    pub fn area(&self) -> AreaType {
        self.area
    }

    pub fn track_num(&self) -> u32 {
        self.track_num
    }

    /// Recompute the layout and ID3 snapshot when the overlay store has
    /// changed since this handle last looked. The audio region is
    /// unaffected, so the group cache survives.
    fn refresh(&self, state: &mut FileState) {
        let generation = self.image.id3_generation();
        if generation == state.id3_generation {
            return;
        }

        let id3 = self.image.effective_id3(self.area, self.track_num);
        match DsfLayout::synthesize(
            self.descriptor.channel_count,
            self.descriptor.sample_rate,
            self.extent.frame_count,
            id3.len() as u64,
        ) {
            Ok(layout) => {
                state.layout = layout;
                state.header = layout.header_bytes();
                state.id3 = id3;
                state.id3_generation = generation;
            }
            Err(err) => warn!("keeping stale layout: {}", err),
        }
    }

    /// Serve a byte range of the audio region, assembling whole block
    /// groups and caching the last one for sequential callers.
    fn serve_audio(&self, state: &mut FileState, audio_off: u64, out: &mut [u8]) -> Result<()> {
        let group_size = state.layout.block_group_size();
        let mut off = audio_off;
        let mut done = 0usize;

        while done < out.len() {
            let group = off / group_size;
            let within = (off % group_size) as usize;
            let take = (group_size as usize - within).min(out.len() - done);

            let cached = matches!(state.group_cache, Some((idx, _)) if idx == group);
            if !cached {
                let bytes = self.assemble_group(state, group)?;
                state.group_cache = Some((group, bytes));
            }

            let (_, bytes) = state.group_cache.as_ref().unwrap();
            out[done..done + take].copy_from_slice(&bytes[within..within + take]);

            off += take as u64;
            done += take;
        }

        Ok(())
    }

    /// Assemble one block group: fetch the covering source frames, slice
    /// the group's window, and transform it to the DSF block layout.
    fn assemble_group(&self, state: &mut FileState, group: u64) -> Result<Vec<u8>> {
        let channels = self.descriptor.channel_count as usize;
        let frame_pc = u64::from(
            dsd::frame_bytes_per_channel(self.descriptor.sample_rate)
                .expect("validated at open"),
        );
        let raw_pc = state.layout.bytes_per_channel();

        let start_pc = group * BLOCK_SIZE_PER_CHANNEL;
        let end_pc = (start_pc + BLOCK_SIZE_PER_CHANNEL).min(raw_pc);
        debug_assert!(start_pc < raw_pc);

        let first = (start_pc / frame_pc) as u32;
        let last = ((end_pc - 1) / frame_pc) as u32;

        let frame_total = frame_pc as usize * channels;
        let mut src = vec![0u8; (last - first + 1) as usize * frame_total];
        for frame in first..=last {
            let at = (frame - first) as usize * frame_total;
            self.fetch_frame(state, frame, &mut src[at..at + frame_total])?;
        }

        let window_start = ((start_pc - u64::from(first) * frame_pc) as usize) * channels;
        let window_len = ((end_pc - start_pc) as usize) * channels;

        let mut blocked = vec![0u8; state.layout.block_group_size() as usize];
        byte_to_block(&src[window_start..window_start + window_len], channels, &mut blocked)?;
        Ok(blocked)
    }

    /// Obtain one source frame in byte-interleaved MSB-first layout.
    fn fetch_frame(&self, state: &mut FileState, frame: u32, out: &mut [u8]) -> Result<()> {
        if !self.descriptor.frame_format.is_dst() {
            return self.image.read_linear_frame(&self.descriptor, &self.extent, frame, out);
        }

        // A frame outside the decoded window and the look-ahead forces a
        // pipeline restart from the requested position: backwards past the
        // window, or far enough forward that decoding through would waste
        // the intermediate frames.
        let restart = match state.dst {
            None => true,
            Some(ref dst) => {
                let behind = frame < dst.next_index
                    && !dst.window.iter().any(|(idx, _)| *idx == frame);
                let ahead = frame >= dst.next_index + dst.capacity as u32;
                behind || ahead
            }
        };

        if restart {
            if state.dst.is_some() {
                debug!("dst pipeline restart at frame {}", frame);
            }
            state.dst = Some(DstState {
                stream: self.image.spawn_dst_stream(
                    &self.descriptor,
                    self.area,
                    self.track_num,
                    &self.extent,
                    &self.pool,
                    frame,
                ),
                next_index: frame,
                window: VecDeque::new(),
                capacity: LOOKAHEAD_FRAMES.min(self.extent.frame_count).max(4) as usize,
            });
        }

        let dst = state.dst.as_mut().unwrap();

        if let Some((_, bytes)) = dst.window.iter().find(|(idx, _)| *idx == frame) {
            out.copy_from_slice(bytes);
            return Ok(());
        }

        loop {
            let (index, bytes) = dst.stream.next_frame()?;
            dst.next_index = index + 1;

            while dst.window.len() >= dst.capacity {
                dst.window.pop_front();
            }

            let hit = index == frame;
            if hit {
                out.copy_from_slice(&bytes);
            }
            dst.window.push_back((index, bytes));

            if hit {
                return Ok(());
            }
        }
    }
}

impl Drop for VirtualDsfFile {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!("discarding pending id3 writes on close: {}", err);
        }
    }
}
