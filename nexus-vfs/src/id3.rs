// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ID3 tags for virtual DSF files.
//!
//! The blobs this module handles are binary-opaque to the rest of the VFS.
//! Three concerns live here: synthesising a track's original tag from TOC
//! text, the in-memory overlay store, and the XML sidecar the overlays
//! persist to. The sidecar is a storage detail; callers only ever see raw
//! ID3 bytes.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use nexus_core::errors::{Error, Result};
use nexus_format_sacd::{AreaType, ImageIndex};

/// Encode a 28-bit value as four synchsafe bytes.
fn synchsafe(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7f) as u8,
        ((value >> 14) & 0x7f) as u8,
        ((value >> 7) & 0x7f) as u8,
        (value & 0x7f) as u8,
    ]
}

fn push_text_frame(tag: &mut Vec<u8>, id: &[u8; 4], text: &str) {
    if text.is_empty() {
        return;
    }
    // Payload: UTF-8 encoding marker plus the text.
    let payload_len = 1 + text.len() as u32;
    tag.extend_from_slice(id);
    tag.extend_from_slice(&synchsafe(payload_len));
    tag.extend_from_slice(&[0, 0]);
    tag.push(0x03);
    tag.extend_from_slice(text.as_bytes());
}

/// Synthesise the original ID3v2.4 tag of a track from its TOC text.
///
/// Returns an empty vector when the TOC carries no text at all for the
/// track, in which case the virtual file has no ID3 region.
pub(crate) fn build_track_id3(index: &ImageIndex, area: AreaType, track_num: u32) -> Vec<u8> {
    let album = index.album_text();
    let (title, performer) = match index.track_text(area, track_num) {
        Some(text) => (text.title.as_str(), text.performer.as_str()),
        None => ("", ""),
    };

    let artist = if !performer.is_empty() { performer } else { album.artist.as_str() };

    if title.is_empty() && artist.is_empty() && album.title.is_empty() {
        return Vec::new();
    }

    let mut frames = Vec::new();
    push_text_frame(&mut frames, b"TIT2", title);
    push_text_frame(&mut frames, b"TPE1", artist);
    push_text_frame(&mut frames, b"TALB", &album.title);
    push_text_frame(&mut frames, b"TRCK", &track_num.to_string());

    let mut tag = Vec::with_capacity(10 + frames.len());
    tag.extend_from_slice(b"ID3");
    tag.extend_from_slice(&[0x04, 0x00, 0x00]);
    tag.extend_from_slice(&synchsafe(frames.len() as u32));
    tag.extend_from_slice(&frames);
    tag
}

fn area_name(area: AreaType) -> &'static str {
    match area {
        AreaType::Stereo => "stereo",
        AreaType::Multichannel => "multichannel",
    }
}

fn area_from_name(name: &str) -> Option<AreaType> {
    match name {
        "stereo" => Some(AreaType::Stereo),
        "multichannel" => Some(AreaType::Multichannel),
        _ => None,
    }
}

/// Per-image store of ID3 overrides, keyed by area and 1-based track.
///
/// The owning image guards the store with a mutex; the store itself is
/// plain data plus the sidecar (de)serialisation.
#[derive(Default)]
pub(crate) struct Id3OverlayStore {
    entries: HashMap<(AreaType, u32), Vec<u8>>,
    dirty: bool,
}

impl Id3OverlayStore {
    pub fn set(&mut self, area: AreaType, track_num: u32, bytes: Vec<u8>) {
        self.entries.insert((area, track_num), bytes);
        self.dirty = true;
    }

    pub fn get(&self, area: AreaType, track_num: u32) -> Option<&Vec<u8>> {
        self.entries.get(&(area, track_num))
    }

    /// Drop an override, reverting the track to its original tag. Clearing
    /// a track that has no override is a no-op and does not mark the store
    /// dirty.
    pub fn clear(&mut self, area: AreaType, track_num: u32) {
        if self.entries.remove(&(area, track_num)).is_some() {
            self.dirty = true;
        }
    }

    pub fn has_unsaved(&self) -> bool {
        self.dirty
    }

    /// Write the sidecar document. Atomic: the document is written to a
    /// temporary file and swapped into place. On failure the in-memory
    /// overlay and the dirty flag are left untouched so the caller can
    /// retry.
    pub fn save(&mut self, sidecar: &Path) -> Result<()> {
        let tmp = sidecar.with_extension("xml.tmp");
        self.write_document(&tmp)?;
        fs::rename(&tmp, sidecar)?;
        self.dirty = false;
        debug!("saved {} id3 overlays to {}", self.entries.len(), sidecar.display());
        Ok(())
    }

    fn write_document(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path)?;
        let mut writer = Writer::new_with_indent(io::BufWriter::new(file), b' ', 2);

        let xml_err = |e: quick_xml::Error| Error::Io(io::Error::new(io::ErrorKind::Other, e));

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_err)?;
        writer.write_event(Event::Start(BytesStart::new("id3_overlay"))).map_err(xml_err)?;

        // Deterministic output: sort by area then track.
        let mut keys: Vec<&(AreaType, u32)> = self.entries.keys().collect();
        keys.sort_by_key(|key| (area_name(key.0), key.1));

        for key in keys {
            let (area, track_num) = *key;
            let blob = &self.entries[key];

            let mut tag = BytesStart::new("tag");
            tag.push_attribute(("area", area_name(area)));
            tag.push_attribute(("track", track_num.to_string().as_str()));
            writer.write_event(Event::Start(tag)).map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(&BASE64.encode(blob))))
                .map_err(xml_err)?;
            writer.write_event(Event::End(BytesEnd::new("tag"))).map_err(xml_err)?;
        }

        writer.write_event(Event::End(BytesEnd::new("id3_overlay"))).map_err(xml_err)?;
        Ok(())
    }

    /// Merge overrides persisted in a sidecar document. Entries that do not
    /// parse are skipped with a warning rather than failing the mount.
    pub fn load(&mut self, sidecar: &Path) -> Result<()> {
        let text = fs::read_to_string(sidecar)?;
        let mut reader = Reader::from_str(&text);
        reader.trim_text(true);

        let mut pending: Option<(AreaType, u32)> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(el)) if el.name().as_ref() == b"tag" => {
                    pending = parse_tag_attributes(&el);
                    if pending.is_none() {
                        warn!("sidecar {}: skipping tag with bad attributes", sidecar.display());
                    }
                }
                Ok(Event::Text(text)) => {
                    if let Some((area, track_num)) = pending {
                        match BASE64.decode(text.unescape().unwrap_or_default().as_bytes()) {
                            Ok(blob) => {
                                self.entries.insert((area, track_num), blob);
                            }
                            Err(_) => warn!(
                                "sidecar {}: skipping undecodable blob for track {}",
                                sidecar.display(),
                                track_num
                            ),
                        }
                    }
                }
                Ok(Event::End(el)) if el.name().as_ref() == b"tag" => pending = None,
                Ok(Event::Eof) => break,
                Ok(_) => (),
                Err(_) => return Err(Error::Malformed("sidecar: invalid xml")),
            }
        }

        debug!("loaded {} id3 overlays from {}", self.entries.len(), sidecar.display());
        Ok(())
    }
}

fn parse_tag_attributes(el: &BytesStart<'_>) -> Option<(AreaType, u32)> {
    let mut area = None;
    let mut track = None;

    for attr in el.attributes().flatten() {
        let value = attr.unescape_value().ok()?;
        match attr.key.as_ref() {
            b"area" => area = area_from_name(&value),
            b"track" => track = value.parse::<u32>().ok(),
            _ => (),
        }
    }

    match (area, track) {
        (Some(area), Some(track)) if track > 0 => Some((area, track)),
        _ => None,
    }
}
