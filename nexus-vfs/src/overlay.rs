// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The overlay directory and the pool of mounted images.
//!
//! An [`Overlay`] shadows a host source directory. Ordinary entries pass
//! through untouched; every SACD image file is hidden and replaced by a
//! virtual folder of the same basename holding the disc's areas and
//! tracks. Images are mounted on first use, shared between handles by
//! reference counting, and evicted least-recently-used once unreferenced.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bitflags::bitflags;
use log::{debug, info, warn};
use parking_lot::Mutex;

use nexus_codec_dst::DecodePool;
use nexus_core::errors::{invalid_arg_error, not_found_error, Result};
use nexus_core::io::FileSource;
use nexus_format_dsf::DsfLayout;
use nexus_format_sacd::AreaType;

use crate::config::OverlayConfig;
use crate::file::VirtualDsfFile;
use crate::filename::TrackFilenameFormat;
use crate::image::SacdImage;

bitflags! {
    /// Open flags of [`Overlay::open`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u32 {
        const READ = 0x01;
        /// Writing is honoured on passthrough files and on the ID3 region
        /// of virtual files.
        const WRITE = 0x02;
    }
}

/// What a directory entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// An SACD image presented as a folder.
    IsoFolder,
}

/// Where an entry's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    Passthrough,
    Virtual,
}

/// A directory entry as the adapter layer sees it.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    pub source: EntrySource,
    pub size: u64,
    /// Unix permission mode.
    pub mode: u32,
    pub mtime: Option<SystemTime>,
    /// Whether writes are supported (passthrough files, and virtual files
    /// whose ID3 region is editable).
    pub writable: bool,
}

struct MountEntry {
    image: Arc<SacdImage>,
    last_used: Instant,
}

enum Resolved {
    Passthrough(PathBuf),
    IsoRoot(Arc<SacdImage>),
    AreaDir(Arc<SacdImage>, AreaType),
    Track(Arc<SacdImage>, AreaType, u32),
}

/// The overlay context: configuration, the shared DST worker pool, and the
/// table of mounted images.
pub struct Overlay {
    config: OverlayConfig,
    pool: Arc<DecodePool>,
    mounts: Mutex<HashMap<PathBuf, MountEntry>>,
}

impl Overlay {
    /// Create an overlay over `config.source_dir`.
    pub fn new(config: OverlayConfig) -> Result<Overlay> {
        let metadata = fs::metadata(&config.source_dir)?;
        if !metadata.is_dir() {
            return invalid_arg_error("overlay: source_dir is not a directory");
        }

        let pool = Arc::new(DecodePool::new(config.thread_pool_size));
        info!(
            "overlay created over {} with {} dst workers",
            config.source_dir.display(),
            pool.thread_count()
        );

        Ok(Overlay { config, pool, mounts: Mutex::new(HashMap::new()) })
    }

    pub fn source_dir(&self) -> &Path {
        &self.config.source_dir
    }

    /// Resolve a virtual path and report its attributes.
    pub fn stat(&self, path: &str) -> Result<Entry> {
        let name = final_component(path);
        match self.resolve(path)? {
            Resolved::Passthrough(host) => passthrough_entry(&host, name),
            Resolved::IsoRoot(_) => Ok(virtual_dir_entry(name)),
            Resolved::AreaDir(..) => Ok(virtual_dir_entry(name)),
            Resolved::Track(image, area, track_num) => {
                Ok(track_entry(&image, area, track_num, name)?)
            }
        }
    }

    /// List a virtual directory.
    pub fn readdir(&self, path: &str) -> Result<Vec<Entry>> {
        match self.resolve(path)? {
            Resolved::Passthrough(host) => self.readdir_host(&host),
            Resolved::IsoRoot(image) => Ok(self
                .visible_areas(&image)
                .into_iter()
                .map(|area| virtual_dir_entry(area.name()))
                .collect()),
            Resolved::AreaDir(image, area) => self.readdir_area(&image, area),
            Resolved::Track(..) => invalid_arg_error("overlay: not a directory"),
        }
    }

    /// Open a file. Directories and ISO folders are not openable.
    pub fn open(&self, path: &str, mode: OpenMode) -> Result<OverlayFile> {
        match self.resolve(path)? {
            Resolved::Passthrough(host) => {
                let metadata = fs::metadata(&host)?;
                if metadata.is_dir() {
                    return invalid_arg_error("overlay: cannot open a directory");
                }
                let file = fs::OpenOptions::new()
                    .read(true)
                    .write(mode.contains(OpenMode::WRITE))
                    .open(&host)?;
                Ok(OverlayFile { inner: FileInner::Passthrough(Mutex::new(file)) })
            }
            Resolved::Track(image, area, track_num) => {
                let file =
                    VirtualDsfFile::open(image, area, track_num, Arc::clone(&self.pool))?;
                Ok(OverlayFile { inner: FileInner::Virtual(file) })
            }
            _ => invalid_arg_error("overlay: cannot open a directory"),
        }
    }

    /// Replace the ID3 tag of a track of the image at `path`.
    pub fn set_id3_overlay(
        &self,
        path: &str,
        area: AreaType,
        track_num: u32,
        bytes: &[u8],
    ) -> Result<()> {
        self.image_at(path)?.set_id3_overlay(area, track_num, bytes)
    }

    /// The effective ID3 tag of a track of the image at `path`.
    pub fn get_id3_tag(&self, path: &str, area: AreaType, track_num: u32) -> Result<Vec<u8>> {
        self.image_at(path)?.get_id3_tag(area, track_num)
    }

    /// Drop a track's ID3 override.
    pub fn clear_id3_overlay(&self, path: &str, area: AreaType, track_num: u32) -> Result<()> {
        self.image_at(path)?.clear_id3_overlay(area, track_num)
    }

    /// Persist pending overlays of the image at `path` to its sidecar.
    pub fn save_id3(&self, path: &str) -> Result<()> {
        self.image_at(path)?.save_id3_overlay()
    }

    pub fn has_unsaved_id3_changes(&self, path: &str) -> Result<bool> {
        Ok(self.image_at(path)?.has_unsaved_id3_changes())
    }

    /// Number of currently mounted images.
    pub fn mounted_iso_count(&self) -> usize {
        self.mounts.lock().len()
    }

    /// Open virtual file handles on the image at `path`. A test and
    /// diagnostics hook.
    #[doc(hidden)]
    pub fn image_handle_count(&self, path: &str) -> Result<usize> {
        let image = self.image_at(path)?;
        // The table and this temporary each hold one reference.
        Ok(Arc::strong_count(&image).saturating_sub(2))
    }

    /// Persist pending ID3 overlays of every mounted image.
    pub fn flush_all(&self) -> Result<()> {
        let images: Vec<Arc<SacdImage>> =
            self.mounts.lock().values().map(|entry| Arc::clone(&entry.image)).collect();

        let mut first_error = None;
        for image in images {
            if let Err(err) = image.save_id3_overlay() {
                warn!("overlay flush failed: {}", err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Unmount unreferenced images that have been idle longer than the
    /// configured cache timeout. Returns the number evicted.
    pub fn cleanup_idle(&self) -> usize {
        let mut mounts = self.mounts.lock();
        self.evict_expired(&mut mounts)
    }

    fn visible_areas(&self, image: &SacdImage) -> Vec<AreaType> {
        let present: Vec<AreaType> = image.index().areas().map(|a| a.area).collect();

        // A disc with a single area always shows it.
        if present.len() == 1 {
            return present;
        }

        present
            .into_iter()
            .filter(|area| match area {
                AreaType::Stereo => self.config.stereo_visible,
                AreaType::Multichannel => self.config.multichannel_visible,
            })
            .collect()
    }

    fn image_at(&self, path: &str) -> Result<Arc<SacdImage>> {
        match self.resolve(path)? {
            Resolved::IsoRoot(image)
            | Resolved::AreaDir(image, _)
            | Resolved::Track(image, _, _) => Ok(image),
            Resolved::Passthrough(_) => invalid_arg_error("overlay: path is not a virtual folder"),
        }
    }

    /// Walk a virtual path left to right: host components descend the
    /// source directory; a virtual-folder alias switches to the mounted
    /// image, whose remaining components name an area and a track.
    fn resolve(&self, path: &str) -> Result<Resolved> {
        let mut walk = Resolved::Passthrough(self.config.source_dir.clone());

        for comp in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            if comp == ".." {
                return not_found_error();
            }

            walk = match walk {
                Resolved::Passthrough(host) => {
                    if is_sidecar_name(comp, &self.config) {
                        return not_found_error();
                    }

                    let candidate = host.join(comp);
                    let passthrough = match fs::symlink_metadata(&candidate) {
                        Ok(metadata) => {
                            !(metadata.is_file() && self.config.iso_extensions.matches(comp))
                        }
                        Err(_) => false,
                    };

                    if passthrough {
                        Resolved::Passthrough(candidate)
                    } else {
                        // Not a real entry: try the virtual-folder aliases.
                        let aliases = self.iso_aliases(&host)?;
                        match aliases.into_iter().find(|(alias, _)| alias == comp) {
                            Some((_, iso_path)) => Resolved::IsoRoot(self.mount(&iso_path)?),
                            None => return not_found_error(),
                        }
                    }
                }
                Resolved::IsoRoot(image) => {
                    let area = self
                        .visible_areas(&image)
                        .into_iter()
                        .find(|area| area.name() == comp);
                    match area {
                        Some(area) => Resolved::AreaDir(image, area),
                        None => return not_found_error(),
                    }
                }
                Resolved::AreaDir(image, area) => {
                    let track_num = self.match_track(&image, area, comp)?;
                    Resolved::Track(image, area, track_num)
                }
                // Nothing lives beneath a track file.
                Resolved::Track(..) => return not_found_error(),
            };
        }

        Ok(walk)
    }

    fn match_track(&self, image: &Arc<SacdImage>, area: AreaType, name: &str) -> Result<u32> {
        let count = match image.index().area(area) {
            Some(descriptor) => descriptor.track_count,
            None => return not_found_error(),
        };

        for track_num in 1..=count {
            let mut filename =
                image.track_filename(area, track_num, TrackFilenameFormat::NumArtistTitle)?;
            filename.push_str(".dsf");
            if filename == name {
                return Ok(track_num);
            }
        }
        not_found_error()
    }

    /// The virtual folder aliases of one host directory, with `(1)`, `(2)`
    /// suffixes appended until each name is unique against both the real
    /// entries and the other aliases. Deterministic: images are processed
    /// in name order.
    fn iso_aliases(&self, dir: &Path) -> Result<Vec<(String, PathBuf)>> {
        let mut real = HashSet::new();
        let mut isos = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };

            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file && self.config.iso_extensions.matches(&name) {
                isos.push((name, entry.path()));
            } else if !is_sidecar_name(&name, &self.config) {
                real.insert(name);
            }
        }

        isos.sort();

        let mut aliases: Vec<(String, PathBuf)> = Vec::with_capacity(isos.len());
        for (name, path) in isos {
            // Basename minus the 4-byte extension.
            let base = &name[..name.len() - 4];
            let mut alias = base.to_string();
            let mut n = 0u32;
            while real.contains(&alias) || aliases.iter().any(|(a, _)| *a == alias) {
                n += 1;
                alias = format!("{}({})", base, n);
            }
            aliases.push((alias, path));
        }

        Ok(aliases)
    }

    fn readdir_host(&self, dir: &Path) -> Result<Vec<Entry>> {
        if !fs::metadata(dir)?.is_dir() {
            return invalid_arg_error("overlay: not a directory");
        }

        let mut entries = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);

            // Image files and their sidecars are hidden; the images come
            // back below as virtual folders.
            if is_file
                && (self.config.iso_extensions.matches(&name)
                    || is_sidecar_name(&name, &self.config))
            {
                continue;
            }

            entries.push(passthrough_entry(&entry.path(), &name)?);
        }

        for (alias, iso_path) in self.iso_aliases(dir)? {
            // An image that fails the signature probe never appears as a
            // virtual folder.
            if !self.probe_image(&iso_path) {
                warn!("hiding {}: not an sacd image", iso_path.display());
                continue;
            }

            let mtime = fs::metadata(&iso_path).and_then(|m| m.modified()).ok();
            entries.push(Entry {
                name: alias,
                kind: EntryKind::IsoFolder,
                source: EntrySource::Virtual,
                size: 0,
                mode: 0o755,
                mtime,
                writable: false,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn readdir_area(&self, image: &Arc<SacdImage>, area: AreaType) -> Result<Vec<Entry>> {
        let count = match image.index().area(area) {
            Some(descriptor) => descriptor.track_count,
            None => return not_found_error(),
        };

        let mut entries = Vec::with_capacity(count as usize);
        for track_num in 1..=count {
            let mut name =
                image.track_filename(area, track_num, TrackFilenameFormat::NumArtistTitle)?;
            name.push_str(".dsf");
            entries.push(track_entry(image, area, track_num, &name)?);
        }
        Ok(entries)
    }

    /// Cheap Master TOC signature check, skipped when the image is already
    /// mounted.
    fn probe_image(&self, iso_path: &Path) -> bool {
        let key = fs::canonicalize(iso_path).unwrap_or_else(|_| iso_path.to_path_buf());
        if self.mounts.lock().contains_key(&key) {
            return true;
        }
        match FileSource::open(iso_path) {
            Ok(source) => nexus_format_sacd::probe(&source),
            Err(_) => false,
        }
    }

    /// Mount the image at `iso_path`, or touch it if already mounted.
    fn mount(&self, iso_path: &Path) -> Result<Arc<SacdImage>> {
        let key = fs::canonicalize(iso_path).unwrap_or_else(|_| iso_path.to_path_buf());

        let mut mounts = self.mounts.lock();
        self.evict_expired(&mut mounts);

        if let Some(entry) = mounts.get_mut(&key) {
            entry.last_used = Instant::now();
            return Ok(Arc::clone(&entry.image));
        }

        let image = Arc::new(SacdImage::open(iso_path)?);
        info!("mounted {}", iso_path.display());
        mounts.insert(key, MountEntry { image: Arc::clone(&image), last_used: Instant::now() });
        self.enforce_capacity(&mut mounts);

        Ok(image)
    }

    /// Evict least-recently-used unreferenced images beyond
    /// `max_open_isos`. An image whose pending overlay cannot be saved is
    /// kept.
    fn enforce_capacity(&self, mounts: &mut HashMap<PathBuf, MountEntry>) {
        let max = self.config.max_open_isos;
        if max == 0 {
            return;
        }

        let mut skipped = HashSet::new();
        while mounts.len() > max {
            let victim = mounts
                .iter()
                .filter(|(path, entry)| {
                    !skipped.contains(*path) && Arc::strong_count(&entry.image) == 1
                })
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(path, entry)| (path.clone(), Arc::clone(&entry.image)));

            match victim {
                Some((path, image)) if save_before_evict(&image) => {
                    info!("evicting {}", path.display());
                    drop(image);
                    mounts.remove(&path);
                }
                Some((path, _)) => {
                    skipped.insert(path);
                }
                // Every remaining image is pinned.
                None => break,
            }
        }
    }

    fn evict_expired(&self, mounts: &mut HashMap<PathBuf, MountEntry>) -> usize {
        if self.config.cache_timeout.is_zero() {
            return 0;
        }

        let now = Instant::now();
        let expired: Vec<PathBuf> = mounts
            .iter()
            .filter(|(_, entry)| Arc::strong_count(&entry.image) == 1)
            .filter(|(_, entry)| now.duration_since(entry.last_used) > self.config.cache_timeout)
            .filter(|(_, entry)| save_before_evict(&entry.image))
            .map(|(path, _)| path.clone())
            .collect();

        for path in &expired {
            debug!("evicting idle {}", path.display());
            mounts.remove(path);
        }
        expired.len()
    }
}

impl Drop for Overlay {
    fn drop(&mut self) {
        if self.flush_all().is_err() {
            warn!("pending id3 overlays were lost at overlay destruction");
        }
    }
}

/// Attempt to persist an image's pending overlay before eviction. Returns
/// false, keeping the image mounted, when the save fails.
fn save_before_evict(image: &SacdImage) -> bool {
    if !image.has_unsaved_id3_changes() {
        return true;
    }
    match image.save_id3_overlay() {
        Ok(()) => true,
        Err(err) => {
            warn!("not evicting image with unsaveable overlay: {}", err);
            false
        }
    }
}

fn final_component(path: &str) -> &str {
    path.rsplit('/').find(|c| !c.is_empty()).unwrap_or("/")
}

fn is_sidecar_name(name: &str, config: &OverlayConfig) -> bool {
    match name.strip_suffix(".xml") {
        Some(stem) => config.iso_extensions.matches(stem),
        None => false,
    }
}

fn virtual_dir_entry(name: &str) -> Entry {
    Entry {
        name: name.to_string(),
        kind: EntryKind::Directory,
        source: EntrySource::Virtual,
        size: 0,
        mode: 0o755,
        mtime: None,
        writable: false,
    }
}

fn passthrough_entry(host: &Path, name: &str) -> Result<Entry> {
    let metadata = fs::metadata(host)?;
    let writable = !metadata.permissions().readonly();

    Ok(Entry {
        name: name.to_string(),
        kind: if metadata.is_dir() { EntryKind::Directory } else { EntryKind::File },
        source: EntrySource::Passthrough,
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        mode: if metadata.is_dir() { 0o755 } else { 0o644 },
        mtime: metadata.modified().ok(),
        writable,
    })
}

fn track_entry(
    image: &Arc<SacdImage>,
    area: AreaType,
    track_num: u32,
    name: &str,
) -> Result<Entry> {
    let (descriptor, extent) = image.area_and_track(area, track_num)?;
    let id3_len = image.effective_id3(area, track_num).len() as u64;
    let layout = DsfLayout::synthesize(
        descriptor.channel_count,
        descriptor.sample_rate,
        extent.frame_count,
        id3_len,
    )?;

    Ok(Entry {
        name: name.to_string(),
        kind: EntryKind::File,
        source: EntrySource::Virtual,
        size: layout.total_size(),
        mode: 0o644,
        mtime: None,
        writable: true,
    })
}

enum FileInner {
    Passthrough(Mutex<fs::File>),
    Virtual(VirtualDsfFile),
}

/// An open overlay file: either a host file proxied through, or a virtual
/// DSF file.
pub struct OverlayFile {
    inner: FileInner,
}

impl OverlayFile {
    /// Read up to `buf.len()` bytes at `offset`. Returns 0 at end of file.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        match self.inner {
            FileInner::Passthrough(ref file) => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                let mut filled = 0;
                while filled < buf.len() {
                    match file.read(&mut buf[filled..])? {
                        0 => break,
                        n => filled += n,
                    }
                }
                Ok(filled)
            }
            FileInner::Virtual(ref file) => file.read_at(offset, buf),
        }
    }

    /// Write `buf` at `offset`. On virtual files only the ID3 region is
    /// writable; elsewhere the write fails with `Access`.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        match self.inner {
            FileInner::Passthrough(ref file) => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(buf)?;
                Ok(buf.len())
            }
            FileInner::Virtual(ref file) => file.write_at(offset, buf),
        }
    }

    /// Flush pending writes. On virtual files this commits ID3 edits to
    /// the overlay store.
    pub fn flush(&self) -> Result<()> {
        match self.inner {
            FileInner::Passthrough(ref file) => {
                file.lock().flush()?;
                Ok(())
            }
            FileInner::Virtual(ref file) => file.flush(),
        }
    }

    pub fn size(&self) -> Result<u64> {
        match self.inner {
            FileInner::Passthrough(ref file) => Ok(file.lock().metadata()?.len()),
            FileInner::Virtual(ref file) => Ok(file.info().total_size),
        }
    }

    /// The underlying virtual file, when this handle is not a passthrough.
    pub fn as_virtual(&self) -> Option<&VirtualDsfFile> {
        match self.inner {
            FileInner::Virtual(ref file) => Some(file),
            FileInner::Passthrough(_) => None,
        }
    }
}
