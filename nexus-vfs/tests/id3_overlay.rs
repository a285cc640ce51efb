// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ID3 overlay semantics and sidecar persistence.

mod common;

use std::sync::Arc;

use common::{AreaSpec, ImageBuilder, TrackSpec, FORMAT_DSD};
use nexus_core::errors::Error;
use nexus_vfs::{AreaType, DecodePool, SacdImage, VirtualDsfFile};

fn test_blob(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 17 + 3) as u8).collect()
}

fn builder_with_text() -> ImageBuilder {
    ImageBuilder::stereo_only(AreaSpec::new(
        2,
        FORMAT_DSD,
        vec![TrackSpec::new(2, "Opening", "Someone"), TrackSpec::new(2, "Closing", "Someone")],
    ))
}

fn write_iso(dir: &std::path::Path) -> std::path::PathBuf {
    let iso = dir.join("demo.iso");
    builder_with_text().write_iso(&iso);
    iso
}

#[test]
fn set_then_get_returns_the_blob() {
    let dir = tempfile::tempdir().unwrap();
    let image = SacdImage::open(write_iso(dir.path())).unwrap();

    let original = image.get_id3_tag(AreaType::Stereo, 1).unwrap();
    assert!(original.starts_with(b"ID3"));

    let blob = test_blob(372);
    image.set_id3_overlay(AreaType::Stereo, 1, &blob).unwrap();
    assert_eq!(image.get_id3_tag(AreaType::Stereo, 1).unwrap(), blob);
    assert!(image.has_unsaved_id3_changes());

    // The override is per (area, track): track 2 still has its original.
    let other = image.get_id3_tag(AreaType::Stereo, 2).unwrap();
    assert!(other.starts_with(b"ID3"));
    assert_ne!(other, blob);

    // Clearing reverts to the original tag.
    image.clear_id3_overlay(AreaType::Stereo, 1).unwrap();
    assert_eq!(image.get_id3_tag(AreaType::Stereo, 1).unwrap(), original);
}

#[test]
fn id3_operations_validate_the_track() {
    let dir = tempfile::tempdir().unwrap();
    let image = SacdImage::open(write_iso(dir.path())).unwrap();

    assert!(matches!(image.get_id3_tag(AreaType::Stereo, 0), Err(Error::NotFound)));
    assert!(matches!(image.get_id3_tag(AreaType::Stereo, 9), Err(Error::NotFound)));
    assert!(matches!(
        image.set_id3_overlay(AreaType::Multichannel, 1, &[1, 2]),
        Err(Error::NotFound)
    ));
    assert!(matches!(
        image.clear_id3_overlay(AreaType::Stereo, 9),
        Err(Error::NotFound)
    ));
}

#[test]
fn overlay_grows_the_virtual_file() {
    let builder = ImageBuilder {
        album_title: String::new(),
        album_artist: String::new(),
        stereo: Some(AreaSpec::new(2, FORMAT_DSD, vec![TrackSpec::untitled(2)])),
        multichannel: None,
    };
    let dir = tempfile::tempdir().unwrap();
    let iso = dir.path().join("plain.iso");
    builder.write_iso(&iso);

    let image = Arc::new(SacdImage::open(&iso).unwrap());
    let pool = Arc::new(DecodePool::new(1));
    let file =
        VirtualDsfFile::open(Arc::clone(&image), AreaType::Stereo, 1, Arc::clone(&pool))
            .unwrap();

    // No TOC text anywhere: no ID3 region at all.
    let before = file.info();
    assert_eq!(before.metadata_offset, 0);

    let blob = test_blob(372);
    image.set_id3_overlay(AreaType::Stereo, 1, &blob).unwrap();

    // The already-open handle observes the new layout on its next read.
    let after = file.info();
    let padding = after.metadata_offset - (92 + after.audio_size);
    assert_eq!(after.metadata_offset % 8, 0);
    assert_eq!(after.total_size, before.total_size + padding + 372);
    assert_eq!(after.metadata_size, 372);

    let mut read_back = vec![0u8; 372];
    assert_eq!(file.read_at(after.metadata_offset, &mut read_back).unwrap(), 372);
    assert_eq!(read_back, blob);

    // The padding region carries the fixed filler byte.
    let mut pad = vec![0u8; padding as usize];
    assert_eq!(file.read_at(92 + after.audio_size, &mut pad).unwrap(), pad.len());
    assert!(pad.iter().all(|&b| b == 0x69));
}

#[test]
fn save_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let iso = write_iso(dir.path());
    let sidecar = dir.path().join("demo.iso.xml");

    let saved_blob = test_blob(200);
    let unsaved_blob = test_blob(77);

    {
        let image = SacdImage::open(&iso).unwrap();
        image.set_id3_overlay(AreaType::Stereo, 1, &saved_blob).unwrap();
        image.save_id3_overlay().unwrap();
        assert!(!image.has_unsaved_id3_changes());
        assert!(sidecar.exists());

        // Set after the save, never saved.
        image.set_id3_overlay(AreaType::Stereo, 2, &unsaved_blob).unwrap();
        assert!(image.has_unsaved_id3_changes());
    }

    let reopened = SacdImage::open(&iso).unwrap();
    assert_eq!(reopened.get_id3_tag(AreaType::Stereo, 1).unwrap(), saved_blob);
    // The unsaved overlay is gone; track 2 reverted to its original tag.
    assert!(reopened.get_id3_tag(AreaType::Stereo, 2).unwrap().starts_with(b"ID3"));
    assert!(!reopened.has_unsaved_id3_changes());
}

#[test]
fn cleared_overlay_persists_as_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let iso = write_iso(dir.path());

    {
        let image = SacdImage::open(&iso).unwrap();
        image.set_id3_overlay(AreaType::Stereo, 1, &test_blob(64)).unwrap();
        image.save_id3_overlay().unwrap();
    }
    {
        let image = SacdImage::open(&iso).unwrap();
        assert_eq!(image.get_id3_tag(AreaType::Stereo, 1).unwrap(), test_blob(64));
        image.clear_id3_overlay(AreaType::Stereo, 1).unwrap();
        image.save_id3_overlay().unwrap();
    }

    let image = SacdImage::open(&iso).unwrap();
    assert!(image.get_id3_tag(AreaType::Stereo, 1).unwrap().starts_with(b"ID3"));
}

#[test]
fn file_writes_route_into_the_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let iso = write_iso(dir.path());
    let image = Arc::new(SacdImage::open(&iso).unwrap());
    let pool = Arc::new(DecodePool::new(1));

    let original = image.get_id3_tag(AreaType::Stereo, 1).unwrap();
    let replacement = test_blob(original.len());

    let file =
        VirtualDsfFile::open(Arc::clone(&image), AreaType::Stereo, 1, Arc::clone(&pool))
            .unwrap();
    let info = file.info();
    assert!(info.metadata_offset > 0);

    // Writing before the ID3 region is denied.
    assert!(matches!(file.write_at(0, &[1, 2, 3]), Err(Error::Access)));
    assert!(matches!(file.write_at(92, &[1, 2, 3]), Err(Error::Access)));

    // Writing the ID3 region succeeds and commits on flush.
    assert_eq!(file.write_at(info.metadata_offset, &replacement).unwrap(), replacement.len());
    file.flush().unwrap();

    assert_eq!(image.get_id3_tag(AreaType::Stereo, 1).unwrap(), replacement);
    assert!(image.has_unsaved_id3_changes());
}

#[test]
fn closing_a_written_file_commits_pending_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let iso = write_iso(dir.path());
    let image = Arc::new(SacdImage::open(&iso).unwrap());
    let pool = Arc::new(DecodePool::new(1));

    let original = image.get_id3_tag(AreaType::Stereo, 1).unwrap();
    let replacement = test_blob(original.len());

    {
        let file =
        VirtualDsfFile::open(Arc::clone(&image), AreaType::Stereo, 1, Arc::clone(&pool))
            .unwrap();
        let info = file.info();
        file.write_at(info.metadata_offset, &replacement).unwrap();
        // Dropped without an explicit flush.
    }

    assert_eq!(image.get_id3_tag(AreaType::Stereo, 1).unwrap(), replacement);
}

#[test]
fn unreadable_sidecar_is_ignored_at_mount() {
    let dir = tempfile::tempdir().unwrap();
    let iso = write_iso(dir.path());
    std::fs::write(dir.path().join("demo.iso.xml"), b"not xml at all <<<").unwrap();

    // The mount succeeds and the tracks fall back to their original tags.
    let image = SacdImage::open(&iso).unwrap();
    assert!(image.get_id3_tag(AreaType::Stereo, 1).unwrap().starts_with(b"ID3"));
}
