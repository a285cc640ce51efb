// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual track filename generation.

use nexus_format_sacd::{AreaType, ImageIndex};

/// Component length caps keep generated names inside common filesystem
/// limits even for verbose TOC text.
const MAX_ARTIST_COMPONENT: usize = 60;
const MAX_TITLE_COMPONENT: usize = 120;

/// How much TOC text a generated track filename carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFilenameFormat {
    /// "NN"
    NumOnly,
    /// "NN - Title"
    NumTitle,
    /// "NN - Performer - Title"
    NumArtistTitle,
}

/// Replace filesystem-hostile characters and trim the result.
pub(crate) fn sanitize(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    mapped.trim_matches(|c: char| c == ' ' || c == '.').to_string()
}

/// Truncate to at most `max` characters on a character boundary.
fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// The first listed performer: text up to the multi-artist separator.
fn first_performer(text: &str) -> &str {
    text.split(';').next().unwrap_or(text).trim()
}

/// The best artist for a track: its own performer, else the album artist.
fn best_artist<'a>(index: &'a ImageIndex, area: AreaType, track_num: u32) -> Option<&'a str> {
    if let Some(text) = index.track_text(area, track_num) {
        if !text.performer.is_empty() {
            return Some(&text.performer);
        }
    }
    let album_artist = &index.album_text().artist;
    if !album_artist.is_empty() {
        Some(album_artist)
    } else {
        None
    }
}

/// Generate the virtual filename of a track, without the `.dsf` suffix.
///
/// Missing TOC text degrades the format gracefully: "NN - Title",
/// "NN - Performer", or plain "NN".
pub(crate) fn track_filename(
    index: &ImageIndex,
    area: AreaType,
    track_num: u32,
    format: TrackFilenameFormat,
) -> String {
    if format == TrackFilenameFormat::NumOnly {
        return format!("{:02}", track_num);
    }

    let title = index
        .track_text(area, track_num)
        .map(|text| sanitize(truncate(&text.title, MAX_TITLE_COMPONENT)))
        .unwrap_or_default();

    let performer = if format == TrackFilenameFormat::NumArtistTitle {
        best_artist(index, area, track_num)
            .map(|artist| sanitize(truncate(first_performer(artist), MAX_ARTIST_COMPONENT)))
            .unwrap_or_default()
    } else {
        String::new()
    };

    match (!performer.is_empty(), !title.is_empty()) {
        (true, true) => format!("{:02} - {} - {}", track_num, performer, title),
        (false, true) => format!("{:02} - {}", track_num, title),
        (true, false) => format!("{:02} - {}", track_num, performer),
        (false, false) => format!("{:02}", track_num),
    }
}
