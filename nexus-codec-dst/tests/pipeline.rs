// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use nexus_codec_dst::{DecodePool, DstStream, FrameSource};
use nexus_core::errors::{Error, Result};

const CHANNELS: u32 = 2;
const RATE: u32 = 2_822_400;
const FRAME_LEN: usize = 9408;

/// A track of DSD-passthrough DST frames where frame `i` is filled with the
/// byte `i % 251`.
struct PatternSource {
    frames: u32,
    poison_at: Option<u32>,
}

fn pattern_payload(index: u32) -> Vec<u8> {
    vec![(index % 251) as u8; FRAME_LEN]
}

impl FrameSource for PatternSource {
    fn frame_count(&self) -> u32 {
        self.frames
    }

    fn read_frame(&mut self, index: u32) -> Result<Vec<u8>> {
        if self.poison_at == Some(index) {
            // A compressed frame with an unsupported segmentation header.
            return Ok(vec![0x80, 0x00, 0x00]);
        }
        let mut frame = Vec::with_capacity(1 + FRAME_LEN);
        frame.push(0x00);
        frame.extend_from_slice(&pattern_payload(index));
        Ok(frame)
    }
}

fn run_ordered(threads: usize, frames: u32, lookahead: u32) {
    let pool = Arc::new(DecodePool::new(threads));
    let source = PatternSource { frames, poison_at: None };
    let mut stream = DstStream::spawn(&pool, source, CHANNELS, RATE, 0, lookahead);

    for expected in 0..frames {
        let (index, bytes) = stream.next_frame().unwrap();
        assert_eq!(index, expected);
        assert_eq!(bytes, pattern_payload(expected));
    }

    assert!(matches!(stream.next_frame(), Err(Error::Eof)));
}

#[test]
fn frames_arrive_in_submission_order_single_worker() {
    run_ordered(1, 40, 8);
}

#[test]
fn frames_arrive_in_submission_order_many_workers() {
    run_ordered(4, 120, 16);
}

#[test]
fn frames_arrive_in_submission_order_tiny_window() {
    // The window is floored at the worker count.
    run_ordered(8, 60, 1);
}

#[test]
fn stream_starts_at_requested_frame() {
    let pool = Arc::new(DecodePool::new(2));
    let source = PatternSource { frames: 30, poison_at: None };
    let mut stream = DstStream::spawn(&pool, source, CHANNELS, RATE, 25, 8);

    for expected in 25..30 {
        let (index, bytes) = stream.next_frame().unwrap();
        assert_eq!(index, expected);
        assert_eq!(bytes, pattern_payload(expected));
    }
    assert!(matches!(stream.next_frame(), Err(Error::Eof)));
}

#[test]
fn decode_error_poisons_the_stream() {
    let pool = Arc::new(DecodePool::new(4));
    let source = PatternSource { frames: 20, poison_at: Some(5) };
    let mut stream = DstStream::spawn(&pool, source, CHANNELS, RATE, 0, 8);

    for expected in 0..5 {
        let (index, _) = stream.next_frame().unwrap();
        assert_eq!(index, expected);
    }

    assert!(matches!(stream.next_frame(), Err(Error::DecodeFailed(_))));
    // The failure is sticky.
    assert!(matches!(stream.next_frame(), Err(Error::DecodeFailed(_))));
}

#[test]
fn dropping_a_stream_cancels_the_reader() {
    let pool = Arc::new(DecodePool::new(2));
    let source = PatternSource { frames: 10_000, poison_at: None };
    let mut stream = DstStream::spawn(&pool, source, CHANNELS, RATE, 0, 4);

    let (index, _) = stream.next_frame().unwrap();
    assert_eq!(index, 0);

    // Dropping with thousands of frames still pending must not hang.
    drop(stream);

    // The pool stays usable for the next stream.
    let source = PatternSource { frames: 3, poison_at: None };
    let mut stream = DstStream::spawn(&pool, source, CHANNELS, RATE, 0, 4);
    assert_eq!(stream.next_frame().unwrap().0, 0);
}
