// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The parallel DST decode pipeline.
//!
//! A [`DecodePool`] runs a fixed number of worker threads drawing jobs from
//! a shared FIFO. A [`DstStream`] owns the per-file look-ahead loop: a
//! reader thread fetches compressed frames in order, dispatches them to the
//! pool, and registers one completion slot per frame in a bounded ordered
//! channel. Consumers receive decoded frames in exact submission order no
//! matter which worker finishes first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, warn};

use nexus_core::errors::{Error, Result};

use crate::decoder::DstDecoder;
use crate::MAX_THREADS;

/// Supplies a track's compressed DST frames to a [`DstStream`].
pub trait FrameSource: Send + 'static {
    /// Number of frames in the track.
    fn frame_count(&self) -> u32;

    /// Read the compressed bytes of frame `index`.
    fn read_frame(&mut self, index: u32) -> Result<Vec<u8>>;
}

struct Job {
    channel_count: u32,
    sample_rate: u32,
    frame: Vec<u8>,
    slot: Sender<Result<Vec<u8>>>,
}

/// A fixed pool of DST decode workers sharing one dispatch queue.
///
/// Each worker keeps a private decoder, re-created only when a job's
/// channel configuration differs from the previous one. Dropping the pool
/// lets workers finish their current frame and exit.
pub struct DecodePool {
    dispatch: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    thread_count: usize,
}

impl DecodePool {
    /// Create a pool of `threads` workers; 0 auto-detects from the CPU
    /// count. The count is capped at [`MAX_THREADS`].
    pub fn new(threads: usize) -> DecodePool {
        let thread_count = match threads {
            0 => num_cpus::get(),
            n => n,
        }
        .clamp(1, MAX_THREADS);

        let (dispatch, queue) = unbounded::<Job>();

        let workers = (0..thread_count)
            .map(|id| {
                let queue = queue.clone();
                thread::Builder::new()
                    .name(format!("dst-worker-{}", id))
                    .spawn(move || worker_loop(queue))
                    .expect("failed to spawn dst worker")
            })
            .collect();

        debug!("dst decode pool started with {} workers", thread_count);

        DecodePool { dispatch, workers, thread_count }
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        // Disconnect the queue; workers drain their current job and exit.
        let (closed, _) = unbounded();
        self.dispatch = closed;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(queue: Receiver<Job>) {
    let mut decoder: Option<(u32, u32, DstDecoder)> = None;

    while let Ok(job) = queue.recv() {
        let cached = match decoder {
            Some((channels, rate, _)) => {
                channels == job.channel_count && rate == job.sample_rate
            }
            None => false,
        };

        if !cached {
            decoder = match DstDecoder::new(job.channel_count, job.sample_rate) {
                Ok(instance) => Some((job.channel_count, job.sample_rate, instance)),
                Err(err) => {
                    let _ = job.slot.send(Err(err));
                    continue;
                }
            };
        }

        let (_, _, instance) = decoder.as_mut().unwrap();
        let mut out = vec![0u8; instance.output_len()];
        let result = instance.decode(&job.frame, &mut out).map(|_| out);

        // A send error means the stream was cancelled; the result is
        // discarded.
        let _ = job.slot.send(result);
    }
}

/// The error a poisoned stream keeps returning.
fn poisoned_error(msg: &'static str) -> Error {
    Error::DecodeFailed(msg)
}

/// An ordered, look-ahead decode stream over one DST track.
///
/// `next` yields `(frame_index, dsd_bytes)` in strict ascending frame
/// order starting at the frame the stream was spawned at. Dropping the
/// stream cancels the reader thread and discards in-flight results.
pub struct DstStream {
    slots: Receiver<(u32, Receiver<Result<Vec<u8>>>)>,
    cancel: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    poison: Option<&'static str>,
}

impl DstStream {
    /// Spawn the reader thread for `source`, dispatching into `pool`,
    /// starting at `start_frame` with a look-ahead window of `lookahead`
    /// frames (floored at the pool's worker count).
    pub fn spawn<S: FrameSource>(
        pool: &Arc<DecodePool>,
        mut source: S,
        channel_count: u32,
        sample_rate: u32,
        start_frame: u32,
        lookahead: u32,
    ) -> DstStream {
        let window = (lookahead as usize).max(pool.thread_count()).max(1);
        let (slot_tx, slot_rx) = bounded(window);
        let cancel = Arc::new(AtomicBool::new(false));

        let dispatch = pool.dispatch.clone();
        let cancelled = Arc::clone(&cancel);

        let reader = thread::Builder::new()
            .name("dst-reader".to_string())
            .spawn(move || {
                for index in start_frame..source.frame_count() {
                    if cancelled.load(Ordering::Relaxed) {
                        break;
                    }

                    let (result_tx, result_rx) = bounded(1);

                    match source.read_frame(index) {
                        Ok(frame) => {
                            let job = Job {
                                channel_count,
                                sample_rate,
                                frame,
                                slot: result_tx,
                            };
                            if dispatch.send(job).is_err() {
                                // Pool shut down under us.
                                break;
                            }
                        }
                        Err(err) => {
                            // Deliver the read failure in order, then stop
                            // dispatching.
                            warn!("dst reader failed at frame {}: {}", index, err);
                            let _ = result_tx.send(Err(err));
                            let _ = slot_tx.send((index, result_rx));
                            break;
                        }
                    }

                    // Blocks while the look-ahead window is full.
                    if slot_tx.send((index, result_rx)).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn dst reader");

        DstStream { slots: slot_rx, cancel, reader: Some(reader), poison: None }
    }

    /// Receive the next decoded frame in submission order.
    ///
    /// Returns `Eof` once every frame has been delivered. A `DecodeFailed`
    /// result poisons the stream: every subsequent call repeats it.
    pub fn next_frame(&mut self) -> Result<(u32, Vec<u8>)> {
        if let Some(msg) = self.poison {
            return Err(poisoned_error(msg));
        }

        let (index, slot) = match self.slots.recv() {
            Ok(entry) => entry,
            // The reader exited and the window has drained.
            Err(_) => return Err(Error::Eof),
        };

        match slot.recv() {
            Ok(Ok(bytes)) => Ok((index, bytes)),
            Ok(Err(Error::DecodeFailed(msg))) => {
                self.poison = Some(msg);
                Err(poisoned_error(msg))
            }
            Ok(Err(err)) => Err(err),
            // The worker vanished without publishing a result.
            Err(_) => Err(Error::Cancelled),
        }
    }
}

impl Drop for DstStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        // Disconnect the ordered window so a blocked reader send returns.
        let (_, closed) = bounded(0);
        self.slots = closed;
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}
