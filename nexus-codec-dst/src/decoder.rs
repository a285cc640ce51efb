// Nexus
// Copyright (c) 2026 The DSD-Nexus Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The DST frame decoder.
//!
//! ISO/IEC 14496-3 Part 3 Subpart 10: technical description of lossless
//! coding of oversampled audio. Section references below follow that
//! document.

use nexus_core::dsd::{self, BIT_REVERSE};
use nexus_core::errors::{decode_failed_error, invalid_arg_error, Result};

use crate::bitstream::BitReader;

const MAX_CHANNELS: usize = 6;
const MAX_ELEMENTS: usize = 2 * MAX_CHANNELS;

/// Prediction coefficients for the coded filter table methods.
const FSETS_CODE_PRED_COEFF: [[i32; 3]; 3] = [[-8, 0, 0], [-16, 8, 0], [-9, -5, 6]];

/// Prediction coefficients for the coded probability table methods.
const PROBS_CODE_PRED_COEFF: [[i32; 3]; 3] = [[-8, 0, 0], [-16, 8, 0], [-24, 24, -8]];

/// A filter or probability table: up to twelve elements of Rice-coded
/// coefficients shared between channels through a channel map.
struct Table {
    elements: usize,
    length: [usize; MAX_ELEMENTS],
    coeff: [[i32; 128]; MAX_ELEMENTS],
}

impl Table {
    fn new() -> Table {
        Table { elements: 0, length: [0; MAX_ELEMENTS], coeff: [[0; 128]; MAX_ELEMENTS] }
    }
}

/// The binary arithmetic decoder of section 10.11.
struct ArithCoder {
    a: u32,
    c: u32,
}

impl ArithCoder {
    fn init(gb: &mut BitReader<'_>) -> Result<ArithCoder> {
        Ok(ArithCoder { a: 4095, c: gb.read_bits(12)? })
    }

    fn get(&mut self, gb: &mut BitReader<'_>, p: u32) -> Result<u32> {
        let k = (self.a >> 8) | ((self.a >> 7) & 1);
        let q = k * p;
        let a_q = self.a - q;

        let e = u32::from(self.c < a_q);
        if e == 1 {
            self.a = a_q;
        } else {
            self.a = q;
            self.c -= a_q;
        }

        if self.a < 2048 {
            let n = 11 - (31 - self.a.leading_zeros());
            let left = gb.bits_left() as u32;
            self.a <<= n;
            // Zero-fill once the bitstream runs dry; the closing samples of
            // a frame may extend past its last coded bit.
            if left >= n {
                self.c = (self.c << n) | gb.read_bits(n)?;
            } else {
                self.c <<= n;
                if left > 0 {
                    self.c |= gb.read_bits(left)? << (n - left);
                }
            }
        }

        Ok(e)
    }
}

fn prob_dst_x_bit(coeff: i32) -> u32 {
    u32::from(BIT_REVERSE[(coeff & 127) as usize] >> 1) + 1
}

fn log2_floor(value: usize) -> u32 {
    usize::BITS - 1 - value.leading_zeros()
}

/// A Direct Stream Transfer decoder for one channel configuration.
///
/// Holds no state between frames; `decode` restores everything from the
/// frame's own bitstream.
pub struct DstDecoder {
    channels: usize,
    samples_per_frame: u32,
    fsets: Table,
    probs: Table,
    /// Per-element sliding filter lookup, rebuilt each frame (10.12).
    filter: Box<[[[i16; 256]; 16]; MAX_ELEMENTS]>,
}

impl DstDecoder {
    pub fn new(channel_count: u32, sample_rate: u32) -> Result<DstDecoder> {
        if channel_count < 1 || channel_count > dsd::MAX_CHANNELS {
            return invalid_arg_error("dst: channel count outside 1..=6");
        }
        let samples_per_frame = match dsd::frame_samples_per_channel(sample_rate) {
            Some(samples) => samples as u32,
            None => return invalid_arg_error("dst: sample rate outside the dsd family"),
        };

        Ok(DstDecoder {
            channels: channel_count as usize,
            samples_per_frame,
            fsets: Table::new(),
            probs: Table::new(),
            filter: Box::new([[[0; 256]; 16]; MAX_ELEMENTS]),
        })
    }

    /// Bytes of linear DSD one decoded frame produces.
    pub fn output_len(&self) -> usize {
        (self.samples_per_frame as usize / 8) * self.channels
    }

    /// Expand one DST frame into byte-interleaved MSB-first DSD.
    ///
    /// `out.len()` must equal [`DstDecoder::output_len`]. A frame shorter
    /// than a full frame of samples zero-fills the tail.
    pub fn decode(&mut self, frame: &[u8], out: &mut [u8]) -> Result<()> {
        if out.len() != self.output_len() {
            return invalid_arg_error("dst: output buffer does not match frame size");
        }
        if frame.len() <= 1 {
            return decode_failed_error("dst: frame too short");
        }

        let mut gb = BitReader::new(frame);

        // DSD passthrough frame: the payload is already linear DSD.
        if !gb.read_bit()? {
            gb.ignore_bit()?;
            if gb.read_bits(6)? != 0 {
                return decode_failed_error("dst: bad passthrough frame header");
            }
            let n = out.len().min(frame.len() - 1);
            out[..n].copy_from_slice(&frame[1..1 + n]);
            out[n..].fill(0);
            return Ok(());
        }

        // Segmentation (10.4, 10.5, 10.6). Only the same-segmentation-for-
        // all-channels case is defined for SACD.
        if !gb.read_bit()? || !gb.read_bit()? || !gb.read_bit()? {
            return decode_failed_error("dst: unsupported segmentation");
        }

        // Mapping (10.7, 10.8, 10.9).
        let same_map = gb.read_bit()?;

        let mut map_ch_to_felem = [0usize; MAX_CHANNELS];
        let mut map_ch_to_pelem = [0usize; MAX_CHANNELS];

        read_map(&mut gb, &mut self.fsets, &mut map_ch_to_felem, self.channels)?;

        if same_map {
            self.probs.elements = self.fsets.elements;
            map_ch_to_pelem = map_ch_to_felem;
        } else {
            read_map(&mut gb, &mut self.probs, &mut map_ch_to_pelem, self.channels)?;
        }

        // Half probability (10.10).
        let mut half_prob = [false; MAX_CHANNELS];
        for flag in half_prob.iter_mut().take(self.channels) {
            *flag = gb.read_bit()?;
        }

        // Filter coefficient sets (10.12) and probability tables (10.13).
        read_table(&mut gb, &mut self.fsets, &FSETS_CODE_PRED_COEFF, 7, 9, true, 0)?;
        read_table(&mut gb, &mut self.probs, &PROBS_CODE_PRED_COEFF, 6, 7, false, 1)?;

        // Arithmetic coded data (10.11).
        if gb.read_bit()? {
            return decode_failed_error("dst: bad arithmetic data marker");
        }
        let mut ac = ArithCoder::init(&mut gb)?;

        build_filter(&mut self.filter, &self.fsets)?;

        let mut status = [0xAAAA_AAAA_AAAA_AAAA_AAAA_AAAA_AAAA_AAAAu128; MAX_CHANNELS];
        out.fill(0);

        ac.get(&mut gb, prob_dst_x_bit(self.fsets.coeff[0][0]))?;

        for i in 0..self.samples_per_frame {
            for ch in 0..self.channels {
                let felem = map_ch_to_felem[ch];
                let filter = &self.filter[felem];

                let mut predict = 0i32;
                for (j, taps) in filter.iter().enumerate() {
                    predict += i32::from(taps[(status[ch] >> (8 * j)) as u8 as usize]);
                }
                let predict = predict as i16;

                let prob = if !half_prob[ch] || i as usize >= self.fsets.length[felem] {
                    let pelem = map_ch_to_pelem[ch];
                    let index = (predict.unsigned_abs() >> 3) as usize;
                    self.probs.coeff[pelem][index.min(self.probs.length[pelem] - 1)] as u32
                } else {
                    128
                };

                let residual = ac.get(&mut gb, prob)?;
                let v = ((predict >> 15) as u32 ^ residual) & 1;
                out[(i >> 3) as usize * self.channels + ch] |= (v as u8) << (7 - (i & 7));

                status[ch] = (status[ch] << 1) | u128::from(v);
            }
        }

        Ok(())
    }
}

fn read_map(
    gb: &mut BitReader<'_>,
    table: &mut Table,
    map: &mut [usize; MAX_CHANNELS],
    channels: usize,
) -> Result<()> {
    table.elements = 1;
    map[0] = 0;

    if !gb.read_bit()? {
        for ch in 1..channels {
            let bits = log2_floor(table.elements) + 1;
            let value = gb.read_bits(bits)? as usize;
            if value == table.elements {
                table.elements += 1;
                if table.elements >= MAX_ELEMENTS {
                    return decode_failed_error("dst: too many mapped elements");
                }
            } else if value > table.elements {
                return decode_failed_error("dst: invalid channel map entry");
            }
            map[ch] = value;
        }
    } else {
        map.fill(0);
    }

    Ok(())
}

fn read_uncoded_coeff(
    gb: &mut BitReader<'_>,
    coeff: &mut [i32],
    coeff_bits: u32,
    is_signed: bool,
    offset: i32,
) -> Result<()> {
    for value in coeff.iter_mut() {
        *value = if is_signed {
            gb.read_sbits(coeff_bits)?
        } else {
            gb.read_bits(coeff_bits)? as i32
        } + offset;
    }
    Ok(())
}

fn read_table(
    gb: &mut BitReader<'_>,
    table: &mut Table,
    code_pred_coeff: &[[i32; 3]; 3],
    length_bits: u32,
    coeff_bits: u32,
    is_signed: bool,
    offset: i32,
) -> Result<()> {
    for i in 0..table.elements {
        let length = gb.read_bits(length_bits)? as usize + 1;
        table.length[i] = length;

        if !gb.read_bit()? {
            read_uncoded_coeff(gb, &mut table.coeff[i][..length], coeff_bits, is_signed, offset)?;
        } else {
            let method = gb.read_bits(2)? as usize;
            if method == 3 {
                return decode_failed_error("dst: invalid coefficient coding method");
            }

            read_uncoded_coeff(gb, &mut table.coeff[i][..method + 1], coeff_bits, is_signed, offset)?;

            let lsb_size = gb.read_bits(3)?;
            for j in method + 1..length {
                let mut x = 0i64;
                for (k, &pred) in code_pred_coeff[method].iter().take(method + 1).enumerate() {
                    x += i64::from(pred) * i64::from(table.coeff[i][j - k - 1]);
                }

                let mut c = i64::from(gb.read_signed_rice(lsb_size)?);
                if x >= 0 {
                    c -= (x + 4) / 8;
                } else {
                    c += (-x + 3) / 8;
                }

                if !is_signed
                    && (c < i64::from(offset) || c >= i64::from(offset) + (1 << coeff_bits))
                {
                    return decode_failed_error("dst: probability coefficient out of range");
                }
                table.coeff[i][j] = c as i32;
            }
        }
    }

    Ok(())
}

/// Expand the filter coefficients into per-byte lookup tables: entry
/// `[element][j][k]` is the dot product of taps `8j..8j+8` with the bit
/// pattern `k` mapped to -1/+1.
fn build_filter(
    filter: &mut [[[i16; 256]; 16]; MAX_ELEMENTS],
    fsets: &Table,
) -> Result<()> {
    for i in 0..fsets.elements {
        let length = fsets.length[i];

        for j in 0..16 {
            let total = length.saturating_sub(j * 8).min(8);

            for k in 0..256usize {
                let mut v = 0i64;
                for l in 0..total {
                    let sign = ((k >> l) & 1) as i64 * 2 - 1;
                    v += sign * i64::from(fsets.coeff[i][j * 8 + l]);
                }
                if i64::from(v as i16) != v {
                    return decode_failed_error("dst: filter coefficient overflow");
                }
                filter[i][j][k] = v as i16;
            }
        }
    }

    Ok(())
}
