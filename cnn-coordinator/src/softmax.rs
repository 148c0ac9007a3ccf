// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fixed-point softmax over the accelerator's Q17.14 class outputs.

/// Turns raw Q17.14 accumulator outputs into Q1.15 probabilities.
///
/// |out| must be at least as long as |raw|; only the first |raw.len()|
/// slots are written. An empty |raw| writes nothing.
pub trait QuantizedNormalizer {
    fn normalize(&self, raw: &[i32], out: &mut [i16]);
}

// ln(2) in Q2.30.
const LN2_Q30: i64 = 744_261_118;
const ONE_Q30: i64 = 1 << 30;
const SERIES_TERMS: i64 = 12;

/// Integer exponential softmax. Every class gets exp(x - max), computed as
/// 2^-k * exp(-r) with r < ln 2 and a truncated Taylor series, then the
/// results are normalized with round-to-nearest and saturated to Q1.15.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExpSoftmax;

impl ExpSoftmax {
    // exp(-y) in Q2.30 for a nonnegative Q17.14 |y|.
    fn exp_neg_q30(y: i64) -> i64 {
        let y = y << 16;
        let k = y / LN2_Q30;
        if k >= 31 {
            return 0;
        }
        let r = y - k * LN2_Q30;
        let mut term = ONE_Q30;
        let mut sum = ONE_Q30;
        for n in 1..=SERIES_TERMS {
            term = -((term * r) >> 30) / n;
            sum += term;
        }
        sum >> k
    }
}

impl QuantizedNormalizer for ExpSoftmax {
    fn normalize(&self, raw: &[i32], out: &mut [i16]) {
        let max = match raw.iter().max() {
            Some(&max) => max as i64,
            None => return,
        };
        // The maximum contributes exactly ONE_Q30, so |sum| is never zero.
        let sum: i64 = raw
            .iter()
            .map(|&v| Self::exp_neg_q30(max - v as i64))
            .sum();
        for (p, &v) in out.iter_mut().zip(raw) {
            let e = Self::exp_neg_q30(max - v as i64);
            *p = (((e << 15) + sum / 2) / sum).min(i16::MAX as i64) as i16;
        }
    }
}

/// Power-of-two softmax as done by the accelerator vendor's support
/// library: exponents are rounded to whole powers of two and anything more
/// than 16.0 below the maximum gets zero probability. Coarse; close classes
/// frequently come out identical.
#[derive(Clone, Copy, Debug, Default)]
pub struct Pow2Softmax;

impl QuantizedNormalizer for Pow2Softmax {
    fn normalize(&self, raw: &[i32], out: &mut [i16]) {
        let max = match raw.iter().max() {
            Some(&max) => max as i64,
            None => return,
        };
        let base = max - (16 << 14);

        let mut sum: i64 = 0;
        for &v in raw {
            let v = v as i64;
            if v > base {
                sum += 1 << ((8192 + v - base) >> 14);
            }
        }
        // NB: the maximum always contributes 1 << 16.
        let output_base = (1i64 << 32) / sum;

        for (p, &v) in out.iter_mut().zip(raw) {
            let v = v as i64;
            *p = if v > base {
                let shift = 17 + ((8191 + base - v) >> 14);
                (output_base >> shift).clamp(i16::MIN as i64, i16::MAX as i64) as i16
            } else {
                0
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cnn_shared::Percentage;

    fn run<N: QuantizedNormalizer>(normalizer: N, raw: &[i32]) -> Vec<i16> {
        let mut out = vec![0i16; raw.len()];
        normalizer.normalize(raw, &mut out);
        out
    }

    fn wholes(probabilities: &[i16]) -> Vec<i32> {
        probabilities
            .iter()
            .map(|&p| Percentage::from_q15(p).whole)
            .collect()
    }

    #[test]
    fn exp_uniform() {
        assert_eq!(run(ExpSoftmax, &[0; 7]), vec![4681; 7]);
    }

    #[test]
    fn exp_small_margin_still_separates() {
        let p = run(ExpSoftmax, &[100, 50, 900, 0, 0, 0, 0]);
        assert_eq!(p, vec![4666, 4652, 4900, 4638, 4638, 4638, 4638]);
        assert_eq!(wholes(&p), vec![14, 14, 15, 14, 14, 14, 14]);
    }

    #[test]
    fn exp_known_values() {
        assert_eq!(run(ExpSoftmax, &[16384, 0]), vec![23955, 8813]);
        assert_eq!(
            run(ExpSoftmax, &[49152, 0, 0, 0, 0, 0, 0]),
            vec![25231, 1256, 1256, 1256, 1256, 1256, 1256]
        );
        assert_eq!(run(ExpSoftmax, &[-100, -200, -300]), vec![10989, 10923, 10856]);
        assert_eq!(
            run(ExpSoftmax, &[0, 0, 0, 81920, 0, 0, 0]),
            vec![212, 212, 212, 31495, 212, 212, 212]
        );
    }

    #[test]
    fn exp_saturates_single_class() {
        assert_eq!(run(ExpSoftmax, &[12345]), vec![i16::MAX]);
        assert_eq!(run(ExpSoftmax, &[1 << 30, -(1 << 30)]), vec![i16::MAX, 0]);
        assert_eq!(run(ExpSoftmax, &[i32::MAX, i32::MIN]), vec![i16::MAX, 0]);
    }

    #[test]
    fn exp_preserves_order() {
        // Deterministic LCG so failures are reproducible.
        let mut seed: u32 = 0x1234_5678;
        let mut next = || {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (seed >> 8) as i32 - (1 << 23)
        };
        for _ in 0..200 {
            let raw: Vec<i32> = (0..7).map(|_| next() >> 4).collect();
            let p = run(ExpSoftmax, &raw);
            for i in 0..raw.len() {
                for j in 0..raw.len() {
                    if raw[i] > raw[j] {
                        assert!(p[i] >= p[j], "raw {:?} -> {:?}", raw, p);
                    }
                }
            }
            let total: i32 = p.iter().map(|&v| v as i32).sum();
            assert!((32768 - 8..=32768 + 8).contains(&total), "sum {}", total);
        }
    }

    #[test]
    fn pow2_known_values() {
        assert_eq!(run(Pow2Softmax, &[0; 7]), vec![4681; 7]);
        assert_eq!(run(Pow2Softmax, &[16384, 0]), vec![21845, 10922]);
        assert_eq!(
            run(Pow2Softmax, &[49152, 0, 0, 0, 0, 0, 0]),
            vec![18724, 2340, 2340, 2340, 2340, 2340, 2340]
        );
        assert_eq!(
            run(Pow2Softmax, &[0, 0, 0, 81920, 0, 0, 0]),
            vec![862, 862, 862, 27594, 862, 862, 862]
        );
    }

    #[test]
    fn pow2_rounds_close_classes_together() {
        assert_eq!(run(Pow2Softmax, &[100, 50, 900, 0, 0, 0, 0]), vec![4681; 7]);
        assert_eq!(run(Pow2Softmax, &[-100, -200, -300]), vec![10922; 3]);
    }

    #[test]
    fn pow2_far_below_max_is_zero() {
        assert_eq!(run(Pow2Softmax, &[1 << 30, -(1 << 30)]), vec![i16::MAX, 0]);
        assert_eq!(run(Pow2Softmax, &[7]), vec![i16::MAX]);
    }

    #[test]
    fn empty_input_writes_nothing() {
        let mut out = [-1i16; 3];
        ExpSoftmax.normalize(&[], &mut out);
        Pow2Softmax.normalize(&[], &mut out);
        assert_eq!(out, [-1; 3]);
    }
}
