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

#![cfg_attr(not(test), no_std)]

// Data structures used throughout the CNN inference implementation that do
// not depend on the hardware driver.

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use modular_bitfield::prelude::*;
use static_assertions::const_assert_eq;

/// Width of the camera image fed to the accelerator, in pixels.
pub const FRAME_WIDTH: usize = 128;
/// Height of the camera image fed to the accelerator, in pixels.
pub const FRAME_HEIGHT: usize = 128;
/// Number of 32-bit words in a full frame (one word per pixel).
pub const FRAME_WORDS: usize = FRAME_WIDTH * FRAME_HEIGHT;
const_assert_eq!(FRAME_WORDS, 16384);

/// Output classes of the shipped network, in accelerator output order.
pub const CLASS_NAMES: [&str; NUM_CLASSES] =
    ["CUP", "TRAPEZOID", "HEXAGON", "OTHER", "CAN", "BOTTLE", "NONE"];
pub const NUM_CLASSES: usize = 7;
const_assert_eq!(CLASS_NAMES.len(), NUM_CLASSES);

/// Dimensions of a frame in pixels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameDims {
    pub width: usize,
    pub height: usize,
}
impl FrameDims {
    pub const fn new(width: usize, height: usize) -> Self { Self { width, height } }

    /// Number of pixel words needed to hold a frame of these dimensions.
    pub const fn words(&self) -> usize { self.width * self.height }
}
impl fmt::Display for FrameDims {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One pixel as streamed to the accelerator: 0RGB, a byte per channel with
/// the top byte unused.
#[bitfield]
#[derive(Clone, Copy)]
pub struct Pixel {
    pub blue: B8,
    pub green: B8,
    pub red: B8,
    #[skip]
    _unused0: B8,
}
impl Pixel {
    /// Expands an RGB565 camera sample to 8 bits per channel.
    pub fn from_rgb565(rgb: u16) -> Self {
        let red = ((rgb >> 11) & 0x1f) as u8;
        let green = ((rgb >> 5) & 0x3f) as u8;
        let blue = (rgb & 0x1f) as u8;
        Pixel::new()
            .with_red(red << 3)
            .with_green(green << 2)
            .with_blue(blue << 3)
    }

    pub fn from_word(word: u32) -> Self { Pixel::from_bytes(word.to_le_bytes()) }

    pub fn to_word(self) -> u32 { u32::from_le_bytes(self.into_bytes()) }
}

/// The shared pixel buffer used both as the camera capture destination and
/// the accelerator input source.
///
/// A frame is only considered captured once a fill completes successfully;
/// a failed fill leaves the buffer invalid until the next successful one.
#[derive(Debug)]
pub struct FrameBuffer {
    dims: FrameDims,
    words: Vec<u32>,
    valid: bool,
}
impl FrameBuffer {
    pub fn new(dims: FrameDims) -> Self {
        Self {
            dims,
            words: vec![0; dims.words()],
            valid: false,
        }
    }

    pub fn dims(&self) -> FrameDims { self.dims }

    pub fn len(&self) -> usize { self.words.len() }

    pub fn is_empty(&self) -> bool { self.words.is_empty() }

    /// True once a fill has completed successfully.
    pub fn is_valid(&self) -> bool { self.valid }

    pub fn words(&self) -> &[u32] { &self.words }

    /// Runs |fill| over the whole buffer. The frame is marked valid only if
    /// |fill| succeeds.
    pub fn fill_with<E, F>(&mut self, fill: F) -> Result<(), E>
    where
        F: FnOnce(&mut [u32]) -> Result<(), E>,
    {
        self.valid = false;
        fill(&mut self.words)?;
        self.valid = true;
        Ok(())
    }
}

/// A class probability rendered as a "whole.tenths" percentage.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Percentage {
    pub whole: i32,
    pub tenths: i32,
}
impl Percentage {
    /// Converts a Q1.15 probability with round-half-up:
    /// scaled = (1000 * p + 0x4000) >> 15, split into tens and ones.
    pub const fn from_q15(probability: i16) -> Self {
        let scaled = (1000 * probability as i32 + 0x4000) >> 15;
        Self {
            whole: scaled / 10,
            tenths: scaled % 10,
        }
    }
}
impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}%", self.whole, self.tenths)
    }
}

/// One golden-answer check: |expected.len()| words starting at |address|,
/// each compared after masking with |mask|.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GoldenRecord<'a> {
    pub address: usize,
    pub mask: u32,
    pub expected: &'a [u32],
}
impl GoldenRecord<'_> {
    pub fn len(&self) -> usize { self.expected.len() }

    pub fn is_empty(&self) -> bool { self.expected.is_empty() }
}

/// Fonts known to the display collaborator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Font {
    Arial12x12,
}

/// Configuration-time constants injected into the inference components.
#[derive(Clone, Copy, Debug)]
pub struct CnnConfig {
    pub frame: FrameDims,
    /// Class names in accelerator output order; its length is the class count.
    pub class_names: &'static [&'static str],
    /// Where the captured frame is drawn on the display.
    pub image_origin: (i32, i32),
    /// Where the winning class name is printed on the display.
    pub text_origin: (i32, i32),
    pub font: Font,
    pub camera_freq_hz: u32,
    /// Delay before touching peripherals so a debugger can attach.
    pub startup_delay_ms: u32,
    /// Reload kernels and bias on every cycle instead of only at bring-up.
    pub reload_weights_each_cycle: bool,
}
impl CnnConfig {
    /// The shipped 7-class shape classifier on a 128x128 camera.
    pub const MAX78000: CnnConfig = CnnConfig {
        frame: FrameDims::new(FRAME_WIDTH, FRAME_HEIGHT),
        class_names: &CLASS_NAMES,
        image_origin: (56, 140),
        text_origin: (0, 0),
        font: Font::Arial12x12,
        camera_freq_hz: 10 * 1000 * 1000,
        startup_delay_ms: 2000,
        reload_weights_each_cycle: false,
    };

    pub fn num_classes(&self) -> usize { self.class_names.len() }

    pub fn class_name(&self, index: usize) -> &'static str {
        self.class_names.get(index).copied().unwrap_or("?")
    }
}
impl Default for CnnConfig {
    fn default() -> Self { Self::MAX78000 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(Percentage::from_q15(0), Percentage { whole: 0, tenths: 0 });
        // 16 * 1000 + 0x4000 = 32384 < 32768
        assert_eq!(Percentage::from_q15(16), Percentage { whole: 0, tenths: 0 });
        assert_eq!(Percentage::from_q15(17), Percentage { whole: 0, tenths: 1 });
        assert_eq!(Percentage::from_q15(16384), Percentage { whole: 50, tenths: 0 });
        assert_eq!(Percentage::from_q15(4681), Percentage { whole: 14, tenths: 3 });
        assert_eq!(Percentage::from_q15(i16::MAX), Percentage { whole: 100, tenths: 0 });
    }

    #[test]
    fn percentage_negative_truncates_toward_zero() {
        assert_eq!(Percentage::from_q15(i16::MIN), Percentage { whole: -100, tenths: 0 });
        // (-17000 + 16384) >> 15 == -1
        assert_eq!(Percentage::from_q15(-17), Percentage { whole: 0, tenths: -1 });
    }

    #[test]
    fn percentage_matches_formula_exhaustively() {
        for p in i16::MIN..=i16::MAX {
            let scaled = (1000 * p as i32 + 16384) >> 15;
            let pct = Percentage::from_q15(p);
            assert_eq!(pct.whole * 10 + pct.tenths, scaled, "p = {}", p);
        }
    }

    #[test]
    fn percentage_display() {
        assert_eq!(format!("{}", Percentage::from_q15(4681)), "14.3%");
    }

    #[test]
    fn pixel_packs_0rgb() {
        let px = Pixel::new().with_red(0x12).with_green(0x34).with_blue(0x56);
        assert_eq!(px.to_word(), 0x0012_3456);
        let back = Pixel::from_word(0xff12_3456);
        assert_eq!((back.red(), back.green(), back.blue()), (0x12, 0x34, 0x56));
    }

    #[test]
    fn pixel_from_rgb565() {
        assert_eq!(Pixel::from_rgb565(0xffff).to_word(), 0x00f8_fcf8);
        assert_eq!(Pixel::from_rgb565(0xf800).to_word(), 0x00f8_0000);
        assert_eq!(Pixel::from_rgb565(0x07e0).to_word(), 0x0000_fc00);
        assert_eq!(Pixel::from_rgb565(0x001f).to_word(), 0x0000_00f8);
    }

    #[test]
    fn frame_buffer_valid_only_after_successful_fill() {
        let mut frame = FrameBuffer::new(FrameDims::new(4, 2));
        assert_eq!(frame.len(), 8);
        assert!(!frame.is_valid());

        assert_eq!(frame.fill_with(|_| Err::<(), _>("sensor")), Err("sensor"));
        assert!(!frame.is_valid());

        frame
            .fill_with(|words| {
                words.iter_mut().enumerate().for_each(|(i, w)| *w = i as u32);
                Ok::<(), ()>(())
            })
            .unwrap();
        assert!(frame.is_valid());
        assert_eq!(frame.words(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn default_config() {
        let config = CnnConfig::default();
        assert_eq!(config.frame.words(), FRAME_WORDS);
        assert_eq!(config.num_classes(), NUM_CLASSES);
        assert_eq!(config.class_name(2), "HEXAGON");
        assert_eq!(config.class_name(99), "?");
    }
}
