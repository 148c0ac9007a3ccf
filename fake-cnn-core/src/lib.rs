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

// fake-cnn-core is a software stand-in for the CNN block and its
// peripherals. It records what it is asked to do so tests can check the
// order of operations.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use cnn_core::{
    AcceleratorControl, Completion, Handshake, HardwareStatusPort, IngestPort, MemoryPort,
    ResultPort,
};
use cnn_interface::{Camera, CnnError, Display};
use cnn_shared::{Font, FrameBuffer, FrameDims};
use core::cell::Cell;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    ClockEnabled,
    ClockDisabled,
    Init,
    LoadWeights,
    LoadBias,
    Configure,
    Start,
    /// First FIFO write after a start.
    Streaming,
    /// First result read after a start.
    Unload,
    Stop,
}

pub struct FakeCnn<'a> {
    stall: u32,
    full_for: u32,
    running: bool,
    clock: bool,
    streamed: usize,
    unloaded: bool,
    // Completion fires once this many words were written since start.
    complete_after: usize,
    completion: Option<(&'a Completion, u32)>,
    pub events: Vec<Event>,
    pub written: Vec<u32>,
    pub results: Vec<u32>,
    pub polls: u32,
    pub overruns: u32,
    pub writes_while_stopped: u32,
}

impl<'a> FakeCnn<'a> {
    /// A CNN whose FIFO reports full for |stall| polls after every write.
    pub fn new(stall: u32) -> Self {
        Self {
            stall,
            full_for: 0,
            running: false,
            clock: false,
            streamed: 0,
            unloaded: false,
            complete_after: 0,
            completion: None,
            events: Vec::new(),
            written: Vec::new(),
            results: Vec::new(),
            polls: 0,
            overruns: 0,
            writes_while_stopped: 0,
        }
    }

    /// Signals |completion| with |latency_us| once |frame_words| words have
    /// been streamed after a start, as the interrupt handler would.
    pub fn with_completion(
        mut self,
        completion: &'a Completion,
        frame_words: usize,
        latency_us: u32,
    ) -> Self {
        self.completion = Some((completion, latency_us));
        self.complete_after = frame_words;
        self
    }

    /// Loads raw Q17.14 outputs for the next unload.
    pub fn set_outputs(&mut self, raw: &[i32]) {
        self.results = raw.iter().map(|&v| v as u32).collect();
    }

    pub fn clock_enabled(&self) -> bool { self.clock }

    pub fn count(&self, event: Event) -> usize { self.events.iter().filter(|&&e| e == event).count() }

    pub fn clear_events(&mut self) { self.events.clear(); }

    fn maybe_complete(&mut self) {
        if self.streamed == self.complete_after {
            if let Some((completion, latency_us)) = self.completion {
                completion.signal(latency_us);
            }
        }
    }
}

impl AcceleratorControl for FakeCnn<'_> {
    fn enable_clock(&mut self) {
        self.events.push(Event::ClockEnabled);
        self.clock = true;
    }
    fn disable_clock(&mut self) {
        self.events.push(Event::ClockDisabled);
        self.clock = false;
    }
    fn init(&mut self) { self.events.push(Event::Init); }
    fn load_weights(&mut self) { self.events.push(Event::LoadWeights); }
    fn load_bias(&mut self) { self.events.push(Event::LoadBias); }
    fn configure(&mut self) { self.events.push(Event::Configure); }
    fn start(&mut self) {
        self.events.push(Event::Start);
        self.running = true;
        self.streamed = 0;
        self.unloaded = false;
        self.maybe_complete();
    }
    fn stop(&mut self) {
        self.events.push(Event::Stop);
        self.running = false;
    }
}

impl HardwareStatusPort for FakeCnn<'_> {
    fn status(&mut self) -> Handshake {
        self.polls += 1;
        if self.full_for > 0 {
            self.full_for -= 1;
            Handshake::FIFO_FULL
        } else {
            Handshake::empty()
        }
    }
}

impl IngestPort for FakeCnn<'_> {
    fn write_fifo(&mut self, word: u32) {
        if self.full_for > 0 {
            self.overruns += 1;
        }
        if !self.running {
            self.writes_while_stopped += 1;
        } else if self.streamed == 0 {
            self.events.push(Event::Streaming);
        }
        self.written.push(word);
        self.full_for = self.stall;
        if self.running {
            self.streamed += 1;
            self.maybe_complete();
        }
    }
}

impl ResultPort for FakeCnn<'_> {
    fn read_result(&mut self, index: usize) -> u32 {
        if self.running && !self.unloaded {
            self.events.push(Event::Unload);
            self.unloaded = true;
        }
        self.results.get(index).copied().unwrap_or(0)
    }
}

/// Sparse word-addressable memory; unset words read as zero.
#[derive(Default)]
pub struct FakeMemory {
    words: BTreeMap<usize, u32>,
    reads: Cell<usize>,
}

impl FakeMemory {
    pub fn new() -> Self { Self::default() }

    /// Stores |words| at consecutive word addresses starting at |base|.
    pub fn with_words(mut self, base: usize, words: &[u32]) -> Self {
        self.write(base, words);
        self
    }

    pub fn write(&mut self, base: usize, words: &[u32]) {
        for (i, &word) in words.iter().enumerate() {
            self.words.insert(base + 4 * i, word);
        }
    }

    pub fn reads(&self) -> usize { self.reads.get() }
}

impl MemoryPort for FakeMemory {
    fn read_word(&self, address: usize) -> u32 {
        self.reads.set(self.reads.get() + 1);
        self.words.get(&address).copied().unwrap_or(0)
    }
}

/// Camera producing frames where word i is |seed + i| plus the capture
/// number in the top byte.
pub struct FakeCamera {
    seed: u32,
    pub dims: Option<FrameDims>,
    pub captures: u32,
    pub fail_setup: bool,
    /// Number of captures that succeed before every later one fails.
    pub fail_after: Option<u32>,
}

impl FakeCamera {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            dims: None,
            captures: 0,
            fail_setup: false,
            fail_after: None,
        }
    }

    /// The word a successful capture number |capture| (0-based) stores at
    /// |index|.
    pub fn expected_word(&self, capture: u32, index: usize) -> u32 {
        (self.seed.wrapping_add(index as u32) & 0x00ff_ffff) | ((capture & 0xff) << 24)
    }
}

impl Camera for FakeCamera {
    fn setup(&mut self, dims: FrameDims) -> Result<(), CnnError> {
        if self.fail_setup {
            return Err(CnnError::CameraSetupFailed);
        }
        self.dims = Some(dims);
        Ok(())
    }

    fn capture_into(&mut self, words: &mut [u32]) -> Result<(), CnnError> {
        if let Some(limit) = self.fail_after {
            if self.captures >= limit {
                // Partial garbage so a consumer that ignores the error notices.
                if let Some(first) = words.first_mut() {
                    *first = 0xdead_beef;
                }
                return Err(CnnError::CaptureFailed);
            }
        }
        let capture = self.captures;
        for (index, word) in words.iter_mut().enumerate() {
            *word = self.expected_word(capture, index);
        }
        self.captures += 1;
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TextDraw {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub font: Font,
}

/// Records what would have been drawn.
#[derive(Default)]
pub struct FakeDisplay {
    pub fail_init: bool,
    pub initialized: bool,
    /// (first word, x, y) of each rendered frame.
    pub renders: Vec<(u32, i32, i32)>,
    pub texts: Vec<TextDraw>,
}

impl FakeDisplay {
    pub fn new() -> Self { Self::default() }

    pub fn last_text(&self) -> Option<&str> { self.texts.last().map(|t| t.text.as_str()) }
}

impl Display for FakeDisplay {
    fn init(&mut self) -> Result<(), CnnError> {
        if self.fail_init {
            return Err(CnnError::DisplaySetupFailed);
        }
        self.initialized = true;
        Ok(())
    }

    fn render(&mut self, frame: &FrameBuffer, x: i32, y: i32) {
        let first = frame.words().first().copied().unwrap_or(0);
        self.renders.push((first, x, y));
    }

    fn print_text(&mut self, text: &str, x: i32, y: i32, font: Font) {
        self.texts.push(TextDraw {
            text: String::from(text),
            x,
            y,
            font,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_stalls_after_each_write() {
        let mut cnn = FakeCnn::new(2);
        cnn.start();
        cnn.write_fifo(1);
        assert!(cnn.status().contains(Handshake::FIFO_FULL));
        assert!(cnn.status().contains(Handshake::FIFO_FULL));
        assert!(!cnn.status().contains(Handshake::FIFO_FULL));
        cnn.write_fifo(2);
        cnn.write_fifo(3);
        assert_eq!(cnn.overruns, 1);
        assert_eq!(cnn.written, vec![1, 2, 3]);
    }

    #[test]
    fn completion_fires_after_frame() {
        let done = Completion::new();
        let mut cnn = FakeCnn::new(0).with_completion(&done, 3, 250);
        let token = done.arm();
        cnn.start();
        cnn.write_fifo(0);
        cnn.write_fifo(0);
        assert!(!done.is_signaled());
        cnn.write_fifo(0);
        assert!(done.is_signaled());
        assert_eq!(token.wait(|| panic!("not signaled")), 250);
        assert_eq!(cnn.events, vec![Event::Start, Event::Streaming]);
    }

    #[test]
    fn writes_before_start_are_flagged() {
        let mut cnn = FakeCnn::new(0);
        cnn.write_fifo(9);
        assert_eq!(cnn.writes_while_stopped, 1);
        assert!(cnn.events.is_empty());
    }

    #[test]
    fn results_are_signed_words() {
        let mut cnn = FakeCnn::new(0);
        cnn.set_outputs(&[-1, 5]);
        assert_eq!(cnn.read_result(0), 0xffff_ffff);
        assert_eq!(cnn.read_result(1), 5);
        assert_eq!(cnn.read_result(2), 0);
    }

    #[test]
    fn memory_is_word_strided() {
        let mem = FakeMemory::new().with_words(0x100, &[0xa, 0xb]);
        assert_eq!(mem.read_word(0x100), 0xa);
        assert_eq!(mem.read_word(0x104), 0xb);
        assert_eq!(mem.read_word(0x108), 0);
        assert_eq!(mem.reads(), 3);
    }

    #[test]
    fn camera_fails_after_limit() {
        let mut camera = FakeCamera::new(0x10);
        camera.fail_after = Some(1);
        let mut words = [0u32; 4];
        assert_eq!(camera.capture_into(&mut words), Ok(()));
        assert_eq!(words, [0x10, 0x11, 0x12, 0x13]);
        assert_eq!(camera.capture_into(&mut words), Err(CnnError::CaptureFailed));
        assert_eq!(camera.captures, 1);
    }

    #[test]
    fn display_records_text() {
        let mut display = FakeDisplay::new();
        display.print_text("Class: CAN", 0, 0, Font::Arial12x12);
        assert_eq!(display.last_text(), Some("Class: CAN"));
    }
}
