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

//! cnn-core is the CNN accelerator driver. It is responsible for streaming
//! input into the accelerator's ingest FIFO, draining its result port and
//! providing the capabilities the inference controller needs to sequence a
//! run.
//!
//! Hardware protocol violations (writing while the FIFO is full, draining
//! before completion) are not detected here; they are preconditions of the
//! callers.

mod cnn_top;
mod completion;
pub mod mmio;

pub use completion::{Completion, CompletionToken};

use log::{info, trace};

bitflags::bitflags! {
    /// Ingest handshake state exposed by the accelerator. Run completion is
    /// not polled; it arrives through a [`Completion`].
    pub struct Handshake: u32 {
        /// The ingest FIFO cannot take another word.
        const FIFO_FULL = 0b0000_0001;
    }
}

/// Read access to the accelerator's handshake bits.
pub trait HardwareStatusPort {
    fn status(&mut self) -> Handshake;

    /// Spins until |predicate| holds for the current status. No timeout.
    fn wait_until<F: Fn(Handshake) -> bool>(&mut self, predicate: F) {
        while !predicate(self.status()) {
            core::hint::spin_loop();
        }
    }
}

/// The accelerator's input FIFO.
pub trait IngestPort: HardwareStatusPort {
    /// Pushes one word. Must only be called while FIFO_FULL is clear.
    fn write_fifo(&mut self, word: u32);
}

/// The accelerator's output memory, read in hardware-defined order.
pub trait ResultPort {
    fn read_result(&mut self, index: usize) -> u32;
}

/// One-shot setup and run control of the accelerator. The operations are
/// opaque to the core; they are invoked at fixed points of the cycle.
pub trait AcceleratorControl {
    fn enable_clock(&mut self);
    fn disable_clock(&mut self);
    /// Brings the accelerator state machine into a consistent state.
    fn init(&mut self);
    fn load_weights(&mut self);
    fn load_bias(&mut self);
    fn configure(&mut self);
    fn start(&mut self);
    fn stop(&mut self);
}

/// Word reads from memory at byte addresses, used by self test.
pub trait MemoryPort {
    fn read_word(&self, address: usize) -> u32;
}

/// Streams frames into the ingest FIFO and drains results.
pub struct StreamDriver<P> {
    port: P,
    frames_streamed: u32,
    words_written: u64,
}

impl<P: IngestPort + ResultPort> StreamDriver<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            frames_streamed: 0,
            words_written: 0,
        }
    }

    pub fn port(&self) -> &P { &self.port }

    pub fn port_mut(&mut self) -> &mut P { &mut self.port }

    /// Writes every word of |frame| into the ingest FIFO in order, waiting
    /// for FIFO_FULL to clear before each write. Blocks until the last word
    /// has been accepted.
    pub fn load_input(&mut self, frame: &[u32]) {
        trace!("LOAD {} words", frame.len());
        for &word in frame {
            self.port
                .wait_until(|status| !status.contains(Handshake::FIFO_FULL));
            self.port.write_fifo(word);
        }
        self.frames_streamed = self.frames_streamed.wrapping_add(1);
        self.words_written += frame.len() as u64;
    }

    /// Drains |dest.len()| words from the result port. The accelerator must
    /// already have signaled completion; otherwise the values are garbage.
    pub fn unload_output(&mut self, dest: &mut [i32]) {
        trace!("UNLOAD {} words", dest.len());
        for (index, value) in dest.iter_mut().enumerate() {
            *value = self.port.read_result(index) as i32;
        }
    }

    pub fn frames_streamed(&self) -> u32 { self.frames_streamed }

    pub fn words_written(&self) -> u64 { self.words_written }

    pub fn debug_state(&self) {
        info!(
            target: "CNN",
            "{} frames streamed, {} words written",
            self.frames_streamed,
            self.words_written
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // FIFO that reports full for |stall| status reads after every write.
    struct ToggleFifo {
        stall: u32,
        full_for: u32,
        polls: u32,
        written: Vec<u32>,
        overruns: u32,
        results: Vec<u32>,
    }
    impl ToggleFifo {
        fn new(stall: u32) -> Self {
            Self {
                stall,
                full_for: stall,
                polls: 0,
                written: Vec::new(),
                overruns: 0,
                results: Vec::new(),
            }
        }
    }
    impl HardwareStatusPort for ToggleFifo {
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
    impl IngestPort for ToggleFifo {
        fn write_fifo(&mut self, word: u32) {
            if self.full_for > 0 {
                self.overruns += 1;
            }
            self.written.push(word);
            self.full_for = self.stall;
        }
    }
    impl ResultPort for ToggleFifo {
        fn read_result(&mut self, index: usize) -> u32 { self.results[index] }
    }

    /// Every word is written once, in order, and only after the full bit
    /// has cleared.
    #[test]
    fn load_input_waits_for_not_full() {
        let frame: Vec<u32> = (0..64).map(|i| 0x0010_0000 + i).collect();
        let mut driver = StreamDriver::new(ToggleFifo::new(3));
        driver.load_input(&frame);

        let fifo = driver.port();
        assert_eq!(fifo.written, frame);
        assert_eq!(fifo.overruns, 0);
        // Three full polls plus one clear poll before each write.
        assert_eq!(fifo.polls, 4 * frame.len() as u32);
        assert_eq!(driver.frames_streamed(), 1);
        assert_eq!(driver.words_written(), 64);
    }

    /// A FIFO that is never full is polled exactly once per word.
    #[test]
    fn load_input_never_full() {
        let mut driver = StreamDriver::new(ToggleFifo::new(0));
        driver.load_input(&[7, 8, 9]);
        assert_eq!(driver.port().polls, 3);
        assert_eq!(driver.port().written, vec![7, 8, 9]);
    }

    #[test]
    fn load_input_empty_frame() {
        let mut driver = StreamDriver::new(ToggleFifo::new(2));
        driver.load_input(&[]);
        assert_eq!(driver.port().polls, 0);
        assert!(driver.port().written.is_empty());
    }

    /// Result words are reinterpreted as signed Q17.14 values.
    #[test]
    fn unload_output_drains_count_words() {
        let mut fifo = ToggleFifo::new(0);
        fifo.results = vec![100, (-50i32) as u32, 900, 0xdead_beef];
        let mut driver = StreamDriver::new(fifo);

        let mut raw = [0i32; 3];
        driver.unload_output(&mut raw);
        assert_eq!(raw, [100, -50, 900]);
    }
}
