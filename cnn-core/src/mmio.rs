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

//! Memory-mapped backends for the accelerator ports.

use crate::cnn_top;
use crate::{Handshake, HardwareStatusPort, IngestPort, MemoryPort};
use log::trace;

/// The CNN block as seen through its FIFO and control registers. Frames
/// are streamed through FIFO 0 only.
pub struct Max78000Cnn;

impl Max78000Cnn {
    /// # Safety
    ///
    /// The CNN register block must be mapped and FIFO 0 enabled by the
    /// network configuration.
    pub unsafe fn new() -> Self { Max78000Cnn }

    /// Acknowledges the completion interrupt and halts all quadrants. Called
    /// from the interrupt handler.
    pub fn clear_irq() {
        trace!("CLEAR IRQ");
        for quadrant in 0..cnn_top::CNNX16_QUADRANT_COUNT {
            cnn_top::set_ctrl(quadrant, cnn_top::get_ctrl(quadrant).acknowledged());
        }
    }
}

fn ingest_handshake(stat: cnn_top::FifoStat) -> Handshake {
    if stat.full0() {
        Handshake::FIFO_FULL
    } else {
        Handshake::empty()
    }
}

impl HardwareStatusPort for Max78000Cnn {
    // One FIFO_STAT read per poll.
    fn status(&mut self) -> Handshake { ingest_handshake(cnn_top::get_fifo_stat()) }
}

impl IngestPort for Max78000Cnn {
    fn write_fifo(&mut self, word: u32) { cnn_top::set_fifo_wr(0, word); }
}

/// Direct physical memory reads.
pub struct MmioMemory;

impl MmioMemory {
    /// # Safety
    ///
    /// Every address later passed to |read_word| must be mapped, readable
    /// and word-aligned.
    pub unsafe fn new() -> Self { MmioMemory }
}

impl MemoryPort for MmioMemory {
    fn read_word(&self, address: usize) -> u32 {
        unsafe { (address as *const u32).read_volatile() }
    }
}
