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

// Freestanding only on the device; a host build links std for the panic
// runtime and allocator.
#![cfg_attr(all(feature = "CONFIG_PLAT_MAX78000", not(test)), no_std)]

// CNN inference application: peripheral bring-up, the known-answer self
// test and the steady-state capture/classify loop.

extern crate alloc;

pub mod heap;
pub mod logger;
// SDK symbols only resolve in the firmware link.
#[cfg(all(feature = "CONFIG_PLAT_MAX78000", not(test)))]
pub mod sdk;

use cnn_coordinator::{FrameBufferPipeline, GoldenTable, InferenceCycleController};
use cnn_coordinator::DISPLAY_TEXT_LEN;
use cnn_core::{AcceleratorControl, Completion, IngestPort, MemoryPort, ResultPort};
use cnn_interface::{encode_report, Camera, CnnError, CycleReport, Display, MAX_REPORT_SIZE};
use cnn_shared::CnnConfig;
use log::{error, info};
use spin::Mutex;
use static_assertions::const_assert;

cfg_if::cfg_if! {
    if #[cfg(feature = "vendor_softmax")] {
        pub type Normalizer = cnn_coordinator::Pow2Softmax;
    } else {
        pub type Normalizer = cnn_coordinator::ExpSoftmax;
    }
}

// The longest shipped class name must fit on the display.
const_assert!(DISPLAY_TEXT_LEN >= "Class: TRAPEZOID".len());

/// Completion latch signaled by the CNN interrupt handler.
pub static CNN_DONE: Completion = Completion::new();

// Scratch space for encoded cycle reports.
static REPORT_BUFFER: Mutex<[u8; MAX_REPORT_SIZE]> = Mutex::new([0; MAX_REPORT_SIZE]);

// Known-answer inputs: the sample frame and its golden table.
type KnownAnswer<'a> = (&'a [u32], GoldenTable<'a>);

pub struct CnnApp<'a, H, C, D, M> {
    controller: InferenceCycleController<'a, H, Normalizer>,
    pipeline: FrameBufferPipeline<C>,
    display: D,
    memory: M,
    known_answer: Option<KnownAnswer<'a>>,
    report_sink: Option<fn(&[u8])>,
    // Called while waiting for the accelerator, e.g. wait-for-interrupt.
    idle: fn(),
}

impl<'a, H, C, D, M> CnnApp<'a, H, C, D, M>
where
    H: AcceleratorControl + IngestPort + ResultPort,
    C: Camera,
    D: Display,
    M: MemoryPort,
{
    pub fn new(
        hardware: H,
        camera: C,
        display: D,
        memory: M,
        completion: &'a Completion,
        config: CnnConfig,
        idle: fn(),
    ) -> Self {
        Self {
            controller: InferenceCycleController::new(
                hardware,
                Normalizer::default(),
                completion,
                config,
            ),
            pipeline: FrameBufferPipeline::new(camera, config.frame),
            display,
            memory,
            known_answer: None,
            report_sink: None,
            idle,
        }
    }

    /// Enables the self test with |sample| as input and |golden| as the
    /// expected accelerator memory contents.
    pub fn with_known_answer(mut self, sample: &'a [u32], golden: &'a [u32]) -> Self {
        self.known_answer = Some((sample, GoldenTable::new(golden)));
        self
    }

    /// Every cycle report is postcard-encoded and passed to |sink|.
    pub fn with_report_sink(mut self, sink: fn(&[u8])) -> Self {
        self.report_sink = Some(sink);
        self
    }

    pub fn controller(&self) -> &InferenceCycleController<'a, H, Normalizer> { &self.controller }

    pub fn display(&self) -> &D { &self.display }

    /// Brings up the display, the camera and the accelerator. Any failure
    /// here is fatal.
    pub fn setup(&mut self) -> Result<(), CnnError> {
        self.display.init().map_err(|err| {
            error!("Display init failed: {:?}", err);
            CnnError::DisplaySetupFailed
        })?;

        info!(target: "CNN", "Init Camera.");
        self.pipeline.setup()?;

        info!(target: "CNN", "*** CNN Inference Test ***");
        self.controller.bring_up();
        Ok(())
    }

    /// Runs the known-answer test if one was supplied. Returns false only
    /// when the accelerator produced the wrong answer.
    pub fn self_test(&mut self) -> bool {
        let (sample, table) = match self.known_answer {
            Some(known_answer) => known_answer,
            None => {
                info!(target: "CNN", "No known-answer data, skipping self test");
                return true;
            }
        };
        self.controller
            .known_answer_test(sample, &table, &self.memory, self.idle)
            .is_ok()
    }

    /// One capture/classify cycle.
    pub fn cycle(&mut self) -> Result<CycleReport, CnnError> {
        let report = self
            .controller
            .run_cycle(&mut self.pipeline, &mut self.display, self.idle)?;
        if let Some(sink) = self.report_sink {
            let mut buffer = REPORT_BUFFER.lock();
            let len = encode_report(&report, &mut buffer[..])?;
            sink(&buffer[..len]);
        }
        Ok(report)
    }

    /// Runs |cycles| cycles, or forever when None. Returns the first error.
    pub fn run(&mut self, cycles: Option<u32>) -> Result<(), CnnError> {
        let mut count = 0;
        while cycles.map_or(true, |limit| count < limit) {
            if let Err(err) = self.cycle() {
                error!("Inference loop stopped: {:?}", err);
                self.debug_state();
                return Err(err);
            }
            count += 1;
        }
        Ok(())
    }

    pub fn debug_state(&self) { self.controller.debug_state(); }
}
