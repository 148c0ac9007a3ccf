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

// The inference cycle: capture a frame, stream it through the CNN, turn
// the class outputs into percentages and report the winner.

extern crate alloc;

mod pipeline;
mod softmax;
mod verifier;

pub use pipeline::FrameBufferPipeline;
pub use softmax::{ExpSoftmax, Pow2Softmax, QuantizedNormalizer};
pub use verifier::{verify, GoldenTable, Records};

use alloc::vec;
use alloc::vec::Vec;
use arrayvec::ArrayString;
use cnn_core::{
    AcceleratorControl, Completion, CompletionToken, IngestPort, MemoryPort, ResultPort,
    StreamDriver,
};
use cnn_interface::{Camera, ClassReport, CnnError, CycleReport, Display};
use cnn_shared::{CnnConfig, Percentage};
use log::{error, info, trace};

/// Capacity of the display text buffer.
pub const DISPLAY_TEXT_LEN: usize = 50;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CycleState {
    Idle,
    Arming,
    Streaming,
    AwaitingCompletion,
    PostProcessing,
    Stopped,
}

/// Statistics on cycles and non-happy-path events.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Statistics {
    pub cycles: u32,
    pub last_latency_us: u32,
    pub max_latency_us: u32,
    pub capture_failures: u32,
    pub verification_failures: u32,
}

/// Index of the class with the largest whole percentage. Ties go to the
/// lowest index and tenths are not compared; all-zero picks class 0.
pub fn select_winner(percentages: &[Percentage]) -> usize {
    let mut max = 0;
    let mut winner = 0;
    for (i, pct) in percentages.iter().enumerate() {
        if pct.whole > max {
            max = pct.whole;
            winner = i;
        }
    }
    winner
}

// "Class: <name>", cut short if the name does not fit.
fn class_text(name: &str) -> ArrayString<DISPLAY_TEXT_LEN> {
    let mut text = ArrayString::new();
    let _ = text.try_push_str("Class: ");
    for c in name.chars() {
        if text.try_push(c).is_err() {
            break;
        }
    }
    text
}

/// Sequences the accelerator through one inference per call to |run_cycle|.
///
/// |H| is the CNN block: its control operations plus the ingest FIFO and
/// result port. Completion is signaled through |completion| by whoever
/// services the accelerator interrupt.
pub struct InferenceCycleController<'a, H, N> {
    driver: StreamDriver<H>,
    normalizer: N,
    completion: &'a Completion,
    config: CnnConfig,
    state: CycleState,
    // Kernels and bias are in accelerator memory.
    weights_loaded: bool,
    raw: Vec<i32>,
    probabilities: Vec<i16>,
    statistics: Statistics,
}

impl<'a, H, N> InferenceCycleController<'a, H, N>
where
    H: AcceleratorControl + IngestPort + ResultPort,
    N: QuantizedNormalizer,
{
    pub fn new(hardware: H, normalizer: N, completion: &'a Completion, config: CnnConfig) -> Self {
        let classes = config.num_classes();
        Self {
            driver: StreamDriver::new(hardware),
            normalizer,
            completion,
            config,
            state: CycleState::Idle,
            weights_loaded: false,
            raw: vec![0; classes],
            probabilities: vec![0; classes],
            statistics: Statistics::default(),
        }
    }

    pub fn state(&self) -> CycleState { self.state }

    pub fn statistics(&self) -> &Statistics { &self.statistics }

    pub fn config(&self) -> &CnnConfig { &self.config }

    pub fn hardware(&self) -> &H { self.driver.port() }

    pub fn hardware_mut(&mut self) -> &mut H { self.driver.port_mut() }

    fn set_state(&mut self, state: CycleState) {
        trace!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// One-time accelerator bring-up: clock, state machine reset, kernels,
    /// bias and configuration. The clock is gated again before returning;
    /// every cycle re-enables it.
    pub fn bring_up(&mut self) {
        let hw = self.driver.port_mut();
        hw.enable_clock();
        hw.init();
        hw.load_weights();
        hw.load_bias();
        hw.configure();
        hw.disable_clock();
        self.weights_loaded = true;
        info!(target: "CNN", "ready");
    }

    // Idle -> Arming. Returns the token for this run's completion.
    fn arm(&mut self) -> CompletionToken<'a> {
        self.set_state(CycleState::Arming);
        let reload = !self.weights_loaded || self.config.reload_weights_each_cycle;
        let hw = self.driver.port_mut();
        hw.enable_clock();
        hw.init();
        if reload {
            hw.load_weights();
            hw.load_bias();
        }
        hw.configure();
        self.weights_loaded = true;
        let completion: &'a Completion = self.completion;
        completion.arm()
    }

    // Arming -> Streaming -> AwaitingCompletion. Returns the elapsed time
    // reported by the completion signal.
    fn stream<F: FnMut()>(&mut self, input: &[u32], token: CompletionToken<'a>, idle: F) -> u32 {
        self.set_state(CycleState::Streaming);
        self.driver.port_mut().start();
        self.driver.load_input(input);

        self.set_state(CycleState::AwaitingCompletion);
        let latency_us = token.wait(idle);
        self.statistics.last_latency_us = latency_us;
        self.statistics.max_latency_us = self.statistics.max_latency_us.max(latency_us);
        latency_us
    }

    // -> Stopped -> Idle.
    fn shut_down(&mut self) {
        self.set_state(CycleState::Stopped);
        let hw = self.driver.port_mut();
        hw.stop();
        hw.disable_clock();
        self.set_state(CycleState::Idle);
    }

    /// Runs one complete cycle: capture, infer, post-process and report.
    /// Blocks in |idle| (typically wait-for-interrupt) until the accelerator
    /// signals completion; there is no timeout.
    ///
    /// Capture failures are returned before the accelerator is touched.
    pub fn run_cycle<C, D, F>(
        &mut self,
        pipeline: &mut FrameBufferPipeline<C>,
        display: &mut D,
        idle: F,
    ) -> Result<CycleReport, CnnError>
    where
        C: Camera,
        D: Display,
        F: FnMut(),
    {
        let frame = match pipeline.capture() {
            Ok(frame) => frame,
            Err(err) => {
                self.statistics.capture_failures += 1;
                return Err(err);
            }
        };
        if frame.dims() != self.config.frame {
            error!(
                "Frame is {}, accelerator expects {}",
                frame.dims(),
                self.config.frame
            );
            return Err(CnnError::FrameSizeMismatch);
        }
        let (x, y) = self.config.image_origin;
        display.render(frame, x, y);

        let token = self.arm();
        let latency_us = self.stream(frame.words(), token, idle);

        self.set_state(CycleState::PostProcessing);
        self.driver.unload_output(&mut self.raw);
        self.normalizer.normalize(&self.raw, &mut self.probabilities);
        let classes: Vec<ClassReport> = self
            .raw
            .iter()
            .zip(self.probabilities.iter())
            .map(|(&raw, &probability)| ClassReport::new(raw, probability))
            .collect();
        let percentages: Vec<Percentage> = classes.iter().map(|c| c.percentage()).collect();
        let winner = select_winner(&percentages);

        self.shut_down();

        let report = CycleReport {
            cycle: self.statistics.cycles,
            latency_us,
            winner,
            classes,
        };
        self.statistics.cycles = self.statistics.cycles.wrapping_add(1);
        self.report(&report, display);
        Ok(report)
    }

    fn report<D: Display>(&self, report: &CycleReport, display: &mut D) {
        #[cfg(feature = "inference_timer")]
        info!(target: "CNN", "Approximate inference time: {} us", report.latency_us);

        info!(target: "CNN", "Classification results:");
        for (i, class) in report.classes.iter().enumerate() {
            info!(
                target: "CNN",
                "[{:7}] -> Class {}: {}.{}%",
                class.raw,
                i,
                class.whole,
                class.tenths
            );
        }
        let name = self.config.class_name(report.winner);
        info!(target: "CNN", "Class: {}", name);

        let text = class_text(name);
        let (x, y) = self.config.text_origin;
        display.print_text(&text, x, y, self.config.font);
    }

    /// Runs |sample| through the accelerator and checks its memory against
    /// |table|. Returns the inference latency on success.
    pub fn known_answer_test<M, F>(
        &mut self,
        sample: &[u32],
        table: &GoldenTable,
        memory: &M,
        idle: F,
    ) -> Result<u32, CnnError>
    where
        M: MemoryPort + ?Sized,
        F: FnMut(),
    {
        let token = self.arm();
        let latency_us = self.stream(sample, token, idle);
        self.set_state(CycleState::PostProcessing);
        let result = verify(table, memory);
        self.shut_down();

        match result {
            Ok(()) => {
                info!(target: "CNN", "Known-answer test passed ({} us)", latency_us);
                Ok(latency_us)
            }
            Err(err) => {
                self.statistics.verification_failures += 1;
                error!("{}", err);
                Err(err.into())
            }
        }
    }

    pub fn debug_state(&self) {
        info!(target: "CNN", "state {:?} weights loaded {}", self.state, self.weights_loaded);
        info!(target: "CNN", "{:?}", self.statistics);
        self.driver.debug_state();
    }
}
