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

//! Error taxonomy, peripheral collaborator contracts and the per-cycle
//! report shared by the CNN inference components.

extern crate alloc;

use alloc::vec::Vec;
use cnn_shared::{Font, FrameDims, FrameBuffer, Percentage};
use core::fmt;
use num_enum::{FromPrimitive, IntoPrimitive};
use serde::{Deserialize, Serialize};

/// Upper bound on an encoded CycleReport for the shipped class count.
pub const MAX_REPORT_SIZE: usize = 256;

/// Errors that can occur while bringing up or running the inference loop.
#[repr(usize)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, FromPrimitive, IntoPrimitive)]
pub enum CnnError {
    Success = 0,
    // Self test.
    VerificationMismatch,
    MalformedGoldenTable,
    // Peripheral setup; fatal.
    DmaSetupFailed,
    CameraSetupFailed,
    DisplaySetupFailed,
    // Steady-state loop; fatal.
    CaptureFailed,
    FrameSizeMismatch,
    // Report encoding.
    SerializeError,
    DeserializeError,
    #[default]
    UnknownError,
}
impl CnnError {
    /// True for the errors returned when a collaborator fails to come up.
    pub fn is_peripheral_setup_failure(&self) -> bool {
        matches!(
            self,
            CnnError::DmaSetupFailed | CnnError::CameraSetupFailed | CnnError::DisplaySetupFailed
        )
    }
}
impl From<CnnError> for Result<(), CnnError> {
    fn from(err: CnnError) -> Result<(), CnnError> {
        if err == CnnError::Success {
            Ok(())
        } else {
            Err(err)
        }
    }
}

/// Diagnostic context for the first golden word that did not match.
/// |expected| and |actual| are both masked.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MismatchError {
    /// 1-based index of the failing word within its record.
    pub index: usize,
    /// Number of words in the failing record.
    pub length: usize,
    /// Byte address of the failing word.
    pub address: usize,
    pub expected: u32,
    pub actual: u32,
}
impl fmt::Display for MismatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Data mismatch ({}/{}) at address {:#010x}: Expected {:#010x}, read {:#010x}.",
            self.index, self.length, self.address, self.expected, self.actual
        )
    }
}

/// Outcome of a failed golden-table verification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerifyError {
    Mismatch(MismatchError),
    /// The table ended (or a record overran it) before the sentinel; |offset|
    /// is the word offset of the record that could not be parsed.
    Truncated { offset: usize },
}
impl From<MismatchError> for VerifyError {
    fn from(err: MismatchError) -> VerifyError { VerifyError::Mismatch(err) }
}
impl From<VerifyError> for CnnError {
    fn from(err: VerifyError) -> CnnError {
        match err {
            VerifyError::Mismatch(_) => CnnError::VerificationMismatch,
            VerifyError::Truncated { .. } => CnnError::MalformedGoldenTable,
        }
    }
}
impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VerifyError::Mismatch(mismatch) => fmt::Display::fmt(mismatch, f),
            VerifyError::Truncated { offset } => {
                write!(f, "Golden table truncated at word {}", offset)
            }
        }
    }
}

/// Image sensor that fills the shared frame buffer.
pub trait Camera {
    /// Configures the sensor for frames of |dims|.
    fn setup(&mut self, dims: FrameDims) -> Result<(), CnnError>;
    /// Blocks until |words| holds a complete frame, or fails without one.
    fn capture_into(&mut self, words: &mut [u32]) -> Result<(), CnnError>;
}

/// Output-only display; nothing it returns is consumed by the core.
pub trait Display {
    fn init(&mut self) -> Result<(), CnnError>;
    fn render(&mut self, frame: &FrameBuffer, x: i32, y: i32);
    fn print_text(&mut self, text: &str, x: i32, y: i32, font: Font);
}

/// Per-class result from one cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    /// Raw Q17.14 accumulator output.
    pub raw: i32,
    /// Normalized Q1.15 probability.
    pub probability: i16,
    pub whole: i32,
    pub tenths: i32,
}
impl ClassReport {
    pub fn new(raw: i32, probability: i16) -> Self {
        let pct = Percentage::from_q15(probability);
        Self {
            raw,
            probability,
            whole: pct.whole,
            tenths: pct.tenths,
        }
    }

    pub fn percentage(&self) -> Percentage {
        Percentage {
            whole: self.whole,
            tenths: self.tenths,
        }
    }
}

/// Everything observable about one completed inference cycle.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u32,
    /// Elapsed time reported by the completion signal, in microseconds.
    pub latency_us: u32,
    pub winner: usize,
    pub classes: Vec<ClassReport>,
}

/// Encodes |report| into |buffer|, returning the number of bytes written.
pub fn encode_report(report: &CycleReport, buffer: &mut [u8]) -> Result<usize, CnnError> {
    let slice = postcard::to_slice(report, buffer).or(Err(CnnError::SerializeError))?;
    Ok(slice.len())
}

pub fn decode_report(bytes: &[u8]) -> Result<CycleReport, CnnError> {
    postcard::from_bytes::<CycleReport>(bytes).or(Err(CnnError::DeserializeError))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_primitive_conversions() {
        assert_eq!(usize::from(CnnError::Success), 0);
        assert_eq!(CnnError::from(1usize), CnnError::VerificationMismatch);
        assert_eq!(CnnError::from(9999usize), CnnError::UnknownError);
        assert_eq!(Result::<(), CnnError>::from(CnnError::Success), Ok(()));
        assert_eq!(
            Result::<(), CnnError>::from(CnnError::CaptureFailed),
            Err(CnnError::CaptureFailed)
        );
    }

    #[test]
    fn peripheral_setup_failures() {
        assert!(CnnError::CameraSetupFailed.is_peripheral_setup_failure());
        assert!(CnnError::DisplaySetupFailed.is_peripheral_setup_failure());
        assert!(!CnnError::VerificationMismatch.is_peripheral_setup_failure());
    }

    #[test]
    fn mismatch_message() {
        let err = MismatchError {
            index: 2,
            length: 2,
            address: 0x5040_0004,
            expected: 0x5678,
            actual: 0x5679,
        };
        assert_eq!(
            format!("{}", err),
            "Data mismatch (2/2) at address 0x50400004: Expected 0x00005678, read 0x00005679."
        );
        assert_eq!(CnnError::from(VerifyError::from(err)), CnnError::VerificationMismatch);
        assert_eq!(
            CnnError::from(VerifyError::Truncated { offset: 3 }),
            CnnError::MalformedGoldenTable
        );
    }

    #[test]
    fn report_encodes_and_decodes() {
        let report = CycleReport {
            cycle: 3,
            latency_us: 1234,
            winner: 1,
            classes: vec![ClassReport::new(-20, 1000), ClassReport::new(900, 31000)],
        };
        assert_eq!(report.classes[1].percentage(), Percentage::from_q15(31000));

        let mut buffer = [0u8; MAX_REPORT_SIZE];
        let len = encode_report(&report, &mut buffer).unwrap();
        assert!(len > 0);
        assert_eq!(decode_report(&buffer[..len]).unwrap(), report);
    }

    #[test]
    fn report_too_big_for_buffer() {
        let report = CycleReport {
            cycle: 0,
            latency_us: 1,
            winner: 0,
            classes: vec![ClassReport::new(i32::MAX, i16::MAX); 8],
        };
        let mut buffer = [0u8; 4];
        assert_eq!(encode_report(&report, &mut buffer), Err(CnnError::SerializeError));
        assert_eq!(decode_report(&buffer[..0]), Err(CnnError::DeserializeError));
    }
}
