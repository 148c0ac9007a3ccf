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

//! Golden-answer verification of accelerator memory.
//!
//! A golden table is a flat word stream of records
//! `address, mask, length, expected[length]`, ended by a record whose
//! address word is zero.

use cnn_core::MemoryPort;
use cnn_interface::{MismatchError, VerifyError};
use cnn_shared::GoldenRecord;
use log::trace;

// Words before the expected values in every record.
const RECORD_HEADER_WORDS: usize = 3;

#[derive(Clone, Copy, Debug)]
pub struct GoldenTable<'a> {
    words: &'a [u32],
}

impl<'a> GoldenTable<'a> {
    pub const fn new(words: &'a [u32]) -> Self { Self { words } }

    /// Iterates records up to the sentinel. A record that runs off the end
    /// of the table yields VerifyError::Truncated and ends iteration.
    pub fn records(&self) -> Records<'a> {
        Records {
            words: self.words,
            offset: 0,
            done: false,
        }
    }
}

pub struct Records<'a> {
    words: &'a [u32],
    offset: usize,
    done: bool,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<GoldenRecord<'a>, VerifyError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let offset = self.offset;
        let rest = &self.words[offset..];
        match rest.first() {
            Some(0) => {
                self.done = true;
                return None;
            }
            Some(_) if rest.len() >= RECORD_HEADER_WORDS => {}
            _ => {
                self.done = true;
                return Some(Err(VerifyError::Truncated { offset }));
            }
        }
        let length = rest[2] as usize;
        let expected = match RECORD_HEADER_WORDS
            .checked_add(length)
            .and_then(|end| rest.get(RECORD_HEADER_WORDS..end))
        {
            Some(expected) => expected,
            None => {
                self.done = true;
                return Some(Err(VerifyError::Truncated { offset }));
            }
        };
        self.offset += RECORD_HEADER_WORDS + length;
        Some(Ok(GoldenRecord {
            address: rest[0] as usize,
            mask: rest[1],
            expected,
        }))
    }
}

/// Checks every record of |table| against |memory|, stopping at the first
/// word whose masked value differs from the masked expected value.
pub fn verify<M: MemoryPort + ?Sized>(table: &GoldenTable, memory: &M) -> Result<(), VerifyError> {
    for record in table.records() {
        let record = record?;
        trace!(
            "verify {} words at {:#010x} mask {:#010x}",
            record.len(),
            record.address,
            record.mask
        );
        for (i, &expected) in record.expected.iter().enumerate() {
            let address = record.address + 4 * i;
            let expected = expected & record.mask;
            let actual = memory.read_word(address) & record.mask;
            if actual != expected {
                return Err(MismatchError {
                    index: i + 1,
                    length: record.len(),
                    address,
                    expected,
                    actual,
                }
                .into());
            }
        }
    }
    Ok(())
}
