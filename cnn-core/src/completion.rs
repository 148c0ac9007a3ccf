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

//! One-shot completion signal between the accelerator interrupt handler and
//! the inference controller.

use core::sync::atomic::{AtomicU32, Ordering};

/// Latch set by the completion interrupt with the elapsed run time. Zero
/// means "not signaled", so a signal always carries a nonzero value.
pub struct Completion {
    elapsed_us: AtomicU32,
}

impl Completion {
    pub const fn new() -> Self {
        Self {
            elapsed_us: AtomicU32::new(0),
        }
    }

    /// Clears any stale signal and returns the token for the next run. Must
    /// be called before the accelerator is started.
    pub fn arm(&self) -> CompletionToken<'_> {
        self.elapsed_us.store(0, Ordering::Release);
        CompletionToken { completion: self }
    }

    /// Called from interrupt context when the accelerator finishes.
    pub fn signal(&self, elapsed_us: u32) {
        self.elapsed_us.store(elapsed_us.max(1), Ordering::Release);
    }

    pub fn is_signaled(&self) -> bool { self.elapsed_us.load(Ordering::Acquire) != 0 }
}

impl Default for Completion {
    fn default() -> Self { Self::new() }
}

/// The right to consume one completion signal.
#[must_use]
pub struct CompletionToken<'a> {
    completion: &'a Completion,
}

impl CompletionToken<'_> {
    /// Blocks until the signal fires, calling |idle| (e.g. wait-for-interrupt)
    /// between checks. Returns the elapsed time in microseconds. No timeout.
    pub fn wait<F: FnMut()>(self, mut idle: F) -> u32 {
        loop {
            let elapsed_us = self.completion.elapsed_us.swap(0, Ordering::AcqRel);
            if elapsed_us != 0 {
                return elapsed_us;
            }
            idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_returns_signaled_time() {
        let done = Completion::new();
        let token = done.arm();
        let mut idles = 0;
        let elapsed = token.wait(|| {
            idles += 1;
            if idles == 3 {
                done.signal(1500);
            }
        });
        assert_eq!(elapsed, 1500);
        assert_eq!(idles, 3);
        // Consumed.
        assert!(!done.is_signaled());
    }

    #[test]
    fn zero_elapsed_still_signals() {
        let done = Completion::new();
        let token = done.arm();
        done.signal(0);
        assert!(done.is_signaled());
        assert_eq!(token.wait(|| panic!("already signaled")), 1);
    }

    #[test]
    fn arm_discards_stale_signal() {
        let done = Completion::new();
        done.signal(42);
        let token = done.arm();
        assert!(!done.is_signaled());
        let elapsed = token.wait(|| done.signal(7));
        assert_eq!(elapsed, 7);
    }
}
