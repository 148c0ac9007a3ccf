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

//! Console logger. Messages are formatted as `<target>::<msg>` into a
//! fixed buffer and handed to a platform sink (e.g. the debug UART).

use core::fmt;
use core2::io::{Cursor, Write};
use log::{LevelFilter, Metadata, Record, SetLoggerError};
use spin::Mutex;

pub const MAX_MSG_LEN: usize = 2048;

/// Formats |args| for |target| into |buf| and returns the length used. A
/// message that does not fit is cut short with a trailing "...".
pub fn format_message(buf: &mut [u8], target: &str, args: &fmt::Arguments) -> usize {
    let capacity = buf.len();
    let mut cur = Cursor::new(buf);
    write!(&mut cur, "{}::{}", target, args).unwrap_or_else(|_| {
        // Too big, indicate overflow with a trailing "...".
        cur.set_position(capacity.saturating_sub(3) as u64);
        let _ = cur.write_all(b"...");
    });
    cur.position() as usize
}

pub struct CnnLogger {
    sink: fn(&[u8]),
    buffer: Mutex<[u8; MAX_MSG_LEN]>,
}
impl CnnLogger {
    pub const fn new(sink: fn(&[u8])) -> Self {
        Self {
            sink,
            buffer: Mutex::new([0; MAX_MSG_LEN]),
        }
    }
}
impl log::Log for CnnLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool { true }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let mut buf = self.buffer.lock();
            let len = format_message(&mut buf[..], record.target(), record.args());
            (self.sink)(&buf[..len]);
        }
    }

    fn flush(&self) {}
}

/// Installs |logger| as the global logger.
pub fn init_logger(logger: &'static CnnLogger, level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}
