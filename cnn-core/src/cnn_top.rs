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

#![allow(dead_code)]

// Setters and getters for the CNN FIFO and control registers. These are only
// meaningful on the target, where the CNN block is mapped at these addresses.

use modular_bitfield::prelude::*;

pub const CNN_FIFO_BASE_ADDR: usize = 0x5000_0000;
pub const CNN_FIFO_STAT_REG_OFFSET: usize = 0x4;
pub const CNN_FIFO_WR0_REG_OFFSET: usize = 0x8;
pub const CNN_FIFO_COUNT: usize = 4;

pub const CNN_FIFO_STAT_FULL0_BIT: u32 = 0;
pub const CNN_FIFO_STAT_EMPTY0_BIT: u32 = 8;

pub const CNNX16_0_BASE_ADDR: usize = 0x5010_0000;
pub const CNNX16_QUADRANT_STRIDE: usize = 0x40_0000;
pub const CNNX16_QUADRANT_COUNT: usize = 4;
pub const CNNX16_CTRL_REG_OFFSET: usize = 0x0;
pub const CNNX16_CTRL_CNN_EN_BIT: u32 = 0;
pub const CNNX16_CTRL_CLK_EN_BIT: u32 = 3;
pub const CNNX16_CTRL_CNN_IRQ_BIT: u32 = 12;

#[inline]
unsafe fn get_reg(base: usize, offset: usize) -> *const u32 { (base + offset) as *const u32 }
#[inline]
unsafe fn get_reg_mut(base: usize, offset: usize) -> *mut u32 { (base + offset) as *mut u32 }

#[bitfield]
pub struct FifoStat {
    pub full0: bool,
    pub full1: bool,
    pub full2: bool,
    pub full3: bool,
    #[skip]
    _unused0: B4,
    pub empty0: bool,
    pub empty1: bool,
    pub empty2: bool,
    pub empty3: bool,
    #[skip]
    _unused1: B20,
}
pub fn get_fifo_stat() -> FifoStat {
    unsafe {
        FifoStat::from_bytes(
            get_reg(CNN_FIFO_BASE_ADDR, CNN_FIFO_STAT_REG_OFFSET)
                .read_volatile()
                .to_ne_bytes(),
        )
    }
}

pub fn fifo_wr_offset(fifo: usize) -> usize {
    debug_assert!(fifo < CNN_FIFO_COUNT, "FIFO out of range");
    CNN_FIFO_WR0_REG_OFFSET + 4 * fifo
}

/// Pushes |word| into ingest FIFO |fifo|.
pub fn set_fifo_wr(fifo: usize, word: u32) {
    unsafe {
        get_reg_mut(CNN_FIFO_BASE_ADDR, fifo_wr_offset(fifo)).write_volatile(word);
    }
}

// Per-quadrant control register.
#[bitfield]
pub struct Ctrl {
    pub cnn_en: bool,
    pub rdy_sel: B2,
    pub clk_en: bool,
    pub calcmax: bool,
    pub pool_en: bool,
    pub bigdata: bool,
    pub apbclk_en: bool,
    pub onexone: bool,
    pub ext_sync: B3,
    pub cnn_irq: bool,
    #[skip]
    _unused0: B19,
}
impl Ctrl {
    /// Drops the completion interrupt and halts the quadrant; every other
    /// bit is kept.
    pub fn acknowledged(self) -> Self { self.with_cnn_irq(false).with_cnn_en(false) }
}

pub fn quadrant_base(quadrant: usize) -> usize {
    debug_assert!(quadrant < CNNX16_QUADRANT_COUNT, "quadrant out of range");
    CNNX16_0_BASE_ADDR + quadrant * CNNX16_QUADRANT_STRIDE
}
pub fn get_ctrl(quadrant: usize) -> Ctrl {
    unsafe {
        Ctrl::from_bytes(
            get_reg(quadrant_base(quadrant), CNNX16_CTRL_REG_OFFSET)
                .read_volatile()
                .to_ne_bytes(),
        )
    }
}
pub fn set_ctrl(quadrant: usize, ctrl: Ctrl) {
    unsafe {
        get_reg_mut(quadrant_base(quadrant), CNNX16_CTRL_REG_OFFSET)
            .write_volatile(u32::from_ne_bytes(ctrl.into_bytes()));
    }
}
