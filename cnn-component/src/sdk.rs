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

//! MAX78000 bindings: the vendor SDK calls behind the accelerator, camera
//! and TFT collaborators, the CNN interrupt handler and the C entry point.
//!
//! The network-generated cnn.c supplies the cnn_* functions; its own
//! CNN_ISR must not be linked in since the one here replaces it.

use crate::heap::CnnHeap;
use crate::logger::{init_logger, CnnLogger};
use crate::{CnnApp, CNN_DONE};
use cnn_core::mmio::{Max78000Cnn, MmioMemory};
use cnn_core::{AcceleratorControl, Handshake, HardwareStatusPort, IngestPort, ResultPort};
use cnn_interface::{Camera, CnnError, Display};
use cnn_shared::{CnnConfig, Font, FrameBuffer, FrameDims, Pixel, FRAME_WORDS, NUM_CLASSES};
use core::ffi::{c_char, c_void};
use core::sync::atomic::{self, Ordering};
use log::{error, info, LevelFilter};
use static_assertions::const_assert;

// SDK constants (mxc_sys.h, gcr_regs.h, camera.h).
const MXC_SYS_PERIPH_CLOCK_CNN: u32 = 25;
const MXC_S_GCR_PCLKDIV_CNNCLKSEL_PCLK: u32 = 0;
const MXC_S_GCR_PCLKDIV_CNNCLKDIV_DIV1: u32 = 0;
const MXC_TMR0: usize = 0x4001_0000;
const PIXFORMAT_RGB565: i32 = 2;
const FIFO_FOUR_BYTE: i32 = 1;
const USE_DMA: i32 = 1;
const STATUS_OK: i32 = 0;
const CNN_OK: i32 = 1;
const TFT_BACKGROUND: i32 = 4;

extern "C" {
    fn cnn_enable(clock_source: u32, clock_divider: u32) -> i32;
    fn cnn_init() -> i32;
    fn cnn_load_weights() -> i32;
    fn cnn_load_bias() -> i32;
    fn cnn_configure() -> i32;
    fn cnn_start() -> i32;
    fn cnn_stop() -> i32;
    fn cnn_unload(out_buf: *mut u32) -> i32;

    fn MXC_SYS_ClockEnable(clock: u32);
    fn MXC_SYS_ClockDisable(clock: u32);
    fn MXC_Delay(us: u32) -> i32;
    fn MXC_TMR_SW_Stop(tmr: *mut c_void) -> u32;
    fn MXC_DMA_Init() -> i32;
    fn MXC_DMA_AcquireChannel() -> i32;

    fn camera_init(freq: u32) -> i32;
    fn camera_setup(
        xres: i32,
        yres: i32,
        pixformat: i32,
        fifo_mode: i32,
        dma_mode: i32,
        dma_channel: i32,
    ) -> i32;
    fn camera_start_capture_image() -> i32;
    fn camera_is_image_rcv() -> i32;
    fn camera_get_image(img: *mut *mut u8, len: *mut u32, w: *mut u32, h: *mut u32);

    fn MXC_TFT_Init(cs: *mut c_void, dc: *mut c_void) -> i32;
    fn MXC_TFT_ClearScreen();
    fn MXC_TFT_SetBackGroundColor(color: i32);
    fn display_RGB565_img(x: i32, y: i32, frame: *const u32);
    fn TFT_Print(text: *mut c_char, x: i32, y: i32, font: i32, length: i32);
    #[allow(non_upper_case_globals)]
    static Arial12x12: u8;

    fn putchar(c: i32) -> i32;
}

fn check(what: &str, status: i32) {
    if status != CNN_OK {
        error!("{} failed: {}", what, status);
    }
}

/// The CNN block: SDK calls for control, registers for streaming and
/// cnn_unload for the class outputs.
pub struct SdkCnn {
    regs: Max78000Cnn,
    outputs: [u32; NUM_CLASSES],
    unloaded: bool,
}
impl SdkCnn {
    /// # Safety
    ///
    /// Must only be created once, on the MAX78000.
    pub unsafe fn new() -> Self {
        Self {
            regs: Max78000Cnn::new(),
            outputs: [0; NUM_CLASSES],
            unloaded: false,
        }
    }
}
impl AcceleratorControl for SdkCnn {
    fn enable_clock(&mut self) { unsafe { MXC_SYS_ClockEnable(MXC_SYS_PERIPH_CLOCK_CNN) } }
    fn disable_clock(&mut self) { unsafe { MXC_SYS_ClockDisable(MXC_SYS_PERIPH_CLOCK_CNN) } }
    fn init(&mut self) { check("cnn_init", unsafe { cnn_init() }); }
    fn load_weights(&mut self) { check("cnn_load_weights", unsafe { cnn_load_weights() }); }
    fn load_bias(&mut self) { check("cnn_load_bias", unsafe { cnn_load_bias() }); }
    fn configure(&mut self) { check("cnn_configure", unsafe { cnn_configure() }); }
    fn start(&mut self) {
        self.unloaded = false;
        check("cnn_start", unsafe { cnn_start() });
    }
    fn stop(&mut self) { check("cnn_stop", unsafe { cnn_stop() }); }
}
impl HardwareStatusPort for SdkCnn {
    fn status(&mut self) -> Handshake { self.regs.status() }
}
impl IngestPort for SdkCnn {
    fn write_fifo(&mut self, word: u32) { self.regs.write_fifo(word); }
}
impl ResultPort for SdkCnn {
    fn read_result(&mut self, index: usize) -> u32 {
        if !self.unloaded {
            check("cnn_unload", unsafe { cnn_unload(self.outputs.as_mut_ptr()) });
            self.unloaded = true;
        }
        self.outputs.get(index).copied().unwrap_or(0)
    }
}

/// Camera on the parallel interface, fed by DMA.
pub struct SdkCamera {
    freq_hz: u32,
}
impl SdkCamera {
    pub fn new(freq_hz: u32) -> Self { Self { freq_hz } }
}
impl Camera for SdkCamera {
    fn setup(&mut self, dims: FrameDims) -> Result<(), CnnError> {
        let dma_channel = unsafe {
            MXC_DMA_Init();
            MXC_DMA_AcquireChannel()
        };
        if dma_channel < 0 {
            error!("No DMA channel: {}", dma_channel);
            return Err(CnnError::DmaSetupFailed);
        }
        let ret = unsafe {
            camera_init(self.freq_hz);
            camera_setup(
                dims.width as i32,
                dims.height as i32,
                PIXFORMAT_RGB565,
                FIFO_FOUR_BYTE,
                USE_DMA,
                dma_channel,
            )
        };
        if ret != STATUS_OK {
            error!("Error returned from setting up camera. Error {}", ret);
            return Err(CnnError::CameraSetupFailed);
        }
        Ok(())
    }

    fn capture_into(&mut self, words: &mut [u32]) -> Result<(), CnnError> {
        let mut raw: *mut u8 = core::ptr::null_mut();
        let (mut len, mut w, mut h) = (0u32, 0u32, 0u32);
        unsafe {
            camera_start_capture_image();
            while camera_is_image_rcv() == 0 {}
            camera_get_image(&mut raw, &mut len, &mut w, &mut h);
        }
        if raw.is_null() || (w * h) as usize != words.len() || len < 2 * w * h {
            error!("Bad capture: {}x{} ({} bytes)", w, h, len);
            return Err(CnnError::CaptureFailed);
        }
        let bytes = unsafe { core::slice::from_raw_parts(raw, len as usize) };
        for (word, rgb) in words.iter_mut().zip(bytes.chunks_exact(2)) {
            *word = Pixel::from_rgb565(u16::from_be_bytes([rgb[0], rgb[1]])).to_word();
        }
        Ok(())
    }
}

/// TFT on the feather board.
pub struct SdkDisplay;
impl Display for SdkDisplay {
    fn init(&mut self) -> Result<(), CnnError> {
        let ret = unsafe { MXC_TFT_Init(core::ptr::null_mut(), core::ptr::null_mut()) };
        if ret != STATUS_OK {
            return Err(CnnError::DisplaySetupFailed);
        }
        unsafe {
            MXC_TFT_ClearScreen();
            MXC_TFT_SetBackGroundColor(TFT_BACKGROUND);
        }
        Ok(())
    }

    fn render(&mut self, frame: &FrameBuffer, x: i32, y: i32) {
        unsafe { display_RGB565_img(x, y, frame.words().as_ptr()) }
    }

    fn print_text(&mut self, text: &str, x: i32, y: i32, font: Font) {
        let font = match font {
            Font::Arial12x12 => unsafe { &Arial12x12 as *const u8 as usize as i32 },
        };
        // TFT_Print takes a mutable buffer; hand it a copy.
        let mut buf = [0u8; crate::DISPLAY_TEXT_LEN];
        let len = text.len().min(buf.len());
        buf[..len].copy_from_slice(&text.as_bytes()[..len]);
        unsafe { TFT_Print(buf.as_mut_ptr() as *mut c_char, x, y, font, len as i32) }
    }
}

fn console_write(msg: &[u8]) {
    for &b in msg.iter().chain(b"\n") {
        unsafe {
            putchar(b as i32);
        }
    }
}

fn wait_for_interrupt() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("wfi");
    }
    #[cfg(not(target_arch = "arm"))]
    core::hint::spin_loop();
}

static CNN_LOGGER: CnnLogger = CnnLogger::new(console_write);

// Holds the camera frame plus the per-cycle class vectors and reports.
const HEAP_SIZE: usize = 72 * 1024;
const_assert!(HEAP_SIZE >= 4 * FRAME_WORDS + 4096);

static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

#[global_allocator]
static ALLOCATOR: CnnHeap = CnnHeap::empty();

#[inline(never)]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    error!("{}", info);

    // Halt.
    loop {
        atomic::compiler_fence(Ordering::SeqCst);
    }
}

/// CNN completion interrupt.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn CNN_ISR() {
    Max78000Cnn::clear_irq();
    let elapsed_us = unsafe { MXC_TMR_SW_Stop(MXC_TMR0 as *mut c_void) };
    CNN_DONE.signal(elapsed_us);
}

/// C entry point. |sample|/|golden| are the known-answer input and golden
/// table from the network generator; pass null to skip the self test.
/// Returns only on a fatal error.
///
/// # Safety
///
/// Must be called once. Non-null |sample| and |golden| must point at
/// |sample_len| and |golden_len| readable words that live for the rest of
/// the program.
#[no_mangle]
pub unsafe extern "C" fn cnn_main(
    sample: *const u32,
    sample_len: usize,
    golden: *const u32,
    golden_len: usize,
) -> i32 {
    ALLOCATOR.init(core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8, HEAP_SIZE);
    let _ = init_logger(&CNN_LOGGER, LevelFilter::Info);
    let config = CnnConfig::MAX78000;

    info!("Waiting...");
    MXC_Delay(config.startup_delay_ms * 1000);

    let mut app = CnnApp::new(
        SdkCnn::new(),
        SdkCamera::new(config.camera_freq_hz),
        SdkDisplay,
        MmioMemory::new(),
        &CNN_DONE,
        config,
        wait_for_interrupt,
    );
    if !sample.is_null() && !golden.is_null() {
        app = app.with_known_answer(
            core::slice::from_raw_parts(sample, sample_len),
            core::slice::from_raw_parts(golden, golden_len),
        );
    }

    // Interrupt enable and CNN clock (PCLK, div 1).
    cnn_enable(MXC_S_GCR_PCLKDIV_CNNCLKSEL_PCLK, MXC_S_GCR_PCLKDIV_CNNCLKDIV_DIV1);
    if let Err(err) = app.setup() {
        error!("Setup failed: {:?}", err);
        return -1;
    }
    if !app.self_test() {
        error!("*** FAIL ***");
        return -1;
    }
    match app.run(None) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}
