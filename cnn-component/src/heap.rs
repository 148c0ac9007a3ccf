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

//! First-fit heap over a fixed memory region. Backs `alloc` (frame buffer,
//! class vectors, reports) when running on the device.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use linked_list_allocator::Heap;
use spin::Mutex;

pub struct CnnHeap {
    heap: Mutex<Heap>,
}

impl CnnHeap {
    /// An uninitialized heap; every allocation fails until |init|.
    pub const fn empty() -> CnnHeap {
        CnnHeap {
            heap: Mutex::new(Heap::empty()),
        }
    }

    /// Hands |size| bytes at |start_addr| to the heap.
    ///
    /// # Safety
    ///
    /// Must be called exactly once, before the first allocation, with
    /// `size > 0` and a region that is used for nothing else for the rest
    /// of the program.
    pub unsafe fn init(&self, start_addr: *mut u8, size: usize) {
        self.heap.lock().init(start_addr, size);
    }

    /// Returns an estimate of the amount of bytes in use.
    pub fn used(&self) -> usize { self.heap.lock().used() }

    /// Returns an estimate of the amount of bytes available.
    pub fn free(&self) -> usize { self.heap.lock().free() }
}

unsafe impl GlobalAlloc for CnnHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.heap
            .lock()
            .allocate_first_fit(layout)
            .ok()
            .map_or(ptr::null_mut(), |allocation| allocation.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.heap
            .lock()
            .deallocate(NonNull::new_unchecked(ptr), layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_inside_region() {
        let mut region = [0u8; 1024];
        let start = region.as_ptr() as usize;
        let heap = CnnHeap::empty();
        unsafe { heap.init(region.as_mut_ptr(), region.len()) };
        assert_eq!(heap.used(), 0);

        let layout = Layout::from_size_align(64, 4).unwrap();
        let ptr = unsafe { heap.alloc(layout) };
        assert!(!ptr.is_null());
        let addr = ptr as usize;
        assert!(addr >= start && addr + 64 <= start + region.len());
        assert!(heap.used() >= 64);

        unsafe { heap.dealloc(ptr, layout) };
        assert_eq!(heap.used(), 0);
    }

    #[test]
    fn exhausted_heap_returns_null() {
        let mut region = [0u8; 256];
        let heap = CnnHeap::empty();
        let layout = Layout::from_size_align(64, 4).unwrap();
        // Not yet initialized.
        assert!(unsafe { heap.alloc(layout) }.is_null());

        unsafe { heap.init(region.as_mut_ptr(), region.len()) };
        let too_big = Layout::from_size_align(512, 4).unwrap();
        assert!(unsafe { heap.alloc(too_big) }.is_null());
        assert!(!unsafe { heap.alloc(layout) }.is_null());
    }
}
