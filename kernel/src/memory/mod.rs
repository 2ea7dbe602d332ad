//! Memory management.
//!
//! The kernel heap is a first-fit free-list allocator bounded by the RAM
//! size the DTB reports (platform defaults when the DTB is unusable).  The
//! top of RAM is laid out as:
//!
//! ```text
//!   ram_end ──────────────────────────┐
//!     program image window (64 MB)    │ exec() loads flat binaries here
//!   ram_end - 64 MB ──────────────────┤
//!     guard (1 MB)                    │
//!   heap_end ─────────────────────────┤
//!     kernel heap                     │ first-fit free list
//!   heap_start = bss_end + 64 KB ─────┘
//! ```

pub mod dtb;
pub mod heap;

use crate::config;
use heap::LockedHeap;

/// Global allocator instance.
#[cfg_attr(target_os = "none", global_allocator)]
pub static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Resolved memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMap {
    pub ram_base: usize,
    pub ram_end: usize,
    pub heap_start: usize,
    pub heap_end: usize,
    /// Base of the reserved program-image window.
    pub exec_base: usize,
    pub exec_size: usize,
}

static MEMORY_MAP: spin::Mutex<Option<MemoryMap>> = spin::Mutex::new(None);

/// Compute the heap and exec-window bounds for the given RAM extent.
///
/// `heap_start` is the end of `.bss` plus a gap, 16-byte aligned.  The top
/// of RAM carries the program window and a guard; the heap is clamped to
/// never shrink below [`config::MIN_HEAP_SIZE`].
pub fn compute_layout(bss_end: usize, ram_base: usize, ram_end: usize) -> MemoryMap {
    let heap_start = (bss_end + config::HEAP_GAP + 15) & !15;
    // The stack region sits at the very top of RAM, so the stack-relative
    // and RAM-relative clamps collapse to the same value.
    let stack_base = ram_end;
    let reserved = config::EXEC_GUARD_SIZE + config::EXEC_WINDOW_SIZE;
    let mut heap_end = (stack_base - reserved).min(ram_end - reserved);
    if heap_end < heap_start + config::MIN_HEAP_SIZE {
        heap_end = heap_start + config::MIN_HEAP_SIZE;
    }
    MemoryMap {
        ram_base,
        ram_end,
        heap_start,
        heap_end,
        exec_base: ram_end - config::EXEC_WINDOW_SIZE,
        exec_size: config::EXEC_WINDOW_SIZE,
    }
}

/// Discover RAM from the DTB and bring up the heap.
///
/// # Safety
///
/// Must run once, before anything allocates, with `bss_end` the true end
/// of the kernel image.
pub unsafe fn init(dtb_addr: usize, bss_end: usize) {
    let (ram_base, ram_size) = match unsafe { dtb::memory_from_dtb(dtb_addr) } {
        Some((base, size)) => {
            crate::serial_println!(
                "[MEM] DTB memory node: base={:#x} size={} MB",
                base,
                size / (1024 * 1024)
            );
            (base as usize, size as usize)
        }
        None => {
            crate::serial_println!(
                "[MEM] DTB unusable, platform default: {} MB",
                config::platform::DEFAULT_RAM_SIZE / (1024 * 1024)
            );
            (
                config::platform::RAM_BASE,
                config::platform::DEFAULT_RAM_SIZE,
            )
        }
    };

    let map = compute_layout(bss_end, ram_base, ram_base + ram_size);
    unsafe { ALLOCATOR.init(map.heap_start, map.heap_end - map.heap_start) };
    *MEMORY_MAP.lock() = Some(map);

    crate::serial_println!(
        "[MEM] heap {:#x}..{:#x} ({} MB), exec window {:#x}..{:#x}",
        map.heap_start,
        map.heap_end,
        (map.heap_end - map.heap_start) / (1024 * 1024),
        map.exec_base,
        map.exec_base + map.exec_size
    );
}

/// The resolved memory map (after [`init`]).
pub fn map() -> Option<MemoryMap> {
    *MEMORY_MAP.lock()
}

/// Heap statistics: `(used_bytes, free_bytes, alloc_count)`, all O(1).
pub fn stats() -> (usize, usize, usize) {
    ALLOCATOR.stats()
}

/// An owned, alignment-controlled buffer for device DMA.
///
/// The backing allocation is zeroed and at least `align`-aligned, so a
/// controller can be pointed at it directly; cache maintenance stays the
/// caller's job.
pub struct DmaBuffer {
    ptr: core::ptr::NonNull<u8>,
    len: usize,
    layout: core::alloc::Layout,
}

impl DmaBuffer {
    /// Allocate a zeroed buffer of `len` bytes aligned to `align`.
    pub fn new(len: usize, align: usize) -> Option<Self> {
        let layout = core::alloc::Layout::from_size_align(len.max(1), align).ok()?;
        let raw = unsafe { alloc::alloc::alloc_zeroed(layout) };
        Some(DmaBuffer {
            ptr: core::ptr::NonNull::new(raw)?,
            len,
            layout,
        })
    }

    /// Buffer address as the device will see it.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Zero the buffer.
    pub fn clear(&mut self) {
        self.as_mut_slice().fill(0);
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        unsafe { alloc::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// The buffer is plain memory; handing it between the kernel thread and an
// ISR is governed by the owning driver.
unsafe impl Send for DmaBuffer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_reserves_top_of_ram() {
        let ram_base = 0x4000_0000;
        let ram_end = 0x5000_0000; // 256 MB
        let map = compute_layout(0x4010_0000, ram_base, ram_end);
        assert_eq!(map.heap_start % 16, 0);
        assert!(map.heap_start >= 0x4010_0000 + config::HEAP_GAP);
        assert_eq!(
            map.heap_end,
            ram_end - config::EXEC_WINDOW_SIZE - config::EXEC_GUARD_SIZE
        );
        assert_eq!(map.exec_base, ram_end - config::EXEC_WINDOW_SIZE);
        assert!(map.heap_end - map.heap_start >= config::MIN_HEAP_SIZE);
    }

    #[test]
    fn layout_clamps_to_minimum_heap() {
        // 96 MB of RAM cannot fit heap + guard + window; the heap floor wins.
        let ram_base = 0;
        let ram_end = 96 * 1024 * 1024;
        let map = compute_layout(0x10_0000, ram_base, ram_end);
        assert_eq!(
            map.heap_end - map.heap_start,
            config::MIN_HEAP_SIZE
        );
    }
}
