//! QEMU `virt` platform backend.
//!
//! PL011 serial, virtio-mmio block and input, and a RAM-backed
//! framebuffer: the `virt` machine has no fixed linear-FB device, so the
//! console renders into an allocation of its own.  No DMA engine exists;
//! the copy helpers fall back to the CPU.

use super::FbInfo;
use crate::config::platform::{FB_HEIGHT, FB_WIDTH, UART_BASE};
use crate::drivers::pl011::Pl011;
use crate::drivers::{virtio_blk, virtio_input};
use crate::memory::DmaBuffer;
use kikios_storage::block::BlockDevice;
use spin::Mutex;

static UART: Pl011 = Pl011::new(UART_BASE);

pub fn serial_init() {
    UART.init();
}

pub fn serial_putc(byte: u8) {
    UART.putc(byte);
}

pub fn serial_getc() -> Option<u8> {
    UART.getc()
}

/// The console's backing store.
static FRAMEBUFFER: Mutex<Option<DmaBuffer>> = Mutex::new(None);

pub fn fb_init(width: u32, height: u32) -> Option<FbInfo> {
    let width = if width == 0 { FB_WIDTH } else { width };
    let height = if height == 0 { FB_HEIGHT } else { height };
    let buf = DmaBuffer::new(width as usize * height as usize * 4, 4096)?;
    let info = FbInfo {
        base: buf.addr(),
        width,
        height,
        pitch: width * 4,
        // No hardware scroll: the virtual buffer is exactly the screen.
        virtual_height: height,
    };
    *FRAMEBUFFER.lock() = Some(buf);
    Some(info)
}

/// No display controller to reprogram.
pub fn fb_set_scroll_offset(_y: u32) -> bool {
    false
}

pub fn block_init() -> bool {
    virtio_blk::init()
}

pub fn block_device() -> Option<&'static dyn BlockDevice> {
    if virtio_blk::VIRTIO_BLK.sector_count() == 0 {
        return None;
    }
    Some(&virtio_blk::VIRTIO_BLK)
}

pub fn keyboard_init() {
    virtio_input::init();
}

pub fn keyboard_getc() -> Option<u32> {
    virtio_input::getc()
}

pub fn has_key() -> bool {
    virtio_input::has_key()
}

pub fn mouse_init() {
    // The tablet reports absolute positions; start the pointer at the
    // center of whatever framebuffer was actually negotiated.
    let (w, h) = super::fb_dimensions();
    virtio_input::mouse_set_pos(w as i32 / 2, h as i32 / 2);
}

pub fn mouse_get_state() -> (i32, i32, u32) {
    virtio_input::mouse_state()
}

pub fn mouse_set_pos(x: i32, y: i32) {
    virtio_input::mouse_set_pos(x, y);
}

pub fn dma_init() {}

pub fn dma_available() -> bool {
    false
}

/// CPU fallback.
pub fn dma_copy(dst: usize, src: usize, len: usize) {
    unsafe {
        core::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, len);
    }
}

/// CPU fallback, row by row.
pub fn dma_copy_2d(dst: usize, dst_pitch: usize, src: usize, src_pitch: usize, w: usize, h: usize) {
    for row in 0..h {
        unsafe {
            core::ptr::copy_nonoverlapping(
                (src + row * src_pitch) as *const u8,
                (dst + row * dst_pitch) as *mut u8,
                w,
            );
        }
    }
}

/// CPU fallback.
pub fn dma_fill(dst: usize, value: u32, len: usize) {
    let words = len / 4;
    for i in 0..words {
        unsafe { ((dst as *mut u32).add(i)).write_volatile(value) };
    }
}

pub fn led_toggle() {}
