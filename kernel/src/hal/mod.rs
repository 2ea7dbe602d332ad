//! Hardware abstraction layer.
//!
//! One uniform surface over the two platforms: serial, framebuffer,
//! timer, block, input, DMA, and power.  The interrupt side of the
//! contract lives in [`crate::interrupts`], which owns the linear IRQ
//! namespace; everything here is safe to call with interrupts masked.

#[cfg(feature = "plat-pi")]
mod pi;
#[cfg(feature = "plat-qemu")]
mod qemu;

#[cfg(feature = "plat-pi")]
use pi as platform;
#[cfg(feature = "plat-qemu")]
use qemu as platform;

use kikios_storage::block::BlockDevice;
use spin::Mutex;

/// Framebuffer geometry handed to the console.
#[derive(Debug, Clone, Copy)]
pub struct FbInfo {
    /// Base address of the (virtual) framebuffer.
    pub base: usize,
    pub width: u32,
    pub height: u32,
    /// Bytes per scanline.
    pub pitch: u32,
    /// Total height of the virtual framebuffer; twice the visible height
    /// when hardware scrolling is available.
    pub virtual_height: u32,
}

static FB_INFO: Mutex<Option<FbInfo>> = Mutex::new(None);

// ── Serial ──────────────────────────────────────────────────────────

pub fn serial_init() {
    platform::serial_init();
}

pub fn serial_putc(byte: u8) {
    platform::serial_putc(byte);
}

/// Non-blocking read; `None` means "no data", never an error.
pub fn serial_getc() -> Option<u8> {
    platform::serial_getc()
}

// ── Framebuffer ─────────────────────────────────────────────────────

/// Bring up the framebuffer at (or near) the requested geometry.
pub fn fb_init(width: u32, height: u32) -> Option<FbInfo> {
    let info = platform::fb_init(width, height)?;
    *FB_INFO.lock() = Some(info);
    Some(info)
}

/// The negotiated framebuffer, if any.
pub fn fb_info() -> Option<FbInfo> {
    *FB_INFO.lock()
}

/// Visible dimensions, `(0, 0)` before init.
pub fn fb_dimensions() -> (u32, u32) {
    match fb_info() {
        Some(fb) => (fb.width, fb.height),
        None => (0, 0),
    }
}

/// Move the display origin for hardware scrolling.  Returns `false` when
/// the platform cannot (software scroll takes over).
pub fn fb_set_scroll_offset(y: u32) -> bool {
    platform::fb_set_scroll_offset(y)
}

/// Height of the virtual framebuffer.
pub fn fb_virtual_height() -> u32 {
    fb_info().map(|f| f.virtual_height).unwrap_or(0)
}

// ── Block ───────────────────────────────────────────────────────────

/// Initialize the platform block device.
pub fn block_init() -> bool {
    platform::block_init()
}

/// The platform block device, once initialized.
pub fn block_device() -> Option<&'static dyn BlockDevice> {
    platform::block_device()
}

// ── Input ───────────────────────────────────────────────────────────

/// Bring up keyboard input.
pub fn keyboard_init() {
    platform::keyboard_init();
}

/// Next key code, or `None` when the buffer is empty.
pub fn keyboard_getc() -> Option<u32> {
    platform::keyboard_getc()
}

/// Whether a key is waiting.
pub fn has_key() -> bool {
    platform::has_key()
}

/// Bring up pointer input.
pub fn mouse_init() {
    platform::mouse_init();
}

/// Pointer position and button mask.
pub fn mouse_get_state() -> (i32, i32, u32) {
    platform::mouse_get_state()
}

/// Warp the pointer.
pub fn mouse_set_pos(x: i32, y: i32) {
    platform::mouse_set_pos(x, y);
}

// ── DMA ─────────────────────────────────────────────────────────────

/// Initialize the DMA engine, when the platform has one.
pub fn dma_init() {
    platform::dma_init();
}

/// Whether hardware DMA is available (QEMU falls back to the CPU).
pub fn dma_available() -> bool {
    platform::dma_available()
}

/// Linear copy.
pub fn dma_copy(dst: usize, src: usize, len: usize) {
    platform::dma_copy(dst, src, len);
}

/// 2-D copy: `h` rows of `w` bytes with independent pitches.
pub fn dma_copy_2d(dst: usize, dst_pitch: usize, src: usize, src_pitch: usize, w: usize, h: usize) {
    platform::dma_copy_2d(dst, dst_pitch, src, src_pitch, w, h);
}

/// Fill with a 32-bit pattern.
pub fn dma_fill(dst: usize, value: u32, len: usize) {
    platform::dma_fill(dst, value, len);
}

// ── Power / time / LED ──────────────────────────────────────────────

/// Wait for interrupt.
pub fn wfi() {
    crate::arch::wfi();
}

/// Free-running microsecond counter, live from very early boot.
pub fn get_time_us() -> u32 {
    crate::arch::time_us()
}

/// Toggle the activity LED (no-op on QEMU).
pub fn led_toggle() {
    platform::led_toggle();
}
