//! Raspberry Pi Zero 2W platform backend.
//!
//! PL011 serial, mailbox-negotiated framebuffer with a double-height
//! virtual buffer for hardware scrolling, EMMC block, DWC2 USB HID input,
//! and the BCM283x DMA engine.

use super::FbInfo;
use crate::config::platform::{LED_GPIO, UART_BASE};
use crate::drivers::pl011::Pl011;
use crate::drivers::{bcm_dma, emmc, gpio, mailbox};
use crate::usb;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use kikios_storage::block::BlockDevice;
use spin::Mutex;

static UART: Pl011 = Pl011::new(UART_BASE);

pub fn serial_init() {
    // GPIO 14/15 carry the PL011 on ALT0.
    gpio::set_function(14, gpio::Function::Alt0);
    gpio::set_function(15, gpio::Function::Alt0);
    UART.init();
}

pub fn serial_putc(byte: u8) {
    UART.putc(byte);
}

pub fn serial_getc() -> Option<u8> {
    UART.getc()
}

pub fn fb_init(width: u32, height: u32) -> Option<FbInfo> {
    let fb = mailbox::fb_alloc(width, height)?;
    Some(FbInfo {
        base: fb.base,
        width: fb.width,
        height: fb.height,
        pitch: fb.pitch,
        virtual_height: fb.virtual_height,
    })
}

pub fn fb_set_scroll_offset(y: u32) -> bool {
    mailbox::fb_set_virtual_offset(0, y)
}

pub fn block_init() -> bool {
    match emmc::init() {
        Ok(()) => true,
        Err(e) => {
            crate::serial_println!("[SD] init failed: {:?}", e);
            false
        }
    }
}

pub fn block_device() -> Option<&'static dyn BlockDevice> {
    Some(&emmc::EMMC)
}

/// Decoded keys waiting for `getc`, fed from the raw report ring.
static PENDING_KEYS: Mutex<[u32; 16]> = Mutex::new([0; 16]);
static PENDING_COUNT: Mutex<usize> = Mutex::new(0);
/// Previous boot report, for press-edge detection.
static PREV_REPORT: Mutex<[u8; 8]> = Mutex::new([0; 8]);

pub fn keyboard_init() {
    // Input arrives through USB HID; the pipeline is armed during
    // enumeration.
}

/// Drain raw reports into decoded key codes.
fn pump_reports() {
    while let Some(report) = usb::KEYBOARD_REPORTS.pop() {
        let mut prev = PREV_REPORT.lock();
        let mut keys = PENDING_KEYS.lock();
        let mut count = PENDING_COUNT.lock();
        usb::decode_boot_report(&report, &prev, |key| {
            if *count < keys.len() {
                keys[*count] = key;
                *count += 1;
            }
        });
        *prev = report;
    }
}

pub fn keyboard_getc() -> Option<u32> {
    pump_reports();
    let mut keys = PENDING_KEYS.lock();
    let mut count = PENDING_COUNT.lock();
    if *count == 0 {
        return None;
    }
    let key = keys[0];
    keys.copy_within(1.., 0);
    *count -= 1;
    Some(key)
}

pub fn has_key() -> bool {
    pump_reports();
    *PENDING_COUNT.lock() > 0
}

/// Pointer state folded from boot mouse reports.
static MOUSE_X: AtomicI32 = AtomicI32::new(0);
static MOUSE_Y: AtomicI32 = AtomicI32::new(0);
static MOUSE_BUTTONS: AtomicU32 = AtomicU32::new(0);
static MOUSE_CENTERED: AtomicBool = AtomicBool::new(false);

pub fn mouse_init() {
    // Center from the framebuffer actually negotiated, not a hardcoded
    // resolution.
    let (w, h) = super::fb_dimensions();
    MOUSE_X.store(w as i32 / 2, Ordering::Relaxed);
    MOUSE_Y.store(h as i32 / 2, Ordering::Relaxed);
    MOUSE_CENTERED.store(true, Ordering::Relaxed);
}

pub fn mouse_get_state() -> (i32, i32, u32) {
    if !MOUSE_CENTERED.swap(true, Ordering::Relaxed) {
        mouse_init();
    }
    let (w, h) = super::fb_dimensions();
    let mut x = MOUSE_X.load(Ordering::Relaxed);
    let mut y = MOUSE_Y.load(Ordering::Relaxed);
    let mut buttons = MOUSE_BUTTONS.load(Ordering::Relaxed);
    while let Some(report) = usb::MOUSE_REPORTS.pop() {
        let (nx, ny, nb) = usb::apply_mouse_report(&report, x, y, w as i32, h as i32);
        x = nx;
        y = ny;
        buttons = nb;
    }
    MOUSE_X.store(x, Ordering::Relaxed);
    MOUSE_Y.store(y, Ordering::Relaxed);
    MOUSE_BUTTONS.store(buttons, Ordering::Relaxed);
    (x, y, buttons)
}

pub fn mouse_set_pos(x: i32, y: i32) {
    MOUSE_X.store(x, Ordering::Relaxed);
    MOUSE_Y.store(y, Ordering::Relaxed);
}

pub fn dma_init() {
    bcm_dma::init();
}

pub fn dma_available() -> bool {
    true
}

pub fn dma_copy(dst: usize, src: usize, len: usize) {
    if !bcm_dma::copy(dst, src, len) {
        // The engine errored; fall back so the screen still updates.
        unsafe { core::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, len) };
    }
}

pub fn dma_copy_2d(dst: usize, dst_pitch: usize, src: usize, src_pitch: usize, w: usize, h: usize) {
    if !bcm_dma::copy_2d(dst, dst_pitch, src, src_pitch, w, h) {
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
}

pub fn dma_fill(dst: usize, value: u32, len: usize) {
    if !bcm_dma::fill(dst, value, len) {
        for i in 0..len / 4 {
            unsafe { ((dst as *mut u32).add(i)).write_volatile(value) };
        }
    }
}

static LED_STATE: AtomicBool = AtomicBool::new(false);

pub fn led_toggle() {
    let on = !LED_STATE.fetch_xor(true, Ordering::Relaxed);
    gpio::set_output(LED_GPIO, on);
}
