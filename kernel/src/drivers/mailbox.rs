//! VideoCore mailbox property interface.
//!
//! All firmware services (power, clocks, framebuffer) go through property
//! buffers on channel 8.  Calls are serialized behind one aligned buffer;
//! everything runs from boot or the kernel thread.

use crate::arch::{self, mmio_read32, mmio_write32};
use crate::config::platform::MAILBOX_BASE;
use spin::Mutex;

const MBOX_READ: usize = 0x00;
const MBOX_STATUS: usize = 0x18;
const MBOX_WRITE: usize = 0x20;

const STATUS_FULL: u32 = 1 << 31;
const STATUS_EMPTY: u32 = 1 << 30;

/// Property channel.
const CHANNEL: u32 = 8;

/// Bounded wait: 1 s at 1 µs polls.
const TIMEOUT_US: u32 = 1_000_000;

/// Property tags.
pub mod tags {
    pub const SET_POWER_STATE: u32 = 0x0002_8001;
    pub const GET_CLOCK_RATE: u32 = 0x0003_0002;
    pub const ALLOCATE_BUFFER: u32 = 0x0004_0001;
    pub const GET_PITCH: u32 = 0x0004_0008;
    pub const SET_PHYSICAL_WH: u32 = 0x0004_8003;
    pub const SET_VIRTUAL_WH: u32 = 0x0004_8004;
    pub const SET_DEPTH: u32 = 0x0004_8005;
    pub const SET_PIXEL_ORDER: u32 = 0x0004_8006;
    pub const SET_VIRTUAL_OFFSET: u32 = 0x0004_8009;
    pub const END: u32 = 0;
}

/// Device IDs for `SET_POWER_STATE`.
pub mod devices {
    pub const SD_CARD: u32 = 0;
    pub const USB_HCD: u32 = 3;
}

/// Clock IDs for `GET_CLOCK_RATE`.
pub mod clocks {
    pub const EMMC: u32 = 1;
    pub const CORE: u32 = 4;
}

/// The property buffer: 16-byte aligned as the interface requires.
#[repr(C, align(16))]
struct PropertyBuffer([u32; 36]);

static BUFFER: Mutex<PropertyBuffer> = Mutex::new(PropertyBuffer([0; 36]));

fn status() -> u32 {
    unsafe { mmio_read32(MAILBOX_BASE + MBOX_STATUS) }
}

/// Send a property buffer and wait for the response in place.
/// Returns `false` on timeout or a firmware error code.
fn call(buf: &mut PropertyBuffer) -> bool {
    let addr = buf.0.as_ptr() as usize;
    debug_assert_eq!(addr & 0xF, 0);

    // The firmware reads and writes the buffer behind the CPU's back.
    arch::cache_clean_range(addr, buf.0.len() * 4);

    let mut waited = 0;
    while status() & STATUS_FULL != 0 {
        if waited >= TIMEOUT_US {
            return false;
        }
        arch::delay_us(1);
        waited += 1;
    }

    let message = (addr as u32 & !0xF) | CHANNEL;
    unsafe { mmio_write32(MAILBOX_BASE + MBOX_WRITE, message) };

    let mut waited = 0;
    loop {
        while status() & STATUS_EMPTY != 0 {
            if waited >= TIMEOUT_US {
                return false;
            }
            arch::delay_us(1);
            waited += 1;
        }
        let resp = unsafe { mmio_read32(MAILBOX_BASE + MBOX_READ) };
        if resp & 0xF == CHANNEL && (resp & !0xF) == (addr as u32 & !0xF) {
            break;
        }
    }

    arch::cache_clean_invalidate_range(addr, buf.0.len() * 4);
    // 0x8000_0000 = request processed successfully.
    buf.0[1] == 0x8000_0000
}

/// Run one single-tag property call.  `values` carries the request data in
/// and the response data out.
fn property(tag: u32, values: &mut [u32]) -> bool {
    let mut buf = BUFFER.lock();
    let words = values.len();
    buf.0[0] = ((6 + words) * 4) as u32;
    buf.0[1] = 0; // request
    buf.0[2] = tag;
    buf.0[3] = (words * 4) as u32;
    buf.0[4] = 0; // tag request
    buf.0[5..5 + words].copy_from_slice(values);
    buf.0[5 + words] = tags::END;

    if !call(&mut buf) {
        return false;
    }
    values.copy_from_slice(&buf.0[5..5 + words]);
    true
}

/// Power a device on or off, waiting for the transition.
pub fn set_power_state(device: u32, on: bool) -> bool {
    let mut values = [device, if on { 0b11 } else { 0b10 }]; // state | wait
    property(tags::SET_POWER_STATE, &mut values) && values[1] & 1 == if on { 1 } else { 0 }
}

/// Query a clock rate in Hz.
pub fn get_clock_rate(clock: u32) -> Option<u32> {
    let mut values = [clock, 0];
    if property(tags::GET_CLOCK_RATE, &mut values) && values[1] != 0 {
        Some(values[1])
    } else {
        None
    }
}

/// Firmware-allocated framebuffer.
pub struct FirmwareFb {
    pub base: usize,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub virtual_height: u32,
}

/// Negotiate a 32-bit framebuffer, with a double-height virtual buffer
/// for hardware scrolling.
pub fn fb_alloc(width: u32, height: u32) -> Option<FirmwareFb> {
    let mut buf = BUFFER.lock();
    let virtual_height = height * 2;

    // One batched request: physical size, virtual size, depth, RGB order,
    // allocate, pitch.
    let words: [u32; 30] = [
        30 * 4,
        0,
        tags::SET_PHYSICAL_WH, 8, 0, width, height,
        tags::SET_VIRTUAL_WH, 8, 0, width, virtual_height,
        tags::SET_DEPTH, 4, 0, 32,
        tags::SET_PIXEL_ORDER, 4, 0, 1, // RGB
        tags::ALLOCATE_BUFFER, 8, 0, 4096, 0,
        tags::GET_PITCH, 4, 0, 0,
        tags::END,
    ];
    buf.0[..30].copy_from_slice(&words);

    if !call(&mut buf) {
        return None;
    }

    // Bus address → ARM physical.
    let base = (buf.0[23] & 0x3FFF_FFFF) as usize;
    let pitch = buf.0[28];
    let got_virtual = buf.0[11];
    if base == 0 || pitch == 0 {
        return None;
    }
    Some(FirmwareFb {
        base,
        width: buf.0[5],
        height: buf.0[6],
        pitch,
        virtual_height: got_virtual,
    })
}

/// Move the display origin inside the virtual framebuffer.
pub fn fb_set_virtual_offset(x: u32, y: u32) -> bool {
    let mut values = [x, y];
    property(tags::SET_VIRTUAL_OFFSET, &mut values)
}
