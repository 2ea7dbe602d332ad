//! Virtio input drivers: keyboard and tablet (QEMU).
//!
//! Each input device gets a 16-descriptor queue of 8-byte event buffers,
//! refilled as events are consumed.  The keyboard translates Linux
//! keycodes to characters through a pair of 128-entry tables with
//! shift/ctrl tracking; the tablet reports absolute coordinates scaled to
//! the framebuffer.
//!
//! Event delivery is interrupt-driven (`48 + slot`), with the same drain
//! path callable from `getc` polling.

use super::virtio::{self, desc_flags, Transport, VirtQueue};
use crate::memory::DmaBuffer;
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};
use kikios_userlib::keys;
use spin::Mutex;

/// Linux input event types.
const EV_KEY: u16 = 1;
const EV_ABS: u16 = 3;

/// Absolute axes.
const ABS_X: u16 = 0;
const ABS_Y: u16 = 1;

/// Button codes.
const BTN_LEFT: u16 = 0x110;
const BTN_RIGHT: u16 = 0x111;
const BTN_MIDDLE: u16 = 0x112;

/// Modifier keycodes.
const KEY_LEFTSHIFT: u16 = 42;
const KEY_RIGHTSHIFT: u16 = 54;
const KEY_LEFTCTRL: u16 = 29;
const KEY_RIGHTCTRL: u16 = 97;

/// Raw absolute-axis range reported by the QEMU tablet.
const ABS_RANGE: u32 = 32767;

/// Config-space selectors.
const CFG_SELECT: usize = 0;
const CFG_SUBSEL: usize = 1;
const CFG_SIZE: usize = 2;
const CFG_DATA: usize = 8;
/// Selector for the device name string.
const CFG_ID_NAME: u8 = 1;

/// One wire event.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct InputEvent {
    ev_type: u16,
    code: u16,
    value: u32,
}

/// Plain characters for each keycode, unshifted.  Zero means "no
/// character" (handled elsewhere or ignored).
#[rustfmt::skip]
static KEYMAP_NORMAL: [u8; 128] = [
    0, 0x1B, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 0x08, b'\t',
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0, b'a', b's',
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v',
    b'b', b'n', b'm', b',', b'.', b'/', 0, b'*', 0, b' ', 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, b'7', b'8', b'9', b'-', b'4', b'5', b'6', b'+', b'1',
    b'2', b'3', b'0', b'.', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Shifted variants.
#[rustfmt::skip]
static KEYMAP_SHIFTED: [u8; 128] = [
    0, 0x1B, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 0x08, b'\t',
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\n', 0, b'A', b'S',
    b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~', 0, b'|', b'Z', b'X', b'C', b'V',
    b'B', b'N', b'M', b'<', b'>', b'?', 0, b'*', 0, b' ', 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, b'7', b'8', b'9', b'-', b'4', b'5', b'6', b'+', b'1',
    b'2', b'3', b'0', b'.', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Special (non-character) keys, same under shift.
fn special_key(code: u16) -> Option<u32> {
    Some(match code {
        102 => keys::KEY_HOME,
        103 => keys::KEY_UP,
        104 => keys::KEY_PGUP,
        105 => keys::KEY_LEFT,
        106 => keys::KEY_RIGHT,
        107 => keys::KEY_END,
        108 => keys::KEY_DOWN,
        109 => keys::KEY_PGDN,
        110 => keys::KEY_INSERT,
        111 => keys::KEY_DELETE,
        _ => return None,
    })
}

/// Translate a key press to the value delivered through `getc`.
///
/// Ctrl folds letters onto control codes (Ctrl+A..Z → 1..26); shift picks
/// the shifted table; specials arrive as `keys::KEY_*` codes.
pub fn translate_keycode(code: u16, shift: bool, ctrl: bool) -> Option<u32> {
    if let Some(special) = special_key(code) {
        return Some(special);
    }
    let table = if shift { &KEYMAP_SHIFTED } else { &KEYMAP_NORMAL };
    let ch = *table.get(code as usize)?;
    if ch == 0 {
        return None;
    }
    if ctrl && ch.is_ascii_alphabetic() {
        return Some((ch.to_ascii_uppercase() - b'A' + 1) as u32);
    }
    Some(ch as u32)
}

/// Fixed-size single-producer/single-consumer key queue.  The producer is
/// the interrupt handler; on overflow the newest key is dropped.
struct KeyRing {
    slots: [AtomicU32; Self::LEN],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl KeyRing {
    const LEN: usize = 64;

    const fn new() -> Self {
        const ZERO: AtomicU32 = AtomicU32::new(0);
        KeyRing {
            slots: [ZERO; Self::LEN],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    fn push(&self, key: u32) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= Self::LEN {
            return; // full: drop the newest
        }
        self.slots[head % Self::LEN].store(key, Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
    }

    fn pop(&self) -> Option<u32> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        let key = self.slots[tail % Self::LEN].load(Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(key)
    }

    fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Relaxed) == self.head.load(Ordering::Acquire)
    }
}

static KEY_QUEUE: KeyRing = KeyRing::new();

/// Pointer state mirrored from tablet events.
static MOUSE_X: AtomicI32 = AtomicI32::new(0);
static MOUSE_Y: AtomicI32 = AtomicI32::new(0);
static MOUSE_BUTTONS: AtomicU32 = AtomicU32::new(0);

struct InputDev {
    transport: Transport,
    queue: VirtQueue,
    events: DmaBuffer,
    is_keyboard: bool,
    shift: bool,
    ctrl: bool,
}

static KEYBOARD: Mutex<Option<InputDev>> = Mutex::new(None);
static TABLET: Mutex<Option<InputDev>> = Mutex::new(None);

/// Read the device name from config space.
fn device_name(transport: &Transport, buf: &mut [u8; 64]) -> usize {
    transport.config_write_u8(CFG_SELECT, CFG_ID_NAME);
    transport.config_write_u8(CFG_SUBSEL, 0);
    let len = (transport.config_u8(CFG_SIZE) as usize).min(buf.len());
    for (i, slot) in buf.iter_mut().take(len).enumerate() {
        *slot = transport.config_u8(CFG_DATA + i);
    }
    len
}

fn setup_device(transport: Transport, is_keyboard: bool) -> Option<InputDev> {
    if !virtio::negotiate(&transport) {
        return None;
    }
    let mut queue = VirtQueue::new(&transport)?;
    let mut events = DmaBuffer::new(virtio::QUEUE_SIZE * 8, 64)?;
    events.clear();

    // Hand every event buffer to the device.
    for i in 0..virtio::QUEUE_SIZE {
        queue.set_desc(i, events.addr() + i * 8, 8, desc_flags::WRITE, 0);
        queue.push_avail(i as u16);
    }
    virtio::driver_ok(&transport);
    transport.write(virtio::regs::QUEUE_NOTIFY, 0);

    Some(InputDev {
        transport,
        queue,
        events,
        is_keyboard,
        shift: false,
        ctrl: false,
    })
}

impl InputDev {
    /// Drain completed events and requeue their buffers.
    fn drain(&mut self) {
        while let Some(elem) = self.queue.pop_used() {
            let idx = elem.id as usize % virtio::QUEUE_SIZE;
            let raw = &self.events.as_slice()[idx * 8..idx * 8 + 8];
            let event = InputEvent {
                ev_type: u16::from_le_bytes([raw[0], raw[1]]),
                code: u16::from_le_bytes([raw[2], raw[3]]),
                value: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            };
            self.handle_event(event);
            // Return the buffer to the device.
            self.queue.push_avail(idx as u16);
        }
        self.transport.write(virtio::regs::QUEUE_NOTIFY, 0);
        self.transport.ack_interrupt();
    }

    fn handle_event(&mut self, event: InputEvent) {
        match event.ev_type {
            EV_KEY if self.is_keyboard => {
                let pressed = event.value != 0;
                match event.code {
                    KEY_LEFTSHIFT | KEY_RIGHTSHIFT => self.shift = pressed,
                    KEY_LEFTCTRL | KEY_RIGHTCTRL => self.ctrl = pressed,
                    code if pressed => {
                        if let Some(key) = translate_keycode(code, self.shift, self.ctrl) {
                            KEY_QUEUE.push(key);
                        }
                    }
                    _ => {}
                }
            }
            EV_KEY => {
                let bit = match event.code {
                    BTN_LEFT => 1,
                    BTN_RIGHT => 2,
                    BTN_MIDDLE => 4,
                    _ => return,
                };
                if event.value != 0 {
                    MOUSE_BUTTONS.fetch_or(bit, Ordering::Relaxed);
                } else {
                    MOUSE_BUTTONS.fetch_and(!bit, Ordering::Relaxed);
                }
            }
            EV_ABS => {
                // Scale the raw range to framebuffer pixels.
                let (w, h) = crate::hal::fb_dimensions();
                match event.code {
                    ABS_X => {
                        MOUSE_X.store(
                            (event.value.min(ABS_RANGE) * w.max(1) / ABS_RANGE) as i32,
                            Ordering::Relaxed,
                        );
                    }
                    ABS_Y => {
                        MOUSE_Y.store(
                            (event.value.min(ABS_RANGE) * h.max(1) / ABS_RANGE) as i32,
                            Ordering::Relaxed,
                        );
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

fn irq_handler(_irq: u32) {
    if let Some(mut guard) = KEYBOARD.try_lock() {
        if let Some(dev) = guard.as_mut() {
            dev.drain();
        }
    }
    if let Some(mut guard) = TABLET.try_lock() {
        if let Some(dev) = guard.as_mut() {
            dev.drain();
        }
    }
}

/// Probe the virtio windows for input devices and start them.
pub fn init() {
    for transport in virtio::scan(virtio::DEVICE_ID_INPUT) {
        let mut name = [0u8; 64];
        let len = device_name(&transport, &mut name);
        let name = core::str::from_utf8(&name[..len]).unwrap_or("");
        let is_keyboard = name.contains("Keyboard") || name.contains("keyboard");

        let irq = transport.irq();
        let slot = transport.slot;
        match setup_device(transport, is_keyboard) {
            Some(dev) if is_keyboard => {
                crate::serial_println!("[INPUT] keyboard \"{}\" at slot {}", name, slot);
                *KEYBOARD.lock() = Some(dev);
            }
            Some(dev) => {
                crate::serial_println!("[INPUT] tablet \"{}\" at slot {}", name, slot);
                *TABLET.lock() = Some(dev);
            }
            None => {
                crate::serial_println!("[INPUT] device at slot {} failed setup", slot);
                continue;
            }
        }
        crate::interrupts::register_handler(irq, irq_handler);
        crate::interrupts::enable_irq(irq);
    }
}

/// Next key, draining pending events first.
pub fn getc() -> Option<u32> {
    if KEY_QUEUE.is_empty() {
        // Poll in case the interrupt path is quiet.
        if let Some(mut guard) = KEYBOARD.try_lock() {
            if let Some(dev) = guard.as_mut() {
                dev.drain();
            }
        }
    }
    KEY_QUEUE.pop()
}

/// Whether a key is buffered.
pub fn has_key() -> bool {
    !KEY_QUEUE.is_empty() || getc_peek()
}

fn getc_peek() -> bool {
    if let Some(mut guard) = KEYBOARD.try_lock() {
        if let Some(dev) = guard.as_mut() {
            dev.drain();
        }
    }
    !KEY_QUEUE.is_empty()
}

/// Current pointer state.
pub fn mouse_state() -> (i32, i32, u32) {
    (
        MOUSE_X.load(Ordering::Relaxed),
        MOUSE_Y.load(Ordering::Relaxed),
        MOUSE_BUTTONS.load(Ordering::Relaxed),
    )
}

/// Warp the pointer (until the next absolute event).
pub fn mouse_set_pos(x: i32, y: i32) {
    MOUSE_X.store(x, Ordering::Relaxed);
    MOUSE_Y.store(y, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keymap_basics() {
        // 'a' is keycode 30; 'b' 48; 'c' 46.
        assert_eq!(translate_keycode(30, false, false), Some('a' as u32));
        assert_eq!(translate_keycode(30, true, false), Some('A' as u32));
        // Ctrl+C → 0x03.
        assert_eq!(translate_keycode(46, false, true), Some(3));
        assert_eq!(translate_keycode(46, true, true), Some(3));
        // Shifted digits.
        assert_eq!(translate_keycode(2, true, false), Some('!' as u32));
        // Enter and backspace.
        assert_eq!(translate_keycode(28, false, false), Some('\n' as u32));
        assert_eq!(translate_keycode(14, false, false), Some(0x08));
    }

    #[test]
    fn specials_are_high_codes() {
        assert_eq!(translate_keycode(103, false, false), Some(keys::KEY_UP));
        assert_eq!(translate_keycode(111, true, false), Some(keys::KEY_DELETE));
        assert!(translate_keycode(103, false, false).unwrap() >= 0x100);
    }

    #[test]
    fn unknown_keycodes_yield_nothing() {
        assert_eq!(translate_keycode(127, false, false), None);
        assert_eq!(translate_keycode(42, false, false), None); // bare shift
    }

    #[test]
    fn key_ring_drops_newest_on_overflow() {
        let ring = KeyRing::new();
        for i in 0..KeyRing::LEN as u32 {
            ring.push(i);
        }
        // Full: this one must be dropped.
        ring.push(999);
        assert_eq!(ring.pop(), Some(0));
        for i in 1..KeyRing::LEN as u32 {
            assert_eq!(ring.pop(), Some(i));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn typed_sequence_scenario() {
        // "abc" + Ctrl-C arrives as 'a', 'b', 'c', 0x03.
        let ring = KeyRing::new();
        for &(code, ctrl) in &[(30u16, false), (48, false), (46, false), (46, true)] {
            if let Some(k) = translate_keycode(code, false, ctrl) {
                ring.push(k);
            }
        }
        assert_eq!(ring.pop(), Some('a' as u32));
        assert_eq!(ring.pop(), Some('b' as u32));
        assert_eq!(ring.pop(), Some('c' as u32));
        assert_eq!(ring.pop(), Some(0x03));
        assert_eq!(ring.pop(), None);
    }
}
