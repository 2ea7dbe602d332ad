//! Virtio-mmio transport and virtqueue.
//!
//! The QEMU `virt` machine strings 32 virtio-mmio transport windows below
//! `0x0A00_0000`; [`scan`] probes each for the magic and a device ID.
//! Queues are the split layout: a descriptor table, an available ring the
//! driver fills, and a used ring the device fills, with release/acquire
//! fences between data and index updates.

use crate::arch::mmio_read32;
use crate::config::platform::{VIRTIO_MMIO_BASE, VIRTIO_MMIO_SLOTS, VIRTIO_MMIO_STRIDE};
use crate::memory::DmaBuffer;
use core::sync::atomic::{fence, Ordering};

/// "virt" in little-endian.
const MAGIC: u32 = 0x7472_6976;

/// Device IDs this kernel knows.
pub const DEVICE_ID_BLOCK: u32 = 2;
pub const DEVICE_ID_INPUT: u32 = 18;

/// MMIO register offsets (virtio 1.x, non-legacy).
#[allow(dead_code)]
pub mod regs {
    pub const MAGIC_VALUE: usize = 0x000;
    pub const VERSION: usize = 0x004;
    pub const DEVICE_ID: usize = 0x008;
    pub const VENDOR_ID: usize = 0x00C;
    pub const DEVICE_FEATURES: usize = 0x010;
    pub const DEVICE_FEATURES_SEL: usize = 0x014;
    pub const DRIVER_FEATURES: usize = 0x020;
    pub const DRIVER_FEATURES_SEL: usize = 0x024;
    pub const QUEUE_SEL: usize = 0x030;
    pub const QUEUE_NUM_MAX: usize = 0x034;
    pub const QUEUE_NUM: usize = 0x038;
    pub const QUEUE_READY: usize = 0x044;
    pub const QUEUE_NOTIFY: usize = 0x050;
    pub const INTERRUPT_STATUS: usize = 0x060;
    pub const INTERRUPT_ACK: usize = 0x064;
    pub const STATUS: usize = 0x070;
    pub const QUEUE_DESC_LOW: usize = 0x080;
    pub const QUEUE_DESC_HIGH: usize = 0x084;
    pub const QUEUE_DRIVER_LOW: usize = 0x090;
    pub const QUEUE_DRIVER_HIGH: usize = 0x094;
    pub const QUEUE_DEVICE_LOW: usize = 0x0A0;
    pub const QUEUE_DEVICE_HIGH: usize = 0x0A4;
    pub const CONFIG: usize = 0x100;
}

/// Device status bits.
pub mod status {
    pub const ACKNOWLEDGE: u32 = 1;
    pub const DRIVER: u32 = 2;
    pub const DRIVER_OK: u32 = 4;
    pub const FEATURES_OK: u32 = 8;
    pub const FAILED: u32 = 128;
}

/// Descriptor flags.
pub mod desc_flags {
    /// Buffer continues via the next field.
    pub const NEXT: u16 = 1;
    /// Buffer is write-only (device writes, driver reads).
    pub const WRITE: u16 = 2;
}

/// A probed transport window.
#[derive(Debug, Clone, Copy)]
pub struct Transport {
    pub base: usize,
    pub slot: usize,
    pub device_id: u32,
}

impl Transport {
    pub fn read(&self, off: usize) -> u32 {
        unsafe { mmio_read32(self.base + off) }
    }

    pub fn write(&self, off: usize, v: u32) {
        unsafe { crate::arch::mmio_write32(self.base + off, v) }
    }

    /// Read one byte of device-specific config space.
    pub fn config_u8(&self, off: usize) -> u8 {
        (unsafe { mmio_read32(self.base + regs::CONFIG + (off & !3)) } >> ((off & 3) * 8)) as u8
    }

    /// Write one byte of device-specific config space.
    pub fn config_write_u8(&self, off: usize, v: u8) {
        unsafe {
            core::ptr::write_volatile((self.base + regs::CONFIG + off) as *mut u8, v);
        }
    }

    /// The HAL IRQ number of this transport.
    pub fn irq(&self) -> u32 {
        crate::config::platform::VIRTIO_IRQ_BASE + self.slot as u32
    }

    /// Acknowledge all pending interrupt causes.
    pub fn ack_interrupt(&self) {
        let pending = self.read(regs::INTERRUPT_STATUS);
        self.write(regs::INTERRUPT_ACK, pending);
    }
}

/// Probe every window for a device with `device_id`.
pub fn scan(device_id: u32) -> impl Iterator<Item = Transport> {
    (0..VIRTIO_MMIO_SLOTS).filter_map(move |slot| {
        let base = VIRTIO_MMIO_BASE + slot * VIRTIO_MMIO_STRIDE;
        let t = Transport {
            base,
            slot,
            device_id,
        };
        if t.read(regs::MAGIC_VALUE) != MAGIC {
            return None;
        }
        if t.read(regs::DEVICE_ID) != device_id {
            return None;
        }
        Some(t)
    })
}

/// Queue depth used for every device in this kernel.
pub const QUEUE_SIZE: usize = 16;

/// A virtqueue descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtqDesc {
    pub addr: u64,
    pub len: u32,
    pub flags: u16,
    pub next: u16,
}

/// One used-ring element.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtqUsedElem {
    pub id: u32,
    pub len: u32,
}

/// Driver-side state for one split virtqueue.
///
/// The rings live in one DMA allocation: descriptors, then the available
/// ring, then the used ring at a 4-byte boundary.
pub struct VirtQueue {
    mem: DmaBuffer,
    desc: *mut VirtqDesc,
    avail_idx: *mut u16,
    avail_ring: *mut u16,
    used_idx: *const u16,
    used_ring: *const VirtqUsedElem,
    last_used: u16,
    next_avail: u16,
}

// One owner at a time; the input ISR and the kernel thread never share a
// queue without the driver's own lock.
unsafe impl Send for VirtQueue {}

const DESC_BYTES: usize = QUEUE_SIZE * core::mem::size_of::<VirtqDesc>();
const AVAIL_BYTES: usize = 4 + 2 * QUEUE_SIZE + 2;
const USED_OFF: usize = (DESC_BYTES + AVAIL_BYTES + 3) & !3;
const USED_BYTES: usize = 4 + 8 * QUEUE_SIZE + 2;

impl VirtQueue {
    /// Allocate the rings and register them with the transport's queue 0.
    pub fn new(transport: &Transport) -> Option<Self> {
        let mem = DmaBuffer::new(USED_OFF + USED_BYTES, 4096)?;
        let base = mem.addr();

        transport.write(regs::QUEUE_SEL, 0);
        if transport.read(regs::QUEUE_NUM_MAX) < QUEUE_SIZE as u32 {
            return None;
        }
        transport.write(regs::QUEUE_NUM, QUEUE_SIZE as u32);
        transport.write(regs::QUEUE_DESC_LOW, base as u32);
        transport.write(regs::QUEUE_DESC_HIGH, (base as u64 >> 32) as u32);
        transport.write(regs::QUEUE_DRIVER_LOW, (base + DESC_BYTES) as u32);
        transport.write(regs::QUEUE_DRIVER_HIGH, ((base + DESC_BYTES) as u64 >> 32) as u32);
        transport.write(regs::QUEUE_DEVICE_LOW, (base + USED_OFF) as u32);
        transport.write(regs::QUEUE_DEVICE_HIGH, ((base + USED_OFF) as u64 >> 32) as u32);
        transport.write(regs::QUEUE_READY, 1);

        Some(VirtQueue {
            desc: base as *mut VirtqDesc,
            avail_idx: (base + DESC_BYTES + 2) as *mut u16,
            avail_ring: (base + DESC_BYTES + 4) as *mut u16,
            used_idx: (base + USED_OFF + 2) as *const u16,
            used_ring: (base + USED_OFF + 4) as *const VirtqUsedElem,
            last_used: 0,
            next_avail: 0,
            mem,
        })
    }

    /// Fill descriptor `i`.
    pub fn set_desc(&mut self, i: usize, addr: usize, len: u32, flags: u16, next: u16) {
        unsafe {
            self.desc.add(i).write_volatile(VirtqDesc {
                addr: addr as u64,
                len,
                flags,
                next,
            });
        }
    }

    /// Publish descriptor-chain head `head` to the available ring.
    pub fn push_avail(&mut self, head: u16) {
        unsafe {
            self.avail_ring
                .add(self.next_avail as usize % QUEUE_SIZE)
                .write_volatile(head);
            // The device must see the ring entry before the index moves.
            fence(Ordering::Release);
            self.next_avail = self.next_avail.wrapping_add(1);
            self.avail_idx.write_volatile(self.next_avail);
        }
    }

    /// Pop one completion, if the device has produced any.
    pub fn pop_used(&mut self) -> Option<VirtqUsedElem> {
        unsafe {
            let idx = self.used_idx.read_volatile();
            if idx == self.last_used {
                return None;
            }
            fence(Ordering::Acquire);
            let elem = self
                .used_ring
                .add(self.last_used as usize % QUEUE_SIZE)
                .read_volatile();
            self.last_used = self.last_used.wrapping_add(1);
            Some(elem)
        }
    }

    /// Whether completions are waiting.
    pub fn has_used(&self) -> bool {
        unsafe { self.used_idx.read_volatile() != self.last_used }
    }

    /// Keep the rings alive for the device.
    pub fn ring_addr(&self) -> usize {
        self.mem.addr()
    }
}

/// Drive a transport through reset and feature negotiation (no features
/// are accepted), leaving it ready for queue setup.
pub fn negotiate(transport: &Transport) -> bool {
    transport.write(regs::STATUS, 0); // reset
    transport.write(regs::STATUS, status::ACKNOWLEDGE);
    transport.write(regs::STATUS, status::ACKNOWLEDGE | status::DRIVER);

    // Accept no feature bits on either word.
    transport.write(regs::DRIVER_FEATURES_SEL, 0);
    transport.write(regs::DRIVER_FEATURES, 0);
    transport.write(regs::DRIVER_FEATURES_SEL, 1);
    transport.write(regs::DRIVER_FEATURES, 0);

    let ok = status::ACKNOWLEDGE | status::DRIVER | status::FEATURES_OK;
    transport.write(regs::STATUS, ok);
    if transport.read(regs::STATUS) & status::FEATURES_OK == 0 {
        transport.write(regs::STATUS, status::FAILED);
        return false;
    }
    true
}

/// Flip the device live after queue setup.
pub fn driver_ok(transport: &Transport) {
    let s = transport.read(regs::STATUS);
    transport.write(regs::STATUS, s | status::DRIVER_OK);
}
