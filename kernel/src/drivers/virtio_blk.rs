//! Virtio block driver (QEMU block path).
//!
//! One request queue, polled completion.  Each request is the classic
//! three-descriptor chain: a 16-byte header the device reads, the data
//! buffer, and a one-byte status the device writes.

use super::virtio::{self, desc_flags, Transport, VirtQueue};
use crate::memory::DmaBuffer;
use kikios_storage::block::{BlockDevice, BlockError, SECTOR_SIZE};
use spin::Mutex;

/// Request types.
const VIRTIO_BLK_T_IN: u32 = 0;
const VIRTIO_BLK_T_OUT: u32 = 1;

/// Status byte values.
const VIRTIO_BLK_S_OK: u8 = 0;

/// Bounded completion wait (5 s at 1 µs polls).
const COMPLETION_TIMEOUT_US: u32 = 5_000_000;

struct BlkInner {
    transport: Transport,
    queue: VirtQueue,
    /// Header + status share one small DMA area.
    req: DmaBuffer,
    capacity_sectors: u64,
}

/// The virtio block device.
pub struct VirtioBlk {
    inner: Mutex<Option<BlkInner>>,
}

/// Singleton instance registered with the HAL.
pub static VIRTIO_BLK: VirtioBlk = VirtioBlk {
    inner: Mutex::new(None),
};

/// Probe and initialize the first virtio-blk transport.
pub fn init() -> bool {
    let Some(transport) = virtio::scan(virtio::DEVICE_ID_BLOCK).next() else {
        crate::serial_println!("[BLK] no virtio-blk transport found");
        return false;
    };
    if !virtio::negotiate(&transport) {
        crate::serial_println!("[BLK] feature negotiation failed");
        return false;
    }
    let Some(queue) = VirtQueue::new(&transport) else {
        crate::serial_println!("[BLK] queue setup failed");
        return false;
    };
    let Some(req) = DmaBuffer::new(32, 64) else {
        return false;
    };
    virtio::driver_ok(&transport);

    // Config space starts with the capacity in 512-byte sectors.
    let cap_lo = transport.read(virtio::regs::CONFIG) as u64;
    let cap_hi = transport.read(virtio::regs::CONFIG + 4) as u64;
    let capacity_sectors = (cap_hi << 32) | cap_lo;

    crate::serial_println!(
        "[BLK] virtio-blk at slot {}: {} MB",
        transport.slot,
        capacity_sectors * SECTOR_SIZE as u64 / (1024 * 1024)
    );

    *VIRTIO_BLK.inner.lock() = Some(BlkInner {
        transport,
        queue,
        req,
        capacity_sectors,
    });
    true
}

impl BlkInner {
    /// Submit one request and poll it to completion.
    fn transfer(&mut self, write: bool, lba: u32, buf: usize, len: usize) -> Result<(), BlockError> {
        // Header: type, reserved, sector.
        let hdr = self.req.addr();
        let status = hdr + 16;
        unsafe {
            core::ptr::write_volatile(
                hdr as *mut [u32; 4],
                [
                    if write { VIRTIO_BLK_T_OUT } else { VIRTIO_BLK_T_IN },
                    0,
                    lba,
                    0,
                ],
            );
            core::ptr::write_volatile(status as *mut u8, 0xFF);
        }

        let data_flags = if write {
            desc_flags::NEXT
        } else {
            desc_flags::NEXT | desc_flags::WRITE
        };
        self.queue.set_desc(0, hdr, 16, desc_flags::NEXT, 1);
        self.queue.set_desc(1, buf, len as u32, data_flags, 2);
        self.queue.set_desc(2, status, 1, desc_flags::WRITE, 0);
        self.queue.push_avail(0);
        self.transport.write(virtio::regs::QUEUE_NOTIFY, 0);

        let mut waited = 0;
        loop {
            if self.queue.pop_used().is_some() {
                break;
            }
            if waited >= COMPLETION_TIMEOUT_US {
                return Err(BlockError::Io);
            }
            crate::arch::delay_us(1);
            waited += 1;
        }
        self.transport.ack_interrupt();

        let st = unsafe { core::ptr::read_volatile(status as *const u8) };
        if st != VIRTIO_BLK_S_OK {
            return Err(BlockError::Io);
        }
        Ok(())
    }
}

impl BlockDevice for VirtioBlk {
    fn read(&self, lba: u32, buf: &mut [u8], count: u32) -> Result<(), BlockError> {
        let len = count as usize * SECTOR_SIZE;
        if buf.len() < len {
            return Err(BlockError::OutOfRange);
        }
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or(BlockError::Io)?;
        if lba as u64 + count as u64 > inner.capacity_sectors {
            return Err(BlockError::OutOfRange);
        }
        inner.transfer(false, lba, buf.as_mut_ptr() as usize, len)
    }

    fn write(&self, lba: u32, buf: &[u8], count: u32) -> Result<(), BlockError> {
        let len = count as usize * SECTOR_SIZE;
        if buf.len() < len {
            return Err(BlockError::OutOfRange);
        }
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or(BlockError::Io)?;
        if lba as u64 + count as u64 > inner.capacity_sectors {
            return Err(BlockError::OutOfRange);
        }
        inner.transfer(true, lba, buf.as_ptr() as usize, len)
    }

    fn sector_count(&self) -> u32 {
        self.inner
            .lock()
            .as_ref()
            .map(|i| i.capacity_sectors.min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }
}
