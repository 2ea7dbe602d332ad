//! Block device contract.
//!
//! All block drivers speak 512-byte sectors and LBA addressing.  The
//! filesystem never sees a device larger than 2 TiB, so LBAs are `u32`
//! like the FAT32 on-disk format itself.

/// Sector size every driver in the system uses.
pub const SECTOR_SIZE: usize = 512;

/// Block-layer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// The transfer failed (timeout, CRC, controller error).
    Io,
    /// The request falls outside the device.
    OutOfRange,
}

/// Block device trait.
///
/// `buf` must hold `count` whole sectors.  Implementations return success
/// or failure only; partial transfers are reported as [`BlockError::Io`].
pub trait BlockDevice: Send + Sync {
    /// Read `count` sectors starting at `lba` into `buf`.
    fn read(&self, lba: u32, buf: &mut [u8], count: u32) -> Result<(), BlockError>;

    /// Write `count` sectors starting at `lba` from `buf`.
    fn write(&self, lba: u32, buf: &[u8], count: u32) -> Result<(), BlockError>;

    /// Total sectors on the device.
    fn sector_count(&self) -> u32;
}

/// RAM-backed block device.
///
/// Used by the host test suites and usable as a scratch disk on target.
pub struct MemBlockDevice {
    data: spin::Mutex<alloc::vec::Vec<u8>>,
}

impl MemBlockDevice {
    /// Create a zero-filled device of `sectors` sectors.
    pub fn new(sectors: u32) -> Self {
        let mut data = alloc::vec::Vec::new();
        data.resize(sectors as usize * SECTOR_SIZE, 0);
        MemBlockDevice {
            data: spin::Mutex::new(data),
        }
    }

    /// Snapshot the full device contents.
    pub fn snapshot(&self) -> alloc::vec::Vec<u8> {
        self.data.lock().clone()
    }
}

impl BlockDevice for MemBlockDevice {
    fn read(&self, lba: u32, buf: &mut [u8], count: u32) -> Result<(), BlockError> {
        let start = lba as usize * SECTOR_SIZE;
        let len = count as usize * SECTOR_SIZE;
        let data = self.data.lock();
        if start + len > data.len() || buf.len() < len {
            return Err(BlockError::OutOfRange);
        }
        buf[..len].copy_from_slice(&data[start..start + len]);
        Ok(())
    }

    fn write(&self, lba: u32, buf: &[u8], count: u32) -> Result<(), BlockError> {
        let start = lba as usize * SECTOR_SIZE;
        let len = count as usize * SECTOR_SIZE;
        let mut data = self.data.lock();
        if start + len > data.len() || buf.len() < len {
            return Err(BlockError::OutOfRange);
        }
        data[start..start + len].copy_from_slice(&buf[..len]);
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        (self.data.lock().len() / SECTOR_SIZE) as u32
    }
}
