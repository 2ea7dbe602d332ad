//! Filesystem mount point.
//!
//! One FAT32 volume over the HAL block device, serialized behind a lock.
//! The filesystem is only ever entered from the kernel thread — never
//! from an interrupt handler.

use kikios_storage::{Fat32Volume, FsError};
use spin::Mutex;

static VOLUME: Mutex<Option<Fat32Volume<'static>>> = Mutex::new(None);

/// Mount the FAT32 volume on the platform block device.
pub fn init() -> Result<(), FsError> {
    let dev = crate::hal::block_device().ok_or(FsError::IOError)?;
    let volume = Fat32Volume::mount(dev)?;
    let info = *volume.info();
    *VOLUME.lock() = Some(volume);
    crate::serial_println!(
        "[FS] FAT32 mounted: {} clusters of {} bytes, root at cluster {}",
        info.total_clusters,
        info.sectors_per_cluster as u32 * 512,
        info.root_cluster
    );
    Ok(())
}

/// Run `f` against the mounted volume.
pub fn with_volume<R>(f: impl FnOnce(&mut Fat32Volume<'static>) -> Result<R, FsError>) -> Result<R, FsError> {
    let mut guard = VOLUME.lock();
    match guard.as_mut() {
        Some(volume) => f(volume),
        None => Err(FsError::IOError),
    }
}

/// Whether a filesystem is mounted.
pub fn is_mounted() -> bool {
    VOLUME.lock().is_some()
}
