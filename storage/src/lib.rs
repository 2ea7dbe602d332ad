//! Storage subsystem for KikiOS.
//!
//! This crate provides the storage stack below the kernel API:
//! - Block device contract ([`block::BlockDevice`], 512-byte sectors)
//! - MBR partition table scan ([`partition`])
//! - FAT sector cache ([`cache`])
//! - FAT32 filesystem with long-filename support ([`fat32`])
//!
//! The crate is freestanding (`no_std` + `alloc`) and contains no MMIO;
//! the kernel injects the concrete block driver (EMMC on the Pi, virtio-blk
//! on QEMU) through the [`block::BlockDevice`] trait, which also makes the
//! whole filesystem testable on the host against an in-memory device.

#![no_std]

extern crate alloc;

pub mod block;
pub mod cache;
pub mod fat32;
pub mod partition;

pub use block::{BlockDevice, BlockError, SECTOR_SIZE};
pub use fat32::{Fat32Volume, FileStat};

/// Filesystem error taxonomy.
///
/// Media failures from the block layer collapse into `IOError`; everything
/// else is a semantic failure surfaced to the caller unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Path does not exist.
    NotFound,
    /// Operation needs a file but found a directory.
    IsADirectory,
    /// Operation needs a directory but found a file.
    NotADirectory,
    /// Directory still has entries besides `.` and `..`.
    NotEmpty,
    /// Block-layer read or write failed.
    IOError,
    /// No free cluster left.
    OutOfSpace,
    /// Name exceeds what a directory entry chain can carry.
    NameTooLong,
}

impl From<BlockError> for FsError {
    fn from(_: BlockError) -> Self {
        FsError::IOError
    }
}
