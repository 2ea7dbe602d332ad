//! KikiOS userspace library.
//!
//! Programs loaded by the kernel receive a reference to the kernel API
//! dispatch table (the [`Kapi`] trait) as their first argument.  Everything
//! a program can do — console output, key input, filesystem access, memory
//! allocation, spawning other programs — goes through that reference.
//!
//! This crate is shared between the kernel (which implements [`Kapi`]) and
//! programs (which consume it), so it carries no dependencies of its own.

#![no_std]

pub mod gap_buffer;
pub mod kapi;
pub mod keys;

pub use kapi::{DirInfo, Fd, Kapi, KapiError, UsbDeviceInfo, UsbSpeed};

/// Entry-point signature for flat-binary programs.
///
/// The kernel passes a pointer to a fat `&dyn Kapi` reference it owns; the
/// reference outlives the program.  `argv` is an array of `argc`
/// NUL-terminated strings.
pub type ProgramEntry =
    unsafe extern "C" fn(kapi: *const &'static dyn Kapi, argc: usize, argv: *const *const u8) -> i32;

/// Recover the kernel API reference inside a program entry point.
///
/// # Safety
///
/// `raw` must be the pointer the kernel passed to the program's entry.
pub unsafe fn kapi_from_raw(raw: *const &'static dyn Kapi) -> &'static dyn Kapi {
    unsafe { *raw }
}
