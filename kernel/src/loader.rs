//! Flat-binary program loader.
//!
//! `exec` reads an image from the filesystem into the reserved window
//! below the stack region, marshals argv, spawns a process around the
//! image's entry point (offset 0), and blocks until it exits.  Each
//! nesting level of `exec` owns a fixed slice of the window, so a
//! program can run another program without clobbering itself.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use kikios_userlib::KapiError;

/// Active exec nesting depth; selects the load slice.
static DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Marshalled argv: NUL-terminated strings plus the pointer array, kept
/// alive for the child's lifetime by the blocking parent.
struct Argv {
    _bytes: Vec<u8>,
    pointers: Vec<*const u8>,
}

fn marshal_argv(path: &str, args: &[&str]) -> Argv {
    let mut bytes = Vec::new();
    let mut offsets = Vec::new();
    for s in core::iter::once(path).chain(args.iter().copied()) {
        offsets.push(bytes.len());
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
    }
    let base = bytes.as_ptr();
    let pointers = offsets
        .into_iter()
        .map(|off| unsafe { base.add(off) } as *const u8)
        .collect();
    Argv {
        _bytes: bytes,
        pointers,
    }
}

/// Load and run the program at `path`, returning its exit code.
pub fn exec(path: &str, args: &[&str]) -> Result<i32, KapiError> {
    let image = crate::fs::with_volume(|v| v.read_file_to_vec(path)).map_err(|e| match e {
        kikios_storage::FsError::NotFound => KapiError::NoSuchProgram,
        kikios_storage::FsError::IsADirectory => KapiError::IsADirectory,
        _ => KapiError::IoError,
    })?;
    if image.is_empty() {
        return Err(KapiError::NoSuchProgram);
    }

    let map = crate::memory::map().ok_or(KapiError::IoError)?;
    let slice_size = map.exec_size / crate::config::MAX_PROCESSES;

    let depth = DEPTH.fetch_add(1, Ordering::Relaxed);
    if depth >= crate::config::MAX_PROCESSES || image.len() > slice_size {
        DEPTH.fetch_sub(1, Ordering::Relaxed);
        return Err(KapiError::NoMemory);
    }
    let load_base = map.exec_base + depth * slice_size;

    unsafe {
        core::ptr::copy_nonoverlapping(image.as_ptr(), load_base as *mut u8, image.len());
    }
    // The instruction stream must observe the fresh bytes.
    crate::arch::icache_sync_range(load_base, image.len());

    let argv = marshal_argv(path, args);
    let name = path.rsplit('/').next().unwrap_or(path);

    // Save console state; the program may repaint everything.
    let saved = crate::console::with_console(|con| (con.cursor(), con.colors()));

    let slot = match crate::sched::spawn(
        name,
        load_base,
        &crate::kapi::KAPI_REF as *const &'static (dyn kikios_userlib::Kapi + Sync) as usize,
        argv.pointers.len(),
        argv.pointers.as_ptr() as usize,
        load_base,
        image.len(),
    ) {
        Some(slot) => slot,
        None => {
            DEPTH.fetch_sub(1, Ordering::Relaxed);
            return Err(KapiError::NoMemory);
        }
    };

    crate::serial_println!(
        "[EXEC] {} ({} bytes) at {:#x}, slot {}",
        name,
        image.len(),
        load_base,
        slot
    );

    let code = crate::sched::wait_for_exit(slot);
    DEPTH.fetch_sub(1, Ordering::Relaxed);

    // Put the console back the way the caller had it.
    if let Some(((row, col), (fg, bg))) = saved {
        crate::console::with_console(|con| {
            con.set_color(fg, bg);
            con.set_cursor(row, col);
        });
    }
    Ok(code)
}
