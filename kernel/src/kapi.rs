//! Kernel implementation of the userspace API.
//!
//! One [`KernelApi`] singleton implements the [`Kapi`] dispatch table;
//! every program gets a borrowed reference to it for its whole lifetime.
//! File handles are a small path-keyed table — the filesystem below is
//! path-based, so a handle just pins the name and caches the size.

use alloc::string::String;
use kikios_storage::FsError;
use kikios_userlib::{DirInfo, Fd, Kapi, KapiError, UsbDeviceInfo, UsbSpeed};
use spin::Mutex;

fn map_fs_err(e: FsError) -> KapiError {
    match e {
        FsError::NotFound => KapiError::NotFound,
        FsError::IsADirectory => KapiError::IsADirectory,
        FsError::NotADirectory => KapiError::NotADirectory,
        FsError::NotEmpty => KapiError::NotEmpty,
        FsError::IOError => KapiError::IoError,
        FsError::OutOfSpace => KapiError::OutOfSpace,
        FsError::NameTooLong => KapiError::NameTooLong,
    }
}

/// One open file.
struct OpenFile {
    path: String,
    size: u32,
}

const MAX_OPEN_FILES: usize = 16;
const NO_FILE: Option<OpenFile> = None;

static FD_TABLE: Mutex<[Option<OpenFile>; MAX_OPEN_FILES]> = Mutex::new([NO_FILE; MAX_OPEN_FILES]);

/// The kernel's API surface.
pub struct KernelApi;

/// Singleton handed to every program.
pub static KAPI: KernelApi = KernelApi;

/// The fat reference the loader passes to program entry points.
pub static KAPI_REF: &'static (dyn Kapi + Sync) = &KAPI;

impl KernelApi {
    fn alloc_fd(&self, path: &str, size: u32) -> Result<Fd, KapiError> {
        let mut table = FD_TABLE.lock();
        for (i, slot) in table.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(OpenFile {
                    path: String::from(path),
                    size,
                });
                return Ok(Fd(i as u32));
            }
        }
        Err(KapiError::TooManyOpenFiles)
    }

    fn with_fd<R>(&self, fd: Fd, f: impl FnOnce(&mut OpenFile) -> R) -> Result<R, KapiError> {
        let mut table = FD_TABLE.lock();
        match table.get_mut(fd.0 as usize).and_then(|s| s.as_mut()) {
            Some(file) => Ok(f(file)),
            None => Err(KapiError::BadHandle),
        }
    }
}

impl Kapi for KernelApi {
    // ── Console ─────────────────────────────────────────────────────

    fn putc(&self, c: char) {
        crate::console::putc(c);
    }

    fn puts(&self, s: &str) {
        crate::console::puts(s);
    }

    fn clear(&self) {
        crate::console::with_console(|con| con.clear());
    }

    fn set_cursor(&self, row: usize, col: usize) {
        crate::console::with_console(|con| con.set_cursor(row, col));
    }

    fn cursor(&self) -> (usize, usize) {
        crate::console::with_console(|con| con.cursor()).unwrap_or((0, 0))
    }

    fn set_color(&self, fg: u32, bg: u32) {
        crate::console::with_console(|con| con.set_color(fg, bg));
    }

    fn console_rows(&self) -> usize {
        crate::console::with_console(|con| con.rows()).unwrap_or(0)
    }

    fn console_cols(&self) -> usize {
        crate::console::with_console(|con| con.cols()).unwrap_or(0)
    }

    fn clear_to_eol(&self) {
        crate::console::with_console(|con| con.clear_to_eol());
    }

    fn clear_region(&self, row0: usize, col0: usize, row1: usize, col1: usize) {
        crate::console::with_console(|con| con.clear_region(row0, col0, row1, col1));
    }

    // ── Input ───────────────────────────────────────────────────────

    fn getc(&self) -> Option<u32> {
        crate::hal::keyboard_getc()
    }

    fn has_key(&self) -> bool {
        crate::hal::has_key()
    }

    // ── Time and scheduling ─────────────────────────────────────────

    fn sleep_ms(&self, ms: u32) {
        crate::time::sleep_ms(ms);
    }

    fn yield_now(&self) {
        crate::sched::yield_now();
    }

    fn uptime_ms(&self) -> u64 {
        crate::time::uptime_ms()
    }

    // ── Processes ───────────────────────────────────────────────────

    fn exec(&self, path: &str, args: &[&str]) -> Result<i32, KapiError> {
        crate::loader::exec(path, args)
    }

    // ── Memory ──────────────────────────────────────────────────────

    fn alloc(&self, size: usize) -> Result<core::ptr::NonNull<u8>, KapiError> {
        core::ptr::NonNull::new(crate::memory::ALLOCATOR.malloc(size)).ok_or(KapiError::NoMemory)
    }

    unsafe fn free(&self, ptr: core::ptr::NonNull<u8>) {
        unsafe { crate::memory::ALLOCATOR.free(ptr.as_ptr()) };
    }

    // ── Filesystem ──────────────────────────────────────────────────

    fn open(&self, path: &str) -> Result<Fd, KapiError> {
        let stat = crate::fs::with_volume(|v| v.stat(path)).map_err(map_fs_err)?;
        if stat.is_dir {
            return Err(KapiError::IsADirectory);
        }
        self.alloc_fd(path, stat.size)
    }

    fn create(&self, path: &str) -> Result<Fd, KapiError> {
        crate::fs::with_volume(|v| v.write_file(path, &[])).map_err(map_fs_err)?;
        self.alloc_fd(path, 0)
    }

    fn close(&self, fd: Fd) {
        if let Some(slot) = FD_TABLE.lock().get_mut(fd.0 as usize) {
            *slot = None;
        }
    }

    fn file_size(&self, fd: Fd) -> Result<u32, KapiError> {
        self.with_fd(fd, |f| f.size)
    }

    fn is_dir(&self, path: &str) -> bool {
        crate::fs::with_volume(|v| v.stat(path))
            .map(|s| s.is_dir)
            .unwrap_or(false)
    }

    fn read(&self, fd: Fd, buf: &mut [u8], offset: u32) -> Result<usize, KapiError> {
        let path = self.with_fd(fd, |f| f.path.clone())?;
        crate::fs::with_volume(|v| v.read_file(&path, buf, offset)).map_err(map_fs_err)
    }

    fn write(&self, fd: Fd, data: &[u8]) -> Result<usize, KapiError> {
        let path = self.with_fd(fd, |f| f.path.clone())?;
        crate::fs::with_volume(|v| v.write_file(&path, data)).map_err(map_fs_err)?;
        let _ = self.with_fd(fd, |f| f.size = data.len() as u32);
        Ok(data.len())
    }

    fn readdir(&self, path: &str, index: usize) -> Result<Option<DirInfo>, KapiError> {
        let entries = crate::fs::with_volume(|v| v.list_dir(path)).map_err(map_fs_err)?;
        Ok(entries.into_iter().nth(index).map(|(name, stat)| {
            let mut info = DirInfo {
                name: [0; 256],
                name_len: 0,
                size: stat.size,
                is_dir: stat.is_dir,
            };
            let n = name.len().min(info.name.len());
            info.name[..n].copy_from_slice(&name.as_bytes()[..n]);
            info.name_len = n;
            info
        }))
    }

    // ── Framebuffer ─────────────────────────────────────────────────

    fn fb_base(&self) -> *mut u32 {
        crate::hal::fb_info().map(|f| f.base as *mut u32).unwrap_or(core::ptr::null_mut())
    }

    fn fb_width(&self) -> u32 {
        crate::hal::fb_dimensions().0
    }

    fn fb_height(&self) -> u32 {
        crate::hal::fb_dimensions().1
    }

    fn font_data(&self) -> &'static [u8] {
        crate::console::font::data()
    }

    // ── USB introspection ───────────────────────────────────────────

    fn usb_device_count(&self) -> usize {
        crate::usb::device_count()
    }

    fn usb_device_info(&self, index: usize) -> Option<UsbDeviceInfo> {
        crate::usb::device_at(index).map(|d| UsbDeviceInfo {
            address: d.address,
            speed: match d.speed {
                crate::usb::UsbSpeed::High => UsbSpeed::High,
                crate::usb::UsbSpeed::Full => UsbSpeed::Full,
                crate::usb::UsbSpeed::Low => UsbSpeed::Low,
            },
            max_packet_size: d.max_packet_size,
            parent_hub: d.parent_hub,
            parent_port: d.parent_port,
            is_hub: d.is_hub,
            hub_ports: d.hub_ports,
        })
    }

    // ── Standard I/O ────────────────────────────────────────────────

    fn stdio_putc(&self, c: char) {
        crate::console::putc(c);
        crate::serial::write_byte(c as u8);
    }

    fn stdio_puts(&self, s: &str) {
        crate::console::puts(s);
        crate::serial::write_str(s);
    }
}
