//! The kernel API dispatch table.
//!
//! The kernel owns a single [`Kapi`] implementation and hands every program
//! a borrowed reference to it.  Programs never call into kernel subsystems
//! directly; no kernel symbol other than this trait is visible to them.

/// Errors surfaced to programs by the kernel API.
///
/// Filesystem errors map one-to-one onto the filesystem's own taxonomy;
/// `NoMemory` covers allocation failure and `NoSuchProgram` a failed exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KapiError {
    NotFound,
    IsADirectory,
    NotADirectory,
    NotEmpty,
    IoError,
    OutOfSpace,
    NameTooLong,
    NoMemory,
    NoSuchProgram,
    BadHandle,
    TooManyOpenFiles,
}

/// An open-file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fd(pub u32);

/// One directory entry, as returned by [`Kapi::readdir`].
#[derive(Debug, Clone, Copy)]
pub struct DirInfo {
    /// Entry name bytes (UTF-8).
    pub name: [u8; 256],
    /// Length of the name in bytes.
    pub name_len: usize,
    /// File size in bytes (0 for directories).
    pub size: u32,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

impl DirInfo {
    /// The entry name as a string slice.
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len]).unwrap_or("?")
    }
}

/// USB bus speed of an enumerated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbSpeed {
    High,
    Full,
    Low,
}

/// Summary of one enumerated USB device, for `lsusb`-style listings.
#[derive(Debug, Clone, Copy)]
pub struct UsbDeviceInfo {
    /// Assigned bus address (1-based).
    pub address: u8,
    /// Negotiated speed.
    pub speed: UsbSpeed,
    /// Max packet size of endpoint 0.
    pub max_packet_size: u16,
    /// Address of the parent hub, 0 for the root port.
    pub parent_hub: u8,
    /// Port number on the parent hub.
    pub parent_port: u8,
    /// Whether the device is a hub.
    pub is_hub: bool,
    /// Downstream port count when `is_hub`.
    pub hub_ports: u8,
}

/// The kernel → userspace dispatch table.
///
/// All console coordinates are `(row, col)` character cells; colors are
/// `0x00RRGGBB`.  Key input distinguishes "no data" ([`Kapi::getc`]
/// returning `None`) from real input — an empty buffer is not an error.
pub trait Kapi {
    // ── Console ─────────────────────────────────────────────────────

    /// Write one character at the cursor, advancing it.
    fn putc(&self, c: char);
    /// Write a string at the cursor.
    fn puts(&self, s: &str);
    /// Clear the screen and home the cursor.
    fn clear(&self);
    /// Move the cursor.
    fn set_cursor(&self, row: usize, col: usize);
    /// Current cursor position.
    fn cursor(&self) -> (usize, usize);
    /// Set foreground and background colors for subsequent output.
    fn set_color(&self, fg: u32, bg: u32);
    /// Console height in rows.
    fn console_rows(&self) -> usize;
    /// Console width in columns.
    fn console_cols(&self) -> usize;
    /// Clear from the cursor to the end of the current row.
    fn clear_to_eol(&self);
    /// Clear a rectangular cell region (inclusive corners).
    fn clear_region(&self, row0: usize, col0: usize, row1: usize, col1: usize);

    // ── Input ───────────────────────────────────────────────────────

    /// Next key, or `None` when the buffer is empty.  Values below 0x100
    /// are characters; values at and above 0x100 are the `keys::KEY_*`
    /// specials.
    fn getc(&self) -> Option<u32>;
    /// Whether a key is waiting.
    fn has_key(&self) -> bool;

    // ── Time and scheduling ─────────────────────────────────────────

    /// Sleep at least `ms` milliseconds.
    fn sleep_ms(&self, ms: u32);
    /// Yield the processor to another ready process.
    fn yield_now(&self);
    /// Milliseconds since boot.
    fn uptime_ms(&self) -> u64;

    // ── Processes ───────────────────────────────────────────────────

    /// Load and run the flat binary at `path`, passing `args`.  Returns the
    /// program's exit code.
    fn exec(&self, path: &str, args: &[&str]) -> Result<i32, KapiError>;

    // ── Memory ──────────────────────────────────────────────────────

    /// Allocate `size` bytes from the kernel heap, 16-byte aligned.
    fn alloc(&self, size: usize) -> Result<core::ptr::NonNull<u8>, KapiError>;
    /// Release an allocation from [`Kapi::alloc`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc` on this same table and not be freed twice.
    unsafe fn free(&self, ptr: core::ptr::NonNull<u8>);

    // ── Filesystem ──────────────────────────────────────────────────

    /// Open an existing file.
    fn open(&self, path: &str) -> Result<Fd, KapiError>;
    /// Create (or truncate) a file and open it.
    fn create(&self, path: &str) -> Result<Fd, KapiError>;
    /// Close an open handle.
    fn close(&self, fd: Fd);
    /// Size in bytes of an open file.
    fn file_size(&self, fd: Fd) -> Result<u32, KapiError>;
    /// Whether `path` names a directory.
    fn is_dir(&self, path: &str) -> bool;
    /// Read up to `buf.len()` bytes at `offset`.
    fn read(&self, fd: Fd, buf: &mut [u8], offset: u32) -> Result<usize, KapiError>;
    /// Replace the file's contents with `data`.
    fn write(&self, fd: Fd, data: &[u8]) -> Result<usize, KapiError>;
    /// The `index`-th entry of the directory at `path`, in on-disk order.
    fn readdir(&self, path: &str, index: usize) -> Result<Option<DirInfo>, KapiError>;

    // ── Framebuffer ─────────────────────────────────────────────────

    /// Base of the visible framebuffer (`0x00RRGGBB` pixels).
    fn fb_base(&self) -> *mut u32;
    /// Framebuffer width in pixels.
    fn fb_width(&self) -> u32;
    /// Framebuffer height in pixels.
    fn fb_height(&self) -> u32;
    /// The console's glyph bitmaps: 16 bytes per glyph, ASCII order.
    fn font_data(&self) -> &'static [u8];

    // ── USB introspection ───────────────────────────────────────────

    /// Number of enumerated USB devices.
    fn usb_device_count(&self) -> usize;
    /// Info for the `index`-th device.
    fn usb_device_info(&self, index: usize) -> Option<UsbDeviceInfo>;

    // ── Standard I/O ────────────────────────────────────────────────

    /// Write one character to both the console and the serial log.
    fn stdio_putc(&self, c: char);
    /// Write a string to both the console and the serial log.
    fn stdio_puts(&self, s: &str);
}
