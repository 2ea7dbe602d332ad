//! Framebuffer console.
//!
//! Characters are rendered into a one-row scratch buffer in cached RAM;
//! the buffer is flushed to the framebuffer as a single rectangle (2-D DMA
//! when the platform has it, per-scanline copies otherwise) when the
//! output moves to another row or scrolls.  Scrolling prefers the
//! hardware path — advancing the display origin inside a double-height
//! virtual framebuffer — and falls back to a software memmove.

pub mod font;

use crate::hal::FbInfo;
use alloc::vec;
use alloc::vec::Vec;
use font::{FONT_HEIGHT, FONT_WIDTH};
use spin::Mutex;

/// Cursor blink half-period in milliseconds.
const BLINK_MS: u64 = 500;

/// Console state over a framebuffer.
pub struct Console {
    fb: FbInfo,
    rows: usize,
    cols: usize,
    cursor_row: usize,
    cursor_col: usize,
    fg: u32,
    bg: u32,
    /// Pixel-granular Y origin into the virtual framebuffer.
    scroll_offset: u32,
    hw_scroll: bool,
    /// One row of pixels, flushed as a rectangle.
    line_buf: Vec<u32>,
    /// Row the line buffer currently belongs to; `usize::MAX` when clean.
    line_row: usize,
    min_col: usize,
    max_col: usize,
    cursor_drawn: bool,
    cursor_visible: bool,
}

impl Console {
    /// Build a console over `fb`.
    pub fn new(fb: FbInfo) -> Self {
        let cols = fb.width as usize / FONT_WIDTH;
        let rows = fb.height as usize / FONT_HEIGHT;
        let hw_scroll = fb.virtual_height >= fb.height * 2;
        let mut console = Console {
            fb,
            rows,
            cols,
            cursor_row: 0,
            cursor_col: 0,
            fg: crate::config::CONSOLE_FG,
            bg: crate::config::CONSOLE_BG,
            scroll_offset: 0,
            hw_scroll,
            line_buf: vec![0u32; cols * FONT_WIDTH * FONT_HEIGHT],
            line_row: usize::MAX,
            min_col: 0,
            max_col: 0,
            cursor_drawn: false,
            cursor_visible: true,
        };
        console.clear();
        console
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_row, self.cursor_col)
    }

    pub fn set_color(&mut self, fg: u32, bg: u32) {
        self.fg = fg;
        self.bg = bg;
    }

    pub fn colors(&self) -> (u32, u32) {
        (self.fg, self.bg)
    }

    /// Move the cursor (flushes pending output first).
    pub fn set_cursor(&mut self, row: usize, col: usize) {
        self.erase_cursor();
        self.flush_line();
        self.cursor_row = row.min(self.rows - 1);
        self.cursor_col = col.min(self.cols - 1);
    }

    fn pixel_width(&self) -> usize {
        self.cols * FONT_WIDTH
    }

    /// Framebuffer address of pixel `(x, y)` in display coordinates.
    fn fb_pixel(&self, x: usize, y: usize) -> *mut u32 {
        let abs_y = y + self.scroll_offset as usize;
        (self.fb.base + abs_y * self.fb.pitch as usize + x * 4) as *mut u32
    }

    fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, color: u32) {
        for row in 0..h {
            let dst = self.fb_pixel(x, y + row);
            if crate::hal::dma_available() {
                crate::hal::dma_fill(dst as usize, color, w * 4);
            } else {
                for i in 0..w {
                    unsafe { dst.add(i).write_volatile(color) };
                }
            }
        }
    }

    /// Render one glyph into the line buffer.
    fn render_glyph(&mut self, c: char, col: usize) {
        let glyph = font::glyph(c);
        let stride = self.pixel_width();
        for (gy, &bits) in glyph.iter().enumerate() {
            let base = gy * stride + col * FONT_WIDTH;
            for gx in 0..FONT_WIDTH {
                self.line_buf[base + gx] = if bits & (0x80 >> gx) != 0 {
                    self.fg
                } else {
                    self.bg
                };
            }
        }
    }

    /// Copy the dirty span of the line buffer to the framebuffer.
    fn flush_line(&mut self) {
        if self.line_row == usize::MAX || self.min_col > self.max_col {
            return;
        }
        let x = self.min_col * FONT_WIDTH;
        let w = (self.max_col - self.min_col + 1) * FONT_WIDTH;
        let y = self.line_row * FONT_HEIGHT;
        let stride = self.pixel_width();
        let src_base = self.line_buf.as_ptr() as usize + (x * 4);

        if crate::hal::dma_available() {
            crate::hal::dma_copy_2d(
                self.fb_pixel(x, y) as usize,
                self.fb.pitch as usize,
                src_base,
                stride * 4,
                w * 4,
                FONT_HEIGHT,
            );
        } else {
            for row in 0..FONT_HEIGHT {
                let src = (src_base + row * stride * 4) as *const u32;
                let dst = self.fb_pixel(x, y + row);
                unsafe { core::ptr::copy_nonoverlapping(src, dst, w) };
            }
        }
        self.line_row = usize::MAX;
        self.min_col = 0;
        self.max_col = 0;
    }

    fn touch(&mut self, col: usize) {
        if self.line_row == usize::MAX {
            self.line_row = self.cursor_row;
            self.min_col = col;
            self.max_col = col;
        } else {
            self.min_col = self.min_col.min(col);
            self.max_col = self.max_col.max(col);
        }
    }

    /// Write one character, handling control characters.
    pub fn putc(&mut self, c: char) {
        self.erase_cursor();
        match c {
            '\n' => {
                self.flush_line();
                self.cursor_col = 0;
                self.advance_row();
            }
            '\r' => self.cursor_col = 0,
            '\t' => {
                self.cursor_col = ((self.cursor_col / 8) + 1) * 8;
                if self.cursor_col >= self.cols {
                    self.flush_line();
                    self.cursor_col = 0;
                    self.advance_row();
                }
            }
            '\x08' => {
                // Backspace moves left without erasing.
                self.cursor_col = self.cursor_col.saturating_sub(1);
            }
            c => {
                // A character on a different row flushes the old row first.
                if self.line_row != usize::MAX && self.line_row != self.cursor_row {
                    self.flush_line();
                }
                let col = self.cursor_col;
                self.render_glyph(c, col);
                self.touch(col);
                self.cursor_col += 1;
                if self.cursor_col >= self.cols {
                    self.flush_line();
                    self.cursor_col = 0;
                    self.advance_row();
                }
            }
        }
    }

    /// Write a string.
    pub fn puts(&mut self, s: &str) {
        for c in s.chars() {
            self.putc(c);
        }
    }

    fn advance_row(&mut self) {
        if self.cursor_row + 1 < self.rows {
            self.cursor_row += 1;
        } else {
            self.scroll();
        }
    }

    /// Scroll one text row.
    fn scroll(&mut self) {
        self.flush_line();
        let row_bytes = FONT_HEIGHT * self.fb.pitch as usize;

        if self.hw_scroll {
            let next = self.scroll_offset + FONT_HEIGHT as u32;
            if next > self.fb.virtual_height - self.fb.height {
                // Out of virtual headroom: move the visible region back to
                // the top and restart the origin.
                let src = (self.fb.base + self.scroll_offset as usize * self.fb.pitch as usize
                    + row_bytes) as *const u8;
                let dst = self.fb.base as *mut u8;
                let visible = (self.fb.height as usize - FONT_HEIGHT) * self.fb.pitch as usize;
                unsafe { core::ptr::copy(src, dst, visible) };
                self.scroll_offset = 0;
            } else {
                self.scroll_offset = next;
            }
            if !crate::hal::fb_set_scroll_offset(self.scroll_offset) {
                // The origin update failed; fall back permanently.
                self.hw_scroll = false;
                self.scroll_offset = 0;
            }
        }

        if !self.hw_scroll {
            // Software path: move everything up a row.
            let src = (self.fb.base + row_bytes) as *const u8;
            let dst = self.fb.base as *mut u8;
            let len = (self.fb.height as usize - FONT_HEIGHT) * self.fb.pitch as usize;
            unsafe { core::ptr::copy(src, dst, len) };
        }

        // Clear the newly revealed bottom row.
        let bg = self.bg;
        self.fill_rect(
            0,
            (self.rows - 1) * FONT_HEIGHT,
            self.pixel_width(),
            FONT_HEIGHT,
            bg,
        );
    }

    /// Clear the screen and home the cursor.
    pub fn clear(&mut self) {
        self.line_row = usize::MAX;
        self.cursor_drawn = false;
        self.scroll_offset = 0;
        if self.hw_scroll {
            crate::hal::fb_set_scroll_offset(0);
        }
        let bg = self.bg;
        let (w, h) = (self.fb.width as usize, self.fb.height as usize);
        self.fill_rect(0, 0, w, h, bg);
        self.cursor_row = 0;
        self.cursor_col = 0;
    }

    /// Clear from the cursor to the end of the row.
    pub fn clear_to_eol(&mut self) {
        self.erase_cursor();
        self.flush_line();
        let (row, col) = (self.cursor_row, self.cursor_col);
        let bg = self.bg;
        self.fill_rect(
            col * FONT_WIDTH,
            row * FONT_HEIGHT,
            (self.cols - col) * FONT_WIDTH,
            FONT_HEIGHT,
            bg,
        );
    }

    /// Clear a rectangular region of cells, corners inclusive.
    pub fn clear_region(&mut self, row0: usize, col0: usize, row1: usize, col1: usize) {
        self.erase_cursor();
        self.flush_line();
        let row1 = row1.min(self.rows - 1);
        let col1 = col1.min(self.cols - 1);
        if row0 > row1 || col0 > col1 {
            return;
        }
        let bg = self.bg;
        self.fill_rect(
            col0 * FONT_WIDTH,
            row0 * FONT_HEIGHT,
            (col1 - col0 + 1) * FONT_WIDTH,
            (row1 - row0 + 1) * FONT_HEIGHT,
            bg,
        );
    }

    /// XOR the cursor cell.
    fn xor_cursor_cell(&mut self) {
        let mask = self.fg ^ self.bg;
        let x = self.cursor_col * FONT_WIDTH;
        let y = self.cursor_row * FONT_HEIGHT;
        for row in 0..FONT_HEIGHT {
            let p = self.fb_pixel(x, y + row);
            for i in 0..FONT_WIDTH {
                unsafe {
                    let v = p.add(i).read_volatile();
                    p.add(i).write_volatile(v ^ mask);
                }
            }
        }
    }

    fn erase_cursor(&mut self) {
        if self.cursor_drawn {
            self.xor_cursor_cell();
            self.cursor_drawn = false;
        }
    }

    /// Timer-driven cursor blink.
    pub fn blink(&mut self) {
        self.flush_line();
        self.cursor_visible = !self.cursor_visible;
        if self.cursor_visible != self.cursor_drawn {
            self.xor_cursor_cell();
            self.cursor_drawn = self.cursor_visible;
        }
    }
}

static CONSOLE: Mutex<Option<Console>> = Mutex::new(None);

/// Bring up the global console over the HAL framebuffer.
pub fn init() {
    match crate::hal::fb_init(crate::config::platform::FB_WIDTH, crate::config::platform::FB_HEIGHT)
    {
        Some(fb) => {
            crate::serial_println!(
                "[CON] {}x{} fb at {:#x}, virtual height {}",
                fb.width,
                fb.height,
                fb.base,
                fb.virtual_height
            );
            *CONSOLE.lock() = Some(Console::new(fb));
        }
        None => {
            crate::serial_println!("[CON] no framebuffer, console disabled");
        }
    }
}

/// Run `f` against the console if one exists.
pub fn with_console<R>(f: impl FnOnce(&mut Console) -> R) -> Option<R> {
    crate::interrupts::without_interrupts(|| CONSOLE.lock().as_mut().map(f))
}

/// Write a character.
pub fn putc(c: char) {
    with_console(|con| con.putc(c));
}

/// Write a string.
pub fn puts(s: &str) {
    with_console(|con| con.puts(s));
}

/// The console's current pixel scroll origin, for the crash renderer.
/// Never blocks; a busy console reports origin 0.
pub fn scroll_offset_for_crash() -> u32 {
    CONSOLE
        .try_lock()
        .and_then(|guard| guard.as_ref().map(|c| c.scroll_offset))
        .unwrap_or(0)
}

/// Timer hook: blink the cursor.  Skips the beat when the console is busy
/// rather than spin in interrupt context.
pub fn on_tick(tick: u64) {
    let blink_ticks = BLINK_MS / crate::config::TICK_MS as u64;
    if blink_ticks == 0 || tick % blink_ticks != 0 {
        return;
    }
    if let Some(mut guard) = CONSOLE.try_lock() {
        if let Some(con) = guard.as_mut() {
            con.blink();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_console(cols: usize, rows: usize) -> (Console, Vec<u32>) {
        let width = (cols * FONT_WIDTH) as u32;
        let height = (rows * FONT_HEIGHT) as u32;
        let mut pixels = vec![0u32; (width * height) as usize];
        let fb = FbInfo {
            base: pixels.as_mut_ptr() as usize,
            width,
            height,
            pitch: width * 4,
            virtual_height: height,
        };
        (Console::new(fb), pixels)
    }

    #[test]
    fn putc_tracks_cursor_and_line_buffer() {
        let (mut con, _pixels) = test_console(16, 4);
        con.puts("ab");
        assert_eq!(con.cursor(), (0, 2));
        // Two cells dirty on row 0, not yet flushed.
        assert_eq!((con.line_row, con.min_col, con.max_col), (0, 0, 1));
        con.putc('\n');
        assert_eq!(con.cursor(), (1, 0));
        // Newline flushed the row.
        assert_eq!(con.line_row, usize::MAX);
    }

    #[test]
    fn control_characters() {
        let (mut con, _pixels) = test_console(32, 4);
        con.puts("abcd");
        con.putc('\r');
        assert_eq!(con.cursor(), (0, 0));
        con.putc('\t');
        assert_eq!(con.cursor(), (0, 8));
        con.putc('\x08');
        assert_eq!(con.cursor(), (0, 7));
    }

    #[test]
    fn wrap_and_software_scroll() {
        let (mut con, pixels) = test_console(4, 2);
        // Fill both rows, then one more char forces a scroll.
        con.puts("aaaabbbb");
        assert_eq!(con.cursor(), (1, 0));
        con.puts("c");
        assert_eq!(con.cursor(), (1, 1));
        // 'b' glyph pixels moved to row 0.
        let stride = 4 * FONT_WIDTH;
        let row0_has_ink = (0..FONT_HEIGHT * stride)
            .any(|i| pixels[i] == crate::config::CONSOLE_FG);
        assert!(row0_has_ink);
    }

    #[test]
    fn flush_happens_on_row_change_via_set_cursor() {
        let (mut con, pixels) = test_console(8, 4);
        con.puts("hi");
        con.set_cursor(2, 0);
        // Flush wrote the glyphs to the framebuffer.
        let has_ink = pixels.iter().any(|&p| p == crate::config::CONSOLE_FG);
        assert!(has_ink);
        assert_eq!(con.cursor(), (2, 0));
    }

    #[test]
    fn clear_region_repaints_background() {
        let (mut con, pixels) = test_console(8, 4);
        con.puts("xxxxxxxx");
        con.clear_region(0, 0, 0, 7);
        let stride = 8 * FONT_WIDTH;
        let row0_clear = (0..FONT_HEIGHT * stride)
            .all(|i| pixels[i] == crate::config::CONSOLE_BG);
        assert!(row0_clear);
    }
}
