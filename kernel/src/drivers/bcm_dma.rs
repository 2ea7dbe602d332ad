//! BCM283x DMA engine.
//!
//! Channel 0 is reserved for framebuffer blits, channel 4 for EMMC
//! multi-block reads with DREQ pacing.  Control blocks are 32-byte
//! aligned and handed to the engine by bus address; the engine reads them
//! incoherently, so they are cache-cleaned before every start.

use crate::arch::{self, mmio_read32, mmio_write32};
use crate::config::platform::{DMA_BASE, DMA_CHANNEL_EMMC, DMA_CHANNEL_FB};

/// Per-channel register offsets (channels are 0x100 apart).
#[allow(dead_code)]
mod regs {
    pub const CS: usize = 0x00;
    pub const CONBLK_AD: usize = 0x04;
    pub const TI: usize = 0x08;
    pub const SOURCE_AD: usize = 0x0C;
    pub const DEST_AD: usize = 0x10;
    pub const TXFR_LEN: usize = 0x14;
    pub const STRIDE: usize = 0x18;
    pub const NEXTCONBK: usize = 0x1C;
    pub const DEBUG: usize = 0x20;
}

/// Global channel-enable register.
const ENABLE: usize = 0xFF0;

/// Control/status bits.
pub mod cs {
    pub const ACTIVE: u32 = 1 << 0;
    pub const END: u32 = 1 << 1;
    pub const INT: u32 = 1 << 2;
    pub const ERROR: u32 = 1 << 8;
    pub const WAIT_FOR_OUTSTANDING: u32 = 1 << 28;
    pub const RESET: u32 = 1 << 31;
    pub const PRIORITY_SHIFT: u32 = 16;
    pub const PANIC_PRIORITY_SHIFT: u32 = 20;
}

/// Transfer-information bits.
pub mod ti {
    pub const INTEN: u32 = 1 << 0;
    pub const TDMODE: u32 = 1 << 1;
    pub const WAIT_RESP: u32 = 1 << 3;
    pub const DEST_INC: u32 = 1 << 4;
    pub const DEST_WIDTH: u32 = 1 << 5;
    pub const SRC_INC: u32 = 1 << 8;
    pub const SRC_WIDTH: u32 = 1 << 9;
    pub const SRC_DREQ: u32 = 1 << 10;
    pub const PERMAP_SHIFT: u32 = 16;
}

/// Bounded completion wait: 5 s at 1 µs polls.
const COMPLETION_TIMEOUT_US: u32 = 5_000_000;

/// A DMA control block, in the engine's native layout.
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlBlock {
    pub ti: u32,
    pub source_ad: u32,
    pub dest_ad: u32,
    pub txfr_len: u32,
    pub stride: u32,
    pub nextconbk: u32,
    _reserved: [u32; 2],
}

/// RAM address as seen by the DMA engine (uncached SDRAM alias).
pub fn bus_address(addr: usize) -> u32 {
    addr as u32 | 0xC000_0000
}

fn chan_read(ch: usize, off: usize) -> u32 {
    unsafe { mmio_read32(DMA_BASE + ch * 0x100 + off) }
}

fn chan_write(ch: usize, off: usize, v: u32) {
    unsafe { mmio_write32(DMA_BASE + ch * 0x100 + off, v) }
}

/// Enable the channels this kernel uses.
pub fn init() {
    unsafe {
        let enabled = mmio_read32(DMA_BASE + ENABLE);
        mmio_write32(
            DMA_BASE + ENABLE,
            enabled | (1 << DMA_CHANNEL_FB) | (1 << DMA_CHANNEL_EMMC),
        );
    }
    crate::serial_println!(
        "[DMA] channels {} (fb) and {} (emmc) enabled",
        DMA_CHANNEL_FB,
        DMA_CHANNEL_EMMC
    );
}

/// Kick a channel with a prepared control block.
pub fn start(ch: usize, cb: &ControlBlock, priority: u32, panic_priority: u32) {
    // The engine fetches the block from RAM.
    arch::cache_clean_range(cb as *const _ as usize, core::mem::size_of::<ControlBlock>());

    chan_write(ch, regs::CS, cs::RESET);
    chan_write(ch, regs::CONBLK_AD, bus_address(cb as *const _ as usize));
    chan_write(
        ch,
        regs::CS,
        cs::ACTIVE
            | cs::WAIT_FOR_OUTSTANDING
            | (priority << cs::PRIORITY_SHIFT)
            | (panic_priority << cs::PANIC_PRIORITY_SHIFT),
    );
}

/// Poll a channel to completion.
pub fn wait(ch: usize) -> bool {
    let mut waited = 0;
    loop {
        let status = chan_read(ch, regs::CS);
        if status & cs::ERROR != 0 {
            return false;
        }
        if status & cs::END != 0 {
            chan_write(ch, regs::CS, cs::END);
            return true;
        }
        if waited >= COMPLETION_TIMEOUT_US {
            return false;
        }
        arch::delay_us(1);
        waited += 1;
    }
}

/// Linear memory copy on the framebuffer channel.
pub fn copy(dst: usize, src: usize, len: usize) -> bool {
    arch::cache_clean_range(src, len);
    arch::cache_clean_invalidate_range(dst, len);
    let cb = ControlBlock {
        ti: ti::SRC_INC | ti::SRC_WIDTH | ti::DEST_INC | ti::DEST_WIDTH | ti::WAIT_RESP,
        source_ad: bus_address(src),
        dest_ad: bus_address(dst),
        txfr_len: len as u32,
        ..Default::default()
    };
    start(DMA_CHANNEL_FB, &cb, 8, 15);
    wait(DMA_CHANNEL_FB)
}

/// 2-D copy: `h` rows of `w` bytes with independent pitches.
pub fn copy_2d(dst: usize, dst_pitch: usize, src: usize, src_pitch: usize, w: usize, h: usize) -> bool {
    arch::cache_clean_range(src, src_pitch * h);
    arch::cache_clean_invalidate_range(dst, dst_pitch * h);
    let cb = ControlBlock {
        ti: ti::TDMODE | ti::SRC_INC | ti::DEST_INC | ti::WAIT_RESP,
        source_ad: bus_address(src),
        dest_ad: bus_address(dst),
        // 2-D mode: YLENGTH is "rows minus one", XLENGTH bytes per row.
        txfr_len: (((h as u32 - 1) & 0x3FFF) << 16) | (w as u32 & 0xFFFF),
        stride: ((((dst_pitch - w) as u32) & 0xFFFF) << 16) | (((src_pitch - w) as u32) & 0xFFFF),
        ..Default::default()
    };
    start(DMA_CHANNEL_FB, &cb, 8, 15);
    wait(DMA_CHANNEL_FB)
}

/// Fill `len` bytes at `dst` with a 32-bit pattern.
pub fn fill(dst: usize, value: u32, len: usize) -> bool {
    // The source never increments: one cached word, cleaned to RAM.
    let pattern = value;
    arch::cache_clean_range(&pattern as *const u32 as usize, 4);
    arch::cache_clean_invalidate_range(dst, len);
    let cb = ControlBlock {
        ti: ti::DEST_INC | ti::DEST_WIDTH | ti::WAIT_RESP,
        source_ad: bus_address(&pattern as *const u32 as usize),
        dest_ad: bus_address(dst),
        txfr_len: len as u32,
        ..Default::default()
    };
    start(DMA_CHANNEL_FB, &cb, 8, 15);
    wait(DMA_CHANNEL_FB)
}

/// DREQ-paced read from a peripheral data register into RAM, used by the
/// EMMC multi-block path on channel 4.
///
/// The caller invalidates the destination before and after; `src_bus` is
/// the peripheral's bus address and never increments.
pub fn start_peripheral_read(src_bus: u32, dst: usize, len: usize, dreq: u32, cb: &mut ControlBlock) {
    *cb = ControlBlock {
        ti: ti::DEST_INC | ti::WAIT_RESP | ti::SRC_DREQ | (dreq << ti::PERMAP_SHIFT),
        source_ad: src_bus,
        dest_ad: bus_address(dst),
        txfr_len: len as u32,
        ..Default::default()
    };
    start(DMA_CHANNEL_EMMC, cb, 8, 15);
}

/// Wait out an EMMC transfer started with [`start_peripheral_read`].
pub fn wait_peripheral_read() -> bool {
    wait(DMA_CHANNEL_EMMC)
}
