//! BCM2836-style two-tier interrupt controller (Raspberry Pi).
//!
//! Interrupts arrive through two blocks: the per-core ARM local controller
//! (generic timer, mailboxes) and the legacy VideoCore controller for
//! peripherals.  The VC basic-pending register carries the ARM-block bits,
//! shortcut copies of a few hot bank bits, and "more pending" flags for
//! the full bank registers.
//!
//! The unified HAL numbering is `0..7` ARM basic peripherals, `8..39`
//! bank 1, `40..71` bank 2.

use crate::arch::{mmio_read32, mmio_write32};
use crate::config::platform::{ARM_LOCAL_BASE, VC_IRQ_BASE};
use crate::sched::context::TrapFrame;

/// ARM local control block registers.
#[allow(dead_code)]
mod local {
    pub const CONTROL: usize = 0x00;
    pub const PRESCALER: usize = 0x08;
    pub const GPU_INT_ROUTING: usize = 0x0C;
    pub const TIMER_INT_CONTROL0: usize = 0x40;
    pub const MAILBOX_INT_CONTROL0: usize = 0x50;
    pub const CORE0_IRQ_SOURCE: usize = 0x60;
}

/// VideoCore interrupt controller registers.
#[allow(dead_code)]
mod vc {
    pub const PENDING_BASIC: usize = 0x00;
    pub const PENDING1: usize = 0x04;
    pub const PENDING2: usize = 0x08;
    pub const FIQ_CONTROL: usize = 0x0C;
    pub const ENABLE1: usize = 0x10;
    pub const ENABLE2: usize = 0x14;
    pub const ENABLE_BASIC: usize = 0x18;
    pub const DISABLE1: usize = 0x1C;
    pub const DISABLE2: usize = 0x20;
    pub const DISABLE_BASIC: usize = 0x24;
}

/// `CORE0_IRQ_SOURCE` bits.
const SRC_CNTPNS: u32 = 1 << 1;
const SRC_GPU: u32 = 1 << 8;

/// Basic-pending "more bits in bank N" flags.
const BASIC_PENDING1: u32 = 1 << 8;
const BASIC_PENDING2: u32 = 1 << 9;

/// Shortcut slots in the basic pending register: `(basic bit, HAL irq)`.
/// Bank 1 contributes bits {7, 9, 10, 18, 19}; bank 2 bits {21..25, 30}.
const SHORTCUTS: [(u32, u32); 11] = [
    (10, 8 + 7),
    (11, 8 + 9),
    (12, 8 + 10),
    (13, 8 + 18),
    (14, 8 + 19),
    (15, 40 + 21),
    (16, 40 + 22),
    (17, 40 + 23),
    (18, 40 + 24),
    (19, 40 + 25),
    (20, 40 + 30),
];

/// Bank-1 bits already serviced through shortcuts.
const BANK1_SHORTCUT_MASK: u32 = (1 << 7) | (1 << 9) | (1 << 10) | (1 << 18) | (1 << 19);
/// Bank-2 bits already serviced through shortcuts.
const BANK2_SHORTCUT_MASK: u32 =
    (1 << 21) | (1 << 22) | (1 << 23) | (1 << 24) | (1 << 25) | (1 << 30);

fn local_read(off: usize) -> u32 {
    unsafe { mmio_read32(ARM_LOCAL_BASE + off) }
}

fn local_write(off: usize, v: u32) {
    unsafe { mmio_write32(ARM_LOCAL_BASE + off, v) }
}

fn vc_read(off: usize) -> u32 {
    unsafe { mmio_read32(VC_IRQ_BASE + off) }
}

fn vc_write(off: usize, v: u32) {
    unsafe { mmio_write32(VC_IRQ_BASE + off, v) }
}

/// Initialize both tiers.
pub fn init() {
    // Local timer off the 19.2 MHz crystal, 1:1 prescale.
    local_write(local::CONTROL, 0);
    local_write(local::PRESCALER, 0x8000_0000);

    // Route GPU interrupts to core 0, nothing to FIQ.
    local_write(local::GPU_INT_ROUTING, 0);
    local_write(local::MAILBOX_INT_CONTROL0, 0);

    // Enable the non-secure physical timer on core 0.
    local_write(local::TIMER_INT_CONTROL0, SRC_CNTPNS);

    // Quiesce every VideoCore source until a driver asks for it.
    vc_write(vc::DISABLE1, 0xFFFF_FFFF);
    vc_write(vc::DISABLE2, 0xFFFF_FFFF);
    vc_write(vc::DISABLE_BASIC, 0xFF);
}

/// Claim and service pending interrupts for core 0.
pub fn dispatch(frame: &mut TrapFrame) {
    let src = local_read(local::CORE0_IRQ_SOURCE);

    if src & SRC_CNTPNS != 0 {
        crate::time::tick(frame);
    }

    if src & SRC_GPU == 0 {
        return;
    }

    let basic = vc_read(vc::PENDING_BASIC);

    // ARM block peripherals, bits 0..7.
    for bit in 0..8 {
        if basic & (1 << bit) != 0 {
            super::invoke(bit);
        }
    }

    // Hot peripherals mirrored into the basic register.
    for &(bit, irq) in SHORTCUTS.iter() {
        if basic & (1 << bit) != 0 {
            super::invoke(irq);
        }
    }

    // Only touch the full bank registers when the flags say there is more.
    if basic & BASIC_PENDING1 != 0 {
        let mut pending = vc_read(vc::PENDING1) & !BANK1_SHORTCUT_MASK;
        while pending != 0 {
            let bit = pending.trailing_zeros();
            super::invoke(8 + bit);
            pending &= pending - 1;
        }
    }
    if basic & BASIC_PENDING2 != 0 {
        let mut pending = vc_read(vc::PENDING2) & !BANK2_SHORTCUT_MASK;
        while pending != 0 {
            let bit = pending.trailing_zeros();
            super::invoke(40 + bit);
            pending &= pending - 1;
        }
    }
}

/// Unmask one HAL IRQ.
pub fn enable_irq(irq: u32) {
    match irq {
        0..=7 => vc_write(vc::ENABLE_BASIC, 1 << irq),
        8..=39 => vc_write(vc::ENABLE1, 1 << (irq - 8)),
        40..=71 => vc_write(vc::ENABLE2, 1 << (irq - 40)),
        _ => {}
    }
}

/// Mask one HAL IRQ.
pub fn disable_irq(irq: u32) {
    match irq {
        0..=7 => vc_write(vc::DISABLE_BASIC, 1 << irq),
        8..=39 => vc_write(vc::DISABLE1, 1 << (irq - 8)),
        40..=71 => vc_write(vc::DISABLE2, 1 << (irq - 40)),
        _ => {}
    }
}

/// The timer line is routed by the ARM local block, enabled at `init`.
pub fn enable_timer_irq() {
    local_write(local::TIMER_INT_CONTROL0, SRC_CNTPNS);
}
