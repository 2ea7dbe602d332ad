//! AArch64 intrinsics and MMIO access.
//!
//! Everything that needs an instruction the host cannot execute lives
//! here, with inert fallbacks for host-side unit tests.  Device-register
//! access is bracketed with data-synchronization barriers to the system
//! domain.

/// Read a 32-bit device register.
///
/// # Safety
///
/// `addr` must be a valid, mapped device register address.
#[cfg(target_arch = "aarch64")]
#[inline]
pub unsafe fn mmio_read32(addr: usize) -> u32 {
    dsb_sy();
    let v = unsafe { core::ptr::read_volatile(addr as *const u32) };
    dsb_sy();
    v
}

/// Write a 32-bit device register.
///
/// # Safety
///
/// `addr` must be a valid, mapped device register address.
#[cfg(target_arch = "aarch64")]
#[inline]
pub unsafe fn mmio_write32(addr: usize, value: u32) {
    dsb_sy();
    unsafe { core::ptr::write_volatile(addr as *mut u32, value) };
    dsb_sy();
}

/// Host stand-ins: device windows do not exist off target, so register
/// reads float low and writes vanish.
#[cfg(not(target_arch = "aarch64"))]
pub unsafe fn mmio_read32(_addr: usize) -> u32 {
    0
}

#[cfg(not(target_arch = "aarch64"))]
pub unsafe fn mmio_write32(_addr: usize, _value: u32) {}

#[cfg(target_arch = "aarch64")]
mod imp {
    use aarch64_cpu::registers::{CNTFRQ_EL0, CNTPCT_EL0, CNTP_CTL_EL0, CNTP_TVAL_EL0, VBAR_EL1};
    use core::arch::asm;
    use tock_registers::interfaces::{Readable, Writeable};

    #[inline]
    pub fn dsb_sy() {
        unsafe { asm!("dsb sy", options(nostack, preserves_flags)) };
    }

    #[inline]
    pub fn dmb_sy() {
        unsafe { asm!("dmb sy", options(nostack, preserves_flags)) };
    }

    #[inline]
    pub fn isb() {
        unsafe { asm!("isb", options(nostack, preserves_flags)) };
    }

    /// Wait for interrupt.
    #[inline]
    pub fn wfi() {
        unsafe { asm!("wfi", options(nostack, preserves_flags)) };
    }

    /// Trap into the scheduler (cooperative yield).
    #[inline]
    pub fn svc_yield() {
        unsafe { asm!("svc #0") };
    }

    /// Synchronize the instruction stream after writing code to memory
    /// (`dc cvau` + `ic ivau` over the range).
    pub fn icache_sync_range(addr: usize, len: usize) {
        let line = dcache_line_size();
        let mut p = addr & !(line - 1);
        while p < addr + len {
            unsafe {
                asm!("dc cvau, {0}", in(reg) p, options(nostack, preserves_flags));
            }
            p += line;
        }
        dsb_sy();
        let mut p = addr & !(line - 1);
        while p < addr + len {
            unsafe {
                asm!("ic ivau, {0}", in(reg) p, options(nostack, preserves_flags));
            }
            p += line;
        }
        dsb_sy();
        isb();
    }

    /// Mask IRQs, returning the previous DAIF value.
    #[inline]
    pub fn irq_save() -> u64 {
        let daif: u64;
        unsafe {
            asm!("mrs {0}, daif", "msr daifset, #2", out(reg) daif,
                 options(nostack, preserves_flags));
        }
        daif
    }

    /// Restore a DAIF value from [`irq_save`].
    #[inline]
    pub fn irq_restore(daif: u64) {
        unsafe { asm!("msr daif, {0}", in(reg) daif, options(nostack)) };
    }

    /// Unmask IRQs.
    #[inline]
    pub fn irq_enable() {
        unsafe { asm!("msr daifclr, #2", options(nostack)) };
    }

    /// Mask IRQs.
    #[inline]
    pub fn irq_disable() {
        unsafe { asm!("msr daifset, #2", options(nostack)) };
    }

    /// Whether IRQs are currently unmasked.
    #[inline]
    pub fn irqs_enabled() -> bool {
        let daif: u64;
        unsafe { asm!("mrs {0}, daif", out(reg) daif, options(nostack, preserves_flags)) };
        daif & (1 << 7) == 0
    }

    /// Data-cache line size in bytes, from `CTR_EL0.DminLine`
    /// (4 × 2^DminLine).
    #[inline]
    pub fn dcache_line_size() -> usize {
        let ctr: u64;
        unsafe { asm!("mrs {0}, ctr_el0", out(reg) ctr, options(nostack, preserves_flags)) };
        4usize << ((ctr >> 16) & 0xF)
    }

    /// Clean dirty data-cache lines covering `[addr, addr+len)` to RAM
    /// (`dc cvac`): the device will read what the CPU wrote.
    pub fn cache_clean_range(addr: usize, len: usize) {
        let line = dcache_line_size();
        let mut p = addr & !(line - 1);
        dsb_sy();
        while p < addr + len {
            unsafe { asm!("dc cvac, {0}", in(reg) p, options(nostack, preserves_flags)) };
            p += line;
        }
        dsb_sy();
    }

    /// Clean and invalidate lines covering `[addr, addr+len)`
    /// (`dc civac`): the CPU will read what the device wrote.
    pub fn cache_clean_invalidate_range(addr: usize, len: usize) {
        let line = dcache_line_size();
        let mut p = addr & !(line - 1);
        dsb_sy();
        while p < addr + len {
            unsafe { asm!("dc civac, {0}", in(reg) p, options(nostack, preserves_flags)) };
            p += line;
        }
        dsb_sy();
    }

    /// Free-running counter value.
    #[inline]
    pub fn counter_ticks() -> u64 {
        CNTPCT_EL0.get()
    }

    /// Counter frequency in Hz.
    #[inline]
    pub fn counter_freq() -> u64 {
        CNTFRQ_EL0.get()
    }

    /// Arm the EL1 physical timer countdown.
    #[inline]
    pub fn timer_set_countdown(ticks: u32) {
        CNTP_TVAL_EL0.set(ticks as u64);
    }

    /// Enable the EL1 physical timer, interrupt unmasked.
    pub fn timer_enable() {
        CNTP_CTL_EL0.write(CNTP_CTL_EL0::ENABLE::SET + CNTP_CTL_EL0::IMASK::CLEAR);
    }

    /// Program the exception vector base.
    pub fn vbar_set(addr: u64) {
        VBAR_EL1.set(addr);
        isb();
    }

    /// Current frame pointer, for backtraces.
    #[inline]
    pub fn frame_pointer() -> usize {
        let fp: usize;
        unsafe { asm!("mov {0}, x29", out(reg) fp, options(nostack, preserves_flags)) };
        fp
    }
}

#[cfg(not(target_arch = "aarch64"))]
mod imp {
    //! Host fallbacks so the pure-logic modules unit-test off target.

    pub fn dsb_sy() {}
    pub fn dmb_sy() {}
    pub fn isb() {}
    pub fn wfi() {}
    pub fn svc_yield() {}
    pub fn icache_sync_range(_addr: usize, _len: usize) {}
    pub fn irq_save() -> u64 {
        0
    }
    pub fn irq_restore(_daif: u64) {}
    pub fn irq_enable() {}
    pub fn irq_disable() {}
    pub fn irqs_enabled() -> bool {
        false
    }
    pub fn dcache_line_size() -> usize {
        64
    }
    pub fn cache_clean_range(_addr: usize, _len: usize) {}
    pub fn cache_clean_invalidate_range(_addr: usize, _len: usize) {}
    pub fn counter_ticks() -> u64 {
        0
    }
    pub fn counter_freq() -> u64 {
        1
    }
    pub fn timer_set_countdown(_ticks: u32) {}
    pub fn timer_enable() {}
    pub fn vbar_set(_addr: u64) {}
    pub fn frame_pointer() -> usize {
        0
    }
}

pub use imp::*;

/// Microseconds since the counter started (available from very early boot,
/// before the kernel timer exists).
pub fn time_us() -> u32 {
    let freq = counter_freq().max(1);
    ((counter_ticks().wrapping_mul(1_000_000)) / freq) as u32
}

/// Busy-wait for `us` microseconds against the free-running counter.
pub fn delay_us(us: u32) {
    let freq = counter_freq().max(1);
    let target = counter_ticks() + (us as u64 * freq) / 1_000_000;
    while counter_ticks() < target {
        core::hint::spin_loop();
    }
}

/// Busy-wait for `ms` milliseconds.
pub fn delay_ms(ms: u32) {
    delay_us(ms.saturating_mul(1000));
}

#[cfg(test)]
mod tests {
    #[test]
    fn host_stubs_are_inert() {
        assert_eq!(super::dcache_line_size(), 64);
        assert!(!super::irqs_enabled());
    }
}
