//! EL1 exception vector table.
//!
//! The kernel thread and every process run at EL1 with `SPSel = 0`
//! (`SP_EL0`), so exception entry hardware-switches to the dedicated
//! handler stack on `SP_EL1`.  Each vector spills the full register state
//! into a `TrapFrame`, calls into Rust, and reloads the (possibly
//! rewritten) frame on the way out — the scheduler context-switches by
//! editing the frame in place.

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
core::arch::global_asm!(
    r#"
.macro SAVE_CONTEXT
    sub     sp, sp, #272
    stp     x0, x1, [sp, #0]
    stp     x2, x3, [sp, #16]
    stp     x4, x5, [sp, #32]
    stp     x6, x7, [sp, #48]
    stp     x8, x9, [sp, #64]
    stp     x10, x11, [sp, #80]
    stp     x12, x13, [sp, #96]
    stp     x14, x15, [sp, #112]
    stp     x16, x17, [sp, #128]
    stp     x18, x19, [sp, #144]
    stp     x20, x21, [sp, #160]
    stp     x22, x23, [sp, #176]
    stp     x24, x25, [sp, #192]
    stp     x26, x27, [sp, #208]
    stp     x28, x29, [sp, #224]
    str     x30, [sp, #240]
    mrs     x10, sp_el0
    mrs     x11, elr_el1
    mrs     x12, spsr_el1
    str     x10, [sp, #248]
    stp     x11, x12, [sp, #256]
.endm

.macro RESTORE_CONTEXT
    ldr     x10, [sp, #248]
    ldp     x11, x12, [sp, #256]
    msr     sp_el0, x10
    msr     elr_el1, x11
    msr     spsr_el1, x12
    ldp     x0, x1, [sp, #0]
    ldp     x2, x3, [sp, #16]
    ldp     x4, x5, [sp, #32]
    ldp     x6, x7, [sp, #48]
    ldp     x8, x9, [sp, #64]
    ldp     x10, x11, [sp, #80]
    ldp     x12, x13, [sp, #96]
    ldp     x14, x15, [sp, #112]
    ldp     x16, x17, [sp, #128]
    ldp     x18, x19, [sp, #144]
    ldp     x20, x21, [sp, #160]
    ldp     x22, x23, [sp, #176]
    ldp     x24, x25, [sp, #192]
    ldp     x26, x27, [sp, #208]
    ldp     x28, x29, [sp, #224]
    ldr     x30, [sp, #240]
    add     sp, sp, #272
.endm

.section .text
.balign 2048
.global __exception_vectors
__exception_vectors:
    // Current EL with SP0: the kernel thread and processes live here.
    b       __vec_sync              // 0x000
.balign 128
    b       __vec_irq               // 0x080
.balign 128
    b       __vec_fiq               // 0x100
.balign 128
    b       __vec_serror            // 0x180
    // Current EL with SPx: a fault inside a handler.
.balign 128
    b       __vec_sync              // 0x200
.balign 128
    b       __vec_irq               // 0x280
.balign 128
    b       __vec_fiq               // 0x300
.balign 128
    b       __vec_serror            // 0x380
    // Lower EL (not used by this kernel) — treat as faults.
.balign 128
    b       __vec_sync              // 0x400
.balign 128
    b       __vec_irq               // 0x480
.balign 128
    b       __vec_fiq               // 0x500
.balign 128
    b       __vec_serror            // 0x580
.balign 128
    b       __vec_sync              // 0x600
.balign 128
    b       __vec_irq               // 0x680
.balign 128
    b       __vec_fiq               // 0x700
.balign 128
    b       __vec_serror            // 0x780

__vec_sync:
    SAVE_CONTEXT
    mov     x0, sp
    mrs     x1, esr_el1
    mrs     x2, far_el1
    bl      kernel_sync_entry
    RESTORE_CONTEXT
    eret

__vec_irq:
    SAVE_CONTEXT
    mov     x0, sp
    bl      kernel_irq_entry
    RESTORE_CONTEXT
    eret

__vec_fiq:
    SAVE_CONTEXT
    mov     x0, sp
    bl      kernel_fiq_entry
    RESTORE_CONTEXT
    eret

__vec_serror:
    SAVE_CONTEXT
    mov     x0, sp
    mrs     x1, esr_el1
    bl      kernel_serror_entry
    RESTORE_CONTEXT
    eret
"#
);

/// Point `VBAR_EL1` at the table.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn install() {
    extern "C" {
        static __exception_vectors: u8;
    }
    let addr = unsafe { &__exception_vectors as *const u8 as u64 };
    crate::arch::vbar_set(addr);
}

/// Host builds have no vector table.
#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub fn install() {}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod entry {
    use crate::sched::context::TrapFrame;

    /// Exception class: SVC from AArch64.
    const EC_SVC64: u64 = 0x15;

    #[no_mangle]
    extern "C" fn kernel_irq_entry(frame: *mut TrapFrame) {
        crate::interrupts::dispatch(unsafe { &mut *frame });
    }

    #[no_mangle]
    extern "C" fn kernel_sync_entry(frame: *mut TrapFrame, esr: u64, far: u64) {
        let frame = unsafe { &mut *frame };
        if (esr >> 26) & 0x3F == EC_SVC64 {
            // `svc #0` is the cooperative yield.
            crate::sched::handle_svc(frame);
        } else {
            crate::crash::handle_sync(frame, esr, far);
        }
    }

    #[no_mangle]
    extern "C" fn kernel_serror_entry(frame: *mut TrapFrame, esr: u64) {
        crate::crash::handle_serror(unsafe { &mut *frame }, esr);
    }

    #[no_mangle]
    extern "C" fn kernel_fiq_entry(frame: *mut TrapFrame) {
        crate::crash::handle_fiq(unsafe { &mut *frame });
    }
}
