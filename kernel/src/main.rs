//! KikiOS kernel entry.
//!
//! The boot shim parks the secondary cores, drops from EL2 to EL1 when
//! the firmware left us high, splits the stacks (`SP_EL1` for exception
//! handlers, `SP_EL0` for the kernel thread), zeroes `.bss`, and calls
//! [`kernel_main`].
//!
//! # Boot Process
//!
//! 1. Assembly shim: cores, EL drop, stacks, BSS, DTB pointer
//! 2. Serial console and exception vectors
//! 3. DTB-driven heap bring-up
//! 4. Scheduler, timer tick, DMA
//! 5. Framebuffer console
//! 6. Block device and FAT32 mount
//! 7. Input: virtio (QEMU) or DWC2 USB enumeration (Pi)
//! 8. Interrupts on, shell forever

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
core::arch::global_asm!(
    r#"
.section ".text.boot"
.global _start
_start:
    // Only core 0 proceeds; the rest sleep forever.
    mrs     x1, mpidr_el1
    and     x1, x1, #3
    cbz     x1, 2f
1:  wfe
    b       1b

2:  // Stash the DTB pointer the loader passed in x0.
    adrp    x2, __boot_dtb
    add     x2, x2, :lo12:__boot_dtb
    str     x0, [x2]

    // If the firmware dropped us at EL2, arrange an AArch64 EL1 and
    // leave the counters accessible.
    mrs     x1, CurrentEL
    lsr     x1, x1, #2
    cmp     x1, #2
    b.ne    3f
    mov     x2, #(1 << 31)
    msr     hcr_el2, x2
    mrs     x2, cnthctl_el2
    orr     x2, x2, #3
    msr     cnthctl_el2, x2
    msr     cntvoff_el2, xzr
    mov     x2, #0x3C5
    msr     spsr_el2, x2
    adr     x2, 3f
    msr     elr_el2, x2
    eret

3:  // Handler stack on SP_EL1, kernel thread on SP_EL0.
    msr     spsel, #1
    adrp    x1, __irq_stack_top
    add     x1, x1, :lo12:__irq_stack_top
    mov     sp, x1
    msr     spsel, #0
    adrp    x1, __boot_stack_top
    add     x1, x1, :lo12:__boot_stack_top
    mov     sp, x1

    // Zero .bss.
    adrp    x1, __bss_start
    add     x1, x1, :lo12:__bss_start
    adrp    x2, __bss_end
    add     x2, x2, :lo12:__bss_end
4:  cmp     x1, x2
    b.hs    5f
    stp     xzr, xzr, [x1], #16
    b       4b

5:  bl      kernel_main
6:  wfi
    b       6b

.section ".bss"
.balign 16
__boot_stack:
    .skip 262144
__boot_stack_top:
__irq_stack:
    .skip 65536
__irq_stack_top:
.balign 8
__boot_dtb:
    .skip 8
"#
);

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod boot {
    use kikios_kernel as kernel;
    use kikios_kernel::{serial_println, config};

    extern "C" {
        static __boot_dtb: u64;
        static __bss_end: u8;
    }

    /// Rust-side kernel entry, on the boot stack with interrupts masked.
    #[no_mangle]
    extern "C" fn kernel_main() -> ! {
        kernel::serial::init();
        serial_println!("\nKikiOS booting");

        // Phase 1: exception vectors and the interrupt controller.
        kernel::interrupts::init();

        // Phase 2: memory.  The DTB pointer from the loader wins; the
        // platform default address is the fallback probe.
        let mut dtb = unsafe { core::ptr::read_volatile(&__boot_dtb) } as usize;
        if dtb == 0 {
            dtb = config::platform::DTB_ADDR;
        }
        let bss_end = unsafe { &__bss_end as *const u8 as usize };
        unsafe { kernel::memory::init(dtb, bss_end) };

        // Phase 3: scheduler and the periodic tick.
        kernel::sched::init();
        kernel::time::init(config::TICK_MS);

        // Phase 4: DMA and the framebuffer console.
        kernel::hal::dma_init();
        kernel::console::init();
        kernel::console::puts("KikiOS\n");

        // Phase 5: block device and filesystem.
        if kernel::hal::block_init() {
            if let Err(e) = kernel::fs::init() {
                serial_println!("[KIKI] FAT32 mount failed: {:?}", e);
            }
        } else {
            serial_println!("[KIKI] no block device; filesystem disabled");
        }

        // Phase 6: input.
        init_input();
        kernel::hal::mouse_init();

        // Phase 7: let the world in.
        kernel::interrupts::enable();
        serial_println!("[KIKI] boot complete, starting shell");

        kernel::shell::run(&kernel::kapi::KAPI)
    }

    /// Keyboard/mouse bring-up differs per platform.
    #[cfg(feature = "plat-qemu")]
    fn init_input() {
        kernel::hal::keyboard_init();
    }

    /// On the Pi, input means the USB host stack: power the controller,
    /// bring up the core, and walk the bus.  HID pipelines arm themselves
    /// during enumeration.
    #[cfg(feature = "plat-pi")]
    fn init_input() {
        use kernel::drivers::mailbox;
        if !mailbox::set_power_state(mailbox::devices::USB_HCD, true) {
            serial_println!("[USB] controller power-on failed");
            return;
        }
        kernel::arch::delay_ms(50);
        kernel::usb::xfer::init();
        match kernel::usb::dwc2::core_init() {
            Ok(()) => {
                if let Err(e) = kernel::usb::enumerate::enumerate_bus() {
                    serial_println!("[USB] enumeration failed: {:?}", e);
                }
            }
            Err(e) => serial_println!("[USB] core init failed: {:?}", e),
        }
    }
}

/// Host builds only exist for `cargo test`; the binary does nothing.
#[cfg(not(target_os = "none"))]
fn main() {}
