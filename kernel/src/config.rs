//! Kernel configuration constants.
//!
//! Compile-time configuration per platform.  Values here affect memory
//! layout, timer cadence, and device addresses; anything discoverable at
//! runtime (RAM size) is only a fallback, with the DTB as the authority.

/// Timer tick period in milliseconds.  The Pi runs a 1 ms tick because the
/// USB HID watchdog and split-transaction completion need it; QEMU gets by
/// with 10 ms.
#[cfg(feature = "plat-qemu")]
pub const TICK_MS: u32 = 10;
#[cfg(feature = "plat-pi")]
pub const TICK_MS: u32 = 1;

/// Preemption timeslice in ticks (200 ms).
pub const TIMESLICE_TICKS: u64 = 200 / TICK_MS as u64;

/// Activity-LED half period in ticks (1 Hz heartbeat on the Pi).
pub const LED_TOGGLE_TICKS: u64 = 500 / TICK_MS as u64;

/// Maximum number of processes.
pub const MAX_PROCESSES: usize = 8;

/// Stack size per spawned process (256 KB).
pub const PROCESS_STACK_SIZE: usize = 256 * 1024;

/// Reserved window below the stack region for program images (64 MB).
pub const EXEC_WINDOW_SIZE: usize = 64 * 1024 * 1024;

/// Guard gap between the heap and the exec window (1 MB).
pub const EXEC_GUARD_SIZE: usize = 1024 * 1024;

/// Gap between the end of .bss and the start of the heap (64 KB).
pub const HEAP_GAP: usize = 64 * 1024;

/// The heap never shrinks below this (64 MB).
pub const MIN_HEAP_SIZE: usize = 64 * 1024 * 1024;

/// Console colors (`0x00RRGGBB`).
pub const CONSOLE_FG: u32 = 0x00E0_E0E0;
pub const CONSOLE_BG: u32 = 0x0010_1020;

// ── QEMU virt machine ───────────────────────────────────────────────

#[cfg(feature = "plat-qemu")]
pub mod platform {
    /// Start of RAM (the kernel is loaded right here; the DTB pointer the
    /// loader passes overlaps it, so DTB parsing usually falls back).
    pub const RAM_BASE: usize = 0x4000_0000;
    /// RAM size fallback when the DTB is unusable (256 MB).
    pub const DEFAULT_RAM_SIZE: usize = 256 * 1024 * 1024;
    /// Where the DTB pointer lands.
    pub const DTB_ADDR: usize = 0x4000_0000;

    /// GIC-400 distributor.
    pub const GICD_BASE: usize = 0x0800_0000;
    /// GIC-400 CPU interface.
    pub const GICC_BASE: usize = 0x0801_0000;
    /// PL011 UART.
    pub const UART_BASE: usize = 0x0900_0000;
    /// First virtio-mmio transport window.
    pub const VIRTIO_MMIO_BASE: usize = 0x0A00_0000;
    /// Stride between transport windows.
    pub const VIRTIO_MMIO_STRIDE: usize = 0x200;
    /// Number of transport windows.
    pub const VIRTIO_MMIO_SLOTS: usize = 32;
    /// IRQ of virtio slot 0; slot N interrupts at `VIRTIO_IRQ_BASE + N`.
    pub const VIRTIO_IRQ_BASE: u32 = 48;

    /// Framebuffer geometry for the RAM-backed console.
    pub const FB_WIDTH: u32 = 1024;
    pub const FB_HEIGHT: u32 = 768;
}

// ── Raspberry Pi Zero 2W (BCM2710) ──────────────────────────────────

#[cfg(feature = "plat-pi")]
pub mod platform {
    /// Start of RAM.
    pub const RAM_BASE: usize = 0;
    /// RAM size fallback when the DTB is unusable (512 MB).
    pub const DEFAULT_RAM_SIZE: usize = 512 * 1024 * 1024;
    /// The firmware leaves the DTB at the bottom of RAM.
    pub const DTB_ADDR: usize = 0;

    /// Legacy peripheral window.
    pub const PERIPHERAL_BASE: usize = 0x3F00_0000;
    /// Per-core ARM local controller (timer + mailbox routing).
    pub const ARM_LOCAL_BASE: usize = 0x4000_0000;
    /// VideoCore legacy interrupt controller.
    pub const VC_IRQ_BASE: usize = PERIPHERAL_BASE + 0xB200;
    /// PL011 UART.
    pub const UART_BASE: usize = PERIPHERAL_BASE + 0x20_1000;
    /// GPIO controller.
    pub const GPIO_BASE: usize = PERIPHERAL_BASE + 0x20_0000;
    /// Mailbox property interface.
    pub const MAILBOX_BASE: usize = PERIPHERAL_BASE + 0xB880;
    /// EMMC (SDHCI) controller.
    pub const EMMC_BASE: usize = PERIPHERAL_BASE + 0x30_0000;
    /// DMA controller (channel 0).
    pub const DMA_BASE: usize = PERIPHERAL_BASE + 0x7000;
    /// DWC2 USB controller.
    pub const USB_BASE: usize = PERIPHERAL_BASE + 0x98_0000;

    /// Bus address of the EMMC data register, as seen by the DMA engine.
    /// Constant source for DREQ-paced reads; never incremented.
    pub const EMMC_DATA_BUS_ADDR: u32 = 0x7E30_0020;

    /// DMA channel reserved for framebuffer blits.
    pub const DMA_CHANNEL_FB: usize = 0;
    /// DMA channel reserved for EMMC multi-block reads.
    pub const DMA_CHANNEL_EMMC: usize = 4;
    /// DREQ source for EMMC pacing.
    pub const DREQ_EMMC: u32 = 11;

    /// Activity LED GPIO.
    pub const LED_GPIO: u32 = 29;

    /// Framebuffer geometry requested from the GPU.
    pub const FB_WIDTH: u32 = 1024;
    pub const FB_HEIGHT: u32 = 768;
}

#[cfg(all(feature = "plat-qemu", feature = "plat-pi"))]
compile_error!("select exactly one platform feature: plat-qemu or plat-pi");

#[cfg(not(any(feature = "plat-qemu", feature = "plat-pi")))]
compile_error!("select a platform feature: plat-qemu or plat-pi");
