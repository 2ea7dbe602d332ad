//! Device drivers.
//!
//! Platform-specific drivers are compiled per feature; the HAL selects
//! among them.  QEMU speaks virtio-mmio for block and input; the Pi
//! drives the BCM2710 peripherals directly.

pub mod pl011;

#[cfg(feature = "plat-qemu")]
pub mod virtio;
#[cfg(feature = "plat-qemu")]
pub mod virtio_blk;
#[cfg(feature = "plat-qemu")]
pub mod virtio_input;

#[cfg(feature = "plat-pi")]
pub mod bcm_dma;
#[cfg(feature = "plat-pi")]
pub mod emmc;
#[cfg(feature = "plat-pi")]
pub mod gpio;
#[cfg(feature = "plat-pi")]
pub mod mailbox;
