//! DWC2 host controller core.
//!
//! Core soft reset, FIFO carving, host-mode entry, and root-port power
//! and reset.  The port register is full of write-1-to-clear bits, so
//! every read-modify-write goes through [`hprt_rmw_value`], which masks
//! them out — writing them back as 1 would spuriously disable the port.

use super::{UsbError, UsbSpeed};
use crate::arch::{self, mmio_read32, mmio_write32};

#[cfg(feature = "plat-pi")]
use crate::config::platform::USB_BASE;
/// Off-target builds only need the constants for unit tests.
#[cfg(not(feature = "plat-pi"))]
const USB_BASE: usize = 0x3F98_0000;

/// Global and host register offsets.
#[allow(dead_code)]
pub mod regs {
    pub const GOTGCTL: usize = 0x000;
    pub const GAHBCFG: usize = 0x008;
    pub const GUSBCFG: usize = 0x00C;
    pub const GRSTCTL: usize = 0x010;
    pub const GINTSTS: usize = 0x014;
    pub const GINTMSK: usize = 0x018;
    pub const GRXFSIZ: usize = 0x024;
    pub const GNPTXFSIZ: usize = 0x028;
    pub const GSNPSID: usize = 0x040;
    pub const HPTXFSIZ: usize = 0x100;
    pub const HCFG: usize = 0x400;
    pub const HFIR: usize = 0x404;
    pub const HFNUM: usize = 0x408;
    pub const HAINT: usize = 0x414;
    pub const HAINTMSK: usize = 0x418;
    pub const HPRT: usize = 0x440;
    /// First channel register block; channels are 0x20 apart.
    pub const HCCHAR0: usize = 0x500;
    pub const HCSPLT0: usize = 0x504;
    pub const HCINT0: usize = 0x508;
    pub const HCINTMSK0: usize = 0x50C;
    pub const HCTSIZ0: usize = 0x510;
    pub const HCDMA0: usize = 0x514;
    pub const CHANNEL_STRIDE: usize = 0x20;
    pub const PCGCCTL: usize = 0xE00;
}

/// `GRSTCTL` bits.
pub mod grstctl {
    pub const CSRST: u32 = 1 << 0;
    pub const RXFFLSH: u32 = 1 << 4;
    pub const TXFFLSH: u32 = 1 << 5;
    pub const TXFNUM_ALL: u32 = 0x10 << 6;
    pub const AHB_IDLE: u32 = 1 << 31;
}

/// `GUSBCFG` bits.
pub mod gusbcfg {
    pub const PHYSEL: u32 = 1 << 6;
    pub const ULPI_UTMI_SEL: u32 = 1 << 4;
    pub const FORCE_HOST: u32 = 1 << 29;
    pub const FORCE_DEVICE: u32 = 1 << 30;
}

/// `GAHBCFG` bits.
pub mod gahbcfg {
    pub const GLBL_INTR_EN: u32 = 1 << 0;
    pub const DMA_EN: u32 = 1 << 5;
}

/// `GINTSTS` / `GINTMSK` bits.
pub mod gintsts {
    pub const CURMOD_HOST: u32 = 1 << 0;
    pub const SOF: u32 = 1 << 3;
    pub const HPRTINT: u32 = 1 << 24;
    pub const HCHINT: u32 = 1 << 25;
    pub const CONIDSTSCHNG: u32 = 1 << 28;
    pub const DISCONNINT: u32 = 1 << 29;
}

/// `HCFG` bits: FS/LS-only PHY clock at 30/60 MHz.  Forcing FS/LS keeps
/// the core out of cross-speed hub configurations it cannot schedule.
pub mod hcfg {
    pub const FSLSPCLKSEL_30_60: u32 = 0;
    pub const FSLSSUPP: u32 = 1 << 2;
}

/// `HPRT` bits.
pub mod hprt {
    pub const CONN_STS: u32 = 1 << 0;
    pub const CONN_DET: u32 = 1 << 1;
    pub const ENA: u32 = 1 << 2;
    pub const ENA_CHNG: u32 = 1 << 3;
    pub const OVRCUR_CHNG: u32 = 1 << 5;
    pub const RST: u32 = 1 << 8;
    pub const PWR: u32 = 1 << 12;
    pub const SPD_SHIFT: u32 = 17;
    pub const SPD_MASK: u32 = 0x3 << 17;

    /// Write-1-to-clear bits, masked to zero on every RMW.
    pub const W1C_MASK: u32 = CONN_DET | ENA | ENA_CHNG | OVRCUR_CHNG;
}

/// `HCCHAR` fields.
pub mod hcchar {
    pub const MPS_MASK: u32 = 0x7FF;
    pub const EPNUM_SHIFT: u32 = 11;
    pub const EPDIR_IN: u32 = 1 << 15;
    pub const LSDEV: u32 = 1 << 17;
    pub const EPTYPE_SHIFT: u32 = 18;
    pub const MC_SHIFT: u32 = 20;
    pub const DEVADDR_SHIFT: u32 = 22;
    pub const ODDFRM: u32 = 1 << 29;
    pub const CHDIS: u32 = 1 << 30;
    pub const CHEN: u32 = 1 << 31;
}

/// `HCTSIZ` fields.
pub mod hctsiz {
    pub const XFERSIZE_MASK: u32 = 0x7FFFF;
    pub const PKTCNT_SHIFT: u32 = 19;
    pub const PID_DATA0: u32 = 0 << 29;
    pub const PID_DATA1: u32 = 2 << 29;
    pub const PID_SETUP: u32 = 3 << 29;
}

/// `HCINT` bits.
pub mod hcint {
    pub const XFERCOMPL: u32 = 1 << 0;
    pub const CHHLTD: u32 = 1 << 1;
    pub const AHBERR: u32 = 1 << 2;
    pub const STALL: u32 = 1 << 3;
    pub const NAK: u32 = 1 << 4;
    pub const ACK: u32 = 1 << 5;
    pub const NYET: u32 = 1 << 6;
    pub const XACTERR: u32 = 1 << 7;
    pub const BBLERR: u32 = 1 << 8;
}

/// `HCSPLT` fields.
pub mod hcsplt {
    pub const PRTADDR_SHIFT: u32 = 0;
    pub const HUBADDR_SHIFT: u32 = 7;
    pub const COMPSPLT: u32 = 1 << 16;
    pub const SPLTENA: u32 = 1 << 31;
}

/// Endpoint types in `HCCHAR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EndpointType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

/// Number of host channels.
pub const NUM_CHANNELS: usize = 8;

pub fn read(off: usize) -> u32 {
    unsafe { mmio_read32(USB_BASE + off) }
}

pub fn write(off: usize, v: u32) {
    unsafe { mmio_write32(USB_BASE + off, v) }
}

/// Per-channel register read.
pub fn ch_read(ch: usize, reg: usize) -> u32 {
    read(reg + ch * regs::CHANNEL_STRIDE)
}

/// Per-channel register write.
pub fn ch_write(ch: usize, reg: usize, v: u32) {
    write(reg + ch * regs::CHANNEL_STRIDE, v)
}

/// Current 14-bit frame number.
pub fn frame_number() -> u16 {
    (read(regs::HFNUM) & 0x3FFF) as u16
}

/// The value to write when setting bits in `HPRT`: the current register
/// with every write-1-to-clear bit masked off.
pub fn hprt_rmw_value(current: u32, set: u32) -> u32 {
    (current & !hprt::W1C_MASK) | set
}

/// Read-modify-write `HPRT` safely.
pub fn hprt_set(set: u32) {
    let v = read(regs::HPRT);
    write(regs::HPRT, hprt_rmw_value(v, set));
}

/// Clear specific non-W1C bits of `HPRT` (e.g. deasserting reset).
pub fn hprt_clear(clear: u32) {
    let v = read(regs::HPRT);
    write(regs::HPRT, (v & !hprt::W1C_MASK) & !clear);
}

/// Acknowledge a W1C change bit in `HPRT`.
pub fn hprt_ack(w1c: u32) {
    let v = read(regs::HPRT);
    write(regs::HPRT, (v & !hprt::W1C_MASK) | w1c);
}

fn wait_ahb_idle() -> Result<(), UsbError> {
    for _ in 0..100_000 {
        if read(regs::GRSTCTL) & grstctl::AHB_IDLE != 0 {
            return Ok(());
        }
        arch::delay_us(1);
    }
    Err(UsbError::TimeoutDuringReset)
}

/// Core soft reset: AHB idle, self-clearing reset bit, AHB idle again,
/// then a settle delay.
pub fn core_reset() -> Result<(), UsbError> {
    wait_ahb_idle()?;
    write(regs::GRSTCTL, grstctl::CSRST);
    let mut cleared = false;
    for _ in 0..100_000 {
        if read(regs::GRSTCTL) & grstctl::CSRST == 0 {
            cleared = true;
            break;
        }
        arch::delay_us(1);
    }
    if !cleared {
        return Err(UsbError::TimeoutDuringReset);
    }
    wait_ahb_idle()?;
    arch::delay_ms(100);
    Ok(())
}

fn flush_fifos() {
    write(regs::GRSTCTL, grstctl::TXFFLSH | grstctl::TXFNUM_ALL);
    for _ in 0..10_000 {
        if read(regs::GRSTCTL) & grstctl::TXFFLSH == 0 {
            break;
        }
        arch::delay_us(1);
    }
    write(regs::GRSTCTL, grstctl::RXFFLSH);
    for _ in 0..10_000 {
        if read(regs::GRSTCTL) & grstctl::RXFFLSH == 0 {
            break;
        }
        arch::delay_us(1);
    }
}

/// Bring the core into host mode with the FIFO layout this kernel uses.
pub fn core_init() -> Result<(), UsbError> {
    // Quiet the core while reconfiguring.
    write(regs::GINTMSK, 0);
    write(regs::GAHBCFG, 0);

    core_reset()?;
    write(regs::PCGCCTL, 0);

    // Internal UTMI+ PHY: clear the FS-PHY and ULPI selects, force host.
    let cfg = read(regs::GUSBCFG);
    write(
        regs::GUSBCFG,
        (cfg & !(gusbcfg::PHYSEL | gusbcfg::ULPI_UTMI_SEL | gusbcfg::FORCE_DEVICE))
            | gusbcfg::FORCE_HOST,
    );
    arch::delay_ms(50);
    if read(regs::GINTSTS) & gintsts::CURMOD_HOST == 0 {
        return Err(UsbError::NotInHostMode);
    }

    // FIFO carve: Rx 256 words, non-periodic Tx 256 @ 256, periodic Tx
    // 256 @ 512.
    write(regs::GRXFSIZ, 256);
    write(regs::GNPTXFSIZ, (256 << 16) | 256);
    write(regs::HPTXFSIZ, (256 << 16) | 512);
    flush_fifos();

    // FS/LS only, one-frame interval at the 60 MHz PHY clock.
    write(regs::HCFG, hcfg::FSLSPCLKSEL_30_60 | hcfg::FSLSSUPP);
    write(regs::HFIR, 60000);

    // DMA on; global interrupts stay off until the handler is installed.
    write(regs::GAHBCFG, gahbcfg::DMA_EN);

    // Interrupt causes of interest.  SOF stays masked: at 1 kHz it would
    // dominate the CPU for nothing.
    write(regs::GINTSTS, 0xFFFF_FFFF);
    write(
        regs::GINTMSK,
        gintsts::HPRTINT | gintsts::HCHINT | gintsts::DISCONNINT | gintsts::CONIDSTSCHNG,
    );

    crate::serial_println!("[USB] core id {:#010x}, host mode", read(regs::GSNPSID));
    Ok(())
}

/// Let interrupts out of the core once the HAL handler is registered.
pub fn enable_global_interrupts() {
    write(regs::GAHBCFG, read(regs::GAHBCFG) | gahbcfg::GLBL_INTR_EN);
    write(regs::HAINTMSK, 0xFF);
}

/// Power the root port and run the reset signaling, returning the
/// attached device's speed.
pub fn port_power_and_reset() -> Result<UsbSpeed, UsbError> {
    hprt_set(hprt::PWR);
    arch::delay_ms(50);

    hprt_set(hprt::RST);
    arch::delay_ms(50);
    hprt_clear(hprt::RST);
    arch::delay_ms(20);

    let mut hprt_val = 0;
    let mut enabled = false;
    for _ in 0..100 {
        hprt_val = read(regs::HPRT);
        if hprt_val & hprt::ENA_CHNG != 0 {
            hprt_ack(hprt::ENA_CHNG);
        }
        if hprt_val & hprt::ENA != 0 {
            enabled = true;
            break;
        }
        arch::delay_ms(1);
    }
    if !enabled {
        return Err(UsbError::PortNeverEnabled);
    }

    let speed = match (hprt_val & hprt::SPD_MASK) >> hprt::SPD_SHIFT {
        0 => UsbSpeed::High,
        1 => UsbSpeed::Full,
        _ => UsbSpeed::Low,
    };
    crate::serial_println!("[USB] root port enabled, speed {:?}", speed);
    Ok(speed)
}

/// Whether a device is attached to the root port.
pub fn port_connected() -> bool {
    read(regs::HPRT) & hprt::CONN_STS != 0
}

/// Force-halt a channel, waiting (bounded) for the halt to land.
pub fn halt_channel(ch: usize) {
    let c = ch_read(ch, regs::HCCHAR0);
    if c & hcchar::CHEN != 0 {
        ch_write(ch, regs::HCCHAR0, c | hcchar::CHDIS);
        for _ in 0..100_000 {
            if ch_read(ch, regs::HCINT0) & hcint::CHHLTD != 0 {
                break;
            }
            core::hint::spin_loop();
        }
    }
    ch_write(ch, regs::HCINT0, 0xFFFF_FFFF);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hprt_rmw_never_writes_w1c_bits() {
        // Port enabled, connected, with a pending connect-detect: the RMW
        // value must drop every W1C bit while preserving power.
        let current = hprt::ENA | hprt::CONN_STS | hprt::CONN_DET | hprt::PWR;
        let v = hprt_rmw_value(current, hprt::RST);
        assert_eq!(v & hprt::W1C_MASK, 0);
        assert_ne!(v & hprt::PWR, 0);
        assert_ne!(v & hprt::RST, 0);
        // Non-W1C status bits may remain; CONN_STS is read-only anyway.
        assert_ne!(v & hprt::CONN_STS, 0);
    }
}
