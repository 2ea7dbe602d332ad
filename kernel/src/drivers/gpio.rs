//! BCM2710 GPIO controller.
//!
//! Just enough pin plumbing for the peripherals this kernel drives: ALT
//! function selection for the EMMC pads, pull-up programming through the
//! legacy GPPUD two-step dance, and the activity LED.

use crate::arch::{self, mmio_read32, mmio_write32};
use crate::config::platform::GPIO_BASE;

const GPFSEL0: usize = 0x00;
const GPSET0: usize = 0x1C;
const GPCLR0: usize = 0x28;
const GPPUD: usize = 0x94;
const GPPUDCLK0: usize = 0x98;

/// Pin function selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Function {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

/// Pad pull configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Pull {
    None = 0b00,
    Down = 0b01,
    Up = 0b10,
}

/// Select a pin's function.
pub fn set_function(pin: u32, function: Function) {
    let reg = GPIO_BASE + GPFSEL0 + (pin as usize / 10) * 4;
    let shift = (pin % 10) * 3;
    unsafe {
        let v = mmio_read32(reg);
        mmio_write32(reg, (v & !(0b111 << shift)) | ((function as u32) << shift));
    }
}

/// Program a pin's pull resistor.  The controller wants the value latched
/// with setup/hold delays around the clock pulse.
pub fn set_pull(pin: u32, pull: Pull) {
    let clk = GPIO_BASE + GPPUDCLK0 + (pin as usize / 32) * 4;
    unsafe {
        mmio_write32(GPIO_BASE + GPPUD, pull as u32);
        arch::delay_us(5);
        mmio_write32(clk, 1 << (pin % 32));
        arch::delay_us(5);
        mmio_write32(GPIO_BASE + GPPUD, 0);
        mmio_write32(clk, 0);
    }
}

/// Drive an output pin.
pub fn set_output(pin: u32, high: bool) {
    let reg = if high { GPSET0 } else { GPCLR0 };
    unsafe {
        mmio_write32(GPIO_BASE + reg + (pin as usize / 32) * 4, 1 << (pin % 32));
    }
}

/// Route the EMMC pads (GPIO 48–53) to ALT3 with pull-ups on the data and
/// command lines.
pub fn setup_emmc_pads() {
    for pin in 48..=53 {
        set_function(pin, Function::Alt3);
        if pin != 48 {
            // CLK stays floating; CMD and DAT0-3 get pull-ups.
            set_pull(pin, Pull::Up);
        }
    }
}
