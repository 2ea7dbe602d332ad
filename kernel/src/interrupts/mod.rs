//! Interrupt handling subsystem.
//!
//! The HAL presents one linear IRQ namespace; translation to the concrete
//! controller lives in the platform driver behind it:
//!
//! - **GIC-400** on QEMU: HAL IRQ numbers are GIC interrupt IDs.
//! - **BCM2836 two-tier** on the Pi: `0..7` are the VideoCore "basic" ARM
//!   peripherals, `8..39` bank 1 (+8), `40..71` bank 2 (+40).
//!
//! The timer interrupt bypasses the handler table: the dispatcher invokes
//! `time::tick` directly so the scheduler can reach the saved register
//! frame.

pub mod vectors;

#[cfg(feature = "plat-qemu")]
pub mod gic;
#[cfg(feature = "plat-pi")]
pub mod bcm;

#[cfg(feature = "plat-qemu")]
use gic as controller;
#[cfg(feature = "plat-pi")]
use bcm as controller;

use crate::sched::context::TrapFrame;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// Size of the linear IRQ namespace.
pub const IRQ_COUNT: usize = 96;

/// An interrupt handler.  Runs with IRQs masked; must not block or print.
pub type IrqHandler = fn(u32);

static HANDLERS: Mutex<[Option<IrqHandler>; IRQ_COUNT]> = Mutex::new([None; IRQ_COUNT]);

/// Total interrupts taken.
static IRQ_TOTAL: AtomicU64 = AtomicU64::new(0);
/// Interrupts with no registered handler.
static IRQ_UNHANDLED: AtomicU64 = AtomicU64::new(0);

/// Install the exception vectors and bring up the platform controller.
pub fn init() {
    vectors::install();
    controller::init();
    crate::serial_println!("[IRQ] controller initialized, vectors installed");
}

/// Enable hardware interrupts globally.
pub fn enable() {
    crate::arch::irq_enable();
}

/// Disable hardware interrupts globally.
pub fn disable() {
    crate::arch::irq_disable();
}

/// Run a closure with interrupts masked, restoring the previous state.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let saved = crate::arch::irq_save();
    let r = f();
    crate::arch::irq_restore(saved);
    r
}

/// Register a handler for a HAL IRQ number.
pub fn register_handler(irq: u32, handler: IrqHandler) {
    if (irq as usize) < IRQ_COUNT {
        without_interrupts(|| {
            HANDLERS.lock()[irq as usize] = Some(handler);
        });
    }
}

/// Unmask a HAL IRQ at the controller.
pub fn enable_irq(irq: u32) {
    controller::enable_irq(irq);
}

/// Mask a HAL IRQ at the controller.
pub fn disable_irq(irq: u32) {
    controller::disable_irq(irq);
}

/// Enable the timer interrupt line at the controller.
pub fn enable_timer_irq() {
    controller::enable_timer_irq();
}

/// Platform dispatch entry, called from the IRQ vector with interrupts
/// masked.
pub fn dispatch(frame: &mut TrapFrame) {
    IRQ_TOTAL.fetch_add(1, Ordering::Relaxed);
    controller::dispatch(frame);
}

/// Invoke the registered handler for `irq`, counting strays.
pub(crate) fn invoke(irq: u32) {
    let slot = match HANDLERS.lock().get(irq as usize).copied() {
        Some(slot) => slot,
        None => return,
    };
    match slot {
        Some(h) => h(irq),
        None => {
            IRQ_UNHANDLED.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// `(total, unhandled)` interrupt counters.
pub fn counters() -> (u64, u64) {
    (
        IRQ_TOTAL.load(Ordering::Relaxed),
        IRQ_UNHANDLED.load(Ordering::Relaxed),
    )
}

/// Idle loop: wait for interrupts forever.
pub fn wfi_loop() -> ! {
    loop {
        crate::arch::wfi();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_irq: u32) {}

    #[test]
    fn handler_table_dispatch() {
        register_handler(42, noop);
        let before = counters().1;
        invoke(42);
        assert_eq!(counters().1, before);
        // A vacant slot counts as unhandled.
        invoke(43);
        assert_eq!(counters().1, before + 1);
        // Out-of-range numbers are silently dropped, not counted.
        register_handler(10_000, noop);
        invoke(10_000);
        assert_eq!(counters().1, before + 1);
    }
}
