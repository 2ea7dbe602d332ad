//! Kernel timer and tick dispatch.
//!
//! The ARM generic timer (EL1 physical) drives a periodic tick: 10 ms on
//! QEMU, 1 ms on the Pi where the USB watchdog needs the resolution.  The
//! handler is edge-driven — it clears its condition by reloading the
//! countdown before any callback runs, so it can never re-enter itself.
//!
//! Tick work runs in a fixed, documented order:
//!
//! 1. console cursor blink
//! 2. USB HID watchdog and split-transaction completion (Pi)
//! 3. activity-LED heartbeat (Pi, 1 Hz)
//! 4. preemptive scheduling, every 200 ms

use crate::config;
use crate::sched::context::TrapFrame;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// 64-bit tick counter.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Current tick period in milliseconds; 0 until [`init`].
static PERIOD_MS: AtomicU32 = AtomicU32::new(0);

fn reload(period_ms: u32) {
    let freq = crate::arch::counter_freq();
    crate::arch::timer_set_countdown(((freq * period_ms as u64) / 1000) as u32);
}

/// Start the periodic tick.
pub fn init(interval_ms: u32) {
    PERIOD_MS.store(interval_ms, Ordering::Relaxed);
    reload(interval_ms);
    crate::arch::timer_enable();
    crate::interrupts::enable_timer_irq();
    crate::serial_println!("[TIME] tick every {} ms", interval_ms);
}

/// Change the tick period.
pub fn set_interval(interval_ms: u32) {
    PERIOD_MS.store(interval_ms, Ordering::Relaxed);
    reload(interval_ms);
}

/// Ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Milliseconds since boot.
pub fn uptime_ms() -> u64 {
    ticks() * PERIOD_MS.load(Ordering::Relaxed).max(1) as u64
}

/// Timer interrupt handler.  Runs with IRQs masked.
pub fn tick(frame: &mut TrapFrame) {
    // Reload first: the timer condition must be clear before any callback
    // returns, or the line would stay asserted.
    reload(PERIOD_MS.load(Ordering::Relaxed).max(1));

    let t = TICKS.fetch_add(1, Ordering::Relaxed) + 1;

    crate::console::on_tick(t);

    #[cfg(feature = "plat-pi")]
    {
        crate::usb::hid::timer_tick(t);
        if t % config::LED_TOGGLE_TICKS == 0 {
            crate::hal::led_toggle();
        }
    }

    if t % config::TIMESLICE_TICKS == 0 {
        crate::sched::schedule_from_irq(frame);
    }
}

/// Sleep at least `ms` milliseconds, waiting for interrupts between tick
/// checks.
pub fn sleep_ms(ms: u32) {
    let period = PERIOD_MS.load(Ordering::Relaxed);
    if period == 0 {
        // Timer not running yet (early boot): spin on the counter.
        crate::arch::delay_ms(ms);
        return;
    }
    let target = ticks() + ms.div_ceil(period) as u64 + 1;
    while ticks() < target {
        crate::arch::wfi();
    }
}
