//! USB HID interrupt pipeline.
//!
//! Channels 1 and 2 are long-lived interrupt-IN pollers for the boot
//! keyboard and mouse.  The channel ISR runs with interrupts masked and
//! never formats or blocks: it classifies the halt reason, feeds the
//! split state machine, pushes raw reports into the SPSC rings, and
//! re-arms the channel.  Time-based work — split complete-phase
//! re-enables, the transfer watchdog, port reset recovery — runs from the
//! timer tick.

use super::dwc2::{self, hcchar, hcint, hcsplt, hctsiz, regs, EndpointType};
use super::split::{SplitAction, SplitEvent, SplitPhase, SplitState};
use super::{UsbSpeed, COUNTERS, KEYBOARD_REPORTS, MOUSE_REPORTS};
use crate::memory::DmaBuffer;
use core::sync::atomic::Ordering;
use spin::Mutex;

/// Channel assignments.
pub const KEYBOARD_CHANNEL: usize = 1;
pub const MOUSE_CHANNEL: usize = 2;

/// The DWC2 controller's HAL IRQ on the Pi (VideoCore bank 1, bit 9).
pub const USB_IRQ: u32 = 8 + 9;

/// Watchdog cadence: every 10 ms.
const WATCHDOG_PERIOD_MS: u64 = 10;
/// A transfer stuck this long gets kicked.
const STUCK_MS: u64 = 50;
/// Port recovery: finish the reset after 50 ms, give up at 100 ms.
const RECOVERY_RESET_MS: u64 = 50;
const RECOVERY_TIMEOUT_MS: u64 = 100;

/// One interrupt-IN pipeline.
struct Pipe {
    channel: usize,
    device: u8,
    endpoint: u8,
    mps: u16,
    speed: UsbSpeed,
    split_route: Option<(u8, u8)>,
    data_toggle: bool,
    split: SplitState,
    /// Complete-split re-enable handed off to the timer tick.
    deferred_complete: bool,
    transfer_pending: bool,
    last_activity_tick: u64,
    buf: DmaBuffer,
    is_keyboard: bool,
}

static PIPES: Mutex<[Option<Pipe>; 2]> = Mutex::new([None, None]);

/// Root-port reset recovery state.
struct Recovery {
    started_tick: u64,
    reset_deasserted: bool,
}

static RECOVERY: Mutex<Option<Recovery>> = Mutex::new(None);

fn ms_to_ticks(ms: u64) -> u64 {
    (ms / crate::config::TICK_MS as u64).max(1)
}

/// Arm (or re-arm) a pipe's channel.
fn start_pipe(pipe: &mut Pipe) {
    let ch = pipe.channel;
    dwc2::halt_channel(ch);

    // The controller will write the buffer behind the cache.
    pipe.buf.clear();
    crate::arch::cache_clean_invalidate_range(pipe.buf.addr(), pipe.buf.len());

    let splt = match pipe.split_route {
        Some((hub, port)) => {
            let mut v = hcsplt::SPLTENA
                | ((hub as u32) << hcsplt::HUBADDR_SHIFT)
                | ((port as u32) << hcsplt::PRTADDR_SHIFT);
            if pipe.split.phase == SplitPhase::CompleteSplit {
                v |= hcsplt::COMPSPLT;
            }
            v
        }
        None => 0,
    };
    dwc2::ch_write(ch, regs::HCSPLT0, splt);

    dwc2::ch_write(ch, regs::HCINT0, 0xFFFF_FFFF);
    dwc2::ch_write(
        ch,
        regs::HCINTMSK0,
        hcint::CHHLTD | hcint::NYET | hcint::XACTERR | hcint::BBLERR,
    );

    let pid = if pipe.data_toggle {
        hctsiz::PID_DATA1
    } else {
        hctsiz::PID_DATA0
    };
    dwc2::ch_write(ch, regs::HCDMA0, pipe.buf.addr() as u32);
    dwc2::ch_write(
        ch,
        regs::HCTSIZ0,
        (pipe.mps as u32 & hctsiz::XFERSIZE_MASK) | (1 << hctsiz::PKTCNT_SHIFT) | pid,
    );

    let mut chr = (pipe.mps as u32 & hcchar::MPS_MASK)
        | ((pipe.endpoint as u32) << hcchar::EPNUM_SHIFT)
        | hcchar::EPDIR_IN
        | ((EndpointType::Interrupt as u32) << hcchar::EPTYPE_SHIFT)
        | (1 << hcchar::MC_SHIFT)
        | ((pipe.device as u32) << hcchar::DEVADDR_SHIFT);
    if pipe.speed == UsbSpeed::Low {
        chr |= hcchar::LSDEV;
    }
    // The core's scheduler wants the parity of the frame it starts in.
    if dwc2::frame_number() & 1 != 0 {
        chr |= hcchar::ODDFRM;
    }
    dwc2::ch_write(ch, regs::HCCHAR0, chr | hcchar::CHEN);

    pipe.transfer_pending = true;
    pipe.last_activity_tick = crate::time::ticks();
}

fn make_pipe(channel: usize, device: u8, endpoint: u8, mps: u16, is_keyboard: bool) -> Option<Pipe> {
    let dev = super::find_device(device)?;
    let buf = DmaBuffer::new(64, 64)?;
    Some(Pipe {
        channel,
        device,
        endpoint,
        mps: mps.clamp(1, 64),
        speed: dev.speed,
        split_route: super::xfer::split_route(dev.speed, dev.parent_hub, dev.parent_port),
        data_toggle: false,
        split: SplitState::new(),
        deferred_complete: false,
        transfer_pending: false,
        last_activity_tick: 0,
        buf,
        is_keyboard,
    })
}

fn install_irq_once() {
    use core::sync::atomic::AtomicBool;
    static INSTALLED: AtomicBool = AtomicBool::new(false);
    if !INSTALLED.swap(true, Ordering::Relaxed) {
        crate::interrupts::register_handler(USB_IRQ, usb_irq_handler);
        crate::interrupts::enable_irq(USB_IRQ);
        dwc2::enable_global_interrupts();
    }
}

/// Bind the first boot keyboard.  Later keyboards are enumerated but not
/// subscribed.
pub fn bind_keyboard(device: u8, endpoint: u8, mps: u16) {
    let mut pipes = PIPES.lock();
    if pipes[0].is_some() {
        return;
    }
    if let Some(mut pipe) = make_pipe(KEYBOARD_CHANNEL, device, endpoint, mps, true) {
        start_pipe(&mut pipe);
        pipes[0] = Some(pipe);
        drop(pipes);
        install_irq_once();
    }
}

/// Bind the first boot mouse.
pub fn bind_mouse(device: u8, endpoint: u8, mps: u16) {
    let mut pipes = PIPES.lock();
    if pipes[1].is_some() {
        return;
    }
    if let Some(mut pipe) = make_pipe(MOUSE_CHANNEL, device, endpoint, mps, false) {
        start_pipe(&mut pipe);
        pipes[1] = Some(pipe);
        drop(pipes);
        install_irq_once();
    }
}

/// A completed transfer: flip the toggle, invalidate the DMA buffer, and
/// hand the report to the consumer ring.
fn data_event(pipe: &mut Pipe) {
    pipe.data_toggle = !pipe.data_toggle;
    crate::arch::cache_clean_invalidate_range(pipe.buf.addr(), pipe.buf.len());
    let mut report = [0u8; 8];
    report.copy_from_slice(&pipe.buf.as_slice()[..8]);
    if pipe.is_keyboard {
        KEYBOARD_REPORTS.push(&report);
    } else {
        MOUSE_REPORTS.push(&report);
    }
    COUNTERS.data_events.fetch_add(1, Ordering::Relaxed);
}

/// Channel interrupt service.  Interrupts are masked; no printing, no
/// blocking.
fn channel_isr(ch: usize, pipe: &mut Pipe) {
    COUNTERS.channel_irqs[ch - 1].fetch_add(1, Ordering::Relaxed);

    let int = dwc2::ch_read(ch, regs::HCINT0);
    let splt = dwc2::ch_read(ch, regs::HCSPLT0);

    if int & hcint::XFERCOMPL != 0 {
        data_event(pipe);
        dwc2::ch_write(ch, regs::HCINT0, 0xFFFF_FFFF);
        start_pipe(pipe);
        return;
    }

    if int & hcint::CHHLTD == 0 {
        dwc2::ch_write(ch, regs::HCINT0, int);
        return;
    }

    pipe.transfer_pending = false;

    if splt & hcsplt::SPLTENA != 0 {
        // Split pipeline: classify the halt and run the state machine.
        let event = if int & hcint::XFERCOMPL != 0 {
            SplitEvent::XferComplete
        } else if int & (hcint::XACTERR | hcint::BBLERR | hcint::STALL | hcint::AHBERR) != 0 {
            SplitEvent::Error
        } else if int & hcint::NYET != 0 {
            COUNTERS.nyets.fetch_add(1, Ordering::Relaxed);
            SplitEvent::Nyet
        } else if int & hcint::NAK != 0 {
            COUNTERS.naks.fetch_add(1, Ordering::Relaxed);
            SplitEvent::Nak
        } else if int & hcint::ACK != 0 {
            SplitEvent::Ack
        } else {
            SplitEvent::Error
        };

        match pipe.split.on_event(event, dwc2::frame_number()) {
            SplitAction::Done => {
                data_event(pipe);
                dwc2::ch_write(ch, regs::HCINT0, 0xFFFF_FFFF);
                start_pipe(pipe);
            }
            SplitAction::WaitThenComplete | SplitAction::RetryComplete => {
                // The timer tick re-enables once enough frames have
                // passed.
                pipe.deferred_complete = true;
                dwc2::ch_write(ch, regs::HCINT0, 0xFFFF_FFFF);
            }
            SplitAction::Restart => {
                COUNTERS.restarts.fetch_add(1, Ordering::Relaxed);
                dwc2::ch_write(ch, regs::HCINT0, 0xFFFF_FFFF);
                start_pipe(pipe);
            }
            SplitAction::Fail => {
                COUNTERS.errors.fetch_add(1, Ordering::Relaxed);
                pipe.split.reset();
                dwc2::ch_write(ch, regs::HCINT0, 0xFFFF_FFFF);
                start_pipe(pipe);
            }
        }
        return;
    }

    // Plain (non-split) pipeline.
    if int & hcint::ACK != 0 {
        data_event(pipe);
    } else if int & hcint::NAK != 0 {
        // Normal idle poll: nothing to report.
        COUNTERS.naks.fetch_add(1, Ordering::Relaxed);
    } else if int & (hcint::STALL | hcint::XACTERR | hcint::BBLERR) != 0 {
        COUNTERS.errors.fetch_add(1, Ordering::Relaxed);
    }
    dwc2::ch_write(ch, regs::HCINT0, 0xFFFF_FFFF);
    start_pipe(pipe);
}

/// Root-port change interrupt: acknowledge the change bits and, when the
/// port dropped enable while still connected, start a timed reset
/// recovery.
fn port_isr() {
    COUNTERS.port_irqs.fetch_add(1, Ordering::Relaxed);
    let hprt = dwc2::read(regs::HPRT);

    if hprt & dwc2::hprt::ENA_CHNG != 0 {
        dwc2::hprt_ack(dwc2::hprt::ENA_CHNG);
        let enabled = hprt & dwc2::hprt::ENA != 0;
        let connected = hprt & dwc2::hprt::CONN_STS != 0;
        if !enabled && connected {
            // Port fell over but the device is still there: re-reset it
            // and let the timer tick finish the job.
            dwc2::hprt_set(dwc2::hprt::RST);
            *RECOVERY.lock() = Some(Recovery {
                started_tick: crate::time::ticks(),
                reset_deasserted: false,
            });
        }
    }
    if hprt & dwc2::hprt::CONN_DET != 0 {
        dwc2::hprt_ack(dwc2::hprt::CONN_DET);
    }
    if hprt & dwc2::hprt::OVRCUR_CHNG != 0 {
        dwc2::hprt_ack(dwc2::hprt::OVRCUR_CHNG);
    }
}

/// The controller's interrupt entry.
pub fn usb_irq_handler(_irq: u32) {
    COUNTERS.irq_total.fetch_add(1, Ordering::Relaxed);

    let gint = dwc2::read(regs::GINTSTS);
    if gint & dwc2::gintsts::HPRTINT != 0 {
        port_isr();
    }
    if gint & dwc2::gintsts::HCHINT != 0 {
        let haint = dwc2::read(regs::HAINT);
        let mut pipes = PIPES.lock();
        for slot in pipes.iter_mut() {
            if let Some(pipe) = slot {
                if haint & (1 << pipe.channel) != 0 {
                    channel_isr(pipe.channel, pipe);
                }
            }
        }
    }
    if gint & dwc2::gintsts::DISCONNINT != 0 {
        dwc2::write(regs::GINTSTS, dwc2::gintsts::DISCONNINT);
        super::remove_subtree(0, 0);
    }
    if gint & dwc2::gintsts::CONIDSTSCHNG != 0 {
        dwc2::write(regs::GINTSTS, dwc2::gintsts::CONIDSTSCHNG);
    }
}

/// Timer hook (every tick on the Pi): split completion, watchdog, port
/// recovery.
pub fn timer_tick(now: u64) {
    drive_deferred_splits();
    if now % ms_to_ticks(WATCHDOG_PERIOD_MS) == 0 {
        watchdog(now);
    }
    drive_port_recovery(now);
}

/// Re-enable complete-splits whose inter-phase wait has elapsed.
fn drive_deferred_splits() {
    let Some(mut pipes) = PIPES.try_lock() else { return };
    let frame = dwc2::frame_number();
    for slot in pipes.iter_mut() {
        if let Some(pipe) = slot {
            if pipe.deferred_complete && pipe.split.ready_for_complete(frame) {
                pipe.deferred_complete = false;
                start_pipe(pipe);
            }
        }
    }
}

/// Kick transfers that have shown no progress for [`STUCK_MS`].
fn watchdog(now: u64) {
    let Some(mut pipes) = PIPES.try_lock() else { return };
    for slot in pipes.iter_mut() {
        if let Some(pipe) = slot {
            let stuck = pipe.transfer_pending
                && now.saturating_sub(pipe.last_activity_tick) >= ms_to_ticks(STUCK_MS);
            if stuck {
                // Force-disable (bounded halt), clear split state, rearm.
                dwc2::halt_channel(pipe.channel);
                pipe.split.reset();
                pipe.deferred_complete = false;
                COUNTERS.watchdog_kicks.fetch_add(1, Ordering::Relaxed);
                COUNTERS.restarts.fetch_add(1, Ordering::Relaxed);
                start_pipe(pipe);
            }
        }
    }
}

/// Complete a port reset started by the ISR: deassert after 50 ms, wait
/// for enable (or give up at 100 ms), then restart both pipelines.
fn drive_port_recovery(now: u64) {
    let mut guard = match RECOVERY.try_lock() {
        Some(g) => g,
        None => return,
    };
    let Some(rec) = guard.as_mut() else { return };

    let elapsed = now.saturating_sub(rec.started_tick);
    if !rec.reset_deasserted {
        if elapsed >= ms_to_ticks(RECOVERY_RESET_MS) {
            dwc2::hprt_clear(dwc2::hprt::RST);
            rec.reset_deasserted = true;
        }
        return;
    }

    let enabled = dwc2::read(regs::HPRT) & dwc2::hprt::ENA != 0;
    if enabled || elapsed >= ms_to_ticks(RECOVERY_TIMEOUT_MS) {
        *guard = None;
        drop(guard);
        if enabled {
            restart_pipelines();
        }
    }
}

/// Restart both HID pipelines from scratch.
fn restart_pipelines() {
    let Some(mut pipes) = PIPES.try_lock() else { return };
    for slot in pipes.iter_mut() {
        if let Some(pipe) = slot {
            pipe.split.reset();
            pipe.deferred_complete = false;
            pipe.data_toggle = false;
            COUNTERS.restarts.fetch_add(1, Ordering::Relaxed);
            start_pipe(pipe);
        }
    }
}

