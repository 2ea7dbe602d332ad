//! Preemptive process scheduling.
//!
//! A fixed table of processes, context-switched by swapping [`TrapFrame`]s
//! in place inside the exception path.  Slot 0 is the kernel thread (the
//! shell); programs started by `exec` occupy the remaining slots and run
//! until their entry function returns.
//!
//! Switches are preemptive every 200 ms from the timer tick and
//! cooperative through `svc #0` ([`yield_now`]); both funnel into
//! [`schedule_from_irq`], which only ever runs with interrupts masked.

pub mod context;

use crate::config::MAX_PROCESSES;
use alloc::boxed::Box;
use alloc::vec;
use context::TrapFrame;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

/// Process lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Free,
    Ready,
    Running,
    /// Parked in `exec` waiting for a child to exit.
    Waiting,
    /// Finished; the parent reaps the slot.
    Exited,
}

/// One process-table slot.
pub struct Process {
    name: [u8; 24],
    name_len: usize,
    /// Load window of the program image, for backtrace annotation.
    pub load_base: usize,
    pub load_size: usize,
    saved: TrapFrame,
    state: ProcState,
    exit_code: i32,
    parent: usize,
    /// Owned stack for spawned processes (slot 0 uses the boot stack).
    stack: Option<Box<[u8]>>,
}

impl Process {
    const fn empty() -> Self {
        Process {
            name: [0; 24],
            name_len: 0,
            load_base: 0,
            load_size: 0,
            saved: TrapFrame::zeroed(),
            state: ProcState::Free,
            exit_code: 0,
            parent: 0,
            stack: None,
        }
    }

    fn set_name(&mut self, name: &str) {
        let n = name.len().min(self.name.len());
        self.name[..n].copy_from_slice(&name.as_bytes()[..n]);
        self.name_len = n;
    }

    /// Process name.
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len]).unwrap_or("?")
    }
}

const EMPTY: Process = Process::empty();
static TABLE: Mutex<[Process; MAX_PROCESSES]> = Mutex::new([EMPTY; MAX_PROCESSES]);

/// Index of the running process.  Written only by the scheduler.
static CURRENT: AtomicUsize = AtomicUsize::new(0);

/// Total context switches.
static CONTEXT_SWITCHES: AtomicU64 = AtomicU64::new(0);

/// Register the boot thread as process 0.
pub fn init() {
    let mut table = TABLE.lock();
    table[0].set_name("kernel");
    table[0].state = ProcState::Running;
    CURRENT.store(0, Ordering::Relaxed);
    crate::serial_println!("[SCHED] process table ready ({} slots)", MAX_PROCESSES);
}

/// Index of the running process.
pub fn current_index() -> usize {
    CURRENT.load(Ordering::Relaxed)
}

/// Total context switches taken.
pub fn context_switches() -> u64 {
    CONTEXT_SWITCHES.load(Ordering::Relaxed)
}

/// Name and load window of the running process, for the crash renderer.
/// Never blocks: falls back to "kernel" when the table is busy.
pub fn current_for_crash() -> ([u8; 24], usize, usize, usize) {
    let mut name = [0u8; 24];
    if let Some(table) = TABLE.try_lock() {
        let p = &table[CURRENT.load(Ordering::Relaxed)];
        name[..p.name_len].copy_from_slice(&p.name[..p.name_len]);
        (name, p.name_len, p.load_base, p.load_size)
    } else {
        name[..6].copy_from_slice(b"kernel");
        (name, 6, 0, 0)
    }
}

/// Pick the next ready process and swap register frames.  Called from the
/// timer tick and from the `svc` path, always with IRQs masked.
pub fn schedule_from_irq(frame: &mut TrapFrame) {
    // The kernel thread may hold the table lock; skip this slice rather
    // than deadlock, the next tick will try again.
    let mut table = match TABLE.try_lock() {
        Some(t) => t,
        None => return,
    };

    let cur = CURRENT.load(Ordering::Relaxed);
    let n = table.len();
    let mut next = None;
    for i in 1..=n {
        let idx = (cur + i) % n;
        if table[idx].state == ProcState::Ready {
            next = Some(idx);
            break;
        }
    }
    let next = match next {
        Some(idx) if idx != cur => idx,
        _ => return,
    };

    table[cur].saved = *frame;
    if table[cur].state == ProcState::Running {
        table[cur].state = ProcState::Ready;
    }
    table[next].state = ProcState::Running;
    *frame = table[next].saved;
    CURRENT.store(next, Ordering::Relaxed);
    CONTEXT_SWITCHES.fetch_add(1, Ordering::Relaxed);
}

/// `svc #0` lands here: a cooperative yield.
pub fn handle_svc(frame: &mut TrapFrame) {
    schedule_from_irq(frame);
}

/// Give up the processor until the scheduler comes back around.
pub fn yield_now() {
    crate::arch::svc_yield();
}

/// Create a process around a loaded program image.
///
/// The entry function receives `(kapi, argc, argv)` and lands in
/// [`process_exit_landing`] when it returns.
pub fn spawn(
    name: &str,
    entry: usize,
    kapi: usize,
    argc: usize,
    argv: usize,
    load_base: usize,
    load_size: usize,
) -> Option<usize> {
    let stack = vec![0u8; crate::config::PROCESS_STACK_SIZE].into_boxed_slice();
    let stack_top = stack.as_ptr() as usize + stack.len();

    let mut table = TABLE.lock();
    let parent = CURRENT.load(Ordering::Relaxed);
    let slot = table.iter().position(|p| p.state == ProcState::Free)?;

    let p = &mut table[slot];
    p.set_name(name);
    p.load_base = load_base;
    p.load_size = load_size;
    p.saved = TrapFrame::for_new_process(
        entry,
        stack_top,
        process_exit_landing as usize,
        kapi,
        argc,
        argv,
    );
    p.state = ProcState::Ready;
    p.exit_code = 0;
    p.parent = parent;
    p.stack = Some(stack);
    Some(slot)
}

/// Where a program's entry function returns to; its return value is still
/// in `x0` and arrives as `code`.
pub extern "C" fn process_exit_landing(code: i32) -> ! {
    exit_current(code)
}

/// Mark the running process exited and wake its parent.
pub fn exit_current(code: i32) -> ! {
    crate::interrupts::without_interrupts(|| {
        let mut table = TABLE.lock();
        let cur = CURRENT.load(Ordering::Relaxed);
        table[cur].state = ProcState::Exited;
        table[cur].exit_code = code;
        let parent = table[cur].parent;
        if table[parent].state == ProcState::Waiting {
            table[parent].state = ProcState::Ready;
        }
    });
    loop {
        yield_now();
    }
}

/// Park the caller until `child` exits, then reap it.
pub fn wait_for_exit(child: usize) -> i32 {
    loop {
        let done = crate::interrupts::without_interrupts(|| {
            let mut table = TABLE.lock();
            if table[child].state == ProcState::Exited {
                let code = table[child].exit_code;
                table[child] = Process::empty();
                Some(code)
            } else {
                let cur = CURRENT.load(Ordering::Relaxed);
                table[cur].state = ProcState::Waiting;
                None
            }
        });
        if let Some(code) = done {
            return code;
        }
        yield_now();
    }
}

/// Count of non-free slots.
pub fn process_count() -> usize {
    TABLE
        .lock()
        .iter()
        .filter(|p| p.state != ProcState::Free)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_schedule_exit_reap() {
        init();
        let slot = spawn("demo", 0x1000, 0xA0, 1, 0xB0, 0x8000, 0x100).unwrap();
        assert!(slot > 0);

        // A timer-driven switch from the kernel thread lands in the child.
        let mut frame = TrapFrame::zeroed();
        frame.elr = 0xFFFF;
        schedule_from_irq(&mut frame);
        assert_eq!(current_index(), slot);
        assert_eq!(frame.elr, 0x1000);
        assert_eq!(frame.x[0], 0xA0);

        // The child exits; frame swaps must put the kernel thread back.
        {
            let mut table = TABLE.lock();
            table[slot].state = ProcState::Exited;
            table[slot].exit_code = 7;
            table[0].state = ProcState::Ready;
        }
        schedule_from_irq(&mut frame);
        assert_eq!(current_index(), 0);
        assert_eq!(frame.elr, 0xFFFF);

        // Reaping frees the slot for reuse.
        assert_eq!(wait_for_exit(slot), 7);
        assert_eq!(TABLE.lock()[slot].state, ProcState::Free);
    }
}
