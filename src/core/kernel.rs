//! Global kernel state and initialization.
//!
//! This module owns the scheduler state, the defunct-thread list, the
//! kernel counters and the idle thread, and provides the entry points
//! that bring the kernel up.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::config::{IDLE_PRIORITY, IDLE_TIME_SLICE, PRIORITY_MAX};
use crate::critical::critical_section;
use crate::cs_cell::CsCell;
use crate::error::KernelResult;
use crate::list::ListNode;
use crate::thread::Tcb;
use crate::types::{Prio, ThreadStatus};

// ============ Scheduler State ============

/// Mutable scheduler state, protected by IRQ-disable critical sections.
pub struct SchedState {
    /// Per-priority ready list sentinels. FIFO: insert at tail,
    /// dispatch from head.
    pub(crate) ready_lists: [ListNode; PRIORITY_MAX],
    /// Bitmap of priorities with at least one ready thread.
    pub(crate) ready_group: u32,
    /// Threads awaiting reclamation (TERMINATED -> DELETED).
    pub(crate) defunct_list: ListNode,
    /// Currently running thread (null before the scheduler starts).
    pub(crate) current: *mut Tcb,
    /// Priority of the currently running thread.
    pub(crate) current_priority: Prio,
}

impl SchedState {
    const fn new() -> Self {
        SchedState {
            ready_lists: [ListNode::new(); PRIORITY_MAX],
            ready_group: 0,
            defunct_list: ListNode::new(),
            current: core::ptr::null_mut(),
            current_priority: 0,
        }
    }

    /// Self-link every sentinel and clear the bitmap.
    pub(crate) fn init(&mut self) {
        for list in self.ready_lists.iter_mut() {
            list.init();
        }
        self.defunct_list.init();
        self.ready_group = 0;
        self.current = core::ptr::null_mut();
        self.current_priority = 0;
    }
}

/// Global scheduler state instance.
pub(crate) static SCHED: CsCell<SchedState> = CsCell::new(SchedState::new());

// ============ Kernel Counters ============

/// Atomic kernel counters.
pub struct KernelCounters {
    ready_count: AtomicU8,
    sched_suspend: AtomicU32,
}

impl KernelCounters {
    const fn new() -> Self {
        KernelCounters {
            ready_count: AtomicU8::new(0),
            sched_suspend: AtomicU32::new(0),
        }
    }

    pub(crate) fn reset(&self) {
        self.ready_count.store(0, Ordering::SeqCst);
        self.sched_suspend.store(0, Ordering::SeqCst);
    }

    /// Number of threads currently on a ready list.
    #[inline(always)]
    pub fn ready_count(&self) -> u8 {
        self.ready_count.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn ready_count_inc(&self) {
        self.ready_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn ready_count_dec(&self) {
        let _ = self
            .ready_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Scheduler-suspend nesting depth.
    #[inline(always)]
    pub fn sched_suspend_nesting(&self) -> u32 {
        self.sched_suspend.load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub(crate) fn sched_suspend_inc(&self) {
        self.sched_suspend.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the nesting depth after the decrement. Saturates at
    /// zero for unbalanced calls.
    #[inline(always)]
    pub(crate) fn sched_suspend_dec(&self) -> u32 {
        self.sched_suspend
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|prev| prev - 1)
            .unwrap_or(0)
    }
}

/// Global kernel counters instance.
pub(crate) static KERNEL: KernelCounters = KernelCounters::new();

// ============ Accessors ============

/// Currently running thread, or `None` before the scheduler starts.
#[inline]
pub fn t_current_thread() -> Option<NonNull<Tcb>> {
    critical_section(|cs| NonNull::new(SCHED.get(cs).current))
}

/// Priority of the currently running thread.
#[inline]
pub fn t_current_priority() -> Prio {
    critical_section(|cs| SCHED.get(cs).current_priority)
}

/// Number of threads currently on a ready list.
#[inline]
pub fn t_ready_count() -> u8 {
    KERNEL.ready_count()
}

// ============ Idle Thread ============

#[cfg(feature = "static-alloc")]
const IDLE_STACK_WORDS: usize =
    crate::config::IDLE_STACK_SIZE / core::mem::size_of::<crate::types::StackElement>();

#[cfg(feature = "static-alloc")]
static mut IDLE_TCB: Tcb = Tcb::new();

#[cfg(feature = "static-alloc")]
static mut IDLE_STACK: [crate::types::StackElement; IDLE_STACK_WORDS] = [0; IDLE_STACK_WORDS];

/// Idle thread entry: reclaims defunct threads forever.
fn idle_entry(_arg: *mut ()) {
    loop {
        crate::thread::t_cleanup_defunct_threads();
    }
}

#[cfg(feature = "static-alloc")]
fn idle_thread_init() -> KernelResult<()> {
    let tcb = unsafe { &mut *(&raw mut IDLE_TCB) };
    let stack = unsafe { &mut *(&raw mut IDLE_STACK) };
    crate::thread::t_thread_create_static(
        idle_entry,
        stack,
        IDLE_PRIORITY,
        core::ptr::null_mut(),
        IDLE_TIME_SLICE,
        tcb,
    )?;
    crate::thread::t_thread_startup(unsafe { NonNull::new_unchecked(&raw mut IDLE_TCB) })
}

#[cfg(all(feature = "dynamic-alloc", not(feature = "static-alloc")))]
fn idle_thread_init() -> KernelResult<()> {
    let tcb = crate::thread::t_thread_create(
        idle_entry,
        crate::config::IDLE_STACK_SIZE,
        IDLE_PRIORITY,
        core::ptr::null_mut(),
        IDLE_TIME_SLICE,
    )?;
    crate::thread::t_thread_startup(tcb)
}

// ============ Public API ============

/// Initialize the kernel core: scheduler, timer lists, idle thread.
///
/// Must be called before any thread or IPC operation. Prints the
/// startup banner once the console sink is registered.
pub fn t_init() -> KernelResult<()> {
    KERNEL.reset();
    crate::sched::t_sched_init();
    crate::timer::t_timer_list_init();
    idle_thread_init()?;
    crate::console::t_start_banner();
    crate::info!("kernel initialized");
    Ok(())
}

/// Start multitasking. Dispatches the highest-priority ready thread and
/// never returns.
///
/// The board must have readied at least one thread; [`t_init`] readies
/// the idle thread.
pub fn t_start() -> ! {
    crate::sched::t_sched_start()
}

/// Append a TERMINATED thread to the defunct list. Caller holds the
/// critical section.
pub(crate) unsafe fn defunct_list_push(cs: &crate::critical::CriticalSection, thread: *mut Tcb) {
    let sched = SCHED.get(cs);
    unsafe {
        (*thread).status = ThreadStatus::Terminated;
        ListNode::insert_before(&raw mut sched.defunct_list, &raw mut (*thread).tlist);
    }
}
