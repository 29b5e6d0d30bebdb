//! IPC common mechanics.
//!
//! Every synchronization object shares one control block layout, one
//! waiter-list discipline and one blocking/timeout protocol; the
//! semaphore, mutex and queue modules build their semantics on top.

use core::ptr::NonNull;

use crate::critical::CriticalSection;
use crate::error::{KernelError, KernelResult};
use crate::kernel;
use crate::list::{list_entry, ListNode};
use crate::sched;
use crate::thread::Tcb;
use crate::timer;
use crate::types::{IpcKind, Prio, ThreadStatus, Tick, Timeout, WaitMode, DUMMY_PRIORITY};

/// Holder bookkeeping for semaphores and mutexes.
pub(crate) struct SyncData {
    /// Current mutex owner
    pub holder: *mut Tcb,
    /// Recursive acquisition depth
    pub recursion: u16,
    /// Owner's priority before inheritance, [`DUMMY_PRIORITY`] when not
    /// boosted
    pub original_prio: Prio,
}

impl SyncData {
    pub(crate) const fn new() -> Self {
        SyncData {
            holder: core::ptr::null_mut(),
            recursion: 0,
            original_prio: DUMMY_PRIORITY,
        }
    }
}

/// Ring-buffer bookkeeping for message queues.
pub(crate) struct RingData {
    /// Start of the item pool
    pub head: *mut u8,
    /// One past the end of the item pool
    pub tail: *mut u8,
    /// Next slot to read
    pub read_from: *mut u8,
    /// Next slot to write
    pub write_to: *mut u8,
}

impl RingData {
    pub(crate) const fn new() -> Self {
        RingData {
            head: core::ptr::null_mut(),
            tail: core::ptr::null_mut(),
            read_from: core::ptr::null_mut(),
            write_to: core::ptr::null_mut(),
        }
    }
}

/// Kind-specific payload of an IPC object.
pub(crate) enum IpcData {
    Sync(SyncData),
    Ring(RingData),
}

/// IPC object control block, shared by semaphores, mutexes and queues.
pub struct Ipc {
    pub(crate) kind: IpcKind,
    /// False once deleted; waiters observe this and return `Deleted`.
    pub(crate) valid: bool,
    pub(crate) mode: WaitMode,
    pub(crate) wait_list: ListNode,
    /// Semaphore count / mutex availability / queued message count.
    pub(crate) count: u16,
    /// Maximum count or queue length.
    pub(crate) capacity: u16,
    /// Queue item size in bytes (zero for semaphores and mutexes).
    pub(crate) item_size: u16,
    pub(crate) is_static: bool,
    pub(crate) data: IpcData,
}

unsafe impl Send for Ipc {}
unsafe impl Sync for Ipc {}

impl Ipc {
    /// Create an invalid object. A type-specific init/create call makes
    /// it usable.
    pub const fn new() -> Self {
        Ipc {
            kind: IpcKind::Semaphore,
            valid: false,
            mode: WaitMode::Fifo,
            wait_list: ListNode::new(),
            count: 0,
            capacity: 0,
            item_size: 0,
            is_static: true,
            data: IpcData::Sync(SyncData::new()),
        }
    }

    /// Object discriminant.
    #[inline]
    pub fn kind(&self) -> IpcKind {
        self.kind
    }

    /// False once the object has been deleted.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Current count: semaphore units, mutex availability, or queued
    /// messages.
    #[inline]
    pub fn count(&self) -> u16 {
        self.count
    }

    /// Maximum count or queue length.
    #[inline]
    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    /// Sentinel of the waiter list, for use with [`t_ipc_suspend`] and
    /// [`t_ipc_resume_all`].
    #[inline]
    pub fn wait_list_ptr(&mut self) -> *mut ListNode {
        &raw mut self.wait_list
    }

    pub(crate) fn sync_mut(&mut self) -> Option<&mut SyncData> {
        match &mut self.data {
            IpcData::Sync(s) => Some(s),
            IpcData::Ring(_) => None,
        }
    }

    pub(crate) fn ring_mut(&mut self) -> Option<&mut RingData> {
        match &mut self.data {
            IpcData::Ring(r) => Some(r),
            IpcData::Sync(_) => None,
        }
    }
}

impl Default for Ipc {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Waiter List ============

/// True when `a` outranks `b` under the configured priority direction.
#[inline]
pub(crate) fn outranks(a: Prio, b: Prio) -> bool {
    if crate::config::LOWER_NUM_IS_HIGHER_PRIO {
        a < b
    } else {
        a > b
    }
}

/// Suspend a thread into an IPC waiter list.
///
/// Removes the thread from the ready set, marks it SUSPEND and inserts
/// it at the tail (FIFO) or before the first waiter it strictly
/// outranks (PRIO, ties broken by arrival).
pub fn t_ipc_suspend(
    sentinel: *mut ListNode,
    thread: *mut Tcb,
    mode: WaitMode,
) -> KernelResult<()> {
    if sentinel.is_null() || thread.is_null() {
        return Err(KernelError::Null);
    }

    let _cs = CriticalSection::enter();

    sched::t_sched_remove_thread(thread);
    unsafe {
        (*thread).status = ThreadStatus::Suspend;

        match mode {
            WaitMode::Fifo => ListNode::insert_before(sentinel, &raw mut (*thread).tlist),
            WaitMode::Prio => {
                let prio = (*thread).current_priority;
                let mut p = (*sentinel).next;
                while p != sentinel {
                    let waiter = list_entry!(p, Tcb, tlist);
                    if outranks(prio, (*waiter).current_priority) {
                        break;
                    }
                    p = (*p).next;
                }
                ListNode::insert_before(p, &raw mut (*thread).tlist);
            }
        }
    }

    Ok(())
}

/// Pop the head waiter, mark it READY and insert it into the ready set.
/// Returns true when a waiter was woken. Caller holds the critical
/// section and decides whether to request a switch.
pub(crate) unsafe fn wake_first_waiter(sentinel: *mut ListNode) -> bool {
    unsafe {
        if (*sentinel).is_empty() {
            return false;
        }
        let node = (*sentinel).next;
        let thread = list_entry!(node, Tcb, tlist);

        ListNode::detach(node);
        (*thread).status = ThreadStatus::Ready;
        sched::t_sched_insert_thread(thread);
        true
    }
}

/// Resume every thread in a waiter list without requesting a switch;
/// the caller may invoke the scheduler afterwards.
pub fn t_ipc_resume_all(sentinel: *mut ListNode) -> KernelResult<()> {
    if sentinel.is_null() {
        return Err(KernelError::Null);
    }

    loop {
        let _cs = CriticalSection::enter();
        if unsafe { !wake_first_waiter(sentinel) } {
            return Ok(());
        }
    }
}

/// Delete an IPC object: wake all waiters (they observe `Deleted`),
/// invalidate the object, and release pool-backed storage. Idempotent.
///
/// # Safety
/// The pointer must reference a live IPC object; for dynamically
/// created objects it must not be used afterwards.
pub unsafe fn t_ipc_delete(ipc: NonNull<Ipc>) -> KernelResult<()> {
    let ipc = ipc.as_ptr();

    unsafe {
        if !(*ipc).valid {
            return Ok(());
        }

        if !(*ipc).wait_list.is_empty() {
            t_ipc_resume_all(&raw mut (*ipc).wait_list)?;
            sched::t_sched_switch();
        }

        {
            let _cs = CriticalSection::enter();
            (*ipc).valid = false;
            (*ipc).count = 0;
            (*ipc).capacity = 0;
            (*ipc).item_size = 0;
        }

        release_dynamic(ipc);
    }

    Ok(())
}

/// Release a pool-backed IPC object and, for queues, its item pool.
#[cfg(feature = "dynamic-alloc")]
unsafe fn release_dynamic(ipc: *mut Ipc) {
    unsafe {
        if !(*ipc).is_static {
            if let IpcData::Ring(ring) = &(*ipc).data {
                if !ring.head.is_null() {
                    let _ = crate::mem::t_free(ring.head);
                }
            }
            let _ = crate::mem::t_free(ipc as *mut u8);
        }
    }
}

#[cfg(not(feature = "dynamic-alloc"))]
unsafe fn release_dynamic(_ipc: *mut Ipc) {}

// ============ Blocking / Timeout Discipline ============

/// Per-wait bookkeeping for a finite timeout.
pub(crate) struct WaitState {
    remaining: Timeout,
    started: Option<Tick>,
}

impl WaitState {
    pub(crate) fn new(timeout: Timeout) -> Self {
        WaitState {
            remaining: timeout,
            started: None,
        }
    }

    /// True when the wait must not block at all.
    #[inline]
    pub(crate) fn non_blocking(&self) -> bool {
        self.remaining == Timeout::None
    }

    /// Arm the calling thread's private timer for the remaining wait.
    /// Caller holds the critical section and has already suspended the
    /// thread.
    pub(crate) fn arm(&mut self, current: *mut Tcb) {
        if let Timeout::Ticks(n) = self.remaining {
            self.started.get_or_insert_with(timer::t_tick_get);
            unsafe {
                let tmr = &mut (*current).timer;
                tmr.set_duration(n);
                let _ = timer::t_timer_start(tmr);
            }
        }
    }

    /// Account for the time spent blocked. Returns `Timeout` when the
    /// wait is exhausted.
    pub(crate) fn update_after_wake(&mut self) -> KernelResult<()> {
        if let (Timeout::Ticks(n), Some(started)) = (self.remaining, self.started) {
            let now = timer::t_tick_get();
            let elapsed = timer::tick_diff(started, now);
            if elapsed >= n {
                return Err(KernelError::Timeout);
            }
            self.remaining = Timeout::Ticks(n - elapsed);
            self.started = Some(now);
        }
        Ok(())
    }

    /// Disarm the private timer after the wait concluded for another
    /// reason than expiry.
    pub(crate) fn disarm(&self, current: *mut Tcb) {
        if matches!(self.remaining, Timeout::Ticks(_)) && !current.is_null() {
            unsafe {
                let _ = timer::t_timer_stop(&mut (*current).timer);
            }
        }
    }
}

/// The calling thread, or `Unsupported` when no thread context exists
/// (blocking operations require a started scheduler).
#[inline]
pub(crate) fn current_or_unsupported() -> KernelResult<*mut Tcb> {
    kernel::t_current_thread()
        .map(NonNull::as_ptr)
        .ok_or(KernelError::Unsupported)
}
