//! Thread management: creation, lifecycle, sleep, delete, restart.

mod tcb;

pub use tcb::Tcb;

use core::ptr::NonNull;

use crate::config::PRIORITY_MAX;
use crate::critical::CriticalSection;
use crate::error::{KernelError, KernelResult};
use crate::kernel;
use crate::list::ListNode;
use crate::sched;
use crate::timer;
use crate::types::{Prio, StackElement, ThreadEntry, ThreadStatus, Tick};

/// Low-level field initialization. No state transition, no ready-list
/// insertion.
unsafe fn thread_create_fields(
    entry: ThreadEntry,
    stack_base: *mut u8,
    stack_size: usize,
    priority: Prio,
    arg: *mut (),
    time_slice: Tick,
    thread: *mut Tcb,
) {
    unsafe {
        (*thread).tlist.init();

        (*thread).entry = Some(entry);
        (*thread).arg = arg;
        (*thread).stack_base = stack_base;
        (*thread).stack_size = stack_size;
        (*thread).current_priority = priority;
        (*thread).init_priority = priority;
        (*thread).number_mask = 1u32 << priority;

        // Prepare the initial stacked context.
        (*thread).psp = crate::port::t_stack_init(stack_base.add(stack_size), entry, arg);

        (*thread).init_tick = time_slice;
        (*thread).remaining_tick = time_slice;
    }
}

/// Initialize a caller-provided thread object. The thread is left in
/// INIT state; [`t_thread_startup`] makes it ready.
///
/// # Errors
/// `Null` for an empty stack, `Invalid` for an out-of-range priority or
/// a zero time slice.
pub fn t_thread_create_static(
    entry: ThreadEntry,
    stack: &'static mut [StackElement],
    priority: Prio,
    arg: *mut (),
    time_slice: Tick,
    thread: &'static mut Tcb,
) -> KernelResult<()> {
    if stack.is_empty() {
        return Err(KernelError::Null);
    }
    if priority as usize >= PRIORITY_MAX {
        return Err(KernelError::Invalid);
    }
    if time_slice == 0 {
        return Err(KernelError::Invalid);
    }

    let thread = thread as *mut Tcb;
    let stack_base = stack.as_mut_ptr() as *mut u8;
    let stack_size = core::mem::size_of_val(stack);

    unsafe {
        thread_create_fields(entry, stack_base, stack_size, priority, arg, time_slice, thread);

        timer::t_timer_init(
            &mut (*thread).timer,
            timer::timeout_function,
            thread as *mut (),
            time_slice,
        )?;

        (*thread).is_static = true;
        (*thread).status = ThreadStatus::Init;
    }
    Ok(())
}

/// Create a thread with control block and stack drawn from the default
/// byte pool. The thread is left in INIT state.
///
/// # Errors
/// `Null`/`Invalid` as for the static path, `Error` when the pool is
/// exhausted. Partial allocations are released on failure.
#[cfg(feature = "dynamic-alloc")]
pub fn t_thread_create(
    entry: ThreadEntry,
    stack_size: usize,
    priority: Prio,
    arg: *mut (),
    time_slice: Tick,
) -> KernelResult<NonNull<Tcb>> {
    if stack_size == 0 {
        return Err(KernelError::Null);
    }
    if priority as usize >= PRIORITY_MAX {
        return Err(KernelError::Invalid);
    }
    if time_slice == 0 {
        return Err(KernelError::Invalid);
    }

    let Some(raw) = crate::mem::t_malloc(core::mem::size_of::<Tcb>()) else {
        return Err(KernelError::Error);
    };
    let thread = raw.as_ptr() as *mut Tcb;

    let Some(stack) = crate::mem::t_malloc(stack_size) else {
        unsafe { crate::mem::t_free(raw.as_ptr()) };
        return Err(KernelError::Error);
    };

    unsafe {
        thread.write(Tcb::new());
        thread_create_fields(
            entry,
            stack.as_ptr(),
            stack_size,
            priority,
            arg,
            time_slice,
            thread,
        );

        timer::t_timer_init(
            &mut (*thread).timer,
            timer::timeout_function,
            thread as *mut (),
            time_slice,
        )?;

        (*thread).is_static = false;
        (*thread).status = ThreadStatus::Init;

        Ok(NonNull::new_unchecked(thread))
    }
}

/// Transition a thread from INIT (or SUSPEND after a restart) to READY
/// and insert it into its priority's ready list.
///
/// # Errors
/// `Error` when the thread has been DELETED.
pub fn t_thread_startup(thread: NonNull<Tcb>) -> KernelResult<()> {
    let thread = thread.as_ptr();

    {
        let _cs = CriticalSection::enter();
        unsafe {
            if (*thread).status == ThreadStatus::Deleted {
                return Err(KernelError::Error);
            }
            (*thread).current_priority = (*thread).init_priority;
            (*thread).number_mask = 1u32 << (*thread).current_priority;
            (*thread).status = ThreadStatus::Ready;
            (*thread).remaining_tick = (*thread).init_tick;
        }
    }

    sched::t_sched_insert_thread(thread);
    Ok(())
}

/// Mark a thread TERMINATED and queue it for reclamation by the idle
/// thread. Idempotent for TERMINATED threads.
///
/// # Errors
/// `Error` when the thread is already DELETED.
pub fn t_thread_delete(thread: NonNull<Tcb>) -> KernelResult<()> {
    let thread = thread.as_ptr();

    let status = unsafe { (*thread).status };
    match status {
        ThreadStatus::Terminated => return Ok(()),
        ThreadStatus::Deleted => return Err(KernelError::Error),
        ThreadStatus::Ready | ThreadStatus::Running => sched::t_sched_remove_thread(thread),
        _ => {
            let _cs = CriticalSection::enter();
            unsafe { ListNode::detach(&raw mut (*thread).tlist) };
        }
    }

    unsafe {
        let _ = timer::t_timer_stop(&mut (*thread).timer);
    }

    let cs = CriticalSection::enter();
    unsafe { kernel::defunct_list_push(&cs, thread) };
    Ok(())
}

/// Sleep the current thread for `ticks` ticks. Returns immediately for
/// a zero tick count or when called before the scheduler starts.
pub fn t_thread_sleep(ticks: Tick) {
    if ticks == 0 {
        return;
    }
    let Some(current) = kernel::t_current_thread() else {
        return;
    };
    let current = current.as_ptr();

    sched::t_sched_remove_thread(current);
    unsafe {
        {
            let _cs = CriticalSection::enter();
            (*current).status = ThreadStatus::Suspend;
        }

        let tmr = &mut (*current).timer;
        let _ = timer::t_timer_stop(tmr);
        tmr.set_duration(ticks);
        let _ = timer::t_timer_start(tmr);
    }

    sched::t_sched_switch();
}

/// Alias of [`t_thread_sleep`].
#[inline]
pub fn t_delay(ticks: Tick) {
    t_thread_sleep(ticks);
}

/// Explicitly suspend a thread. There is no explicit resume: a
/// suspended thread is woken by its timer or an IPC release.
pub fn t_thread_suspend(thread: NonNull<Tcb>) -> KernelResult<()> {
    let thread = thread.as_ptr();

    let _cs = CriticalSection::enter();
    sched::t_sched_remove_thread(thread);
    unsafe { (*thread).status = ThreadStatus::Suspend };
    Ok(())
}

/// Read a thread's lifecycle status.
#[inline]
pub fn t_thread_status(thread: NonNull<Tcb>) -> ThreadStatus {
    let _cs = CriticalSection::enter();
    unsafe { (*thread.as_ptr()).status }
}

/// Read a thread's current (possibly boosted) priority.
#[inline]
pub fn t_thread_priority(thread: NonNull<Tcb>) -> Prio {
    let _cs = CriticalSection::enter();
    unsafe { (*thread.as_ptr()).current_priority }
}

/// Set a thread's priority, updating its ready-group mask. A READY or
/// RUNNING thread is requeued onto the tail of the new priority's ready
/// list. The caller is responsible for invoking the scheduler afterwards
/// if a switch may be needed.
pub fn t_thread_set_priority(thread: NonNull<Tcb>, priority: Prio) -> KernelResult<()> {
    if priority as usize >= PRIORITY_MAX {
        return Err(KernelError::Invalid);
    }
    let thread = thread.as_ptr();

    let cs = CriticalSection::enter();
    unsafe {
        match (*thread).status {
            ThreadStatus::Ready | ThreadStatus::Running => {
                sched::requeue_thread_prio(&cs, thread, priority);
            }
            _ => {
                (*thread).current_priority = priority;
                (*thread).number_mask = 1u32 << priority;
            }
        }
    }
    Ok(())
}

/// Release a pool-backed stack and control block.
#[cfg(feature = "dynamic-alloc")]
unsafe fn release_dynamic(thread: *mut Tcb) {
    unsafe {
        if !(*thread).is_static {
            let _ = crate::mem::t_free((*thread).stack_base);
            let _ = crate::mem::t_free(thread as *mut u8);
        }
    }
}

#[cfg(not(feature = "dynamic-alloc"))]
unsafe fn release_dynamic(_thread: *mut Tcb) {}

/// Reclaim every thread on the defunct list: mark DELETED, unlink, and
/// release pool-backed stacks and control blocks. Runs in the idle
/// thread.
pub fn t_cleanup_defunct_threads() {
    let cs = CriticalSection::enter();
    let sched_state = kernel::SCHED.get(&cs);
    let sentinel = &raw mut sched_state.defunct_list;

    unsafe {
        while !(*sentinel).is_empty() {
            let node = (*sentinel).next;
            let thread = crate::list::list_entry!(node, Tcb, tlist);

            (*thread).status = ThreadStatus::Deleted;
            ListNode::detach(node);

            release_dynamic(thread);
        }
    }
}

/// Restart a DELETED thread: rebuild its stack frame and timer and make
/// it ready again.
///
/// # Errors
/// `Error` when the thread is not DELETED or carries no entry function.
pub fn t_thread_restart(thread: NonNull<Tcb>) -> KernelResult<()> {
    let t = thread.as_ptr();

    unsafe {
        if (*t).status != ThreadStatus::Deleted {
            return Err(KernelError::Error);
        }
        let Some(entry) = (*t).entry else {
            return Err(KernelError::Error);
        };

        {
            let _cs = CriticalSection::enter();
            ListNode::detach(&raw mut (*t).tlist);
        }

        thread_create_fields(
            entry,
            (*t).stack_base,
            (*t).stack_size,
            (*t).init_priority,
            (*t).arg,
            (*t).init_tick,
            t,
        );

        timer::t_timer_init(
            &mut (*t).timer,
            timer::timeout_function,
            t as *mut (),
            (*t).init_tick,
        )?;

        (*t).status = ThreadStatus::Init;
    }

    t_thread_startup(thread)
}

/// Terminate the current thread and hand the CPU away. The control
/// block is reclaimed later by the idle thread.
pub extern "C" fn t_thread_exit() -> ! {
    if let Some(current) = kernel::t_current_thread() {
        let current = current.as_ptr();

        sched::t_sched_remove_thread(current);
        unsafe {
            let _ = timer::t_timer_stop(&mut (*current).timer);
        }

        let cs = CriticalSection::enter();
        unsafe { kernel::defunct_list_push(&cs, current) };
        drop(cs);

        sched::t_sched_switch();
    }

    loop {
        core::hint::spin_loop();
    }
}
