//! Priority-based preemptive scheduler.
//!
//! Maintains one ready FIFO per priority plus a bitmap of non-empty
//! FIFOs, and drives context switches through the port layer.
//! Round-robin within a priority level is provided by
//! [`t_thread_rotate_same_prio`], invoked from the tick handler when a
//! time slice expires.

use crate::config::{LOWER_NUM_IS_HIGHER_PRIO, PRIORITY_MAX, USE_CPU_BITSCAN};
use crate::critical::CriticalSection;
use crate::kernel::{KERNEL, SCHED};
use crate::list::{list_entry, ListNode};
use crate::thread::Tcb;
use crate::types::{Prio, ThreadStatus};

/// Highest-priority bit set in the ready group, or `None` when no
/// thread is ready.
#[inline]
pub(crate) fn highest_ready(ready_group: u32) -> Option<Prio> {
    if ready_group == 0 {
        return None;
    }
    if USE_CPU_BITSCAN {
        if LOWER_NUM_IS_HIGHER_PRIO {
            Some(ready_group.trailing_zeros() as Prio)
        } else {
            Some((31 - ready_group.leading_zeros()) as Prio)
        }
    } else {
        let mut bit: u32 = if LOWER_NUM_IS_HIGHER_PRIO { 0 } else { 31 };
        loop {
            if ready_group & (1u32 << bit) != 0 {
                return Some(bit as Prio);
            }
            if LOWER_NUM_IS_HIGHER_PRIO {
                bit += 1;
            } else {
                bit -= 1;
            }
        }
    }
}

/// Initialize scheduler internal structures.
pub fn t_sched_init() {
    let _cs = CriticalSection::enter();
    unsafe { SCHED.get_unchecked().init() };
}

/// Start scheduling: select the highest-priority ready thread and
/// perform the first context switch. Never returns.
///
/// At least one thread must be ready; [`crate::kernel::t_init`] readies
/// the idle thread.
pub fn t_sched_start() -> ! {
    let next_psp_cell;
    {
        let cs = CriticalSection::enter();
        let sched = SCHED.get(&cs);

        // Guaranteed by the idle thread being ready.
        let prio = highest_ready(sched.ready_group).unwrap_or(crate::config::IDLE_PRIORITY);
        let head = sched.ready_lists[prio as usize].next;
        let next = unsafe { list_entry!(head, Tcb, tlist) };

        unsafe {
            (*next).status = ThreadStatus::Running;
            (*next).remaining_tick = (*next).init_tick;
            sched.current = next;
            sched.current_priority = (*next).current_priority;
            next_psp_cell = &raw mut (*next).psp;
        }
    }

    unsafe { crate::port::t_first_switch(next_psp_cell) }
}

/// Defer context switches. Nests; interrupts stay enabled.
pub fn t_sched_suspend() {
    KERNEL.sched_suspend_inc();
}

/// Undo one level of [`t_sched_suspend`]. When the nesting drops to
/// zero and threads are ready, a switch is attempted.
pub fn t_sched_resume() {
    if KERNEL.sched_suspend_dec() == 0 && KERNEL.ready_count() > 0 {
        t_sched_switch();
    }
}

/// Attempt a context switch to the highest-priority ready thread.
///
/// Does nothing while the scheduler is suspended, before it has
/// started, or when the chosen thread is already running.
pub fn t_sched_switch() {
    if KERNEL.sched_suspend_nesting() != 0 {
        return;
    }

    let prev_psp_cell;
    let next_psp_cell;
    {
        let cs = CriticalSection::enter();
        let sched = SCHED.get(&cs);

        let Some(prio) = highest_ready(sched.ready_group) else {
            return;
        };
        let head = sched.ready_lists[prio as usize].next;
        let next = unsafe { list_entry!(head, Tcb, tlist) };

        if sched.current == next {
            return;
        }

        let prev = sched.current;
        sched.current = next;

        unsafe {
            if !prev.is_null() && (*prev).status == ThreadStatus::Running {
                (*prev).status = ThreadStatus::Ready;
            }
            (*next).status = ThreadStatus::Running;
            sched.current_priority = (*next).current_priority;

            prev_psp_cell = if prev.is_null() {
                core::ptr::null_mut()
            } else {
                &raw mut (*prev).psp
            };
            next_psp_cell = &raw mut (*next).psp;
        }
    }

    crate::port::t_normal_switch(prev_psp_cell, next_psp_cell);
}

/// Insert a thread at the tail of its priority's ready list and set the
/// ready bit. Null threads are ignored.
pub fn t_sched_insert_thread(thread: *mut Tcb) {
    if thread.is_null() {
        return;
    }

    let _cs = CriticalSection::enter();
    let sched = unsafe { SCHED.get_unchecked() };
    unsafe {
        let prio = (*thread).current_priority as usize;
        ListNode::insert_before(&raw mut sched.ready_lists[prio], &raw mut (*thread).tlist);
        sched.ready_group |= (*thread).number_mask;
    }
    KERNEL.ready_count_inc();
}

/// Remove a thread from its ready list, clearing the ready bit when the
/// list drains. Null threads are ignored.
pub fn t_sched_remove_thread(thread: *mut Tcb) {
    if thread.is_null() {
        return;
    }

    let _cs = CriticalSection::enter();
    let sched = unsafe { SCHED.get_unchecked() };
    unsafe {
        ListNode::detach(&raw mut (*thread).tlist);

        let prio = (*thread).current_priority as usize;
        if sched.ready_lists[prio].is_empty() {
            sched.ready_group &= !(*thread).number_mask;
        }
    }
    KERNEL.ready_count_dec();
}

/// Move a READY/RUNNING thread onto the tail of another priority's
/// ready list, updating its priority, mask and both ready bits. The
/// ready count is unchanged. Caller holds the critical section.
pub(crate) unsafe fn requeue_thread_prio(
    cs: &CriticalSection,
    thread: *mut Tcb,
    new_prio: Prio,
) {
    let sched = SCHED.get(cs);
    unsafe {
        let old_prio = (*thread).current_priority as usize;
        ListNode::detach(&raw mut (*thread).tlist);
        if sched.ready_lists[old_prio].is_empty() {
            sched.ready_group &= !(*thread).number_mask;
        }

        (*thread).current_priority = new_prio;
        (*thread).number_mask = 1u32 << new_prio;

        ListNode::insert_before(
            &raw mut sched.ready_lists[new_prio as usize],
            &raw mut (*thread).tlist,
        );
        sched.ready_group |= (*thread).number_mask;
    }
}

/// Voluntarily yield the CPU within the current priority level.
///
/// Moves the running thread to the tail of its ready list when at least
/// one other thread shares the priority, then attempts a switch.
pub fn t_thread_rotate_same_prio() {
    {
        let cs = CriticalSection::enter();
        let sched = SCHED.get(&cs);

        let current = sched.current;
        if current.is_null() {
            return;
        }

        unsafe {
            let prio = (*current).current_priority as usize;
            if ListNode::len(&raw const sched.ready_lists[prio]) <= 1 {
                return;
            }

            ListNode::detach(&raw mut (*current).tlist);
            ListNode::insert_before(
                &raw mut sched.ready_lists[prio],
                &raw mut (*current).tlist,
            );
        }
    }

    t_sched_switch();
}
