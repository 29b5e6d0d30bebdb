//! Host-side kernel tests.
//!
//! The port layer compiles to a stub on non-ARM targets, so scheduler
//! bookkeeping, timers, IPC state machines and the allocator run under
//! `cargo test` without a context switch ever taking place. Tests that
//! touch kernel-global state serialize on one mutex.

use core::ptr::{addr_of_mut, null_mut, NonNull};
use std::sync::{Mutex, MutexGuard};

use tortos::error::KernelError;
use tortos::thread::{
    t_cleanup_defunct_threads, t_thread_priority, t_thread_status,
};
use tortos::types::{StackElement, ThreadStatus, Timeout, WaitMode};
use tortos::{
    t_current_thread, t_init, t_ready_count, t_sched_switch, t_thread_create_static,
    t_thread_delete, t_thread_restart, t_thread_sleep, t_thread_startup, Tcb,
};

static LOCK: Mutex<()> = Mutex::new(());

/// Serialize and reinitialize the kernel-global state.
fn setup() -> MutexGuard<'static, ()> {
    let guard = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    t_init().expect("kernel init failed");
    guard
}

fn spin(_arg: *mut ()) {
    loop {}
}

macro_rules! static_thread {
    ($tcb:ident, $stack:ident) => {
        static mut $tcb: Tcb = Tcb::new();
        static mut $stack: [StackElement; 64] = [0; 64];
    };
}

/// Create and start a thread backed by the given statics.
macro_rules! start_thread {
    ($tcb:ident, $stack:ident, $prio:expr, $slice:expr) => {{
        unsafe {
            t_thread_create_static(
                spin,
                &mut *addr_of_mut!($stack),
                $prio,
                null_mut(),
                $slice,
                &mut *addr_of_mut!($tcb),
            )
            .unwrap();
            t_thread_startup(NonNull::new_unchecked(addr_of_mut!($tcb))).unwrap();
            NonNull::new_unchecked(addr_of_mut!($tcb))
        }
    }};
}

mod thread_lifecycle {
    use super::*;

    #[test]
    fn create_validates_arguments() {
        let _guard = setup();

        static mut TCB: Tcb = Tcb::new();
        static mut STACK: [StackElement; 64] = [0; 64];

        unsafe {
            let empty: &'static mut [StackElement] = &mut [];
            assert_eq!(
                t_thread_create_static(spin, empty, 5, null_mut(), 10, &mut *addr_of_mut!(TCB)),
                Err(KernelError::Null)
            );
            assert_eq!(
                t_thread_create_static(
                    spin,
                    &mut *addr_of_mut!(STACK),
                    tortos::config::PRIORITY_MAX as u8,
                    null_mut(),
                    10,
                    &mut *addr_of_mut!(TCB),
                ),
                Err(KernelError::Invalid)
            );
            assert_eq!(
                t_thread_create_static(
                    spin,
                    &mut *addr_of_mut!(STACK),
                    5,
                    null_mut(),
                    0,
                    &mut *addr_of_mut!(TCB),
                ),
                Err(KernelError::Invalid)
            );
        }
    }

    #[test]
    fn startup_makes_thread_ready_and_dispatchable() {
        let _guard = setup();
        static_thread!(TCB_A, STACK_A);

        // The idle thread is the only ready thread after init.
        assert_eq!(t_ready_count(), 1);

        let a = start_thread!(TCB_A, STACK_A, 7, 10);
        assert_eq!(t_thread_status(a), ThreadStatus::Ready);
        assert_eq!(t_ready_count(), 2);

        t_sched_switch();
        assert_eq!(t_current_thread(), Some(a));
        assert_eq!(t_thread_status(a), ThreadStatus::Running);
    }

    #[test]
    fn delete_defers_reclamation_to_cleanup() {
        let _guard = setup();
        static_thread!(TCB_B, STACK_B);

        let b = start_thread!(TCB_B, STACK_B, 6, 10);
        t_thread_delete(b).unwrap();
        assert_eq!(t_thread_status(b), ThreadStatus::Terminated);
        assert_eq!(t_ready_count(), 1);

        // Deleting a TERMINATED thread is idempotent.
        assert_eq!(t_thread_delete(b), Ok(()));

        t_cleanup_defunct_threads();
        assert_eq!(t_thread_status(b), ThreadStatus::Deleted);

        // A DELETED thread cannot be deleted again, only restarted.
        assert_eq!(t_thread_delete(b), Err(KernelError::Error));
        t_thread_restart(b).unwrap();
        assert_eq!(t_thread_status(b), ThreadStatus::Ready);
    }

    #[test]
    fn restart_requires_deleted_state() {
        let _guard = setup();
        static_thread!(TCB_C, STACK_C);

        let c = start_thread!(TCB_C, STACK_C, 6, 10);
        assert_eq!(t_thread_restart(c), Err(KernelError::Error));
    }

    #[test]
    fn sleep_wakes_after_the_requested_ticks() {
        let _guard = setup();
        static_thread!(TCB_D, STACK_D);

        let d = start_thread!(TCB_D, STACK_D, 5, 10);
        t_sched_switch();
        assert_eq!(t_current_thread(), Some(d));

        t_thread_sleep(5);
        assert_eq!(t_thread_status(d), ThreadStatus::Suspend);
        // The idle thread took over.
        assert_ne!(t_current_thread(), Some(d));

        for _ in 0..4 {
            tortos::timer::t_tick_increase();
        }
        assert_eq!(t_thread_status(d), ThreadStatus::Suspend);

        tortos::timer::t_tick_increase();
        assert_eq!(t_thread_status(d), ThreadStatus::Running);
        assert_eq!(t_current_thread(), Some(d));
    }

    #[cfg(feature = "dynamic-alloc")]
    #[test]
    fn dynamic_thread_reclamation_returns_memory() {
        let _guard = setup();

        let before = tortos::t_free_mem_size();
        let t = tortos::t_thread_create(spin, 512, 4, null_mut(), 10).unwrap();
        assert!(tortos::t_free_mem_size() < before);

        t_thread_startup(t).unwrap();
        t_thread_delete(t).unwrap();
        t_cleanup_defunct_threads();
        assert_eq!(tortos::t_free_mem_size(), before);
    }
}

mod scheduling {
    use super::*;

    #[test]
    fn higher_priority_thread_preempts() {
        let _guard = setup();
        static_thread!(TCB_LOW, STACK_LOW);
        static_thread!(TCB_HIGH, STACK_HIGH);

        let low = start_thread!(TCB_LOW, STACK_LOW, 5, 10);
        t_sched_switch();
        assert_eq!(t_current_thread(), Some(low));

        // A freshly readied higher-priority thread wins the next switch.
        let high = start_thread!(TCB_HIGH, STACK_HIGH, 10, 10);
        t_sched_switch();
        assert_eq!(t_current_thread(), Some(high));
        assert_eq!(t_thread_status(low), ThreadStatus::Ready);

        // It sleeps; the low thread runs again; it wakes and preempts.
        t_thread_sleep(100);
        assert_eq!(t_current_thread(), Some(low));

        for _ in 0..100 {
            tortos::timer::t_tick_increase();
        }
        assert_eq!(t_current_thread(), Some(high));
        assert_eq!(t_thread_status(low), ThreadStatus::Ready);
    }

    #[test]
    fn round_robin_rotates_on_slice_expiry() {
        let _guard = setup();
        static_thread!(TCB_RA, STACK_RA);
        static_thread!(TCB_RB, STACK_RB);
        static_thread!(TCB_RC, STACK_RC);

        let a = start_thread!(TCB_RA, STACK_RA, 5, 5);
        let b = start_thread!(TCB_RB, STACK_RB, 5, 5);
        let c = start_thread!(TCB_RC, STACK_RC, 5, 5);

        t_sched_switch();
        assert_eq!(t_current_thread(), Some(a));

        let mut order = Vec::new();
        for _ in 0..30 {
            tortos::timer::t_tick_increase();
            order.push(t_current_thread().unwrap());
        }

        // Four remaining ticks of each slice, then the rotation tick
        // already runs the next thread in arrival order.
        let mut expected = Vec::new();
        for (run, next) in [(a, b), (b, c), (c, a), (a, b), (b, c), (c, a)] {
            expected.extend(std::iter::repeat(run).take(4));
            expected.push(next);
        }
        assert_eq!(order, expected);
    }

    #[test]
    fn scheduler_suspend_defers_dispatch() {
        let _guard = setup();
        static_thread!(TCB_S, STACK_S);

        tortos::t_sched_suspend();
        let s = start_thread!(TCB_S, STACK_S, 5, 10);
        t_sched_switch();
        // No dispatch while suspended.
        assert_eq!(t_current_thread(), None);

        tortos::t_sched_resume();
        assert_eq!(t_current_thread(), Some(s));
    }
}

#[cfg(feature = "semaphore")]
mod semaphore {
    use super::*;
    use tortos::sync::ipc::{t_ipc_delete, t_ipc_suspend, Ipc};
    use tortos::sync::sem::{t_sema_init, t_sema_recv, t_sema_send};

    #[test]
    fn send_recv_round_trip() {
        let _guard = setup();

        let mut sem = Ipc::new();
        t_sema_init(&mut sem, 1, 0, WaitMode::Fifo).unwrap();

        assert_eq!(t_sema_recv(&mut sem, Timeout::None), Err(KernelError::Error));
        t_sema_send(&mut sem).unwrap();
        assert_eq!(sem.count(), 1);
        assert_eq!(t_sema_recv(&mut sem, Timeout::None), Ok(()));
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn send_at_capacity_fails() {
        let _guard = setup();

        let mut sem = Ipc::new();
        t_sema_init(&mut sem, 2, 2, WaitMode::Fifo).unwrap();
        assert_eq!(t_sema_send(&mut sem), Err(KernelError::Error));
    }

    #[test]
    fn init_validates_counts() {
        let _guard = setup();

        let mut sem = Ipc::new();
        assert_eq!(
            t_sema_init(&mut sem, 0, 0, WaitMode::Fifo),
            Err(KernelError::Null)
        );
        assert_eq!(
            t_sema_init(&mut sem, 1, 2, WaitMode::Fifo),
            Err(KernelError::Invalid)
        );
    }

    #[test]
    fn fifo_waiters_wake_in_arrival_order() {
        let _guard = setup();
        static_thread!(TCB_W1, STACK_W1);
        static_thread!(TCB_W2, STACK_W2);
        static_thread!(TCB_W3, STACK_W3);

        let w1 = start_thread!(TCB_W1, STACK_W1, 5, 10);
        let w2 = start_thread!(TCB_W2, STACK_W2, 5, 10);
        let w3 = start_thread!(TCB_W3, STACK_W3, 5, 10);

        let mut sem = Ipc::new();
        t_sema_init(&mut sem, 3, 0, WaitMode::Fifo).unwrap();

        for w in [w1, w2, w3] {
            t_ipc_suspend(sem.wait_list_ptr(), w.as_ptr(), WaitMode::Fifo).unwrap();
            assert_eq!(t_thread_status(w), ThreadStatus::Suspend);
        }

        t_sema_send(&mut sem).unwrap();
        assert_ne!(t_thread_status(w1), ThreadStatus::Suspend);
        assert_eq!(t_thread_status(w2), ThreadStatus::Suspend);

        t_sema_send(&mut sem).unwrap();
        assert_ne!(t_thread_status(w2), ThreadStatus::Suspend);
        assert_eq!(t_thread_status(w3), ThreadStatus::Suspend);

        t_sema_send(&mut sem).unwrap();
        assert_ne!(t_thread_status(w3), ThreadStatus::Suspend);
    }

    #[test]
    fn prio_mode_wakes_highest_priority_waiter() {
        let _guard = setup();
        static_thread!(TCB_PLOW, STACK_PLOW);
        static_thread!(TCB_PHIGH, STACK_PHIGH);

        let low = start_thread!(TCB_PLOW, STACK_PLOW, 3, 10);
        let high = start_thread!(TCB_PHIGH, STACK_PHIGH, 6, 10);

        let mut sem = Ipc::new();
        t_sema_init(&mut sem, 1, 0, WaitMode::Prio).unwrap();

        // Low-priority waiter arrives first; priority ordering still
        // puts the high-priority waiter at the head.
        t_ipc_suspend(sem.wait_list_ptr(), low.as_ptr(), WaitMode::Prio).unwrap();
        t_ipc_suspend(sem.wait_list_ptr(), high.as_ptr(), WaitMode::Prio).unwrap();

        t_sema_send(&mut sem).unwrap();
        assert_ne!(t_thread_status(high), ThreadStatus::Suspend);
        assert_eq!(t_thread_status(low), ThreadStatus::Suspend);
    }

    #[test]
    fn delete_wakes_waiters_and_invalidates() {
        let _guard = setup();
        static_thread!(TCB_DW, STACK_DW);

        let w = start_thread!(TCB_DW, STACK_DW, 5, 10);

        let mut sem = Ipc::new();
        t_sema_init(&mut sem, 1, 0, WaitMode::Fifo).unwrap();
        t_ipc_suspend(sem.wait_list_ptr(), w.as_ptr(), WaitMode::Fifo).unwrap();

        unsafe { t_ipc_delete(NonNull::from(&mut sem)).unwrap() };
        assert!(!sem.is_valid());
        assert_ne!(t_thread_status(w), ThreadStatus::Suspend);
        assert_eq!(t_sema_send(&mut sem), Err(KernelError::Deleted));

        // Idempotent.
        unsafe { t_ipc_delete(NonNull::from(&mut sem)).unwrap() };
    }
}

#[cfg(all(feature = "mutex", feature = "recursive-mutex"))]
mod mutex {
    use super::*;
    use tortos::sync::ipc::Ipc;
    use tortos::sync::mutex::{
        t_mutex_acquire, t_mutex_init, t_mutex_release, t_recursive_mutex_init,
    };

    #[test]
    fn acquire_requires_thread_context() {
        let _guard = setup();

        let mut mtx = Ipc::new();
        t_mutex_init(&mut mtx, WaitMode::Fifo).unwrap();
        assert_eq!(
            t_mutex_acquire(&mut mtx, Timeout::None),
            Err(KernelError::Unsupported)
        );
    }

    #[test]
    fn owner_tracking_and_foreign_release() {
        let _guard = setup();
        static_thread!(TCB_MA, STACK_MA);
        static_thread!(TCB_MB, STACK_MB);

        let a = start_thread!(TCB_MA, STACK_MA, 5, 10);
        t_sched_switch();
        assert_eq!(t_current_thread(), Some(a));

        let mut mtx = Ipc::new();
        t_mutex_init(&mut mtx, WaitMode::Fifo).unwrap();

        t_mutex_acquire(&mut mtx, Timeout::None).unwrap();
        assert_eq!(mtx.count(), 0);

        // Plain mutex re-acquire by the owner succeeds without nesting.
        t_mutex_acquire(&mut mtx, Timeout::None).unwrap();
        t_mutex_release(&mut mtx).unwrap();
        assert_eq!(mtx.count(), 1);

        // A non-owner cannot release.
        t_mutex_acquire(&mut mtx, Timeout::None).unwrap();
        let b = start_thread!(TCB_MB, STACK_MB, 9, 10);
        t_sched_switch();
        assert_eq!(t_current_thread(), Some(b));
        assert_eq!(t_mutex_release(&mut mtx), Err(KernelError::Error));
        assert_eq!(t_mutex_acquire(&mut mtx, Timeout::None), Err(KernelError::Error));
    }

    #[test]
    fn recursive_mutex_releases_in_cascade() {
        let _guard = setup();
        static_thread!(TCB_RM, STACK_RM);

        let t = start_thread!(TCB_RM, STACK_RM, 5, 10);
        t_sched_switch();
        assert_eq!(t_current_thread(), Some(t));

        let mut mtx = Ipc::new();
        t_recursive_mutex_init(&mut mtx, WaitMode::Fifo).unwrap();

        for _ in 0..3 {
            t_mutex_acquire(&mut mtx, Timeout::None).unwrap();
        }
        // Two releases keep ownership, the third frees the mutex.
        t_mutex_release(&mut mtx).unwrap();
        t_mutex_release(&mut mtx).unwrap();
        assert_eq!(mtx.count(), 0);
        t_mutex_release(&mut mtx).unwrap();
        assert_eq!(mtx.count(), 1);
    }

    #[test]
    fn contended_acquire_boosts_and_release_restores() {
        let _guard = setup();
        static_thread!(TCB_PL, STACK_PL);
        static_thread!(TCB_PH, STACK_PH);

        let low = start_thread!(TCB_PL, STACK_PL, 3, 10);
        t_sched_switch();
        assert_eq!(t_current_thread(), Some(low));

        let mut mtx = Ipc::new();
        t_mutex_init(&mut mtx, WaitMode::Prio).unwrap();
        t_mutex_acquire(&mut mtx, Timeout::None).unwrap();

        // A higher-priority thread contends for the mutex.
        let high = start_thread!(TCB_PH, STACK_PH, 5, 10);
        t_sched_switch();
        assert_eq!(t_current_thread(), Some(high));

        // The blocking attempt suspends the contender, boosts the
        // holder, and hands the CPU back to it.
        let _ = t_mutex_acquire(&mut mtx, Timeout::Ticks(50));
        assert_eq!(t_thread_priority(low), 5);
        assert_eq!(t_thread_status(high), ThreadStatus::Suspend);
        assert_eq!(t_current_thread(), Some(low));

        // Release restores the holder's priority and wakes the waiter,
        // which preempts immediately.
        t_mutex_release(&mut mtx).unwrap();
        assert_eq!(t_thread_priority(low), 3);
        assert_ne!(t_thread_status(high), ThreadStatus::Suspend);
        assert_eq!(t_current_thread(), Some(high));

        // The mutex is free again for the woken contender.
        assert_eq!(mtx.count(), 1);
        t_mutex_acquire(&mut mtx, Timeout::None).unwrap();
    }
}

#[cfg(feature = "queue")]
mod queue {
    use super::*;
    use tortos::sync::queue::t_queue_create;
    use tortos::MessageQueue;

    #[test]
    fn fifo_order_is_preserved() {
        let _guard = setup();

        static Q: MessageQueue<u32, 4> = MessageQueue::new();
        Q.create(WaitMode::Fifo).unwrap();

        for v in [11u32, 22, 33] {
            Q.send(&v, Timeout::None).unwrap();
        }
        assert_eq!(Q.len(), 3);
        assert_eq!(Q.recv(Timeout::None), Ok(11));
        assert_eq!(Q.recv(Timeout::None), Ok(22));
        assert_eq!(Q.recv(Timeout::None), Ok(33));
        assert!(Q.is_empty());
    }

    #[test]
    fn ring_wraps_at_the_tail() {
        let _guard = setup();

        static Q: MessageQueue<u16, 3> = MessageQueue::new();
        Q.create(WaitMode::Fifo).unwrap();

        Q.send(&1, Timeout::None).unwrap();
        Q.send(&2, Timeout::None).unwrap();
        Q.send(&3, Timeout::None).unwrap();
        assert_eq!(Q.recv(Timeout::None), Ok(1));
        // The write cursor wraps back to the pool start.
        Q.send(&4, Timeout::None).unwrap();
        assert_eq!(Q.recv(Timeout::None), Ok(2));
        assert_eq!(Q.recv(Timeout::None), Ok(3));
        assert_eq!(Q.recv(Timeout::None), Ok(4));
    }

    #[test]
    fn full_and_empty_fail_without_blocking() {
        let _guard = setup();

        static Q: MessageQueue<u8, 2> = MessageQueue::new();
        Q.create(WaitMode::Fifo).unwrap();

        Q.send(&1, Timeout::None).unwrap();
        Q.send(&2, Timeout::None).unwrap();
        assert_eq!(Q.send(&3, Timeout::None), Err(KernelError::Error));

        Q.recv(Timeout::None).unwrap();
        Q.recv(Timeout::None).unwrap();
        assert_eq!(Q.recv(Timeout::None), Err(KernelError::Error));
    }

    #[test]
    fn blocking_send_requires_thread_context() {
        let _guard = setup();

        static Q: MessageQueue<u8, 1> = MessageQueue::new();
        Q.create(WaitMode::Fifo).unwrap();
        Q.send(&1, Timeout::None).unwrap();
        assert_eq!(
            Q.send(&2, Timeout::Ticks(10)),
            Err(KernelError::Unsupported)
        );
    }

    #[cfg(feature = "dynamic-alloc")]
    #[test]
    fn dynamic_queue_delete_returns_memory() {
        let _guard = setup();

        let before = tortos::t_free_mem_size();
        let q = t_queue_create(7, 8, WaitMode::Fifo).unwrap();
        assert!(tortos::t_free_mem_size() < before);

        unsafe { tortos::sync::ipc::t_ipc_delete(q).unwrap() };
        assert_eq!(tortos::t_free_mem_size(), before);
    }
}
