//! Mutex and recursive mutex with single-level priority inheritance.
//!
//! A mutex is a capacity-1 object with an owner. When a higher-priority
//! thread blocks on a held mutex the holder is boosted to the blocker's
//! priority until release. Inheritance does not propagate across
//! chained blockers and no deadlock detection is performed.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::critical::CriticalSection;
use crate::error::{KernelError, KernelResult};
use crate::sched;
use crate::sync::ipc::{
    current_or_unsupported, outranks, t_ipc_suspend, wake_first_waiter, Ipc, WaitState,
};
use crate::thread::{t_thread_set_priority, Tcb};
use crate::types::{IpcKind, Timeout, WaitMode, DUMMY_PRIORITY};

fn mutex_init_fields(ipc: &mut Ipc, kind: IpcKind, mode: WaitMode) {
    ipc.wait_list.init();
    ipc.kind = kind;
    ipc.valid = true;
    ipc.mode = mode;
    // A count of one marks the mutex available.
    ipc.count = 1;
    ipc.capacity = 1;
    ipc.item_size = 0;
    ipc.data = crate::sync::ipc::IpcData::Sync(crate::sync::ipc::SyncData::new());
}

#[cfg(feature = "dynamic-alloc")]
fn mutex_create_base(kind: IpcKind, mode: WaitMode) -> KernelResult<NonNull<Ipc>> {
    let Some(raw) = crate::mem::t_malloc(core::mem::size_of::<Ipc>()) else {
        return Err(KernelError::Error);
    };
    let ipc = raw.as_ptr() as *mut Ipc;

    unsafe {
        ipc.write(Ipc::new());
        mutex_init_fields(&mut *ipc, kind, mode);
        (*ipc).is_static = false;
        Ok(NonNull::new_unchecked(ipc))
    }
}

/// Initialize a caller-provided mutex.
#[cfg(feature = "mutex")]
pub fn t_mutex_init(ipc: &mut Ipc, mode: WaitMode) -> KernelResult<()> {
    mutex_init_fields(ipc, IpcKind::Mutex, mode);
    ipc.is_static = true;
    Ok(())
}

/// Create a mutex from the default byte pool.
#[cfg(all(feature = "mutex", feature = "dynamic-alloc"))]
pub fn t_mutex_create(mode: WaitMode) -> KernelResult<NonNull<Ipc>> {
    mutex_create_base(IpcKind::Mutex, mode)
}

/// Initialize a caller-provided recursive mutex.
#[cfg(feature = "recursive-mutex")]
pub fn t_recursive_mutex_init(ipc: &mut Ipc, mode: WaitMode) -> KernelResult<()> {
    mutex_init_fields(ipc, IpcKind::RecursiveMutex, mode);
    ipc.is_static = true;
    Ok(())
}

/// Create a recursive mutex from the default byte pool.
#[cfg(all(feature = "recursive-mutex", feature = "dynamic-alloc"))]
pub fn t_recursive_mutex_create(mode: WaitMode) -> KernelResult<NonNull<Ipc>> {
    mutex_create_base(IpcKind::RecursiveMutex, mode)
}

#[inline]
fn is_mutex_kind(kind: IpcKind) -> bool {
    matches!(kind, IpcKind::Mutex | IpcKind::RecursiveMutex)
}

fn sync_of(ipc: &mut Ipc) -> KernelResult<&mut crate::sync::ipc::SyncData> {
    ipc.sync_mut().ok_or(KernelError::Invalid)
}

/// Acquire a mutex or recursive mutex, blocking up to `timeout`.
///
/// Re-acquisition by the owner succeeds immediately; a recursive mutex
/// additionally deepens its nesting (bounded by
/// [`crate::types::MUTEX_RECURSIVE_COUNT_MAX`]). A contended acquire by
/// a higher-priority thread boosts the holder before suspending.
///
/// # Errors
/// `Error` for a non-blocking miss or nesting overflow, `Timeout`,
/// `Deleted`, `Invalid` for a mistyped object, `Unsupported` without a
/// thread context.
pub fn t_mutex_acquire(ipc: &mut Ipc, timeout: Timeout) -> KernelResult<()> {
    if !is_mutex_kind(ipc.kind) {
        return Err(KernelError::Invalid);
    }

    let mut wait = WaitState::new(timeout);
    let mut current: *mut Tcb = core::ptr::null_mut();

    loop {
        {
            let _cs = CriticalSection::enter();
            if !ipc.valid {
                wait.disarm(current);
                return Err(KernelError::Deleted);
            }

            current = current_or_unsupported()?;
            let kind = ipc.kind;
            let current_prio = unsafe { (*current).current_priority };

            if ipc.count == 1 {
                ipc.count = 0;
                let sync = sync_of(ipc)?;
                sync.holder = current;
                sync.recursion = 1;
                sync.original_prio = current_prio;
                wait.disarm(current);
                return Ok(());
            }

            let holder = sync_of(ipc)?.holder;
            if holder == current {
                // Re-acquisition by the owner.
                if cfg!(feature = "recursive-mutex") && kind == IpcKind::RecursiveMutex {
                    let sync = sync_of(ipc)?;
                    if sync.recursion >= crate::types::MUTEX_RECURSIVE_COUNT_MAX {
                        return Err(KernelError::Error);
                    }
                    sync.recursion += 1;
                }
                wait.disarm(current);
                return Ok(());
            }

            if wait.non_blocking() {
                return Err(KernelError::Error);
            }

            // Single-level priority inheritance: boost the holder to the
            // blocker's priority, remembering the holder's own.
            if !holder.is_null() {
                let holder_prio = unsafe { (*holder).current_priority };
                if outranks(current_prio, holder_prio) {
                    let sync = sync_of(ipc)?;
                    if sync.original_prio == DUMMY_PRIORITY {
                        sync.original_prio = holder_prio;
                    }
                    t_thread_set_priority(
                        unsafe { NonNull::new_unchecked(holder) },
                        current_prio,
                    )?;
                }
            }

            t_ipc_suspend(&raw mut ipc.wait_list, current, ipc.mode)?;
            wait.arm(current);
        }

        sched::t_sched_switch();

        // Woken: retry the take, unless the object died or the wait
        // ran out.
        wait.update_after_wake()?;
    }
}

/// Release a mutex or recursive mutex. Only the owner may release.
///
/// A recursive mutex merely sheds one nesting level until the depth
/// reaches zero. A full release restores an inherited priority and
/// wakes the head waiter, which rechecks on resume.
///
/// # Errors
/// `Error` when the caller is not the owner, `Deleted`, `Invalid`,
/// `Unsupported` without a thread context.
pub fn t_mutex_release(ipc: &mut Ipc) -> KernelResult<()> {
    if !is_mutex_kind(ipc.kind) {
        return Err(KernelError::Invalid);
    }

    let need_schedule;
    {
        let _cs = CriticalSection::enter();
        if !ipc.valid {
            return Err(KernelError::Deleted);
        }

        let current = current_or_unsupported()?;
        let kind = ipc.kind;
        let current_prio = unsafe { (*current).current_priority };

        if sync_of(ipc)?.holder != current {
            return Err(KernelError::Error);
        }

        if cfg!(feature = "recursive-mutex") && kind == IpcKind::RecursiveMutex {
            let sync = sync_of(ipc)?;
            if sync.recursion > 0 {
                sync.recursion -= 1;
            }
            if sync.recursion > 0 {
                return Ok(());
            }
        }

        // Full release.
        ipc.count = 1;
        let sync = sync_of(ipc)?;
        sync.holder = core::ptr::null_mut();
        sync.recursion = 0;

        if sync.original_prio != DUMMY_PRIORITY && current_prio != sync.original_prio {
            let restore = sync.original_prio;
            sync.original_prio = DUMMY_PRIORITY;
            t_thread_set_priority(unsafe { NonNull::new_unchecked(current) }, restore)?;
        }

        need_schedule = unsafe { wake_first_waiter(&raw mut ipc.wait_list) };
    }

    if need_schedule {
        sched::t_sched_switch();
    }
    Ok(())
}

// ============ Safe Wrappers ============

/// Statically allocatable mutex with priority inheritance.
#[cfg(feature = "mutex")]
pub struct Mutex {
    inner: UnsafeCell<Ipc>,
}

#[cfg(feature = "mutex")]
unsafe impl Sync for Mutex {}
#[cfg(feature = "mutex")]
unsafe impl Send for Mutex {}

#[cfg(feature = "mutex")]
impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            inner: UnsafeCell::new(Ipc::new()),
        }
    }

    pub fn create(&self, mode: WaitMode) -> KernelResult<()> {
        unsafe { t_mutex_init(&mut *self.inner.get(), mode) }
    }

    pub fn acquire(&self, timeout: Timeout) -> KernelResult<()> {
        unsafe { t_mutex_acquire(&mut *self.inner.get(), timeout) }
    }

    pub fn release(&self) -> KernelResult<()> {
        unsafe { t_mutex_release(&mut *self.inner.get()) }
    }
}

#[cfg(feature = "mutex")]
impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Statically allocatable recursive mutex.
#[cfg(feature = "recursive-mutex")]
pub struct RecursiveMutex {
    inner: UnsafeCell<Ipc>,
}

#[cfg(feature = "recursive-mutex")]
unsafe impl Sync for RecursiveMutex {}
#[cfg(feature = "recursive-mutex")]
unsafe impl Send for RecursiveMutex {}

#[cfg(feature = "recursive-mutex")]
impl RecursiveMutex {
    pub const fn new() -> Self {
        RecursiveMutex {
            inner: UnsafeCell::new(Ipc::new()),
        }
    }

    pub fn create(&self, mode: WaitMode) -> KernelResult<()> {
        unsafe { t_recursive_mutex_init(&mut *self.inner.get(), mode) }
    }

    pub fn acquire(&self, timeout: Timeout) -> KernelResult<()> {
        unsafe { t_mutex_acquire(&mut *self.inner.get(), timeout) }
    }

    pub fn release(&self) -> KernelResult<()> {
        unsafe { t_mutex_release(&mut *self.inner.get()) }
    }
}

#[cfg(feature = "recursive-mutex")]
impl Default for RecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}
