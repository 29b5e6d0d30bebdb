//! Counting semaphore.

use core::cell::UnsafeCell;
#[cfg(feature = "dynamic-alloc")]
use core::ptr::NonNull;

use crate::critical::CriticalSection;
use crate::error::{KernelError, KernelResult};
use crate::sched;
use crate::sync::ipc::{current_or_unsupported, t_ipc_suspend, wake_first_waiter, Ipc, WaitState};
use crate::types::{IpcKind, Timeout, WaitMode};

fn sema_init_fields(ipc: &mut Ipc, max_count: u16, init_count: u16, mode: WaitMode) {
    ipc.wait_list.init();
    ipc.kind = IpcKind::Semaphore;
    ipc.valid = true;
    ipc.mode = mode;
    ipc.count = init_count;
    ipc.capacity = max_count;
    ipc.item_size = 0;
    ipc.data = crate::sync::ipc::IpcData::Sync(crate::sync::ipc::SyncData::new());
}

/// Initialize a caller-provided semaphore with a maximum count, an
/// initial count and a waiter ordering mode.
///
/// # Errors
/// `Null` for a zero maximum, `Invalid` when the initial count exceeds
/// the maximum.
pub fn t_sema_init(
    ipc: &mut Ipc,
    max_count: u16,
    init_count: u16,
    mode: WaitMode,
) -> KernelResult<()> {
    if max_count == 0 {
        return Err(KernelError::Null);
    }
    if init_count > max_count {
        return Err(KernelError::Invalid);
    }

    sema_init_fields(ipc, max_count, init_count, mode);
    ipc.is_static = true;
    Ok(())
}

/// Create a semaphore from the default byte pool.
#[cfg(feature = "dynamic-alloc")]
pub fn t_sema_create(
    max_count: u16,
    init_count: u16,
    mode: WaitMode,
) -> KernelResult<NonNull<Ipc>> {
    if max_count == 0 {
        return Err(KernelError::Null);
    }
    if init_count > max_count {
        return Err(KernelError::Invalid);
    }

    let Some(raw) = crate::mem::t_malloc(core::mem::size_of::<Ipc>()) else {
        return Err(KernelError::Error);
    };
    let ipc = raw.as_ptr() as *mut Ipc;

    unsafe {
        ipc.write(Ipc::new());
        sema_init_fields(&mut *ipc, max_count, init_count, mode);
        (*ipc).is_static = false;
        Ok(NonNull::new_unchecked(ipc))
    }
}

/// Release one semaphore unit.
///
/// The count rises by one up to the capacity; the head waiter (if any)
/// is woken and rechecks on resume.
///
/// # Errors
/// `Error` when the count is already at capacity, `Deleted` /
/// `Invalid` for dead or mistyped objects.
pub fn t_sema_send(ipc: &mut Ipc) -> KernelResult<()> {
    if ipc.kind != IpcKind::Semaphore {
        return Err(KernelError::Invalid);
    }

    let need_schedule;
    {
        let _cs = CriticalSection::enter();
        if !ipc.valid {
            return Err(KernelError::Deleted);
        }
        if ipc.count >= ipc.capacity {
            return Err(KernelError::Error);
        }
        ipc.count += 1;
        need_schedule = unsafe { wake_first_waiter(&raw mut ipc.wait_list) };
    }

    if need_schedule {
        sched::t_sched_switch();
    }
    Ok(())
}

/// Acquire one semaphore unit, blocking up to `timeout`.
///
/// # Errors
/// `Error` when `timeout` is [`Timeout::None`] and no unit is
/// available, `Timeout` when a finite wait expires, `Deleted` when the
/// object dies while waiting, `Unsupported` for a blocking call without
/// a thread context.
pub fn t_sema_recv(ipc: &mut Ipc, timeout: Timeout) -> KernelResult<()> {
    if ipc.kind != IpcKind::Semaphore {
        return Err(KernelError::Invalid);
    }

    let mut wait = WaitState::new(timeout);
    let mut current = core::ptr::null_mut();

    loop {
        {
            let _cs = CriticalSection::enter();
            if !ipc.valid {
                wait.disarm(current);
                return Err(KernelError::Deleted);
            }
            if ipc.count > 0 {
                ipc.count -= 1;
                wait.disarm(current);
                return Ok(());
            }
            if wait.non_blocking() {
                return Err(KernelError::Error);
            }

            current = current_or_unsupported()?;
            t_ipc_suspend(&raw mut ipc.wait_list, current, ipc.mode)?;
            wait.arm(current);
        }

        sched::t_sched_switch();

        // Woken: by a send, by deletion, or by the timeout timer.
        wait.update_after_wake()?;
    }
}

// ============ Safe Wrapper ============

/// Statically allocatable counting semaphore.
pub struct Semaphore {
    inner: UnsafeCell<Ipc>,
}

unsafe impl Sync for Semaphore {}
unsafe impl Send for Semaphore {}

impl Semaphore {
    pub const fn new() -> Self {
        Semaphore {
            inner: UnsafeCell::new(Ipc::new()),
        }
    }

    /// Initialize with a maximum count, an initial count and a waiter
    /// ordering mode.
    pub fn create(&self, max_count: u16, init_count: u16, mode: WaitMode) -> KernelResult<()> {
        unsafe { t_sema_init(&mut *self.inner.get(), max_count, init_count, mode) }
    }

    /// Release one unit.
    pub fn send(&self) -> KernelResult<()> {
        unsafe { t_sema_send(&mut *self.inner.get()) }
    }

    /// Acquire one unit, blocking up to `timeout`.
    pub fn recv(&self, timeout: Timeout) -> KernelResult<()> {
        unsafe { t_sema_recv(&mut *self.inner.get(), timeout) }
    }

    /// Current count.
    pub fn count(&self) -> u16 {
        unsafe { (*self.inner.get()).count() }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}
