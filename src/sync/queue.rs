//! Bounded message queue.
//!
//! Fixed-size items in a contiguous pool used as a ring: `head`/`tail`
//! delimit the pool, the read and write cursors advance by `item_size`
//! and wrap at `tail`. Send and receive copy item bytes and wake one
//! waiting peer.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
#[cfg(feature = "dynamic-alloc")]
use core::ptr::NonNull;

use crate::critical::CriticalSection;
use crate::error::{KernelError, KernelResult};
use crate::sched;
use crate::sync::ipc::{current_or_unsupported, t_ipc_suspend, wake_first_waiter, Ipc, WaitState};
use crate::types::{IpcKind, Timeout, WaitMode};

fn queue_init_fields(
    ipc: &mut Ipc,
    pool: *mut u8,
    length: u16,
    item_size: u16,
    mode: WaitMode,
) {
    ipc.wait_list.init();
    ipc.kind = IpcKind::Queue;
    ipc.valid = true;
    ipc.mode = mode;
    ipc.count = 0;
    ipc.capacity = length;
    ipc.item_size = item_size;

    let tail = unsafe { pool.add(item_size as usize * length as usize) };
    ipc.data = crate::sync::ipc::IpcData::Ring(crate::sync::ipc::RingData {
        head: pool,
        tail,
        read_from: pool,
        write_to: pool,
    });
}

/// Initialize a caller-provided queue over a caller-provided item pool
/// of `length * item_size` bytes.
///
/// # Errors
/// `Null` for a null pool or zero length/item size.
pub fn t_queue_init(
    ipc: &mut Ipc,
    pool: *mut u8,
    length: u16,
    item_size: u16,
    mode: WaitMode,
) -> KernelResult<()> {
    if pool.is_null() || length == 0 || item_size == 0 {
        return Err(KernelError::Null);
    }

    queue_init_fields(ipc, pool, length, item_size, mode);
    ipc.is_static = true;
    Ok(())
}

/// Create a queue with control block and item pool drawn from the
/// default byte pool.
#[cfg(feature = "dynamic-alloc")]
pub fn t_queue_create(length: u16, item_size: u16, mode: WaitMode) -> KernelResult<NonNull<Ipc>> {
    if length == 0 || item_size == 0 {
        return Err(KernelError::Null);
    }

    let Some(raw) = crate::mem::t_malloc(core::mem::size_of::<Ipc>()) else {
        return Err(KernelError::Error);
    };
    let ipc = raw.as_ptr() as *mut Ipc;

    let Some(pool) = crate::mem::t_malloc(length as usize * item_size as usize) else {
        unsafe { let _ = crate::mem::t_free(raw.as_ptr()); }
        return Err(KernelError::Error);
    };

    unsafe {
        ipc.write(Ipc::new());
        queue_init_fields(&mut *ipc, pool.as_ptr(), length, item_size, mode);
        (*ipc).is_static = false;
        Ok(NonNull::new_unchecked(ipc))
    }
}

/// Copy one item into the queue, blocking up to `timeout` while full.
/// Wakes one waiting receiver.
///
/// # Safety
/// `data` must point at `item_size` readable bytes.
///
/// # Errors
/// `Error` for a non-blocking send to a full queue, `Timeout`,
/// `Deleted`, `Invalid` for a mistyped object, `Unsupported` for a
/// blocking call without a thread context.
pub unsafe fn t_queue_send(ipc: &mut Ipc, data: *const u8, timeout: Timeout) -> KernelResult<()> {
    if ipc.kind != IpcKind::Queue {
        return Err(KernelError::Invalid);
    }
    if data.is_null() {
        return Err(KernelError::Null);
    }

    let mut wait = WaitState::new(timeout);
    let mut current = core::ptr::null_mut();

    loop {
        let need_schedule;
        {
            let _cs = CriticalSection::enter();
            if !ipc.valid {
                wait.disarm(current);
                return Err(KernelError::Deleted);
            }

            if ipc.count < ipc.capacity {
                let item_size = ipc.item_size as usize;
                let Some(ring) = ipc.ring_mut() else {
                    return Err(KernelError::Invalid);
                };
                unsafe {
                    core::ptr::copy_nonoverlapping(data, ring.write_to, item_size);
                    ring.write_to = ring.write_to.add(item_size);
                    if ring.write_to >= ring.tail {
                        ring.write_to = ring.head;
                    }
                }
                ipc.count += 1;

                need_schedule = unsafe { wake_first_waiter(&raw mut ipc.wait_list) };
                wait.disarm(current);
            } else {
                if wait.non_blocking() {
                    return Err(KernelError::Error);
                }

                current = current_or_unsupported()?;
                t_ipc_suspend(&raw mut ipc.wait_list, current, ipc.mode)?;
                wait.arm(current);

                drop(_cs);
                sched::t_sched_switch();

                // Woken: a receiver made room, the object died, or the
                // timeout timer fired.
                wait.update_after_wake()?;
                continue;
            }
        }

        if need_schedule {
            sched::t_sched_switch();
        }
        return Ok(());
    }
}

/// Copy one item out of the queue, blocking up to `timeout` while
/// empty. Wakes one waiting sender.
///
/// # Safety
/// `data` must point at `item_size` writable bytes.
///
/// # Errors
/// `Error` for a non-blocking receive from an empty queue, `Timeout`,
/// `Deleted`, `Invalid`, `Unsupported` for a blocking call without a
/// thread context.
pub unsafe fn t_queue_recv(ipc: &mut Ipc, data: *mut u8, timeout: Timeout) -> KernelResult<()> {
    if ipc.kind != IpcKind::Queue {
        return Err(KernelError::Invalid);
    }
    if data.is_null() {
        return Err(KernelError::Null);
    }

    let mut wait = WaitState::new(timeout);
    let mut current = core::ptr::null_mut();

    loop {
        let need_schedule;
        {
            let _cs = CriticalSection::enter();
            if !ipc.valid {
                wait.disarm(current);
                return Err(KernelError::Deleted);
            }

            if ipc.count > 0 {
                let item_size = ipc.item_size as usize;
                let Some(ring) = ipc.ring_mut() else {
                    return Err(KernelError::Invalid);
                };
                unsafe {
                    core::ptr::copy_nonoverlapping(ring.read_from, data, item_size);
                    ring.read_from = ring.read_from.add(item_size);
                    if ring.read_from >= ring.tail {
                        ring.read_from = ring.head;
                    }
                }
                ipc.count -= 1;

                need_schedule = unsafe { wake_first_waiter(&raw mut ipc.wait_list) };
                wait.disarm(current);
            } else {
                if wait.non_blocking() {
                    return Err(KernelError::Error);
                }

                current = current_or_unsupported()?;
                t_ipc_suspend(&raw mut ipc.wait_list, current, ipc.mode)?;
                wait.arm(current);

                drop(_cs);
                sched::t_sched_switch();

                wait.update_after_wake()?;
                continue;
            }
        }

        if need_schedule {
            sched::t_sched_switch();
        }
        return Ok(());
    }
}

// ============ Safe Wrapper ============

/// Statically allocatable message queue carrying `N` items of `T`.
pub struct MessageQueue<T: Copy, const N: usize> {
    ipc: UnsafeCell<Ipc>,
    storage: UnsafeCell<MaybeUninit<[T; N]>>,
}

unsafe impl<T: Copy + Send, const N: usize> Sync for MessageQueue<T, N> {}
unsafe impl<T: Copy + Send, const N: usize> Send for MessageQueue<T, N> {}

impl<T: Copy, const N: usize> MessageQueue<T, N> {
    pub const fn new() -> Self {
        MessageQueue {
            ipc: UnsafeCell::new(Ipc::new()),
            storage: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Initialize the queue over its embedded storage.
    pub fn create(&self, mode: WaitMode) -> KernelResult<()> {
        unsafe {
            t_queue_init(
                &mut *self.ipc.get(),
                self.storage.get() as *mut u8,
                N as u16,
                core::mem::size_of::<T>() as u16,
                mode,
            )
        }
    }

    /// Copy `item` into the queue, blocking up to `timeout` while full.
    pub fn send(&self, item: &T, timeout: Timeout) -> KernelResult<()> {
        unsafe {
            t_queue_send(
                &mut *self.ipc.get(),
                item as *const T as *const u8,
                timeout,
            )
        }
    }

    /// Take the oldest item, blocking up to `timeout` while empty.
    pub fn recv(&self, timeout: Timeout) -> KernelResult<T> {
        let mut slot = MaybeUninit::<T>::uninit();
        unsafe {
            t_queue_recv(&mut *self.ipc.get(), slot.as_mut_ptr() as *mut u8, timeout)?;
            Ok(slot.assume_init())
        }
    }

    /// Number of queued items.
    pub fn len(&self) -> u16 {
        unsafe { (*self.ipc.get()).count() }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Copy, const N: usize> Default for MessageQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
