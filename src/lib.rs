//! tortos: a fixed-priority preemptive real-time kernel for ARM
//! Cortex-M4F.
//!
//! Provides:
//! - Priority-based preemptive scheduling with round-robin time
//!   slicing within a priority level
//! - Threads with static or byte-pool-backed allocation and deferred
//!   reclamation through an idle thread
//! - Software timers on sorted current/overflow lists
//! - Semaphores, mutexes with priority inheritance, recursive mutexes
//!   and bounded message queues
//! - A byte-pool allocator with a roving search pointer and lazy
//!   coalescing

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
extern crate std;

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Configuration Checks ============

#[cfg(not(any(feature = "static-alloc", feature = "dynamic-alloc")))]
compile_error!("at least one of the `static-alloc`/`dynamic-alloc` features must be enabled");

#[cfg(all(
    feature = "ipc",
    not(any(
        feature = "semaphore",
        feature = "mutex",
        feature = "recursive-mutex",
        feature = "queue"
    ))
))]
compile_error!("`ipc` requires at least one of `semaphore`, `mutex`, `recursive-mutex`, `queue`");

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod console;
pub mod core;
pub mod mem;
pub mod port;

#[cfg(feature = "ipc")]
pub mod sync;

// ============ Re-exports ============

pub use crate::core::config;
pub use crate::core::config::*;
pub use crate::core::critical;
pub use crate::core::cs_cell;
pub use crate::core::error;
pub use crate::core::error::{KernelError, KernelResult};
pub use crate::core::kernel;
pub use crate::core::kernel::{
    t_current_priority, t_current_thread, t_init, t_ready_count, t_start,
};
pub use crate::core::list;
pub use crate::core::sched;
pub use crate::core::sched::{
    t_sched_resume, t_sched_suspend, t_sched_switch, t_thread_rotate_same_prio,
};
pub use crate::core::thread;
pub use crate::core::thread::{
    t_delay, t_thread_create_static, t_thread_delete, t_thread_exit, t_thread_restart,
    t_thread_sleep, t_thread_startup, t_thread_suspend, Tcb,
};
#[cfg(feature = "dynamic-alloc")]
pub use crate::core::thread::t_thread_create;
pub use crate::core::timer;
pub use crate::core::timer::{t_mdelay, t_tick_from_ms, t_tick_get, Timer};
pub use crate::core::types;
pub use crate::core::types::*;

pub use crate::console::t_console_set_output;

#[cfg(feature = "dynamic-alloc")]
pub use crate::mem::{t_free, t_free_mem_size, t_malloc};
pub use crate::mem::BytePool;

#[cfg(feature = "ipc")]
pub use crate::sync::ipc::{t_ipc_delete, Ipc};

#[cfg(feature = "semaphore")]
pub use crate::sync::sem::{self, Semaphore};
#[cfg(feature = "mutex")]
pub use crate::sync::mutex::Mutex;
#[cfg(feature = "recursive-mutex")]
pub use crate::sync::mutex::RecursiveMutex;
#[cfg(any(feature = "mutex", feature = "recursive-mutex"))]
pub use crate::sync::mutex;
#[cfg(feature = "queue")]
pub use crate::sync::queue::{self, MessageQueue};

#[cfg(feature = "pac")]
pub use stm32_metapac as pac;
