//! Core type definitions.
//!
//! These types provide strong typing for kernel primitives.

/// Thread priority level.
pub type Prio = u8;

/// Tick counter type. Wraps on overflow.
pub type Tick = u32;

/// Stack element type. Static stacks are arrays of these; the stack
/// frame builder aligns the top down to 8 bytes.
pub type StackElement = u32;

/// Thread entry point function type.
pub type ThreadEntry = fn(*mut ());

/// Timer callback function type.
pub type TimerFn = fn(*mut ());

/// Thread lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadStatus {
    /// Created but not yet started
    Init = 0,
    /// On a ready list, waiting for the CPU
    Ready = 1,
    /// Currently executing
    Running = 2,
    /// Blocked (sleeping or waiting on an IPC object)
    Suspend = 3,
    /// Exited or deleted, awaiting reclamation on the defunct list
    Terminated = 4,
    /// Reclaimed; may only be restarted
    Deleted = 5,
}

/// Waiter-list ordering for IPC objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WaitMode {
    /// Waiters are released in arrival order
    Fifo = 0,
    /// Waiters are released in priority order, ties broken by arrival
    Prio = 1,
}

/// Block duration for IPC send/receive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Do not block; fail immediately when the resource is unavailable
    None,
    /// Block for at most this many ticks
    Ticks(Tick),
    /// Block until the resource becomes available or the object is deleted
    Forever,
}

/// IPC object discriminant.
#[cfg(feature = "ipc")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IpcKind {
    Semaphore = 0,
    Mutex = 1,
    RecursiveMutex = 2,
    Queue = 3,
}

/// Sentinel priority meaning "no priority saved" in a mutex.
pub const DUMMY_PRIORITY: Prio = 0xFF;

/// Ceiling for the recursive mutex nesting depth.
pub const MUTEX_RECURSIVE_COUNT_MAX: u16 = 0xFF;
