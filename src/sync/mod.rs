//! Synchronous inter-thread primitives.

pub mod ipc;

#[cfg(feature = "semaphore")]
pub mod sem;

#[cfg(any(feature = "mutex", feature = "recursive-mutex"))]
pub mod mutex;

#[cfg(feature = "queue")]
pub mod queue;
