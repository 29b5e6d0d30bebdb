//! Kernel error codes.
//!
//! Uses Rust's Result pattern instead of C-style status integers.

/// Kernel error type.
///
/// The kernel never panics on misuse; every fallible operation reports
/// one of these through [`KernelResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum KernelError {
    /// Generic failure: capacity full, illegal caller, resource exhausted
    Error = -1,
    /// A finite wait expired before the resource became available
    Timeout = -2,
    /// Resource busy (reserved)
    Busy = -3,
    /// Wrong object type or out-of-range argument
    Invalid = -4,
    /// A required pointer argument was null (or a zero-sized buffer)
    Null = -5,
    /// The object was deleted, possibly while the caller was waiting on it
    Deleted = -6,
    /// Operation not supported in the current context
    Unsupported = -7,
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(feature = "defmt")]
impl defmt::Format for KernelError {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}", *self as i8)
    }
}
