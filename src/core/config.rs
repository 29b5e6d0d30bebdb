//! Compile-time configuration.
//!
//! These constants control resource limits and behavior of the kernel.
//! Subsystem on/off switches (IPC types, allocation schemes, debug
//! logging) are cargo features; see `Cargo.toml`.

/// Kernel version string printed by the startup banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Priority direction.
///
/// `false`: a higher numeric value means a higher priority (the idle
/// thread runs at priority 0). `true`: a lower numeric value means a
/// higher priority (the idle thread runs at `PRIORITY_MAX - 1`).
pub const LOWER_NUM_IS_HIGHER_PRIO: bool = false;

/// Maximum number of priority levels. Must not exceed 32: the ready
/// group is a single 32-bit bitmap.
pub const PRIORITY_MAX: usize = 32;

/// Use the CPU bit-scan path for highest-ready lookup. When disabled a
/// portable shift loop is used instead.
pub const USE_CPU_BITSCAN: bool = true;

/// Number of timer skip-list levels. The shipped configuration uses a
/// single sorted list per timer set.
pub const TIMER_SKIP_LIST_LEVEL: usize = 1;

/// System tick rate in Hz.
pub const TICK_RATE_HZ: u32 = 1000;

/// Console formatting buffer size in bytes. Output longer than this is
/// truncated.
pub const CONSOLE_BUF_SIZE: usize = 128;

/// Idle thread stack size in bytes.
pub const IDLE_STACK_SIZE: usize = 256;

/// Byte count of the default dynamic byte pool.
#[cfg(feature = "dynamic-alloc")]
pub const DYNAMIC_MEM_SIZE: usize = 10240;

/// Priority of the kernel idle thread (lowest priority level).
pub const IDLE_PRIORITY: u8 = if LOWER_NUM_IS_HIGHER_PRIO {
    (PRIORITY_MAX - 1) as u8
} else {
    0
};

/// Time slice (in ticks) given to the idle thread.
pub const IDLE_TIME_SLICE: u32 = 5;

const _: () = assert!(PRIORITY_MAX <= 32, "ready group bitmap is 32 bits wide");
const _: () = assert!(TIMER_SKIP_LIST_LEVEL >= 1);
