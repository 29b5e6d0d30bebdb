//! Thread control block definition.

use crate::list::ListNode;
use crate::timer::Timer;
use crate::types::{Prio, ThreadEntry, ThreadStatus, Tick};

/// Thread control block.
///
/// The embedded `tlist` node links the thread into exactly one queue at
/// a time: a ready list, an IPC waiter list, or the defunct list. The
/// embedded timer implements sleeps and wait timeouts.
#[repr(C)]
pub struct Tcb {
    /// Saved process stack pointer (next context restore point). The
    /// port layer stores and loads through the address of this field.
    pub psp: *mut u32,

    /// Entry function
    pub entry: Option<ThreadEntry>,
    /// Entry argument
    pub arg: *mut (),
    /// Stack base (low address)
    pub stack_base: *mut u8,
    /// Stack size in bytes
    pub stack_size: usize,

    /// Run / wait queue list node
    pub tlist: ListNode,

    /// Current (possibly boosted) priority
    pub current_priority: Prio,
    /// Original priority at creation
    pub init_priority: Prio,
    /// Bit mask for the ready group: `1 << current_priority`
    pub number_mask: u32,

    /// Time slice length in ticks
    pub init_tick: Tick,
    /// Remaining time slice
    pub remaining_tick: Tick,

    /// Lifecycle status
    pub status: ThreadStatus,

    /// Per-thread sleep/timeout timer
    pub timer: Timer,

    /// True when the control block and stack are caller-provided
    pub is_static: bool,
}

impl Tcb {
    /// Create a zeroed, unlinked control block.
    pub const fn new() -> Self {
        Tcb {
            psp: core::ptr::null_mut(),
            entry: None,
            arg: core::ptr::null_mut(),
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            tlist: ListNode::new(),
            current_priority: 0,
            init_priority: 0,
            number_mask: 0,
            init_tick: 0,
            remaining_tick: 0,
            status: ThreadStatus::Init,
            timer: Timer::new(),
            is_static: true,
        }
    }
}

impl Default for Tcb {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}
