//! Critical section handling.
//!
//! All kernel-global data structures are mutated inside short
//! IRQ-disable critical sections. The guard records the previous
//! PRIMASK state so sections nest lexically.

/// RAII guard for critical sections.
///
/// Creating the guard disables interrupts; dropping it restores the
/// interrupt mask captured at entry.
pub struct CriticalSection {
    #[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
    was_active: bool,
}

impl CriticalSection {
    /// Enter a critical section by disabling interrupts.
    ///
    /// Returns a guard that restores the previous mask when dropped.
    #[inline(always)]
    pub fn enter() -> Self {
        #[cfg(target_arch = "arm")]
        {
            let was_active = cortex_m::register::primask::read().is_active();
            cortex_m::interrupt::disable();
            CriticalSection { was_active }
        }

        #[cfg(not(target_arch = "arm"))]
        CriticalSection { was_active: false }
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        #[cfg(target_arch = "arm")]
        if self.was_active {
            unsafe { cortex_m::interrupt::enable() };
        }
    }
}

/// Execute a closure with interrupts disabled.
///
/// The closure receives a reference to the critical section guard,
/// which can be used to access [`CsCell`](crate::cs_cell::CsCell)
/// protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}
