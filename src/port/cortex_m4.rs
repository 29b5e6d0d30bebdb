//! Cortex-M4F port.
//!
//! Context switches run in the PendSV exception, configured to the
//! lowest priority so they happen only after every other interrupt has
//! unwound. A switch request while one is already pending only retargets
//! the incoming thread; the outgoing thread is recorded once per batch.

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;

use crate::critical::CriticalSection;
use crate::types::ThreadEntry;

/// Dedicated interrupt stack; MSP is rebased here when scheduling
/// starts.
#[no_mangle]
static mut INTERRUPT_STACK: [u64; 128] = [0; 128];

/// Switch bookkeeping shared with the PendSV handler.
#[repr(C)]
struct SwitchContext {
    /// Storage cell for the outgoing PSP; null on the first switch.
    prev_psp_cell: *mut *mut u32,
    /// Storage cell holding the incoming PSP.
    next_psp_cell: *mut *mut u32,
    /// Nonzero while a switch request is pending.
    pending: u32,
}

#[no_mangle]
static mut SWITCH_CTX: SwitchContext = SwitchContext {
    prev_psp_cell: core::ptr::null_mut(),
    next_psp_cell: core::ptr::null_mut(),
    pending: 0,
};

const INITIAL_XPSR: u32 = 0x0100_0000; // Thumb bit
const INITIAL_EXC_RETURN: u32 = 0xFFFF_FFFD; // Thread mode, PSP, no FPU frame

const CPACR: *mut u32 = 0xE000_ED88 as *mut u32;
const FPCCR: *mut u32 = 0xE000_EF34 as *mut u32;

/// Configure SysTick for periodic kernel ticks.
///
/// `reload` counts core clock cycles per tick, e.g.
/// `16_000_000 / TICK_RATE_HZ` on a 16 MHz core.
pub fn t_systick_init(reload: u32) {
    let mut p = unsafe { cortex_m::Peripherals::steal() };

    p.SYST.set_reload(reload - 1);
    p.SYST.clear_current();
    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();
}

/// Saved register frame: software-stacked callee-saved registers plus
/// the hardware-stacked exception frame. Layout matches the PendSV
/// push/pop sequence.
#[repr(C)]
struct StackFrame {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    exc_return: u32,

    // Hardware-stacked on exception entry
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

/// Build the initial stack frame for a new thread.
///
/// When the exception-return sequence consumes the frame, execution
/// enters `entry` with `arg` in r0 and the link register aimed at the
/// thread exit routine.
///
/// # Safety
/// `stack_top` must point one past a writable stack buffer large enough
/// for the frame.
pub unsafe fn t_stack_init(stack_top: *mut u8, entry: ThreadEntry, arg: *mut ()) -> *mut u32 {
    unsafe {
        // 8-byte align per AAPCS and exception entry requirements.
        let aligned = ((stack_top as usize) & !7) as *mut u32;
        let frame = aligned.sub(core::mem::size_of::<StackFrame>() / 4) as *mut StackFrame;

        frame.write(StackFrame {
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            exc_return: INITIAL_EXC_RETURN,
            r0: arg as u32,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: crate::thread::t_thread_exit as usize as u32,
            pc: entry as usize as u32,
            xpsr: INITIAL_XPSR,
        });

        frame as *mut u32
    }
}

/// Bootstrap scheduling: switch to the chosen thread and never return.
///
/// Drops PendSV and SysTick to the lowest priority, enables lazy FPU
/// context stacking, rebases MSP onto the interrupt stack and takes the
/// first PendSV.
///
/// # Safety
/// `next_psp_cell` must hold a PSP prepared by [`t_stack_init`]. Must be
/// called exactly once, with interrupts disabled or before any are
/// enabled.
pub unsafe fn t_first_switch(next_psp_cell: *mut *mut u32) -> ! {
    unsafe {
        let mut scb = cortex_m::Peripherals::steal().SCB;
        scb.set_priority(SystemHandler::PendSV, 0xF0);
        scb.set_priority(SystemHandler::SysTick, 0xF0);

        // CP10/CP11 full access, lazy FP context stacking.
        CPACR.write_volatile(CPACR.read_volatile() | (0xF << 20));
        FPCCR.write_volatile(FPCCR.read_volatile() | (1 << 31) | (1 << 30));
        asm!("dsb", "isb");

        let ctx = &mut *(&raw mut SWITCH_CTX);
        ctx.prev_psp_cell = core::ptr::null_mut();
        ctx.next_psp_cell = next_psp_cell;
        ctx.pending = 1;

        // Rebase MSP; the pre-scheduling stack is abandoned.
        let msp_top = (&raw const INTERRUPT_STACK as usize)
            + core::mem::size_of::<[u64; 128]>();
        asm!("msr msp, {0}", in(reg) msp_top);
        asm!("msr psp, {0}", in(reg) 0u32);

        cortex_m::interrupt::enable();
        cortex_m::peripheral::SCB::set_pendsv();

        loop {
            cortex_m::asm::nop();
        }
    }
}

/// Request a context switch from the outgoing to the incoming thread.
///
/// Idempotent while pending: a second request before PendSV runs only
/// updates the incoming cell.
pub fn t_normal_switch(prev_psp_cell: *mut *mut u32, next_psp_cell: *mut *mut u32) {
    {
        let _cs = CriticalSection::enter();
        unsafe {
            let ctx = &mut *(&raw mut SWITCH_CTX);
            if ctx.pending == 0 {
                ctx.pending = 1;
                ctx.prev_psp_cell = prev_psp_cell;
            }
            ctx.next_psp_cell = next_psp_cell;
        }
    }
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Store the outgoing PSP and fetch the incoming one. Called from the
/// PendSV handler with the saved frame already pushed.
#[inline(never)]
#[no_mangle]
unsafe extern "C" fn pendsv_pick_psp(psp: *mut u32) -> *mut u32 {
    unsafe {
        let ctx = &mut *(&raw mut SWITCH_CTX);

        if !ctx.prev_psp_cell.is_null() {
            *ctx.prev_psp_cell = psp;
        }
        ctx.prev_psp_cell = core::ptr::null_mut();
        ctx.pending = 0;

        if ctx.next_psp_cell.is_null() {
            core::ptr::null_mut()
        } else {
            *ctx.next_psp_cell
        }
    }
}

/// PendSV exception handler: the context switch itself.
///
/// 1. Push r4-r11 and EXC_RETURN (plus s16-s31 when the FPU frame is
///    active) onto the outgoing PSP; skipped on the first switch.
/// 2. Store the outgoing PSP and load the incoming one.
/// 3. Pop the incoming context and return through EXC_RETURN.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid i",
        "mrs r0, psp",

        "ldr r1, ={ctx}",
        "ldr r1, [r1]",
        "cbz r1, 1f",

        "tst lr, #0x10",
        "it eq",
        "vstmdbeq r0!, {{s16-s31}}",
        "stmdb r0!, {{r4-r11, lr}}",

        "1:",
        "push {{r2, lr}}",
        "bl {pick}",
        "pop {{r2, lr}}",
        "cbz r0, 2f",

        "ldmia r0!, {{r4-r11, lr}}",
        "tst lr, #0x10",
        "it eq",
        "vldmiaeq r0!, {{s16-s31}}",
        "msr psp, r0",

        "2:",
        "cpsie i",
        "dsb",
        "isb",
        "bx lr",

        ctx = sym SWITCH_CTX,
        pick = sym pendsv_pick_psp,
    );
}
