//! Priority Inversion Demo - mutex priority inheritance
//!
//! Three threads: High(5), Med(4), Low(3).
//! Low holds the mutex -> High waits -> Low is boosted to priority 5
//! so Med cannot starve it.

#![no_std]
#![no_main]

use core::ptr::{addr_of_mut, null_mut};
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::info;

use tortos::types::{StackElement, Timeout, WaitMode};
use tortos::{t_init, t_start, t_thread_create_static, t_thread_sleep, t_thread_startup, Mutex, Tcb};

static HIGH_RUNS: AtomicU32 = AtomicU32::new(0);
static LOW_RUNS: AtomicU32 = AtomicU32::new(0);

static MTX: Mutex = Mutex::new();

static mut HIGH_STK: [StackElement; 256] = [0; 256];
static mut HIGH_TCB: Tcb = Tcb::new();
static mut MED_STK: [StackElement; 256] = [0; 256];
static mut MED_TCB: Tcb = Tcb::new();
static mut LOW_STK: [StackElement; 256] = [0; 256];
static mut LOW_TCB: Tcb = Tcb::new();

/// High priority thread (prio=5)
fn high_entry(_arg: *mut ()) {
    t_thread_sleep(50);

    loop {
        let n = HIGH_RUNS.fetch_add(1, Ordering::Relaxed) + 1;

        let _ = MTX.acquire(Timeout::Forever);
        info!("[HIGH] acquired #{}", n);

        for _ in 0..1_000 {
            cortex_m::asm::nop();
        }

        let _ = MTX.release();
        t_thread_sleep(100);
    }
}

/// Medium priority thread (prio=4) - CPU bound
fn med_entry(_arg: *mut ()) {
    loop {
        for _ in 0..50_000 {
            cortex_m::asm::nop();
        }
        t_thread_sleep(10);
    }
}

/// Low priority thread (prio=3) - holds the mutex for a long time
fn low_entry(_arg: *mut ()) {
    loop {
        let n = LOW_RUNS.fetch_add(1, Ordering::Relaxed) + 1;

        let _ = MTX.acquire(Timeout::Forever);
        info!("[LOW] holding #{}", n);

        for _ in 0..100_000 {
            cortex_m::asm::nop();
        }

        let _ = MTX.release();
        t_thread_sleep(200);
    }
}

#[entry]
fn main() -> ! {
    info!("Priority Inversion Demo: H(5) M(4) L(3)");

    t_init().expect("kernel init failed");
    MTX.create(WaitMode::Prio).unwrap();

    unsafe {
        t_thread_create_static(low_entry, &mut *addr_of_mut!(LOW_STK), 3, null_mut(), 10, &mut *addr_of_mut!(LOW_TCB)).unwrap();
        t_thread_create_static(med_entry, &mut *addr_of_mut!(MED_STK), 4, null_mut(), 10, &mut *addr_of_mut!(MED_TCB)).unwrap();
        t_thread_create_static(high_entry, &mut *addr_of_mut!(HIGH_STK), 5, null_mut(), 10, &mut *addr_of_mut!(HIGH_TCB)).unwrap();

        t_thread_startup(core::ptr::NonNull::new_unchecked(addr_of_mut!(LOW_TCB))).unwrap();
        t_thread_startup(core::ptr::NonNull::new_unchecked(addr_of_mut!(MED_TCB))).unwrap();
        t_thread_startup(core::ptr::NonNull::new_unchecked(addr_of_mut!(HIGH_TCB))).unwrap();
    }

    tortos::port::t_systick_init(16_000_000 / tortos::config::TICK_RATE_HZ);

    info!("Starting...");
    t_start()
}
