//! Producer/Consumer Demo - bounded message queue
//!
//! A producer pushes a counter every 20 ticks; a slower consumer drains
//! the queue, exercising the blocking send path when it fills up.

#![no_std]
#![no_main]

use core::ptr::{addr_of_mut, null_mut};

use cortex_m_rt::entry;
use defmt::info;

use tortos::types::{StackElement, Timeout, WaitMode};
use tortos::{
    t_init, t_start, t_thread_create_static, t_thread_sleep, t_thread_startup, MessageQueue, Tcb,
};

static QUEUE: MessageQueue<u32, 8> = MessageQueue::new();

static mut PRODUCER_STK: [StackElement; 256] = [0; 256];
static mut PRODUCER_TCB: Tcb = Tcb::new();
static mut CONSUMER_STK: [StackElement; 256] = [0; 256];
static mut CONSUMER_TCB: Tcb = Tcb::new();

fn producer_entry(_arg: *mut ()) {
    let mut next = 0u32;
    loop {
        next += 1;
        match QUEUE.send(&next, Timeout::Ticks(500)) {
            Ok(()) => info!("[producer] sent {}", next),
            Err(e) => info!("[producer] send failed: {}", e),
        }
        t_thread_sleep(20);
    }
}

fn consumer_entry(_arg: *mut ()) {
    loop {
        match QUEUE.recv(Timeout::Forever) {
            Ok(value) => info!("[consumer] got {}", value),
            Err(e) => info!("[consumer] recv failed: {}", e),
        }
        t_thread_sleep(50);
    }
}

#[entry]
fn main() -> ! {
    info!("Producer/Consumer Demo");

    t_init().expect("kernel init failed");
    QUEUE.create(WaitMode::Fifo).unwrap();

    unsafe {
        t_thread_create_static(producer_entry, &mut *addr_of_mut!(PRODUCER_STK), 5, null_mut(), 10, &mut *addr_of_mut!(PRODUCER_TCB)).unwrap();
        t_thread_create_static(consumer_entry, &mut *addr_of_mut!(CONSUMER_STK), 5, null_mut(), 10, &mut *addr_of_mut!(CONSUMER_TCB)).unwrap();

        t_thread_startup(core::ptr::NonNull::new_unchecked(addr_of_mut!(PRODUCER_TCB))).unwrap();
        t_thread_startup(core::ptr::NonNull::new_unchecked(addr_of_mut!(CONSUMER_TCB))).unwrap();
    }

    tortos::port::t_systick_init(16_000_000 / tortos::config::TICK_RATE_HZ);

    info!("Starting...");
    t_start()
}
