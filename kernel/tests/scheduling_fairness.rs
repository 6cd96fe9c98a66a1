//! Ready-queue policy: a higher priority class always preempts a lower
//! one, tasks within the same class round-robin in FIFO order, and a
//! slot already queued for its class can't be queued twice. Exercised
//! directly against the ready queues rather than through a full task
//! switch, since driving `timer_tick_frame` would mean reloading CR3
//! with a fabricated page directory this binary never set up.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use impos_kernel::{
    exit_qemu,
    sched::{queue::ReadyQueues, PriorityClass},
    serial_println, test_panic_handler, QemuExitCode,
};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("starting scheduling fairness test...");

    test_higher_priority_always_preempts();
    test_round_robin_within_a_class();
    test_requeuing_a_slot_is_idempotent();
    test_slice_length_shrinks_with_priority();

    serial_println!("all tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_higher_priority_always_preempts() {
    let mut ready = ReadyQueues::new();
    ready.push(PriorityClass::Idle, 10);
    ready.push(PriorityClass::Normal, 11);
    ready.push(PriorityClass::Realtime, 12);
    ready.push(PriorityClass::Background, 13);

    assert_eq!(ready.pop_next(), Some(12), "realtime must run before anything else");
    assert_eq!(ready.pop_next(), Some(11), "normal outranks background and idle");
    assert_eq!(ready.pop_next(), Some(13), "background outranks idle");
    assert_eq!(ready.pop_next(), Some(10), "idle only runs once nothing else is ready");
    assert_eq!(ready.pop_next(), None);

    serial_println!("[ok] higher priority classes always preempt lower ones");
}

fn test_round_robin_within_a_class() {
    let mut ready = ReadyQueues::new();
    ready.push(PriorityClass::Normal, 1);
    ready.push(PriorityClass::Normal, 2);
    ready.push(PriorityClass::Normal, 3);

    assert_eq!(ready.pop_next(), Some(1));
    // slot 1 used its slice and goes back to the tail of its own class.
    ready.push(PriorityClass::Normal, 1);
    assert_eq!(ready.pop_next(), Some(2));
    assert_eq!(ready.pop_next(), Some(3));
    assert_eq!(ready.pop_next(), Some(1), "slot 1 comes back around after 2 and 3");

    serial_println!("[ok] same-class tasks round-robin in FIFO order");
}

fn test_requeuing_a_slot_is_idempotent() {
    let mut ready = ReadyQueues::new();
    ready.push(PriorityClass::Normal, 5);
    ready.push(PriorityClass::Normal, 5); // already queued: must not duplicate

    assert_eq!(ready.pop_next(), Some(5));
    assert_eq!(ready.pop_next(), None, "slot 5 must not have been queued twice");

    serial_println!("[ok] pushing an already-queued slot is a no-op");
}

fn test_slice_length_shrinks_with_priority() {
    assert!(PriorityClass::Realtime.slice_ticks() < PriorityClass::Normal.slice_ticks());
    assert!(PriorityClass::Normal.slice_ticks() < PriorityClass::Background.slice_ticks());
    assert!(PriorityClass::Background.slice_ticks() < PriorityClass::Idle.slice_ticks());

    serial_println!("[ok] higher-priority classes get shorter time slices");
}
