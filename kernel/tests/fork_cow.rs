//! Fork's copy-on-write path: a child's VMA table starts as an exact
//! copy of the parent's, and the frames they initially share carry a
//! refcount reflecting both holders, not a fresh copy.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use impos_kernel::{
    exit_qemu,
    mm::{
        frame_refcount, vas::{VmaFlags, VmaTable, VmaType},
        PhysAddr,
    },
    serial_println, test_panic_handler, QemuExitCode,
};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("starting fork/cow test...");

    test_cloned_table_matches_parent();
    test_shared_frame_refcount_reflects_both_holders();

    serial_println!("all tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_cloned_table_matches_parent() {
    let mut parent = VmaTable::new(0x5000_0000);
    parent
        .insert(0x4000_0000, 0x4000_3000, VmaFlags::READ | VmaFlags::WRITE, VmaType::Heap)
        .expect("insert heap vma");
    parent
        .insert(0x4010_0000, 0x4011_0000, VmaFlags::READ | VmaFlags::WRITE, VmaType::Stack)
        .expect("insert stack vma");

    let child = VmaTable::clone(&parent);

    let heap_addr = impos_kernel::mm::VirtAddr::new(0x4000_1000);
    let parent_vma = parent.find(heap_addr).expect("parent heap vma");
    let child_vma = child.find(heap_addr).expect("child heap vma");
    assert_eq!(parent_vma.start, child_vma.start);
    assert_eq!(parent_vma.end, child_vma.end);
    assert_eq!(parent_vma.flags, child_vma.flags);

    // The tables are independent after cloning: removing from one must
    // not touch the other.
    let mut parent = parent;
    parent.remove(0x4000_0000, 0x4000_3000).expect("remove from parent");
    assert!(parent.find(heap_addr).is_none());
    assert!(child.find(heap_addr).is_some());

    serial_println!("[ok] cloned vma table matches and then diverges");
}

fn test_shared_frame_refcount_reflects_both_holders() {
    let frame = PhysAddr::new(0x0020_0000);

    frame_refcount::set_to_one(frame);
    assert_eq!(frame_refcount::get(frame), 1);

    // fork: the child maps the same frame, so it picks up a second
    // holder instead of a fresh copy.
    frame_refcount::inc(frame);
    assert_eq!(frame_refcount::get(frame), 2);

    // a write fault in either task copies the page and drops its share
    // of the original.
    let remaining = frame_refcount::dec(frame);
    assert_eq!(remaining, 1);

    serial_println!("[ok] shared frame refcount tracks both holders");
}
